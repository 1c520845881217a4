use crate::index::Unresolved;
use crate::tables::Skip;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Counters collected during one ingestion run.
///
/// Batch dispatch runs on spawned tasks, so the sink-failure counters are
/// shared through an `Arc` and updated atomically.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub pages: AtomicU64,
    pub redirect_edges: AtomicU64,
    /// Redirects whose target was itself a redirect
    pub pending_redirects: AtomicU64,
    /// Deferred redirects that reached a terminal page
    pub chained_redirect_edges: AtomicU64,
    pub link_targets: AtomicU64,
    pub link_edges: AtomicU64,

    pub namespace_filtered: AtomicU64,
    pub malformed: AtomicU64,
    pub interwiki: AtomicU64,
    pub unknown_title: AtomicU64,
    pub unknown_link_target: AtomicU64,
    pub dangling: AtomicU64,
    pub too_deep: AtomicU64,

    pub batches_failed: AtomicU64,
    pub records_lost: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, count: u64) {
        counter.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn record_skip(&self, skip: Skip) {
        let counter = match skip {
            Skip::Namespace => &self.namespace_filtered,
            Skip::Malformed => &self.malformed,
            Skip::Interwiki => &self.interwiki,
        };
        Self::inc(counter);
    }

    pub fn record_unresolved(&self, reason: Unresolved) {
        let counter = match reason {
            Unresolved::UnknownTitle => &self.unknown_title,
            Unresolved::Dangling => &self.dangling,
            Unresolved::TooDeep => &self.too_deep,
        };
        Self::inc(counter);
    }

    pub fn record_failed_batch(&self, records: usize) {
        Self::inc(&self.batches_failed);
        Self::add(&self.records_lost, records as u64);
    }

    /// Total tuples dropped for any reason before reaching a sink.
    pub fn dropped(&self) -> u64 {
        [
            &self.namespace_filtered,
            &self.malformed,
            &self.interwiki,
            &self.unknown_title,
            &self.unknown_link_target,
            &self.dangling,
            &self.too_deep,
        ]
        .into_iter()
        .map(Self::get)
        .sum()
    }

    pub fn log_summary(&self) {
        info!(
            pages = Self::get(&self.pages),
            redirect_edges = Self::get(&self.redirect_edges),
            pending_redirects = Self::get(&self.pending_redirects),
            chained_redirect_edges = Self::get(&self.chained_redirect_edges),
            link_targets = Self::get(&self.link_targets),
            link_edges = Self::get(&self.link_edges),
            "Ingestion complete"
        );
        info!(
            namespace_filtered = Self::get(&self.namespace_filtered),
            malformed = Self::get(&self.malformed),
            interwiki = Self::get(&self.interwiki),
            unknown_title = Self::get(&self.unknown_title),
            unknown_link_target = Self::get(&self.unknown_link_target),
            dangling = Self::get(&self.dangling),
            too_deep = Self::get(&self.too_deep),
            batches_failed = Self::get(&self.batches_failed),
            records_lost = Self::get(&self.records_lost),
            "Dropped records"
        );
    }
}
