//! The page, redirect, link-target and link passes.
//!
//! Passes run strictly in order. The page pass returns the [`PageIndex`] by
//! value; later passes borrow it (and the [`RedirectIndex`]) immutably. Every
//! table is read through the same [`Rows`] reader driven by a
//! [`TableStrategy`].

use crate::batch::{dispatch_links, dispatch_pages, dispatch_redirects, BatchWriter, Dispatch};
use crate::config::{IngestConfig, RetryPolicy};
use crate::index::{LinkTargetIndex, PageIndex, RedirectIndex, RedirectResolver, Unresolved};
use crate::models::{Edge, PageRecord, PendingRedirect, TableKind};
use crate::progress::ProgressReporter;
use crate::sink::GraphSink;
use crate::stats::IngestStats;
use crate::tables::{
    LinkTarget, TableStrategy, LEGACY_PAGE_LINKS, LINK_TARGETS, PAGES, PAGE_LINKS, REDIRECTS,
};
use crate::tokenizer::{ColumnSchema, TupleStream};
use crate::transport::{build_client, ChunkSource, DumpStream};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// The subset of [`IngestConfig`] the passes consume.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub namespace: i32,
    pub batch_size: usize,
    pub max_redirect_depth: u32,
    pub progress_interval: u64,
    pub sink_retry: RetryPolicy,
}

impl From<&IngestConfig> for ResolveOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            namespace: config.namespace,
            batch_size: config.batch_size,
            max_redirect_depth: config.max_redirect_depth,
            progress_interval: config.progress_interval,
            sink_retry: config.sink_retry,
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

/// Typed rows of one table, with skips counted and progress reported.
struct Rows<'s, 'p, C, T: 'static> {
    stream: TupleStream<'s, C>,
    strategy: &'static TableStrategy<T>,
    namespace: i32,
    stats: &'p IngestStats,
    progress: &'p mut dyn ProgressReporter,
    interval: u64,
    parsed: u64,
}

impl<'s, 'p, C: ChunkSource, T: 'static> Rows<'s, 'p, C, T> {
    fn new(
        source: &'s mut C,
        strategy: &'static TableStrategy<T>,
        options: &ResolveOptions,
        stats: &'p IngestStats,
        progress: &'p mut dyn ProgressReporter,
    ) -> Self {
        progress.start(strategy.kind, source.total_size());
        info!(table = %strategy.kind, "Starting pass");
        Self {
            stream: TupleStream::new(source, strategy.columns),
            strategy,
            namespace: options.namespace,
            stats,
            progress,
            interval: options.progress_interval.max(1),
            parsed: 0,
        }
    }

    async fn next(&mut self) -> Result<Option<T>> {
        loop {
            let tuple = self
                .stream
                .next_tuple()
                .await
                .with_context(|| format!("Failed reading {} dump", self.strategy.kind))?;
            let Some(tuple) = tuple else {
                return Ok(None);
            };
            match (self.strategy.parse)(tuple, self.namespace) {
                Ok(row) => {
                    self.parsed += 1;
                    if self.parsed % self.interval == 0 {
                        self.progress.log(self.stream.bytes_read(), self.parsed);
                    }
                    return Ok(Some(row));
                }
                Err(skip) => self.stats.record_skip(skip),
            }
        }
    }

    fn finish(self) {
        IngestStats::add(&self.stats.malformed, self.stream.malformed());
        self.progress.finish(self.stream.bytes_read(), self.parsed);
    }
}

/// Runs the passes against one sink.
pub struct Resolver<S> {
    sink: Arc<S>,
    options: ResolveOptions,
    stats: Arc<IngestStats>,
}

impl<S: GraphSink> Resolver<S> {
    pub fn new(sink: Arc<S>, options: ResolveOptions) -> Self {
        Self {
            sink,
            options,
            stats: Arc::new(IngestStats::new()),
        }
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    fn writer<R: Send + Sync + 'static>(
        &self,
        dispatch: Dispatch<S, R>,
        label: &'static str,
    ) -> BatchWriter<S, R> {
        BatchWriter::new(
            Arc::clone(&self.sink),
            dispatch,
            label,
            self.options.batch_size,
            self.options.sink_retry,
            Arc::clone(&self.stats),
        )
    }

    fn rows<'s, 'p, C: ChunkSource, T: 'static>(
        &'p self,
        source: &'s mut C,
        strategy: &'static TableStrategy<T>,
        progress: &'p mut dyn ProgressReporter,
    ) -> Rows<'s, 'p, C, T> {
        Rows::new(source, strategy, &self.options, &self.stats, progress)
    }

    /// Indexes every page in the namespace and hands page records to the sink.
    pub async fn pages<C: ChunkSource>(
        &self,
        source: &mut C,
        progress: &mut dyn ProgressReporter,
    ) -> Result<PageIndex> {
        let mut rows = self.rows(source, &PAGES, progress);
        let mut writer = self.writer(dispatch_pages::<S>, "pages");
        let mut index = PageIndex::new();

        while let Some(row) = rows.next().await? {
            index.insert(row.title.clone(), row.id, row.is_redirect);
            IngestStats::inc(&self.stats.pages);
            writer
                .push(PageRecord {
                    id: row.id,
                    title: row.title,
                    is_redirect: row.is_redirect,
                })
                .await?;
        }
        rows.finish();
        writer.finish().await?;

        info!(pages = index.len(), "Page index built");
        Ok(index)
    }

    /// Emits redirect edges to terminal pages and returns the single-hop redirect table.
    ///
    /// Redirects whose target is itself a redirect are deferred until the
    /// stream drains, then walked through the completed table.
    pub async fn redirects<C: ChunkSource>(
        &self,
        source: &mut C,
        pages: &PageIndex,
        progress: &mut dyn ProgressReporter,
    ) -> Result<RedirectIndex> {
        let mut rows = self.rows(source, &REDIRECTS, progress);
        let mut writer = self.writer(dispatch_redirects::<S>, "redirects");
        let mut redirects = RedirectIndex::new();
        let mut pending = Vec::new();

        while let Some(row) = rows.next().await? {
            let Some(target) = pages.get(&row.to_title) else {
                debug!(from = row.from, to = %row.to_title, "Redirect to unknown title");
                self.stats.record_unresolved(Unresolved::UnknownTitle);
                continue;
            };
            redirects.insert(row.from, row.to_title.clone());
            if target.is_redirect {
                IngestStats::inc(&self.stats.pending_redirects);
                pending.push(PendingRedirect {
                    from_id: row.from,
                    to_title: row.to_title,
                });
            } else {
                IngestStats::inc(&self.stats.redirect_edges);
                writer
                    .push(Edge {
                        from: row.from,
                        to: target.id,
                    })
                    .await?;
            }
        }
        rows.finish();

        info!(pending = pending.len(), "Resolving redirect chains");
        let resolver = RedirectResolver::new(pages, &redirects, self.options.max_redirect_depth);
        for entry in pending {
            // The hop into `to_title` already counts against the limit.
            match resolver.resolve(&entry.to_title, 1) {
                Ok(to) => {
                    IngestStats::inc(&self.stats.redirect_edges);
                    IngestStats::inc(&self.stats.chained_redirect_edges);
                    writer.push(Edge { from: entry.from_id, to }).await?;
                }
                Err(reason) => {
                    debug!(from = entry.from_id, to = %entry.to_title, ?reason, "Dropping redirect chain");
                    self.stats.record_unresolved(reason);
                }
            }
        }
        writer.finish().await?;

        info!(redirects = redirects.len(), "Redirect index built");
        Ok(redirects)
    }

    /// Loads the `linktarget` id to title table.
    pub async fn link_targets<C: ChunkSource>(
        &self,
        source: &mut C,
        progress: &mut dyn ProgressReporter,
    ) -> Result<LinkTargetIndex> {
        let mut rows = self.rows(source, &LINK_TARGETS, progress);
        let mut targets = LinkTargetIndex::new();
        while let Some(row) = rows.next().await? {
            targets.insert(row.id, row.title);
            IngestStats::inc(&self.stats.link_targets);
        }
        rows.finish();

        info!(link_targets = targets.len(), "Link target index built");
        Ok(targets)
    }

    /// Resolves every link to a terminal page and hands the edges to the sink.
    ///
    /// With `targets` the current `pagelinks` layout is read; without, the
    /// legacy layout with inline titles.
    pub async fn links<C: ChunkSource>(
        &self,
        source: &mut C,
        pages: &PageIndex,
        redirects: &RedirectIndex,
        targets: Option<&LinkTargetIndex>,
        progress: &mut dyn ProgressReporter,
    ) -> Result<()> {
        let strategy = if targets.is_some() {
            &PAGE_LINKS
        } else {
            &LEGACY_PAGE_LINKS
        };
        let mut rows = self.rows(source, strategy, progress);
        let mut writer = self.writer(dispatch_links::<S>, "links");
        let resolver = RedirectResolver::new(pages, redirects, self.options.max_redirect_depth);

        while let Some(row) = rows.next().await? {
            let title = match &row.target {
                LinkTarget::Title(title) => title.as_str(),
                LinkTarget::Id(id) => match targets.and_then(|t| t.get(*id)) {
                    Some(title) => title,
                    None => {
                        IngestStats::inc(&self.stats.unknown_link_target);
                        continue;
                    }
                },
            };
            match resolver.resolve(title, 0) {
                Ok(to) => {
                    IngestStats::inc(&self.stats.link_edges);
                    writer.push(Edge { from: row.from, to }).await?;
                }
                Err(reason) => self.stats.record_unresolved(reason),
            }
        }
        rows.finish();
        writer.finish().await?;

        info!(
            links = IngestStats::get(&self.stats.link_edges),
            "Link pass complete"
        );
        Ok(())
    }
}

async fn open_dump(
    config: &IngestConfig,
    kind: TableKind,
    client: &reqwest::Client,
) -> Result<DumpStream> {
    DumpStream::open(config, kind, client)
        .await
        .with_context(|| format!("Failed to open {kind} dump at {}", config.describe(kind)))
}

/// Streams all tables of one wiki into `sink`.
pub async fn run_ingest<S: GraphSink>(
    config: &IngestConfig,
    sink: Arc<S>,
    progress: &mut dyn ProgressReporter,
) -> Result<Arc<IngestStats>> {
    let client = build_client().context("Failed to build HTTP client")?;
    let resolver = Resolver::new(Arc::clone(&sink), ResolveOptions::from(config));

    let mut source = open_dump(config, TableKind::Page, &client).await?;
    let pages = resolver.pages(&mut source, progress).await?;

    let mut source = open_dump(config, TableKind::Redirect, &client).await?;
    let redirects = resolver.redirects(&mut source, &pages, progress).await?;

    let targets = if config.link_targets {
        let mut source = open_dump(config, TableKind::LinkTarget, &client).await?;
        Some(resolver.link_targets(&mut source, progress).await?)
    } else {
        None
    };

    let mut source = open_dump(config, TableKind::PageLinks, &client).await?;
    resolver
        .links(&mut source, &pages, &redirects, targets.as_ref(), progress)
        .await?;

    sink.flush().await.context("Failed to flush sink")?;
    let stats = Arc::clone(resolver.stats());
    stats.log_summary();
    Ok(stats)
}

/// Reads only the header of one table's dump.
pub async fn inspect_schema(config: &IngestConfig, kind: TableKind) -> Result<ColumnSchema> {
    let client = build_client().context("Failed to build HTTP client")?;
    let mut source = open_dump(config, kind, &client).await?;
    let mut stream = TupleStream::new(&mut source, &[]);
    stream
        .discover_schema()
        .await
        .with_context(|| format!("Failed to read {kind} dump header"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, TransportError};
    use crate::progress::NoProgress;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct TextSource {
        chunks: VecDeque<Vec<u8>>,
        read: u64,
    }

    impl TextSource {
        fn new(text: &str) -> Self {
            Self {
                chunks: text.as_bytes().chunks(37).map(<[u8]>::to_vec).collect(),
                read: 0,
            }
        }
    }

    impl ChunkSource for TextSource {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            let chunk = self.chunks.pop_front();
            if let Some(c) = &chunk {
                self.read += c.len() as u64;
            }
            Ok(chunk)
        }

        fn bytes_read(&self) -> u64 {
            self.read
        }

        fn total_size(&self) -> u64 {
            0
        }
    }

    #[derive(Default)]
    struct MemorySink {
        pages: Mutex<Vec<PageRecord>>,
        redirects: Mutex<Vec<Edge>>,
        links: Mutex<Vec<Edge>>,
    }

    impl GraphSink for MemorySink {
        async fn insert_pages(&self, batch: &[PageRecord]) -> Result<(), SinkError> {
            self.pages.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }

        async fn insert_redirects(&self, batch: &[Edge]) -> Result<(), SinkError> {
            self.redirects.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }

        async fn insert_links(&self, batch: &[Edge]) -> Result<(), SinkError> {
            self.links.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    fn dump(table: &str, columns: &[&str], values: &str) -> String {
        let mut out = format!("-- MySQL dump\nCREATE TABLE `{table}` (\n");
        for column in columns {
            out.push_str(&format!("  `{column}` varbinary(255) NOT NULL,\n"));
        }
        out.push_str(") ENGINE=InnoDB;\n");
        out.push_str(&format!("INSERT INTO `{table}` VALUES {values};\n"));
        out
    }

    fn page_dump(values: &str) -> String {
        dump(
            "page",
            &["page_id", "page_namespace", "page_title", "page_restrictions", "page_is_redirect"],
            values,
        )
    }

    fn redirect_dump(values: &str) -> String {
        dump(
            "redirect",
            &["rd_from", "rd_namespace", "rd_title", "rd_interwiki", "rd_fragment"],
            values,
        )
    }

    fn legacy_links_dump(values: &str) -> String {
        dump(
            "pagelinks",
            &["pl_from", "pl_namespace", "pl_title", "pl_from_namespace"],
            values,
        )
    }

    fn options(batch_size: usize) -> ResolveOptions {
        ResolveOptions {
            batch_size,
            ..ResolveOptions::default()
        }
    }

    async fn build(
        resolver: &Resolver<MemorySink>,
        pages: &str,
        redirects: &str,
    ) -> (PageIndex, RedirectIndex) {
        let page_index = resolver
            .pages(&mut TextSource::new(&page_dump(pages)), &mut NoProgress)
            .await
            .unwrap();
        let redirect_index = resolver
            .redirects(
                &mut TextSource::new(&redirect_dump(redirects)),
                &page_index,
                &mut NoProgress,
            )
            .await
            .unwrap();
        (page_index, redirect_index)
    }

    #[tokio::test]
    async fn redirect_and_link_resolve_to_terminal_page() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(Arc::clone(&sink), options(2));
        let (pages, redirects) = build(
            &resolver,
            "(1,0,'A','',1),(2,0,'B','',0),(3,0,'C','',0)",
            "(1,0,'B','',NULL)",
        )
        .await;
        resolver
            .links(
                &mut TextSource::new(&legacy_links_dump("(3,0,'A',0)")),
                &pages,
                &redirects,
                None,
                &mut NoProgress,
            )
            .await
            .unwrap();

        assert_eq!(sink.pages.lock().unwrap().len(), 3);
        assert!(sink.pages.lock().unwrap()[0].is_redirect);
        assert_eq!(*sink.redirects.lock().unwrap(), vec![Edge { from: 1, to: 2 }]);
        assert_eq!(*sink.links.lock().unwrap(), vec![Edge { from: 3, to: 2 }]);
    }

    #[tokio::test]
    async fn namespace_filter_drops_everything_outside_main() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(Arc::clone(&sink), options(10));
        let (pages, redirects) = build(
            &resolver,
            "(1,0,'A','',0),(2,14,'Cat','',0),(3,4,'Proj','',1)",
            "(3,4,'A','',NULL)",
        )
        .await;
        resolver
            .links(
                &mut TextSource::new(&legacy_links_dump("(1,14,'Cat',0),(2,0,'A',14)")),
                &pages,
                &redirects,
                None,
                &mut NoProgress,
            )
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert!(sink.redirects.lock().unwrap().is_empty());
        assert!(sink.links.lock().unwrap().is_empty());
        assert_eq!(IngestStats::get(&resolver.stats().namespace_filtered), 5);
    }

    #[tokio::test]
    async fn chained_redirects_are_resolved_after_the_stream() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(Arc::clone(&sink), options(10));
        // A -> B -> C, with A's row arriving before B's
        build(
            &resolver,
            "(1,0,'A','',1),(2,0,'B','',1),(3,0,'C','',0)",
            "(1,0,'B','',NULL),(2,0,'C','',NULL)",
        )
        .await;

        let mut edges = sink.redirects.lock().unwrap().clone();
        edges.sort_by_key(|e| e.from);
        assert_eq!(edges, vec![Edge { from: 1, to: 3 }, Edge { from: 2, to: 3 }]);
        assert_eq!(IngestStats::get(&resolver.stats().pending_redirects), 1);
        assert_eq!(IngestStats::get(&resolver.stats().chained_redirect_edges), 1);
    }

    #[tokio::test]
    async fn overlong_chain_produces_no_edge() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(Arc::clone(&sink), options(10));

        // R0 -> R1 -> ... -> R11 (terminal): eleven hops from R0
        let pages: Vec<String> = (0..=11)
            .map(|i| format!("({},0,'R{i}','',{})", i + 1, u8::from(i < 11)))
            .collect();
        let redirects: Vec<String> = (0..11)
            .map(|i| format!("({},0,'R{}','',NULL)", i + 1, i + 1))
            .collect();
        let (page_index, redirect_index) =
            build(&resolver, &pages.join(","), &redirects.join(",")).await;

        resolver
            .links(
                &mut TextSource::new(&legacy_links_dump("(12,0,'R0',0),(12,0,'R1',0)")),
                &page_index,
                &redirect_index,
                None,
                &mut NoProgress,
            )
            .await
            .unwrap();

        let links = sink.links.lock().unwrap().clone();
        assert_eq!(links, vec![Edge { from: 12, to: 12 }]);
        assert!(IngestStats::get(&resolver.stats().too_deep) >= 1);
        // R0's own redirect needs eleven hops as well
        assert!(!sink.redirects.lock().unwrap().contains(&Edge { from: 1, to: 12 }));
        // R0..R9 are deferred; all but R0 reach R11
        assert_eq!(IngestStats::get(&resolver.stats().pending_redirects), 10);
        assert_eq!(IngestStats::get(&resolver.stats().chained_redirect_edges), 9);
        assert_eq!(IngestStats::get(&resolver.stats().redirect_edges), 10);
    }

    #[tokio::test]
    async fn configured_namespace_replaces_main() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(
            Arc::clone(&sink),
            ResolveOptions {
                namespace: 14,
                ..options(10)
            },
        );
        let (pages, redirects) = build(
            &resolver,
            "(1,0,'Art','',0),(2,14,'Art','',0),(3,14,'Old_art','',1),(4,14,'Music','',0)",
            "(3,14,'Art','',NULL),(1,0,'Music','',NULL)",
        )
        .await;
        resolver
            .links(
                &mut TextSource::new(&legacy_links_dump(
                    "(4,14,'Old_art',14),(4,0,'Art',14),(1,14,'Music',0)",
                )),
                &pages,
                &redirects,
                None,
                &mut NoProgress,
            )
            .await
            .unwrap();

        let ids: Vec<u32> = sink.pages.lock().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(pages.get("Art").map(|p| p.id), Some(2));
        assert_eq!(*sink.redirects.lock().unwrap(), vec![Edge { from: 3, to: 2 }]);
        assert_eq!(*sink.links.lock().unwrap(), vec![Edge { from: 4, to: 2 }]);
        // One page, one redirect and two links sit in namespace 0
        assert_eq!(IngestStats::get(&resolver.stats().namespace_filtered), 4);
    }

    #[tokio::test]
    async fn interwiki_and_unknown_redirects_are_dropped() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(Arc::clone(&sink), options(10));
        build(
            &resolver,
            "(1,0,'A','',1),(2,0,'B','',1),(3,0,'C','',0)",
            "(1,0,'C','wikt',NULL),(2,0,'Nowhere','',NULL)",
        )
        .await;

        assert!(sink.redirects.lock().unwrap().is_empty());
        assert_eq!(IngestStats::get(&resolver.stats().interwiki), 1);
        assert_eq!(IngestStats::get(&resolver.stats().unknown_title), 1);
    }

    #[tokio::test]
    async fn modern_links_go_through_link_targets() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(Arc::clone(&sink), options(10));
        let (pages, redirects) = build(
            &resolver,
            "(1,0,'A','',1),(2,0,'B','',0),(3,0,'C','',0)",
            "(1,0,'B','',NULL)",
        )
        .await;
        let targets = resolver
            .link_targets(
                &mut TextSource::new(&dump(
                    "linktarget",
                    &["lt_id", "lt_namespace", "lt_title"],
                    "(100,0,'A'),(101,0,'C'),(102,10,'Template:X')",
                )),
                &mut NoProgress,
            )
            .await
            .unwrap();
        assert_eq!(targets.len(), 2);

        resolver
            .links(
                &mut TextSource::new(&dump(
                    "pagelinks",
                    &["pl_from", "pl_from_namespace", "pl_target_id"],
                    "(3,0,100),(2,0,101),(2,0,102),(2,0,999)",
                )),
                &pages,
                &redirects,
                Some(&targets),
                &mut NoProgress,
            )
            .await
            .unwrap();

        assert_eq!(
            *sink.links.lock().unwrap(),
            vec![Edge { from: 3, to: 2 }, Edge { from: 2, to: 3 }]
        );
        assert_eq!(IngestStats::get(&resolver.stats().unknown_link_target), 2);
    }

    #[tokio::test]
    async fn missing_column_is_fatal() {
        let sink = Arc::new(MemorySink::default());
        let resolver = Resolver::new(Arc::clone(&sink), options(10));
        let text = dump("page", &["page_id", "page_title"], "(1,'A')");
        let err = resolver
            .pages(&mut TextSource::new(&text), &mut NoProgress)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("page_namespace"));
    }
}
