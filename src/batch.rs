//! Batched hand-off of records to a [`GraphSink`].
//!
//! Records accumulate until `batch_size`; a full batch is written on a spawned
//! task while the next one fills. Before a batch is dispatched the previous
//! write must have completed, so at most one write per writer is in flight and
//! batches reach the sink in source order.

use crate::config::RetryPolicy;
use crate::error::SinkError;
use crate::models::{Edge, PageRecord};
use crate::sink::GraphSink;
use crate::stats::IngestStats;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Sink method used to write one batch.
pub type Dispatch<S, R> = for<'a> fn(&'a S, &'a [R]) -> BoxFuture<'a, Result<(), SinkError>>;

pub fn dispatch_pages<'a, S: GraphSink>(
    sink: &'a S,
    batch: &'a [PageRecord],
) -> BoxFuture<'a, Result<(), SinkError>> {
    sink.insert_pages(batch).boxed()
}

pub fn dispatch_redirects<'a, S: GraphSink>(
    sink: &'a S,
    batch: &'a [Edge],
) -> BoxFuture<'a, Result<(), SinkError>> {
    sink.insert_redirects(batch).boxed()
}

pub fn dispatch_links<'a, S: GraphSink>(
    sink: &'a S,
    batch: &'a [Edge],
) -> BoxFuture<'a, Result<(), SinkError>> {
    sink.insert_links(batch).boxed()
}

pub struct BatchWriter<S, R> {
    sink: Arc<S>,
    dispatch: Dispatch<S, R>,
    label: &'static str,
    batch_size: usize,
    retry: RetryPolicy,
    stats: Arc<IngestStats>,
    pending: Vec<R>,
    in_flight: Option<JoinHandle<()>>,
    dispatched: u64,
}

impl<S, R> BatchWriter<S, R>
where
    S: GraphSink,
    R: Send + Sync + 'static,
{
    pub fn new(
        sink: Arc<S>,
        dispatch: Dispatch<S, R>,
        label: &'static str,
        batch_size: usize,
        retry: RetryPolicy,
        stats: Arc<IngestStats>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            dispatch,
            label,
            batch_size,
            retry,
            stats,
            pending: Vec::with_capacity(batch_size),
            in_flight: None,
            dispatched: 0,
        }
    }

    /// Queues one record; dispatches the batch once full.
    pub async fn push(&mut self, record: R) -> Result<()> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.dispatch_pending().await?;
        }
        Ok(())
    }

    /// Number of batches handed to the sink so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Flushes the final partial batch and waits for the last write.
    pub async fn finish(mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.dispatch_pending().await?;
        }
        self.wait_in_flight().await
    }

    async fn dispatch_pending(&mut self) -> Result<()> {
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        self.wait_in_flight().await?;

        self.dispatched += 1;
        debug!(
            sink = self.label,
            batch = self.dispatched,
            records = batch.len(),
            "Dispatching batch"
        );
        let task = write_with_retry(
            Arc::clone(&self.sink),
            self.dispatch,
            batch,
            self.label,
            self.dispatched,
            self.retry,
            Arc::clone(&self.stats),
        );
        self.in_flight = Some(tokio::spawn(task));
        Ok(())
    }

    async fn wait_in_flight(&mut self) -> Result<()> {
        if let Some(handle) = self.in_flight.take() {
            handle
                .await
                .with_context(|| format!("{} batch writer task failed", self.label))?;
        }
        Ok(())
    }
}

/// Writes one batch, retrying per `retry`. Exhausted retries are counted, not fatal.
async fn write_with_retry<S, R>(
    sink: Arc<S>,
    dispatch: Dispatch<S, R>,
    batch: Vec<R>,
    label: &'static str,
    seq: u64,
    retry: RetryPolicy,
    stats: Arc<IngestStats>,
) where
    S: GraphSink,
    R: Send + Sync + 'static,
{
    let mut attempt = 0u32;
    loop {
        let message = match dispatch(sink.as_ref(), batch.as_slice()).await {
            Ok(()) => return,
            Err(e) => e.to_string(),
        };
        if attempt >= retry.max_retries {
            error!(
                sink = label,
                batch = seq,
                records = batch.len(),
                attempts = attempt + 1,
                error = %message,
                "Sink write failed, dropping batch"
            );
            stats.record_failed_batch(batch.len());
            return;
        }
        attempt += 1;
        let delay = retry.delay_for(attempt);
        warn!(
            sink = label,
            batch = seq,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "Sink write failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
