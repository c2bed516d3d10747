//! Fan-out pipeline coordinator.
//!
//! One ingestion loop feeds a bounded job buffer; a pool of processing
//! workers drains it. [`FeedWorker::run`] owns the whole lifecycle:
//!
//! ```text
//! Stopped -> Running -> Draining -> Stopped
//! ```
//!
//! Cancelling the token moves the pipeline to `Draining`: ingestion stops,
//! the buffer is closed by its sole owner, and `run` returns once every
//! worker and every in-flight feed write has finished.

use std::num::NonZeroUsize;
use std::sync::Arc;

use feedline_common::WorkerConfig;
use feedline_db::SharedFeedStore;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::backoff::Backoff;
use crate::buffer::JobBuffer;
use crate::consumer::QueueReader;
use crate::error::QueueError;
use crate::stats::{PipelineStats, RunSummary};
use crate::workers::{ProcessContext, ingest_loop, process_loop};

/// Concurrent feed writes per post when not configured.
pub const DEFAULT_FANOUT_LIMIT: usize = 20;

/// Job buffer slots per processing worker when not configured.
pub const BUFFER_SLOTS_PER_WORKER: usize = 10;

/// Upper bound on the processing pool.
pub const MAX_POOL_SIZE: usize = 1024;

/// Resolved pipeline sizing.
///
/// Every field is at least one. Buffer capacity and fan-out limit never
/// exceed [`Semaphore::MAX_PERMITS`], and the pool never exceeds
/// [`MAX_POOL_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Number of processing workers.
    pub pool_size: usize,
    /// Job buffer capacity.
    pub buffer_capacity: usize,
    /// Concurrent feed writes per post.
    pub fanout_limit: usize,
}

impl PipelineSettings {
    /// Fill in defaults for missing or zero values and clamp oversized ones.
    ///
    /// The pool defaults to the available parallelism, the buffer to ten
    /// slots per worker and the fan-out limit to [`DEFAULT_FANOUT_LIMIT`].
    #[must_use]
    pub fn resolve(
        pool_size: Option<usize>,
        buffer_capacity: Option<usize>,
        fanout_limit: Option<usize>,
    ) -> Self {
        let pool_size = pool_size
            .filter(|&n| n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
            .min(MAX_POOL_SIZE);
        let buffer_capacity = buffer_capacity
            .filter(|&n| n > 0)
            .unwrap_or_else(|| pool_size.saturating_mul(BUFFER_SLOTS_PER_WORKER))
            .min(Semaphore::MAX_PERMITS);
        let fanout_limit = fanout_limit
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_FANOUT_LIMIT)
            .min(Semaphore::MAX_PERMITS);

        Self {
            pool_size,
            buffer_capacity,
            fanout_limit,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::resolve(None, None, None)
    }
}

impl From<&WorkerConfig> for PipelineSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self::resolve(config.pool_size, config.buffer_capacity, config.fanout_limit)
    }
}

/// Lifecycle state of a [`FeedWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not running.
    Stopped,
    /// Ingesting and processing.
    Running,
    /// Shutdown requested; waiting for workers and in-flight writes.
    Draining,
}

/// The fan-out pipeline.
pub struct FeedWorker {
    store: SharedFeedStore,
    reader: Arc<dyn QueueReader>,
    settings: PipelineSettings,
    backoff: Backoff,
    stats: Arc<PipelineStats>,
    state: watch::Sender<PipelineState>,
}

impl FeedWorker {
    /// Create a pipeline over a store and a queue reader.
    #[must_use]
    pub fn new(
        store: SharedFeedStore,
        reader: Arc<dyn QueueReader>,
        settings: PipelineSettings,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Stopped);
        Self {
            store,
            reader,
            settings,
            backoff: Backoff::default(),
            stats: Arc::new(PipelineStats::default()),
            state,
        }
    }

    /// Override the read-failure back-off.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Resolved sizing.
    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> RunSummary {
        self.stats.snapshot()
    }

    /// Run until `cancel` fires, then drain.
    ///
    /// Returns after ingestion has stopped, the job buffer is closed and every
    /// processing worker has exited. Payloads still buffered when an idle
    /// worker observes cancellation are discarded.
    pub async fn run(&self, cancel: CancellationToken) -> RunSummary {
        let settings = self.settings;
        info!(
            workers = settings.pool_size,
            buffer_capacity = settings.buffer_capacity,
            fanout_limit = settings.fanout_limit,
            "Starting fan-out pipeline"
        );
        self.state.send_replace(PipelineState::Running);

        let (jobs_tx, jobs_rx) = JobBuffer::bounded(settings.buffer_capacity);

        let mut workers = JoinSet::new();
        for worker_id in 0..settings.pool_size {
            let ctx = ProcessContext {
                store: Arc::clone(&self.store),
                jobs: jobs_rx.clone(),
                fanout_limit: settings.fanout_limit,
                stats: Arc::clone(&self.stats),
            };
            let span = info_span!("process", worker = worker_id);
            workers.spawn(process_loop(ctx, cancel.clone()).instrument(span));
        }
        drop(jobs_rx);

        ingest_loop(
            self.reader.as_ref(),
            &jobs_tx,
            &self.backoff,
            &self.stats,
            &cancel,
        )
        .instrument(info_span!("ingest"))
        .await;

        self.state.send_replace(PipelineState::Draining);
        let discarded = jobs_tx.len();
        jobs_tx.close();
        info!(buffered = discarded, "Waiting for processing workers");

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Processing worker panicked");
            }
        }

        self.state.send_replace(PipelineState::Stopped);
        let summary = self.stats.snapshot();
        info!(
            received = summary.received,
            dropped = summary.dropped,
            posts_distributed = summary.posts_distributed,
            fan_outs_cut_short = summary.fan_outs_cut_short,
            feed_writes = summary.feed_writes,
            "Fan-out pipeline stopped"
        );
        summary
    }

    /// Release the queue reader and the store.
    ///
    /// Both are always attempted; a queue close failure is returned after
    /// the store has been closed.
    pub async fn close(&self) -> Result<(), QueueError> {
        let queue_result = self.reader.close().await;
        if let Err(e) = &queue_result {
            error!(error = %e, "Failed to close queue reader");
        }

        self.store.close().await;
        queue_result
    }
}
