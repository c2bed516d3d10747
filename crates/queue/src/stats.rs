//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::workers::FanOutReport;

/// Counters updated by the ingestion loop and the processing workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    decode_failures: AtomicU64,
    lookup_failures: AtomicU64,
    posts_distributed: AtomicU64,
    fan_outs_cut_short: AtomicU64,
    feed_writes: AtomicU64,
    feed_write_failures: AtomicU64,
}

/// Snapshot of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Non-empty payloads read from the queue.
    pub received: u64,
    /// Payloads placed in the job buffer.
    pub enqueued: u64,
    /// Payloads abandoned because the buffer stayed full.
    pub dropped: u64,
    /// Payloads that did not decode as a post.
    pub decode_failures: u64,
    /// Posts skipped because the follower lookup failed.
    pub lookup_failures: u64,
    /// Posts whose fan-out dispatched every follower.
    pub posts_distributed: u64,
    /// Posts whose fan-out stopped early because of shutdown.
    pub fan_outs_cut_short: u64,
    /// Feed appends that succeeded.
    pub feed_writes: u64,
    /// Feed appends that failed.
    pub feed_write_failures: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    pub(crate) fn record_received(&self) {
        bump(&self.received, 1);
    }

    pub(crate) fn record_enqueued(&self) {
        bump(&self.enqueued, 1);
    }

    pub(crate) fn record_dropped(&self) {
        bump(&self.dropped, 1);
    }

    pub(crate) fn record_decode_failure(&self) {
        bump(&self.decode_failures, 1);
    }

    pub(crate) fn record_lookup_failure(&self) {
        bump(&self.lookup_failures, 1);
    }

    pub(crate) fn record_fan_out(&self, report: &FanOutReport) {
        if report.skipped == 0 {
            bump(&self.posts_distributed, 1);
        } else {
            bump(&self.fan_outs_cut_short, 1);
        }
        bump(&self.feed_writes, report.delivered as u64);
        bump(&self.feed_write_failures, report.failed as u64);
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> RunSummary {
        RunSummary {
            received: self.received.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            posts_distributed: self.posts_distributed.load(Ordering::Relaxed),
            fan_outs_cut_short: self.fan_outs_cut_short.load(Ordering::Relaxed),
            feed_writes: self.feed_writes.load(Ordering::Relaxed),
            feed_write_failures: self.feed_write_failures.load(Ordering::Relaxed),
        }
    }
}
