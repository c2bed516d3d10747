//! Ingestion loop: queue reader to job buffer.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::buffer::{JobSender, PushOutcome};
use crate::consumer::QueueReader;
use crate::error::QueueError;
use crate::stats::PipelineStats;

use super::wait_or_cancel;

/// Pause after a read that returned no message.
pub const IDLE_WAIT: Duration = Duration::from_millis(50);

/// How long a payload may wait for buffer space before it is dropped.
pub const PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Read payloads from `reader` and push them into `jobs` until `cancel` fires.
///
/// Read failures are retried forever with capped exponential back-off; the
/// attempt counter resets after any successful read. A payload that cannot
/// be buffered within [`PUSH_TIMEOUT`] is dropped.
pub async fn ingest_loop(
    reader: &dyn QueueReader,
    jobs: &JobSender,
    backoff: &Backoff,
    stats: &PipelineStats,
    cancel: &CancellationToken,
) {
    let mut retry: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let payload = match reader.read_message(cancel).await {
            Ok(payload) => payload,
            Err(QueueError::Cancelled) => break,
            Err(e) => {
                let delay = backoff.delay_for_attempt(retry);
                error!(
                    error = %e,
                    retry,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Queue read failed, backing off"
                );
                if !wait_or_cancel(delay, cancel).await {
                    break;
                }
                retry = retry.saturating_add(1);
                continue;
            }
        };
        retry = 0;

        if payload.is_empty() {
            if !wait_or_cancel(IDLE_WAIT, cancel).await {
                break;
            }
            continue;
        }

        stats.record_received();
        match jobs.push_timeout(payload, PUSH_TIMEOUT, cancel).await {
            PushOutcome::Enqueued => {
                stats.record_enqueued();
                debug!(buffered = jobs.len(), "Payload buffered");
            }
            PushOutcome::Full => {
                stats.record_dropped();
                warn!(capacity = jobs.capacity(), "Job buffer full, dropping payload");
            }
            PushOutcome::Cancelled | PushOutcome::Closed => break,
        }
    }

    info!("Ingestion stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::JobBuffer;
    use crate::memory::MemoryQueue;
    use bytes::Bytes;
    use std::sync::Arc;

    fn spawn_ingest(
        queue: &MemoryQueue,
        jobs: JobSender,
        cancel: &CancellationToken,
    ) -> (tokio::task::JoinHandle<JobSender>, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::default());
        let handle = {
            let queue = queue.clone();
            let stats = Arc::clone(&stats);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                ingest_loop(&queue, &jobs, &Backoff::default(), &stats, &cancel).await;
                jobs
            })
        };
        (handle, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_failed_reads() {
        let queue = MemoryQueue::new();
        queue.fail_next_reads(3);
        queue.push("payload");
        let (tx, rx) = JobBuffer::bounded(4);
        let cancel = CancellationToken::new();
        let (handle, stats) = spawn_ingest(&queue, tx, &cancel);

        assert_eq!(rx.recv().await, Some(Bytes::from("payload")));
        cancel.cancel();
        handle.await.unwrap();

        let reads = queue.read_instants();
        assert!(reads.len() >= 4);
        let waits: Vec<Duration> = reads.windows(2).take(3).map(|w| w[1] - w[0]).collect();
        for (wait, expected_ms) in waits.iter().zip([1, 2, 4]) {
            let expected = Duration::from_millis(expected_ms);
            assert!(*wait >= expected, "waited {wait:?}, expected {expected:?}");
            assert!(*wait < expected + Duration::from_millis(1));
        }
        assert_eq!(stats.snapshot().enqueued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_successful_read() {
        let queue = MemoryQueue::new();
        queue.fail_next_reads(3);
        queue.push("first");
        let (tx, rx) = JobBuffer::bounded(4);
        let cancel = CancellationToken::new();
        let (handle, _stats) = spawn_ingest(&queue, tx, &cancel);

        assert_eq!(rx.recv().await, Some(Bytes::from("first")));
        queue.fail_next_reads(2);
        queue.push("second");
        assert_eq!(rx.recv().await, Some(Bytes::from("second")));

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.failed_read_instants().len() < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
        handle.await.unwrap();

        let failed = queue.failed_read_instants();
        let reads = queue.read_instants();
        let next_read_after = |at: tokio::time::Instant| {
            reads.iter().copied().find(|r| *r > at).unwrap()
        };

        // Second run of failures: the first wait is back at the minimum.
        let wait = next_read_after(failed[3]) - failed[3];
        assert!(wait >= Duration::from_millis(1), "waited {wait:?}");
        assert!(wait < Duration::from_millis(2), "waited {wait:?}");

        let wait = next_read_after(failed[4]) - failed[4];
        assert!(wait >= Duration::from_millis(2), "waited {wait:?}");
        assert!(wait < Duration::from_millis(4), "waited {wait:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_drops_payload() {
        let queue = MemoryQueue::new();
        queue.push("first");
        queue.push("second");
        let (tx, rx) = JobBuffer::bounded(1);
        let cancel = CancellationToken::new();
        let (handle, stats) = spawn_ingest(&queue, tx, &cancel);

        tokio::time::sleep(PUSH_TIMEOUT * 3).await;
        cancel.cancel();
        let tx = handle.await.unwrap();

        let summary = stats.snapshot();
        assert_eq!(summary.received, 2);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.dropped, 1);

        tx.close();
        assert_eq!(rx.recv().await, Some(Bytes::from("first")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_reading_after_cancel() {
        let queue = MemoryQueue::new();
        let (tx, _rx) = JobBuffer::bounded(4);
        let cancel = CancellationToken::new();
        let (handle, _stats) = spawn_ingest(&queue, tx, &cancel);

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap();

        let reads_at_cancel = queue.read_instants().len();
        queue.push("late");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(queue.read_instants().len(), reads_at_cancel);
        assert_eq!(queue.pending(), 1);
    }
}
