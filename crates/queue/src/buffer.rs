//! Bounded job buffer between ingestion and processing.
//!
//! The buffer has exactly one producer handle ([`JobSender`]) and a
//! shareable consumer handle ([`JobReceiver`]). Closing consumes the sender,
//! so the buffer can be closed at most once, and only by whoever owns the
//! producer side.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Result of a bounded push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The payload is in the buffer.
    Enqueued,
    /// The buffer stayed full for the whole timeout; the payload was not stored.
    Full,
    /// Cancellation fired first; the payload was not stored.
    Cancelled,
    /// Every consumer is gone; the payload was not stored.
    Closed,
}

/// Constructor for the job buffer halves.
pub struct JobBuffer;

impl JobBuffer {
    /// Create a buffer holding at most `capacity` payloads.
    ///
    /// Capacity is clamped to `1..=Semaphore::MAX_PERMITS`.
    #[must_use]
    pub fn bounded(capacity: usize) -> (JobSender, JobReceiver) {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        let (tx, rx) = mpsc::channel(capacity);
        (
            JobSender { tx, capacity },
            JobReceiver {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }
}

/// Producer half. Not `Clone`: the ingestion loop is the only writer.
#[derive(Debug)]
pub struct JobSender {
    tx: mpsc::Sender<Bytes>,
    capacity: usize,
}

impl JobSender {
    /// Push `payload`, waiting up to `timeout` for a free slot.
    pub async fn push_timeout(
        &self,
        payload: Bytes,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> PushOutcome {
        tokio::select! {
            biased;
            () = cancel.cancelled() => PushOutcome::Cancelled,
            res = self.tx.send_timeout(payload, timeout) => match res {
                Ok(()) => PushOutcome::Enqueued,
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => PushOutcome::Full,
                Err(mpsc::error::SendTimeoutError::Closed(_)) => PushOutcome::Closed,
            },
        }
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of payloads currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether the buffer holds no payloads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the buffer. Consumers drain what is left, then see the end.
    pub fn close(self) {
        drop(self.tx);
    }
}

/// Consumer half, shared by every processing worker.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,
}

impl JobReceiver {
    /// Take the next payload in FIFO order.
    ///
    /// Returns `None` once the buffer is closed and drained.
    pub async fn recv(&self) -> Option<Bytes> {
        self.rx.lock().await.recv().await
    }
}
