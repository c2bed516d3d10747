//! In-process queue for tests and local runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use feedline_common::Post;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::consumer::QueueReader;
use crate::error::QueueError;
use crate::producer::QueueWriter;

const DEFAULT_POLL_WINDOW: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Inner {
    messages: Mutex<VecDeque<Bytes>>,
    arrived: Notify,
    poll_window: Duration,
    pending_read_failures: AtomicU32,
    read_calls: Mutex<Vec<Instant>>,
    failed_reads: Mutex<Vec<Instant>>,
    fail_close: AtomicBool,
    closed: AtomicBool,
}

/// FIFO queue implementing both [`QueueReader`] and [`QueueWriter`].
///
/// Reads wait up to the poll window for a message and then report "no
/// message" with an empty payload. Read failures and close failures can be
/// injected.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_poll_window(DEFAULT_POLL_WINDOW)
    }
}

impl MemoryQueue {
    /// Create an empty queue with a 10ms poll window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue with the given poll window.
    #[must_use]
    pub fn with_poll_window(poll_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                messages: Mutex::new(VecDeque::new()),
                arrived: Notify::new(),
                poll_window,
                pending_read_failures: AtomicU32::new(0),
                read_calls: Mutex::new(Vec::new()),
                failed_reads: Mutex::new(Vec::new()),
                fail_close: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Append a raw payload.
    pub fn push(&self, payload: impl Into<Bytes>) {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(payload.into());
        self.inner.arrived.notify_one();
    }

    /// Append an encoded post.
    pub fn push_post(&self, post: &Post) -> Result<(), QueueError> {
        self.push(post.encode()?);
        Ok(())
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.inner
            .pending_read_failures
            .store(count, Ordering::SeqCst);
    }

    /// Make `close` fail.
    pub fn fail_close(&self) {
        self.inner.fail_close.store(true, Ordering::SeqCst);
    }

    /// Number of messages not yet read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Instants at which `read_message` was entered, in order.
    #[must_use]
    pub fn read_instants(&self) -> Vec<Instant> {
        self.inner
            .read_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Instants at which an injected read failure was returned, in order.
    #[must_use]
    pub fn failed_read_instants(&self) -> Vec<Instant> {
        self.inner
            .failed_reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn pop(&self) -> Option<Bytes> {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .pending_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueReader for MemoryQueue {
    async fn read_message(&self, cancel: &CancellationToken) -> Result<Bytes, QueueError> {
        let entered = Instant::now();
        self.inner
            .read_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entered);

        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        if self.take_injected_failure() {
            self.inner
                .failed_reads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entered);
            return Err(QueueError::Read("injected read failure".to_string()));
        }

        let deadline = Instant::now() + self.inner.poll_window;
        loop {
            if let Some(payload) = self.pop() {
                return Ok(payload);
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(QueueError::Cancelled),
                () = self.inner.arrived.notified() => {}
                () = tokio::time::sleep_until(deadline) => return Ok(Bytes::new()),
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        if self.inner.fail_close.load(Ordering::SeqCst) {
            return Err(QueueError::Close("injected close failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueWriter for MemoryQueue {
    async fn write_message(&self, payload: Bytes) -> Result<(), QueueError> {
        self.push(payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        QueueReader::close(self).await
    }
}
