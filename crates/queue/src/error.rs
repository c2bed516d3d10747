//! Queue client errors.

use feedline_common::AppError;
use thiserror::Error;

/// Errors raised by queue readers and writers.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker could not be reached or configured.
    #[error("queue connection failed: {0}")]
    Connect(String),

    /// Reading the next message failed (broker unavailable, protocol error).
    #[error("queue read failed: {0}")]
    Read(String),

    /// Publishing a message failed.
    #[error("queue write failed: {0}")]
    Write(String),

    /// Releasing the client failed.
    #[error("queue close failed: {0}")]
    Close(String),

    /// A message could not be serialized.
    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The read was abandoned because shutdown was requested.
    #[error("queue operation cancelled")]
    Cancelled,
}

impl From<fred::error::Error> for QueueError {
    fn from(err: fred::error::Error) -> Self {
        Self::Read(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err.to_string())
    }
}
