//! Queue consumption.
//!
//! Post events live on a Redis list. The producer appends with `RPUSH` and
//! the pipeline pops with a bounded `BLPOP`, so each event is delivered to
//! exactly one reader. A pop that completes after shutdown was requested
//! pushes its element back to the head of the list.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use feedline_common::QueueConfig;
use fred::clients::Client;
use fred::interfaces::{ClientLike, ListInterface};
use fred::types::Value;
use fred::types::config::Config as RedisConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::QueueError;

/// Source of raw post event payloads.
#[async_trait]
pub trait QueueReader: Send + Sync {
    /// Read the next payload.
    ///
    /// An empty payload means no message arrived within the reader's poll
    /// window. Returns [`QueueError::Cancelled`] once `cancel` has fired,
    /// at the latest when the current poll window ends. A message is never
    /// consumed by a read that returns `Cancelled`.
    async fn read_message(&self, cancel: &CancellationToken) -> Result<Bytes, QueueError>;

    /// Release the underlying client.
    async fn close(&self) -> Result<(), QueueError>;
}

/// [`QueueReader`] over a Redis list.
pub struct RedisQueueReader {
    client: Client,
    key: String,
    read_timeout: Duration,
}

impl RedisQueueReader {
    /// Connect to the Redis server named in `config`.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let redis_config =
            RedisConfig::from_url(&config.url).map_err(|e| QueueError::Connect(e.to_string()))?;
        let client = Client::new(redis_config, None, None, None);
        client
            .init()
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        info!(key = %config.key, "Connected to queue");

        Ok(Self {
            client,
            key: config.key.clone(),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }

    /// List key this reader pops from.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// What to do with a `BLPOP` result, given whether shutdown was requested
/// while it was pending.
#[derive(Debug, PartialEq, Eq)]
enum Settled {
    Deliver(Bytes),
    Requeue(Bytes),
    Cancelled,
}

fn settle(payload: Bytes, cancelled: bool) -> Settled {
    match (cancelled, payload.is_empty()) {
        (false, _) => Settled::Deliver(payload),
        (true, true) => Settled::Cancelled,
        (true, false) => Settled::Requeue(payload),
    }
}

/// Extract the element from a `BLPOP` reply (`[key, element]`, or nil on timeout).
fn payload_from_reply(reply: Value) -> Bytes {
    match reply {
        Value::Array(mut parts) if parts.len() == 2 => parts
            .pop()
            .and_then(|element| element.as_bytes().map(Bytes::copy_from_slice))
            .unwrap_or_default(),
        _ => Bytes::new(),
    }
}

#[async_trait]
impl QueueReader for RedisQueueReader {
    async fn read_message(&self, cancel: &CancellationToken) -> Result<Bytes, QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        // BLPOP takes fractional seconds; zero would block forever.
        let timeout = self.read_timeout.as_secs_f64().max(0.001);

        // The pop runs to completion: once sent, Redis removes the element
        // whether or not the reply is awaited.
        let reply = self
            .client
            .blpop::<Value, _>(self.key.as_str(), timeout)
            .await?;

        match settle(payload_from_reply(reply), cancel.is_cancelled()) {
            Settled::Deliver(payload) => {
                if !payload.is_empty() {
                    debug!(bytes = payload.len(), "Read message");
                }
                Ok(payload)
            }
            Settled::Requeue(payload) => {
                let bytes = payload.len();
                let _: i64 = self
                    .client
                    .lpush(self.key.as_str(), Value::Bytes(payload))
                    .await
                    .map_err(|e| QueueError::Write(e.to_string()))?;
                info!(bytes, "Returned message to queue after shutdown request");
                Err(QueueError::Cancelled)
            }
            Settled::Cancelled => Err(QueueError::Cancelled),
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.client
            .quit()
            .await
            .map_err(|e| QueueError::Close(e.to_string()))?;
        info!("Queue reader closed");
        Ok(())
    }
}
