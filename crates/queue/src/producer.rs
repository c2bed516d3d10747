//! Post publishing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use feedline_common::{AppResult, IdGenerator, NewPost, Post, QueueConfig};
use feedline_db::SharedFeedStore;
use fred::clients::Client;
use fred::interfaces::{ClientLike, ListInterface};
use fred::types::Value;
use fred::types::config::Config as RedisConfig;
use tracing::{debug, info};
use validator::Validate;

use crate::error::QueueError;

/// Sink for post event payloads.
#[async_trait]
pub trait QueueWriter: Send + Sync {
    /// Append one payload to the queue.
    async fn write_message(&self, payload: Bytes) -> Result<(), QueueError>;

    /// Release the underlying client.
    async fn close(&self) -> Result<(), QueueError>;
}

/// [`QueueWriter`] over a Redis list.
pub struct RedisQueueWriter {
    client: Client,
    key: String,
}

impl RedisQueueWriter {
    /// Connect to the Redis server named in `config`.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let redis_config =
            RedisConfig::from_url(&config.url).map_err(|e| QueueError::Connect(e.to_string()))?;
        let client = Client::new(redis_config, None, None, None);
        client
            .init()
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            key: config.key.clone(),
        })
    }
}

#[async_trait]
impl QueueWriter for RedisQueueWriter {
    async fn write_message(&self, payload: Bytes) -> Result<(), QueueError> {
        let len: i64 = self
            .client
            .rpush(self.key.as_str(), Value::Bytes(payload))
            .await
            .map_err(|e| QueueError::Write(e.to_string()))?;
        debug!(queue_len = len, "Message written");
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.client
            .quit()
            .await
            .map_err(|e| QueueError::Close(e.to_string()))
    }
}

/// Accepts new posts, publishes them for fan-out and records the author's copy.
pub struct PostPublisher {
    writer: Arc<dyn QueueWriter>,
    store: SharedFeedStore,
    id_gen: IdGenerator,
}

impl PostPublisher {
    /// Create a publisher.
    #[must_use]
    pub fn new(writer: Arc<dyn QueueWriter>, store: SharedFeedStore) -> Self {
        Self {
            writer,
            store,
            id_gen: IdGenerator::new(),
        }
    }

    /// Validate `new_post`, assign an ID and timestamp, publish the event and
    /// store the author's copy.
    ///
    /// The event is published before the author's copy is written, so a
    /// store failure leaves the post delivered to followers only.
    pub async fn publish(&self, new_post: NewPost) -> AppResult<Post> {
        new_post.validate()?;

        let post = Post {
            id: self.id_gen.generate_post_id(),
            author_id: new_post.author_id,
            body: new_post.body,
            created: Utc::now(),
        };

        let payload = post.encode()?;
        self.writer.write_message(Bytes::from(payload)).await?;
        self.store.add_post(&post).await?;

        info!(post_id = %post.id, author_id = %post.author_id, "Post published");
        Ok(post)
    }

    /// Release the queue client.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.writer.close().await
    }
}
