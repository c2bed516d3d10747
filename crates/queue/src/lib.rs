//! Post event queue and fan-out pipeline for feedline.
//!
//! - **Producer**: validates new posts and appends them to a Redis list
//! - **Consumer**: pops post events with bounded blocking reads
//! - **Pipeline**: ingestion loop, bounded job buffer, processing workers
//!   and bounded-concurrency fan-out into follower feeds
//! - **Memory queue**: in-process queue for tests and local runs

pub mod backoff;
pub mod buffer;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod producer;
pub mod stats;
pub mod workers;

pub use backoff::Backoff;
pub use buffer::{JobBuffer, JobReceiver, JobSender, PushOutcome};
pub use consumer::{QueueReader, RedisQueueReader};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use pipeline::{
    BUFFER_SLOTS_PER_WORKER, DEFAULT_FANOUT_LIMIT, FeedWorker, MAX_POOL_SIZE, PipelineSettings,
    PipelineState,
};
pub use producer::{PostPublisher, QueueWriter, RedisQueueWriter};
pub use stats::{PipelineStats, RunSummary};
pub use workers::{FanOutReport, fan_out};
