//! Common utilities and shared types for feedline.
//!
//! This crate provides foundational components used across all feedline crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID and UUID identifiers via [`IdGenerator`]
//! - **Models**: The [`Post`] wire format and related domain types
//!
//! # Example
//!
//! ```no_run
//! use feedline_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("{} -> {}", id_gen.generate(), config.queue.key);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod models;

pub use config::{Config, DatabaseConfig, LogFormat, LoggingConfig, QueueConfig, WorkerConfig};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use models::{Follow, NewPost, Post, User};
