//! Render job queue.
//!
//! This crate provides:
//! - The [`JobQueue`] seam the worker pulls from
//! - An in-memory adapter on tokio primitives
//! - A Redis Streams adapter with delayed retries and a DLQ
//! - Status events via broadcast or Redis Pub/Sub

pub mod error;
pub mod job;
pub mod memory;
pub mod progress;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use job::Delivery;
pub use memory::MemoryQueue;
pub use progress::{until_terminal, StatusChannel, StatusEvent, StatusStream};
pub use queue::JobQueue;
pub use redis_queue::{QueueConfig, RedisQueue};
