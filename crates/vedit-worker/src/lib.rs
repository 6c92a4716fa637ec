//! Render worker.
//!
//! This crate provides:
//! - A bounded worker pool fed from a job queue
//! - The job orchestrator (progress, cancellation, retry with backoff)
//! - Payload dispatch to the media layer
//! - Structured logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod runner;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{CancellationRegistry, WorkerPool};
pub use logging::{init_tracing, JobLogger};
pub use metrics::init_metrics;
pub use orchestrator::RenderJobOrchestrator;
pub use retry::{BackoffPolicy, RetryConfig};
pub use runner::{JobContext, JobRunner, MediaJobRunner};
