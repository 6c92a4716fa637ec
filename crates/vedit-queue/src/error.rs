//! Queue error types.

use thiserror::Error;
use vedit_models::{JobStatus, JobTransitionError};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job transition: {0}")]
    Transition(#[from] JobTransitionError),

    /// The stored job already reached a terminal status.
    #[error("Job {job_id} is already {status}")]
    Settled { job_id: String, status: JobStatus },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(id.to_string())
    }

    pub fn settled(id: impl std::fmt::Display, status: JobStatus) -> Self {
        Self::Settled {
            job_id: id.to_string(),
            status,
        }
    }

    /// Status of the stored job when a report was refused because it had settled.
    pub fn settled_status(&self) -> Option<JobStatus> {
        match self {
            Self::Settled { status, .. } => Some(*status),
            _ => None,
        }
    }
}
