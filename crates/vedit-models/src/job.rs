//! Render job definitions and their lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::payload::{JobPayload, JobResult};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job does. Mirrors the payload variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Trim,
    Concat,
    MixAudio,
    DetectShots,
    SampleKeyframes,
    RenderComposition,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Trim => "trim",
            JobKind::Concat => "concat",
            JobKind::MixAudio => "mix_audio",
            JobKind::DetectShots => "detect_shots",
            JobKind::SampleKeyframes => "sample_keyframes",
            JobKind::RenderComposition => "render_composition",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, not yet picked up
    #[default]
    Waiting,
    /// Held by a worker
    Active,
    Completed,
    /// Failed permanently
    Failed,
    /// Failed transiently, waiting out its backoff before requeue
    Retried,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retried => "retried",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobTransitionError {
    #[error("cannot {action} a job that is {from}")]
    InvalidTransition {
        from: JobStatus,
        action: &'static str,
    },

    #[error("attempt budget exhausted ({attempts}/{max_attempts})")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
}

fn default_max_attempts() -> u32 {
    3
}

/// A unit of media work tracked through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: JobPayload,
    #[serde(default)]
    pub status: JobStatus,
    /// Attempts started so far, never above `max_attempts`
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Percent complete, 0-100
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenderJob {
    /// Create a waiting job for a payload.
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind: payload.kind(),
            payload,
            status: JobStatus::Waiting,
            attempts: 0,
            max_attempts: default_max_attempts(),
            progress: 0.0,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn idempotency_key(&self) -> String {
        self.payload.idempotency_key()
    }

    /// Whether another attempt may be started after the current one.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid(&self, action: &'static str) -> JobTransitionError {
        JobTransitionError::InvalidTransition {
            from: self.status,
            action,
        }
    }

    /// `waiting -> active`. Starts a new attempt and resets progress.
    pub fn activate(&mut self) -> Result<(), JobTransitionError> {
        if self.status != JobStatus::Waiting {
            return Err(self.invalid("activate"));
        }
        if self.attempts >= self.max_attempts {
            return Err(JobTransitionError::AttemptsExhausted {
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            });
        }
        self.attempts += 1;
        self.status = JobStatus::Active;
        self.progress = 0.0;
        self.error = None;
        self.touch();
        Ok(())
    }

    /// Record progress for the running attempt.
    ///
    /// Values are clamped to `[0, 100]` and never move backwards. Returns
    /// whether the stored progress changed.
    pub fn record_progress(&mut self, percent: f64) -> Result<bool, JobTransitionError> {
        if self.status != JobStatus::Active {
            return Err(self.invalid("record progress for"));
        }
        if percent.is_nan() {
            return Ok(false);
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent <= self.progress {
            return Ok(false);
        }
        self.progress = percent;
        self.touch();
        Ok(true)
    }

    /// `active -> completed`.
    pub fn complete(&mut self, result: JobResult) -> Result<(), JobTransitionError> {
        if self.status != JobStatus::Active {
            return Err(self.invalid("complete"));
        }
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.result = Some(result);
        self.touch();
        Ok(())
    }

    /// `active -> failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobTransitionError> {
        if self.status != JobStatus::Active {
            return Err(self.invalid("fail"));
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.touch();
        Ok(())
    }

    /// `active -> retried`. Only allowed while the attempt budget lasts.
    pub fn mark_retried(&mut self, error: impl Into<String>) -> Result<(), JobTransitionError> {
        if self.status != JobStatus::Active {
            return Err(self.invalid("retry"));
        }
        if !self.can_retry() {
            return Err(JobTransitionError::AttemptsExhausted {
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            });
        }
        self.status = JobStatus::Retried;
        self.error = Some(error.into());
        self.touch();
        Ok(())
    }

    /// `retried -> waiting`, after the backoff delay elapsed.
    pub fn requeue(&mut self) -> Result<(), JobTransitionError> {
        if self.status != JobStatus::Retried {
            return Err(self.invalid("requeue"));
        }
        self.status = JobStatus::Waiting;
        self.touch();
        Ok(())
    }

    /// Cancel a job that has not reached a terminal state.
    pub fn cancel(&mut self) -> Result<(), JobTransitionError> {
        if self.status.is_terminal() {
            return Err(self.invalid("cancel"));
        }
        self.status = JobStatus::Cancelled;
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{MediaOutput, TrimRequest};
    use crate::EncodingConfig;

    fn trim_job() -> RenderJob {
        RenderJob::new(JobPayload::Trim(TrimRequest {
            input: "/in.mp4".into(),
            output: "/out.mp4".into(),
            start_ms: 1000,
            duration_ms: 5000,
            encoding: EncodingConfig::default(),
            overwrite: false,
        }))
    }

    fn media_result() -> JobResult {
        JobResult::Media(MediaOutput {
            output_path: "/out.mp4".into(),
            duration_ms: 5000,
            size_bytes: 1024,
        })
    }

    #[test]
    fn test_job_creation() {
        let job = trim_job();
        assert_eq!(job.kind, JobKind::Trim);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.idempotency_key(), "trim:/out.mp4");
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = trim_job();
        job.activate().unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempts, 1);

        job.complete(media_result()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert!(job.status.is_terminal());
        assert!(job.cancel().is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = trim_job();
        assert!(job.record_progress(10.0).is_err());

        job.activate().unwrap();
        assert!(job.record_progress(40.0).unwrap());
        assert!(!job.record_progress(25.0).unwrap());
        assert_eq!(job.progress, 40.0);
        assert!(job.record_progress(250.0).unwrap());
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn test_retry_cycle_respects_budget() {
        let mut job = trim_job().with_max_attempts(2);

        job.activate().unwrap();
        job.mark_retried("Connection reset by peer").unwrap();
        assert_eq!(job.status, JobStatus::Retried);
        job.requeue().unwrap();

        job.activate().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(
            job.mark_retried("again"),
            Err(JobTransitionError::AttemptsExhausted {
                attempts: 2,
                max_attempts: 2
            })
        );
        job.fail("again").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.attempts <= job.max_attempts);
    }

    #[test]
    fn test_activate_resets_progress() {
        let mut job = trim_job();
        job.activate().unwrap();
        job.record_progress(70.0).unwrap();
        job.mark_retried("timed out").unwrap();
        job.requeue().unwrap();
        job.activate().unwrap();
        assert_eq!(job.progress, 0.0);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_cancel_from_waiting() {
        let mut job = trim_job();
        job.cancel().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.activate().is_err());
    }
}
