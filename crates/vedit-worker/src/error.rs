//! Worker error types.

use std::io::ErrorKind;
use std::time::Duration;

use thiserror::Error;
use vedit_media::MediaError;
use vedit_models::JobTransitionError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Diagnostic fragments that mark an encoder failure as worth retrying.
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection reset",
    "connection refused",
    "timed out",
    "network is unreachable",
    "temporarily unavailable",
    "try again",
    "broken pipe",
    "too many open files",
    "cannot allocate memory",
    "http error 5",
    "server returned 5",
    "i/o error",
];

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job exceeded its time limit of {0:?}")]
    Timeout(Duration),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vedit_queue::QueueError),

    /// A job state change could not be stored. The delivery is left pending
    /// so queue recovery picks the job up again.
    #[error("Job state not recorded: {0}")]
    StateNotRecorded(#[source] vedit_queue::QueueError),

    #[error("Invalid job transition: {0}")]
    Transition(#[from] JobTransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

/// Whether any diagnostic line looks like a transient failure.
pub fn tail_looks_transient<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|line| {
        let line = line.as_ref().to_lowercase();
        TRANSIENT_PATTERNS.iter().any(|p| line.contains(p))
    })
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// The single place that decides whether a failed attempt is retried.
    ///
    /// Launch failures, timeouts and queue hiccups are retried. Encoder exits
    /// are retried only when their diagnostic tail looks transient. Bad input
    /// and cancellation never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Timeout(_) | WorkerError::Queue(_) | WorkerError::StateNotRecorded(_) => true,
            WorkerError::Io(e) => is_transient_io(e.kind()),
            WorkerError::Media(media) => match media {
                MediaError::ProcessLaunch { .. } => true,
                MediaError::ProcessExit { tail, .. } => tail_looks_transient(tail),
                MediaError::FfprobeFailed { stderr, .. } => stderr
                    .as_deref()
                    .is_some_and(|s| tail_looks_transient(&s.lines().collect::<Vec<_>>())),
                MediaError::Io(e) => is_transient_io(e.kind()),
                _ => false,
            },
            WorkerError::JobFailed(_) | WorkerError::ConfigError(_) | WorkerError::Transition(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Media(MediaError::Cancelled))
    }

    /// The queue may not hold this job's latest state.
    pub fn is_unrecorded(&self) -> bool {
        matches!(self, WorkerError::StateNotRecorded(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, WorkerError::Media(e) if e.is_validation())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Media(MediaError::Validation(_) | MediaError::OutputExists(_)) => "validation",
            WorkerError::Media(MediaError::ProcessLaunch { .. }) => "process_launch",
            WorkerError::Media(MediaError::ProcessExit { .. }) => "process_exit",
            WorkerError::Media(MediaError::Cancelled) => "cancelled",
            WorkerError::Media(_) => "media",
            WorkerError::Timeout(_) => "timeout",
            WorkerError::Queue(_) | WorkerError::StateNotRecorded(_) => "queue",
            WorkerError::Io(_) => "io",
            WorkerError::JobFailed(_) | WorkerError::ConfigError(_) | WorkerError::Transition(_) => "internal",
        }
    }

    /// Message stored on the job: the error plus the diagnostic tail, if any.
    pub fn job_message(&self) -> String {
        let diagnostics = match self {
            WorkerError::Media(e) => e.diagnostics(),
            _ => String::new(),
        };
        if diagnostics.is_empty() {
            self.to_string()
        } else {
            format!("{}\n{}", self, diagnostics)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_media::ValidationError;

    fn exit(lines: &[&str]) -> WorkerError {
        MediaError::process_exit("ffmpeg", Some(1), lines.iter().map(|s| s.to_string()).collect()).into()
    }

    #[test]
    fn test_validation_is_never_retried() {
        let err: WorkerError = MediaError::from(ValidationError::EmptySegments).into();
        assert!(!err.is_retryable());
        assert!(err.is_validation());
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_launch_failure_is_retried() {
        let err: WorkerError = MediaError::ProcessLaunch {
            program: "ffmpeg".to_string(),
            source: std::io::Error::from(ErrorKind::PermissionDenied),
        }
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_exit_retry_depends_on_tail() {
        let transient = exit(&[
            "frame=  120 fps= 30",
            "[tcp @ 0x55] Connection reset by peer",
            "Conversion failed!",
        ]);
        assert!(transient.is_retryable());

        let http = exit(&["[https @ 0x1] HTTP error 503 Service Unavailable"]);
        assert!(http.is_retryable());

        let permanent = exit(&["Invalid data found when processing input"]);
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_cancel_and_timeout() {
        let cancelled: WorkerError = MediaError::Cancelled.into();
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retryable());

        assert!(WorkerError::Timeout(Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn test_job_message_carries_diagnostics() {
        let err = exit(&["Stream #0:0: Video: h264", "Conversion failed!"]);
        let message = err.job_message();
        assert!(message.starts_with("Media error: ffmpeg exited with 1: Conversion failed!"));
        assert!(message.contains("Stream #0:0: Video: h264"));

        assert_eq!(WorkerError::job_failed("x").job_message(), "Job failed: x");
    }
}
