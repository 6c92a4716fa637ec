//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use std::time::Duration;

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vedit_models::{JobId, JobKind};

const DEFAULT_FILTER: &str = "info,vedit_worker=info,vedit_media=info,vedit_queue=info";

/// Install the global subscriber: colored text for dev, JSON when
/// `LOG_FORMAT=json`. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job id, its kind and the attempt it belongs to.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    kind: JobKind,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job_id: &JobId, kind: JobKind, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            kind = %self.kind,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, percent: f64) {
        info!(
            job_id = %self.job_id,
            kind = %self.kind,
            attempt = self.attempt,
            percent,
            "Job progress"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            kind = %self.kind,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_retry(&self, delay: Duration, reason: &str) {
        warn!(
            job_id = %self.job_id,
            kind = %self.kind,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "Job will be retried: {}", reason
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            kind = %self.kind,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            kind = %self.kind,
            attempt = self.attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Span wrapping one attempt of the job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            kind = %self.kind,
            attempt = self.attempt
        )
    }
}
