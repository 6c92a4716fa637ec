//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must run inside the tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_STARTED_TOTAL: &str = "vedit_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vedit_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vedit_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "vedit_jobs_retried_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vedit_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "vedit_job_duration_seconds";

    // Pool
    pub const JOBS_IN_FLIGHT: &str = "vedit_jobs_in_flight";
    pub const QUEUE_DEPTH: &str = "vedit_queue_depth";
    pub const JOBS_RECOVERED_TOTAL: &str = "vedit_jobs_recovered_total";
}

pub fn record_job_started(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(kind: &str, duration_secs: f64) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(kind: &str, error_kind: &str) {
    let labels = [("kind", kind.to_string()), ("error", error_kind.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_retried(kind: &str, error_kind: &str) {
    let labels = [("kind", kind.to_string()), ("error", error_kind.to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_CANCELLED_TOTAL, &labels).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn set_queue_depth(depth: u64) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

pub fn record_jobs_recovered(count: usize) {
    counter!(names::JOBS_RECOVERED_TOTAL).increment(count as u64);
}
