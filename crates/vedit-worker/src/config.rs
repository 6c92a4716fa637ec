//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vedit_media::RendererConfig;

use crate::retry::BackoffPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Wall-clock limit per attempt, none when unset
    pub job_timeout: Option<Duration>,
    /// How long shutdown waits for in-flight jobs before cancelling them
    pub shutdown_timeout: Duration,
    /// Longest a single dequeue blocks
    pub poll_interval: Duration,
    /// How often the worker should scan for orphaned deliveries
    pub claim_interval: Duration,
    /// Minimum idle time before a delivery can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How often a running job refreshes its delivery; must stay well below `claim_min_idle`
    pub job_heartbeat_interval: Duration,
    /// Delay between attempts of a retryable job
    pub backoff: BackoffPolicy,
    /// Progress updates buffered per job before new ones are dropped
    pub progress_buffer: usize,
    /// Explicit encoder binary, otherwise looked up in PATH
    pub ffmpeg_path: Option<PathBuf>,
    pub renderer: RendererConfig,
    /// Prometheus listener, metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            job_heartbeat_interval: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            progress_buffer: 64,
            ffmpeg_path: None,
            renderer: RendererConfig::default(),
            metrics_addr: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_millis)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backoff = BackoffPolicy {
            initial_delay: env_millis("WORKER_RETRY_INITIAL_MS").unwrap_or(defaults.backoff.initial_delay),
            max_delay: env_millis("WORKER_RETRY_MAX_MS").unwrap_or(defaults.backoff.max_delay),
            multiplier: env_parse::<f64>("WORKER_RETRY_MULTIPLIER")
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(defaults.backoff.multiplier),
        };

        let renderer_defaults = defaults.renderer;
        let renderer = RendererConfig {
            program: std::env::var("RENDERER_PROGRAM")
                .map(PathBuf::from)
                .unwrap_or(renderer_defaults.program),
            base_args: std::env::var("RENDERER_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or(renderer_defaults.base_args),
            entry_point: std::env::var("RENDERER_ENTRY")
                .map(PathBuf::from)
                .unwrap_or(renderer_defaults.entry_point),
            bundle_dir: std::env::var("RENDERER_BUNDLE_DIR")
                .map(PathBuf::from)
                .unwrap_or(renderer_defaults.bundle_dir),
            concurrency: env_parse("RENDERER_CONCURRENCY").or(renderer_defaults.concurrency),
        };

        Self {
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT_SECS").filter(|d| !d.is_zero()),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
            poll_interval: env_millis("WORKER_POLL_INTERVAL_MS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.poll_interval),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS").unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS").unwrap_or(defaults.claim_min_idle),
            job_heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.job_heartbeat_interval),
            backoff,
            progress_buffer: env_parse::<usize>("WORKER_PROGRESS_BUFFER")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.progress_buffer),
            ffmpeg_path: std::env::var("FFMPEG_PATH").ok().map(PathBuf::from),
            renderer,
            metrics_addr: env_parse("METRICS_ADDR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert!(config.job_timeout.is_none());
        assert!(config.metrics_addr.is_none());
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert!(config.job_heartbeat_interval < config.claim_min_idle);
    }

    #[test]
    fn test_env_parse_trims_and_rejects_garbage() {
        std::env::set_var("VEDIT_TEST_PARSE_OK", " 42 ");
        std::env::set_var("VEDIT_TEST_PARSE_BAD", "forty-two");
        assert_eq!(env_parse::<u64>("VEDIT_TEST_PARSE_OK"), Some(42));
        assert_eq!(env_parse::<u64>("VEDIT_TEST_PARSE_BAD"), None);
        assert_eq!(env_parse::<u64>("VEDIT_TEST_PARSE_MISSING"), None);
    }
}
