//! Render job orchestration.
//!
//! One delivery moves through `waiting -> active` and then settles as
//! `completed`, `failed`, `cancelled`, or `retried`. A retried job goes back
//! to `waiting` after its backoff delay, through the queue.
//!
//! While the job runs, progress from the media layer is folded into the job
//! and reported upstream. Stored progress never decreases within an attempt.
//! A periodic heartbeat keeps the delivery from being recovered as abandoned.
//!
//! A delivery is acked only once the queue holds the job's latest state. If a
//! state change cannot be stored, the delivery stays pending and queue
//! recovery hands the job out again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn, Instrument};
use vedit_media::{MediaError, ProgressUpdate};
use vedit_models::{JobStatus, RenderJob};
use vedit_queue::{Delivery, JobQueue, QueueError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async_if, BackoffPolicy, FailureTracker, RetryConfig};
use crate::runner::{JobContext, JobRunner};

/// Progress gain that triggers a status report.
const REPORT_STEP: f64 = 1.0;
/// Progress gain that triggers a log line.
const LOG_STEP: f64 = 10.0;

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A queue refusal because the job already settled means the stored status
/// stands. Anything else leaves the stored state behind the job.
fn settled_or_unrecorded(e: QueueError) -> WorkerResult<JobStatus> {
    match e.settled_status() {
        Some(status) => Ok(status),
        None => Err(WorkerError::StateNotRecorded(e)),
    }
}

/// Drives deliveries through the job state machine.
pub struct RenderJobOrchestrator {
    queue: Arc<dyn JobQueue>,
    runner: Arc<dyn JobRunner>,
    backoff: BackoffPolicy,
    job_timeout: Option<Duration>,
    progress_buffer: usize,
    heartbeat_interval: Duration,
    report_retry: RetryConfig,
    /// Used for the final state change, which must not be lost.
    settle_retry: RetryConfig,
}

impl RenderJobOrchestrator {
    pub fn new(queue: Arc<dyn JobQueue>, runner: Arc<dyn JobRunner>, backoff: BackoffPolicy) -> Self {
        Self {
            queue,
            runner,
            backoff,
            job_timeout: None,
            progress_buffer: 64,
            heartbeat_interval: Duration::from_secs(30),
            report_retry: RetryConfig::new("report_job_status"),
            settle_retry: RetryConfig::new("record_job_outcome").with_max_retries(6),
        }
    }

    pub fn from_config(config: &WorkerConfig, queue: Arc<dyn JobQueue>, runner: Arc<dyn JobRunner>) -> Self {
        Self::new(queue, runner, config.backoff)
            .with_timeout(config.job_timeout)
            .with_progress_buffer(config.progress_buffer)
            .with_heartbeat(config.job_heartbeat_interval)
    }

    /// Wall-clock limit per attempt.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.job_timeout = limit;
        self
    }

    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity.max(1);
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Retry policy for status reports. The final state change gets twice
    /// the retries.
    pub fn with_report_retry(mut self, retry: RetryConfig) -> Self {
        self.settle_retry = retry.clone().with_max_retries(retry.max_retries.saturating_mul(2));
        self.report_retry = retry;
        self
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Run one delivery to a settled state, then ack it.
    ///
    /// Returns the status the job settled in. Processing errors still ack the
    /// delivery, except [`WorkerError::StateNotRecorded`]: then the delivery
    /// stays pending for recovery.
    pub async fn process(&self, delivery: Delivery, cancel: watch::Receiver<bool>) -> WorkerResult<JobStatus> {
        let result = self.execute(&delivery, cancel).await;
        match &result {
            Err(e) if e.is_unrecorded() => {
                warn!(job_id = %delivery.job_id(), error = %e, "Leaving delivery pending for recovery");
            }
            _ => {
                if let Err(e) = self.queue.ack(&delivery).await {
                    warn!(job_id = %delivery.job_id(), error = %e, "Failed to ack delivery");
                }
            }
        }
        result
    }

    /// Store a state change. Returns the status the queue holds afterwards,
    /// which differs from `job.status` when the job was settled elsewhere.
    async fn record(&self, job: &RenderJob, retry: &RetryConfig) -> WorkerResult<JobStatus> {
        match retry_async_if(retry, || self.queue.report(job), |e| e.settled_status().is_none())
            .await
            .into_result()
        {
            Ok(()) => Ok(job.status),
            Err(e) => settled_or_unrecorded(e),
        }
    }

    async fn execute(&self, delivery: &Delivery, cancel: watch::Receiver<bool>) -> WorkerResult<JobStatus> {
        let mut job = delivery.job.clone();

        if *cancel.borrow() {
            job.cancel()?;
            let status = self.record(&job, &self.settle_retry).await?;
            metrics::record_job_cancelled(job.kind.as_str());
            return Ok(status);
        }

        job.activate()?;
        let logger = JobLogger::new(&job.id, job.kind, job.attempts);
        let span = logger.create_span();

        async {
            let stored = self.record(&job, &self.report_retry).await?;
            if stored != JobStatus::Active {
                logger.log_warning(&format!("settled as {stored} before it started"));
                return Ok(stored);
            }
            metrics::record_job_started(job.kind.as_str());
            logger.log_start(&delivery.receipt);

            let started = Instant::now();
            let outcome = self.run_attempt(delivery, &mut job, &logger, cancel).await;
            self.settle(job, outcome, &logger, started.elapsed()).await
        }
        .instrument(span)
        .await
    }

    /// Run the payload, forwarding progress until it finishes, times out or
    /// is cancelled.
    async fn run_attempt(
        &self,
        delivery: &Delivery,
        job: &mut RenderJob,
        logger: &JobLogger,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<vedit_models::JobResult> {
        let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(self.progress_buffer);
        let ctx = JobContext {
            job_id: job.id.clone(),
            attempt: job.attempts,
            cancel: cancel.clone(),
            progress: tx,
        };

        let payload = job.payload.clone();
        let runner = Arc::clone(&self.runner);
        let limit = self.job_timeout;
        let run = async move {
            let run = runner.run(&payload, ctx);
            match limit {
                Some(limit) => tokio::time::timeout(limit, run)
                    .await
                    .unwrap_or_else(|_| Err(WorkerError::Timeout(limit))),
                None => run.await,
            }
        };
        tokio::pin!(run);
        let on_cancel = cancelled(cancel);
        tokio::pin!(on_cancel);

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut heartbeat_failures = FailureTracker::new(3);

        let mut reported = job.progress;
        let mut logged = job.progress;

        let outcome = loop {
            tokio::select! {
                biased;
                Some(update) = rx.recv() => {
                    self.forward(job, update, logger, &mut reported, &mut logged).await;
                }
                result = &mut run => break result,
                _ = &mut on_cancel => break Err(MediaError::Cancelled.into()),
                _ = heartbeat.tick() => match self.queue.heartbeat(delivery).await {
                    Ok(()) => heartbeat_failures.record_success(),
                    Err(e) => {
                        if heartbeat_failures.record_failure() {
                            warn!(error = %e, "Delivery heartbeat failed");
                        }
                    }
                },
            }
        };

        while let Ok(update) = rx.try_recv() {
            self.forward(job, update, logger, &mut reported, &mut logged).await;
        }

        outcome
    }

    async fn forward(
        &self,
        job: &mut RenderJob,
        update: ProgressUpdate,
        logger: &JobLogger,
        reported: &mut f64,
        logged: &mut f64,
    ) {
        if !matches!(job.record_progress(update.percent), Ok(true)) {
            return;
        }
        if job.progress - *reported >= REPORT_STEP {
            *reported = job.progress;
            if let Err(e) = self.queue.report(job).await {
                debug!(error = %e, "Dropped progress report");
            }
        }
        if job.progress - *logged >= LOG_STEP {
            *logged = job.progress;
            logger.log_progress(job.progress);
        }
    }

    async fn settle(
        &self,
        mut job: RenderJob,
        outcome: WorkerResult<vedit_models::JobResult>,
        logger: &JobLogger,
        elapsed: Duration,
    ) -> WorkerResult<JobStatus> {
        let kind = job.kind.as_str();

        match outcome {
            Ok(result) => {
                job.complete(result)?;
                metrics::record_job_completed(kind, elapsed.as_secs_f64());
                logger.log_completion(elapsed);
            }
            Err(e) if e.is_cancelled() => {
                job.cancel()?;
                metrics::record_job_cancelled(kind);
                logger.log_warning("cancelled");
            }
            Err(e) if e.is_retryable() && job.can_retry() => {
                let delay = self.backoff.delay_for(job.attempts);
                job.mark_retried(e.job_message())?;
                metrics::record_job_retried(kind, e.kind());
                logger.log_retry(delay, &e.to_string());

                return match retry_async_if(
                    &self.settle_retry,
                    || self.queue.retry_later(job.clone(), delay),
                    |e| e.settled_status().is_none(),
                )
                .await
                .into_result()
                {
                    Ok(()) => Ok(job.status),
                    Err(e) => settled_or_unrecorded(e),
                };
            }
            Err(e) => {
                job.fail(e.job_message())?;
                metrics::record_job_failed(kind, e.kind());
                logger.log_error(&e.to_string());
            }
        }

        self.record(&job, &self.settle_retry).await
    }
}
