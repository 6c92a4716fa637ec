//! Worker pool.
//!
//! Pulls deliveries from the queue while a concurrency slot is free and runs
//! each one on its own task. Shutdown stops intake, gives in-flight jobs a
//! grace period and then cancels whatever is left.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vedit_models::JobId;
use vedit_queue::{Delivery, JobQueue};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::orchestrator::RenderJobOrchestrator;
use crate::retry::{retry_async, FailureTracker, RetryConfig};
use crate::runner::JobRunner;

/// Cancellation flags of the jobs currently running in this process.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashMap<JobId, watch::Sender<bool>>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job and hand back the flag its runner watches.
    pub fn register(&self, job_id: &JobId) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.lock().insert(job_id.clone(), tx);
        rx
    }

    pub fn remove(&self, job_id: &JobId) {
        self.lock().remove(job_id);
    }

    /// Flip the flag of a running job. False if the job is not running here.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.lock().get(job_id) {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let guard = self.lock();
        for tx in guard.values() {
            tx.send_replace(true);
        }
        guard.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, watch::Sender<bool>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of job tasks fed from a [`JobQueue`].
pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<RenderJobOrchestrator>,
    registry: CancellationRegistry,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, queue: Arc<dyn JobQueue>, runner: Arc<dyn JobRunner>) -> Self {
        let orchestrator = Arc::new(RenderJobOrchestrator::from_config(
            &config,
            Arc::clone(&queue),
            runner,
        ));
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            queue,
            orchestrator,
            registry: CancellationRegistry::new(),
            job_semaphore,
            shutdown,
        }
    }

    /// Stop taking new jobs. `run` returns once in-flight jobs settle.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Cancel a job wherever it is.
    ///
    /// A job running in this pool gets its flag flipped; otherwise the queue
    /// cancels it if it is still waiting.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<bool> {
        if self.registry.cancel(job_id) {
            info!(job_id = %job_id, "Cancellation requested for running job");
            return Ok(true);
        }
        Ok(self.queue.cancel(job_id).await?)
    }

    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting worker pool with {} max concurrent jobs",
            self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();
        let mut claim = tokio::time::interval(self.config.claim_interval);
        claim.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!("Job task panicked: {}", e);
                }
            }
            metrics::set_jobs_in_flight(self.in_flight());

            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping intake");
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = claim.tick() => self.recover().await,
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    match self.queue.dequeue(self.config.poll_interval).await {
                        Ok(Some(delivery)) => {
                            failures.record_success();
                            self.spawn_job(&mut tasks, delivery, permit);
                        }
                        Ok(None) => failures.record_success(),
                        Err(e) => {
                            drop(permit);
                            if failures.record_failure() {
                                warn!("Failed to dequeue job: {}", e);
                            }
                            tokio::time::sleep(self.config.poll_interval).await;
                        }
                    }
                }
            }
        }

        self.drain(&mut tasks).await;
        metrics::set_jobs_in_flight(0);
        info!("Worker pool stopped");
        Ok(())
    }

    fn spawn_job(
        &self,
        tasks: &mut JoinSet<()>,
        delivery: Delivery,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let job_id = delivery.job_id().clone();
        let cancel = self.registry.register(&job_id);
        let orchestrator = Arc::clone(&self.orchestrator);
        let registry = self.registry.clone();

        debug!(job_id = %job_id, receipt = %delivery.receipt, "Dispatching job");
        tasks.spawn(async move {
            let _permit = permit;
            match orchestrator.process(delivery, cancel).await {
                Ok(status) => debug!(job_id = %job_id, status = %status, "Job settled"),
                Err(e) => error!(job_id = %job_id, error = %e, "Job processing failed"),
            }
            registry.remove(&job_id);
        });
    }

    async fn recover(&self) {
        let min_idle = self.config.claim_min_idle;
        let recovered = retry_async(&RetryConfig::new("recover_deliveries"), || self.queue.recover(min_idle))
            .await
            .into_result();
        match recovered {
            Ok(0) => {}
            Ok(recovered) => {
                info!("Recovered {} stalled deliveries", recovered);
                metrics::record_jobs_recovered(recovered);
            }
            Err(e) => warn!("Failed to recover stalled deliveries: {}", e),
        }
        match self.queue.depth().await {
            Ok(depth) => metrics::set_queue_depth(depth),
            Err(e) => debug!("Failed to read queue depth: {}", e),
        }
    }

    async fn drain(&self, tasks: &mut JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        info!("Waiting for {} in-flight jobs to complete", tasks.len());
        let grace = self.config.shutdown_timeout;
        if tokio::time::timeout(grace, join_all(tasks)).await.is_err() {
            let cancelled = self.registry.cancel_all();
            warn!("Shutdown grace period of {:?} elapsed, cancelled {} jobs", grace, cancelled);
            join_all(tasks).await;
        }
    }
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Job task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_cancel_flips_flag() {
        let registry = CancellationRegistry::new();
        let id = JobId::new();
        let rx = registry.register(&id);

        assert!(!*rx.borrow());
        assert!(registry.cancel(&id));
        assert!(*rx.borrow());

        registry.remove(&id);
        assert!(!registry.cancel(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_cancel_all() {
        let registry = CancellationRegistry::new();
        let a = registry.register(&JobId::new());
        let b = registry.register(&JobId::new());

        assert_eq!(registry.cancel_all(), 2);
        assert!(*a.borrow());
        assert!(*b.borrow());
    }
}
