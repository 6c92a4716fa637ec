//! In-process queue on tokio primitives.
//!
//! Used by tests and single-process deployments. Nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use vedit_models::{JobId, JobStatus, JobTransitionError, RenderJob};

use crate::error::{QueueError, QueueResult};
use crate::job::Delivery;
use crate::progress::{until_terminal, StatusEvent, StatusStream};
use crate::queue::JobQueue;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug)]
struct InFlight {
    job_id: JobId,
    /// Pickup or last heartbeat
    touched: Instant,
}

#[derive(Debug, Default)]
struct State {
    waiting: VecDeque<JobId>,
    jobs: HashMap<JobId, RenderJob>,
    /// idempotency key -> live job
    keys: HashMap<String, JobId>,
    /// receipt -> job
    in_flight: HashMap<String, InFlight>,
    next_receipt: u64,
}

impl State {
    fn release_key(&mut self, job: &RenderJob) {
        let key = job.idempotency_key();
        if self.keys.get(&key) == Some(&job.id) {
            self.keys.remove(&key);
        }
    }
}

/// FIFO queue held in memory. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    ready: Arc<Notify>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            ready: Arc::new(Notify::new()),
            events,
        }
    }

    fn publish(&self, event: StatusEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn try_take(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;

        while let Some(id) = state.waiting.pop_front() {
            let job = match state.jobs.get(&id) {
                Some(job) if job.status == JobStatus::Waiting => job.clone(),
                _ => continue,
            };

            state.next_receipt += 1;
            let receipt = format!("mem-{}", state.next_receipt);
            state.in_flight.insert(
                receipt.clone(),
                InFlight {
                    job_id: id,
                    touched: Instant::now(),
                },
            );

            if !state.waiting.is_empty() {
                self.ready.notify_one();
            }
            return Some(Delivery::new(receipt, job));
        }

        None
    }

    async fn promote(&self, id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(id) else {
            return Err(QueueError::job_not_found(id));
        };
        if job.status != JobStatus::Retried {
            debug!(job_id = %id, status = %job.status, "Skipping requeue");
            return Ok(());
        }

        job.requeue()?;
        let event = StatusEvent::from_job(job);
        state.waiting.push_back(id.clone());
        drop(state);

        self.publish(event);
        self.ready.notify_one();
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue_job(&self, job: RenderJob) -> QueueResult<JobId> {
        if job.status != JobStatus::Waiting {
            return Err(JobTransitionError::InvalidTransition {
                from: job.status,
                action: "enqueue",
            }
            .into());
        }

        let key = job.idempotency_key();
        let mut state = self.state.lock().await;

        if let Some(existing) = state.keys.get(&key) {
            info!(key = %key, job_id = %existing, "Duplicate job, returning existing id");
            return Ok(existing.clone());
        }
        if state.jobs.contains_key(&job.id) {
            return Err(QueueError::enqueue_failed(format!("job id {} already used", job.id)));
        }

        let id = job.id.clone();
        let event = StatusEvent::from_job(&job);
        state.keys.insert(key, id.clone());
        state.waiting.push_back(id.clone());
        state.jobs.insert(id.clone(), job);
        drop(state);

        debug!(job_id = %id, "Enqueued job");
        self.publish(event);
        self.ready.notify_one();
        Ok(id)
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_take().await {
                return Ok(Some(delivery));
            }
            if timeout_at(deadline, self.ready.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn heartbeat(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        match state.in_flight.get_mut(&delivery.receipt) {
            Some(entry) => entry.touched = Instant::now(),
            None => debug!(receipt = %delivery.receipt, "Heartbeat for unknown delivery"),
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(&delivery.receipt).is_none() {
            debug!(receipt = %delivery.receipt, "Ack for unknown delivery");
        }
        Ok(())
    }

    async fn report(&self, job: &RenderJob) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let Some(current) = state.jobs.get(&job.id) else {
            return Err(QueueError::job_not_found(&job.id));
        };
        if current.status.is_terminal() && current.status != job.status {
            return Err(QueueError::settled(&job.id, current.status));
        }

        if matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            state.release_key(job);
        }
        state.jobs.insert(job.id.clone(), job.clone());
        drop(state);

        self.publish(StatusEvent::from_job(job));
        Ok(())
    }

    async fn retry_later(&self, job: RenderJob, delay: Duration) -> QueueResult<()> {
        if job.status != JobStatus::Retried {
            return Err(JobTransitionError::InvalidTransition {
                from: job.status,
                action: "schedule a retry for",
            }
            .into());
        }
        self.report(&job).await?;

        let queue = self.clone();
        let id = job.id;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.promote(&id).await {
                warn!(job_id = %id, error = %e, "Failed to requeue job");
            }
        });
        Ok(())
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(id) else {
            return Err(QueueError::job_not_found(id));
        };
        if !matches!(job.status, JobStatus::Waiting | JobStatus::Retried) {
            return Ok(false);
        }

        job.cancel()?;
        let job = job.clone();
        state.release_key(&job);
        let event = StatusEvent::from_job(&job);
        drop(state);

        info!(job_id = %id, "Cancelled queued job");
        self.publish(event);
        Ok(true)
    }

    async fn status(&self, id: &JobId) -> QueueResult<Option<RenderJob>> {
        Ok(self.state.lock().await.jobs.get(id).cloned())
    }

    async fn subscribe(&self, id: &JobId) -> QueueResult<StatusStream> {
        // Subscribe before reading the snapshot so no event falls in between.
        let rx = self.events.subscribe();
        let current = self
            .status(id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(id))?;

        let wanted = id.clone();
        let live = futures_util::stream::unfold(rx, move |mut rx| {
            let wanted = wanted.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if event.job_id == wanted => return Some((event, rx)),
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        let first = futures_util::stream::once(async move { StatusEvent::from_job(&current) });
        Ok(until_terminal(first.chain(live)))
    }

    async fn depth(&self) -> QueueResult<u64> {
        let state = self.state.lock().await;
        let waiting = state
            .waiting
            .iter()
            .filter(|id| {
                state
                    .jobs
                    .get(*id)
                    .is_some_and(|job| job.status == JobStatus::Waiting)
            })
            .count();
        Ok((waiting + state.in_flight.len()) as u64)
    }

    /// Requeue deliveries whose holder went quiet.
    ///
    /// An active job counts the lost attempt like the Redis adapter does. A
    /// job still `waiting` never had its pickup recorded and goes back as is.
    async fn recover(&self, min_idle: Duration) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let stale: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.touched) >= min_idle)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        let mut events = Vec::new();
        for receipt in &stale {
            let Some(entry) = state.in_flight.remove(receipt) else {
                continue;
            };
            let Some(job) = state.jobs.get_mut(&entry.job_id) else {
                continue;
            };

            match job.status {
                JobStatus::Active if job.can_retry() => {
                    job.mark_retried("worker stopped responding")?;
                    job.requeue()?;
                }
                JobStatus::Active => {
                    job.fail("worker stopped responding")?;
                    let job = job.clone();
                    state.release_key(&job);
                    events.push(StatusEvent::from_job(&job));
                    continue;
                }
                JobStatus::Waiting => {}
                _ => continue,
            }
            events.push(StatusEvent::from_job(job));
            state.waiting.push_back(entry.job_id);
        }
        drop(state);

        for event in events {
            info!(job_id = %event.job_id, status = %event.status, "Recovered stale delivery");
            self.publish(event);
            self.ready.notify_one();
        }
        Ok(stale.len())
    }
}
