//! The queue seam between the orchestrator and its storage.

use std::time::Duration;

use async_trait::async_trait;
use vedit_models::{JobId, JobPayload, RenderJob};

use crate::error::QueueResult;
use crate::job::Delivery;
use crate::progress::StatusStream;

/// A durable-or-not home for render jobs.
///
/// Enqueueing is idempotent on [`JobPayload::idempotency_key`]: while a job
/// with the same key is known and has neither failed nor been cancelled, its
/// id is returned instead of creating a second job.
///
/// Deliveries carry the job snapshot at pickup; every state change the
/// worker makes afterwards goes back through [`JobQueue::report`], which
/// also publishes it to subscribers. A job that reached a terminal status
/// stays there: reports that would move it elsewhere are refused with
/// [`QueueError::Settled`](crate::QueueError::Settled).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a prepared job, keeping its id and attempt budget.
    async fn enqueue_job(&self, job: RenderJob) -> QueueResult<JobId>;

    /// Enqueue a payload with the default attempt budget.
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<JobId> {
        self.enqueue_job(RenderJob::new(payload)).await
    }

    /// Wait up to `wait` for the next waiting job.
    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>>;

    /// Release a delivery once the worker is done with it, whatever the outcome.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Store a job snapshot and publish it as a status event.
    async fn report(&self, job: &RenderJob) -> QueueResult<()>;

    /// Mark a delivery as still being worked on, so [`JobQueue::recover`]
    /// leaves it alone.
    async fn heartbeat(&self, _delivery: &Delivery) -> QueueResult<()> {
        Ok(())
    }

    /// Put a `retried` job back to `waiting` once `delay` has elapsed.
    async fn retry_later(&self, job: RenderJob, delay: Duration) -> QueueResult<()>;

    /// Cancel a job that no worker holds yet.
    ///
    /// Returns `false` when the job is active or already terminal.
    async fn cancel(&self, id: &JobId) -> QueueResult<bool>;

    /// Latest known snapshot of a job.
    async fn status(&self, id: &JobId) -> QueueResult<Option<RenderJob>>;

    /// Status events for one job, ending after its terminal event.
    async fn subscribe(&self, id: &JobId) -> QueueResult<StatusStream>;

    /// Number of deliveries not yet acked.
    async fn depth(&self) -> QueueResult<u64>;

    /// Reclaim deliveries that saw neither an ack nor a heartbeat for
    /// `min_idle`. Returns how many were recovered.
    async fn recover(&self, _min_idle: Duration) -> QueueResult<usize> {
        Ok(0)
    }
}
