//! Job status events and their Redis Pub/Sub channel.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vedit_models::{JobId, JobKind, JobResult, JobStatus, RenderJob};

use crate::error::QueueResult;

/// Status events stop after the first terminal one.
pub type StatusStream = Pin<Box<dyn Stream<Item = StatusEvent> + Send>>;

/// A published snapshot of a job's lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: f64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub updated_at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn from_job(job: &RenderJob) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            attempts: job.attempts,
            error: job.error.clone(),
            result: job.result.clone(),
            updated_at: job.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// End `events` right after it yields a terminal event.
pub fn until_terminal<S>(events: S) -> StatusStream
where
    S: Stream<Item = StatusEvent> + Send + 'static,
{
    let events: StatusStream = Box::pin(events);
    Box::pin(futures_util::stream::unfold(
        (events, false),
        |(mut events, finished)| async move {
            if finished {
                return None;
            }
            let event = events.next().await?;
            let finished = event.is_terminal();
            Some((event, (events, finished)))
        },
    ))
}

/// Channel for publishing/subscribing to status events.
pub struct StatusChannel {
    client: redis::Client,
    prefix: String,
}

impl StatusChannel {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    /// Get the channel name for a job.
    pub fn channel_name(&self, job_id: &JobId) -> String {
        format!("{}:status:{}", self.prefix, job_id)
    }

    pub async fn publish(&self, event: &StatusEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = self.channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!(channel = %channel, status = %event.status, "Publishing status event");
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to status events for a job.
    pub async fn subscribe(&self, job_id: &JobId) -> QueueResult<StatusStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.channel_name(job_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(until_terminal(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_models::{JobPayload, ShotDetectionRequest};

    fn event(job: &mut RenderJob, status: JobStatus) -> StatusEvent {
        job.status = status;
        StatusEvent::from_job(job)
    }

    #[tokio::test]
    async fn test_stream_ends_after_terminal_event() {
        let mut job = RenderJob::new(JobPayload::DetectShots(ShotDetectionRequest::new("/in.mp4")));
        let events = vec![
            event(&mut job, JobStatus::Active),
            event(&mut job, JobStatus::Completed),
            event(&mut job, JobStatus::Active),
        ];

        let seen: Vec<JobStatus> = until_terminal(futures_util::stream::iter(events))
            .map(|e| e.status)
            .collect()
            .await;
        assert_eq!(seen, vec![JobStatus::Active, JobStatus::Completed]);
    }

    #[test]
    fn test_channel_name() {
        let client = redis::Client::open("redis://localhost:6379").unwrap();
        let channel = StatusChannel::new(client, "vedit");
        let id = JobId::from_string("abc");
        assert_eq!(channel.channel_name(&id), "vedit:status:abc");
    }

    #[test]
    fn test_event_wire_format() {
        let job = RenderJob::new(JobPayload::DetectShots(ShotDetectionRequest::new("/in.mp4")));
        let json = serde_json::to_value(StatusEvent::from_job(&job)).unwrap();
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["kind"], "detect_shots");
        assert!(json.get("error").is_none());
    }
}
