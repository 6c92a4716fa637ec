//! Job queue using Redis Streams.
//!
//! Keys, all under the configured prefix:
//!
//! | Key | Type | Content |
//! |---|---|---|
//! | `{stream}` | stream | one entry per delivery, field `job_id` |
//! | `{prefix}:job:{id}` | string | latest job snapshot (JSON) |
//! | `{prefix}:dedup:{key}` | string | id of the live job for an idempotency key |
//! | `{prefix}:delayed` | sorted set | retried job ids scored by due time (ms) |
//! | `{dlq}` | stream | failed jobs with their last error |

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vedit_models::{JobId, JobStatus, JobTransitionError, RenderJob};

use crate::error::{QueueError, QueueResult};
use crate::job::Delivery;
use crate::progress::{StatusChannel, StatusEvent, StatusStream};
use crate::queue::JobQueue;

/// Due retries promoted per dequeue.
const PROMOTE_BATCH: isize = 16;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the queue owns
    pub key_prefix: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// This process's consumer name within the group
    pub consumer_name: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// How long job snapshots and dedup keys live
    pub job_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vedit".to_string(),
            stream_name: "vedit:jobs".to_string(),
            consumer_group: "vedit:workers".to_string(),
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            dlq_stream_name: "vedit:dlq".to_string(),
            job_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            job_ttl: std::env::var("QUEUE_JOB_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_ttl),
        }
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.key_prefix, idempotency_key)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.key_prefix)
    }

    fn ttl_secs(&self) -> u64 {
        self.job_ttl.as_secs().max(1)
    }
}

/// Redis Streams queue client.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
    channel: StatusChannel,
}

impl RedisQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let channel = StatusChannel::new(client.clone(), config.key_prefix.clone());
        Ok(Self {
            client,
            config,
            channel,
        })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: &JobId) -> QueueResult<Option<RenderJob>> {
        let raw: Option<String> = conn.get(self.config.job_key(id)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(QueueError::from))
            .transpose()
    }

    async fn store(&self, conn: &mut MultiplexedConnection, job: &RenderJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        conn.set_ex::<_, _, ()>(self.config.job_key(&job.id), payload, self.config.ttl_secs())
            .await?;
        Ok(())
    }

    async fn push(&self, conn: &mut MultiplexedConnection, id: &JobId) -> QueueResult<String> {
        let message_id: String = conn
            .xadd(&self.config.stream_name, "*", &[("job_id", id.as_str())])
            .await?;
        Ok(message_id)
    }

    async fn remove_message(&self, conn: &mut MultiplexedConnection, message_id: &str) -> QueueResult<()> {
        conn.xack::<_, _, _, ()>(&self.config.stream_name, &self.config.consumer_group, &[message_id])
            .await?;
        conn.xdel::<_, _, ()>(&self.config.stream_name, &[message_id]).await?;
        Ok(())
    }

    async fn publish(&self, job: &RenderJob) {
        if let Err(e) = self.channel.publish(&StatusEvent::from_job(job)).await {
            warn!(job_id = %job.id, error = %e, "Failed to publish status event");
        }
    }

    /// Move retried jobs whose backoff has elapsed back onto the stream.
    async fn promote_due(&self, conn: &mut MultiplexedConnection) -> QueueResult<usize> {
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.config.delayed_key(), "-inf", now_ms, 0, PROMOTE_BATCH)
            .await?;

        let mut promoted = 0;
        for raw_id in due {
            // Only the consumer that removes the member promotes it.
            let removed: i64 = conn.zrem(self.config.delayed_key(), &raw_id).await?;
            if removed == 0 {
                continue;
            }

            let id = JobId::from_string(raw_id);
            let Some(mut job) = self.load(conn, &id).await? else {
                warn!(job_id = %id, "Delayed job snapshot expired");
                continue;
            };
            if job.status != JobStatus::Retried {
                continue;
            }

            job.requeue()?;
            self.store(conn, &job).await?;
            self.push(conn, &id).await?;
            self.publish(&job).await;
            promoted += 1;
        }

        if promoted > 0 {
            debug!(promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    /// Turn a stream entry into a delivery, dropping entries that no longer
    /// point at a waiting job.
    async fn deliver(
        &self,
        conn: &mut MultiplexedConnection,
        message_id: String,
        job_id: Option<String>,
    ) -> QueueResult<Option<Delivery>> {
        let Some(job_id) = job_id else {
            warn!(message_id = %message_id, "Stream entry without job id");
            self.remove_message(conn, &message_id).await?;
            return Ok(None);
        };

        let id = JobId::from_string(job_id);
        match self.load(conn, &id).await {
            Ok(Some(job)) if job.status == JobStatus::Waiting => {
                debug!(job_id = %id, message_id = %message_id, "Consumed job from stream");
                Ok(Some(Delivery::new(message_id, job)))
            }
            Ok(Some(job)) => {
                debug!(job_id = %id, status = %job.status, "Skipping job that is no longer waiting");
                self.remove_message(conn, &message_id).await?;
                Ok(None)
            }
            Ok(None) => {
                warn!(job_id = %id, "Job snapshot missing, dropping entry");
                self.remove_message(conn, &message_id).await?;
                Ok(None)
            }
            Err(QueueError::Json(e)) => {
                warn!(job_id = %id, error = %e, "Failed to parse job snapshot");
                self.remove_message(conn, &message_id).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn dead_letter(&self, conn: &mut MultiplexedConnection, job: &RenderJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        let error = job.error.clone().unwrap_or_default();
        conn.xadd::<_, _, _, _, ()>(
            &self.config.dlq_stream_name,
            "*",
            &[
                ("job_id", job.id.as_str()),
                ("job", payload.as_str()),
                ("error", error.as_str()),
            ],
        )
        .await?;
        warn!(job_id = %job.id, error = %error, "Moved job to DLQ");
        Ok(())
    }

    /// Length of the dead letter stream.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue_job(&self, job: RenderJob) -> QueueResult<JobId> {
        if job.status != JobStatus::Waiting {
            return Err(JobTransitionError::InvalidTransition {
                from: job.status,
                action: "enqueue",
            }
            .into());
        }

        let mut conn = self.conn().await?;
        let idempotency_key = job.idempotency_key();
        let dedup_key = self.config.dedup_key(&idempotency_key);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(job.id.as_str())
            .arg("NX")
            .arg("EX")
            .arg(self.config.ttl_secs())
            .query_async(&mut conn)
            .await?;

        if claimed.is_none() {
            let existing: Option<String> = conn.get(&dedup_key).await?;
            if let Some(existing) = existing {
                info!(key = %idempotency_key, job_id = %existing, "Duplicate job, returning existing id");
                return Ok(JobId::from_string(existing));
            }
            // The key expired in between; claim it now.
            conn.set_ex::<_, _, ()>(&dedup_key, job.id.as_str(), self.config.ttl_secs())
                .await?;
        }

        self.store(&mut conn, &job).await?;
        let message_id = self.push(&mut conn, &job.id).await?;
        self.publish(&job).await;

        info!("Enqueued job {} with message ID {}", job.id, message_id);
        Ok(job.id)
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>> {
        // Blocking reads get their own connection.
        let mut conn = self.conn().await?;
        self.promote_due(&mut conn).await?;

        let block_ms = wait.as_millis().clamp(1, u128::from(u32::MAX)) as usize;
        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_name)
            .count(1)
            .block(block_ms);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream_name], &[">"], &options)
            .await?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        let job_id = entry.get::<String>("job_id");
        self.deliver(&mut conn, entry.id, job_id).await
    }

    /// Reset the entry's idle time by claiming it again for this consumer.
    async fn heartbeat(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(0)
            .arg(&delivery.receipt)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        if claimed.is_empty() {
            warn!(job_id = %delivery.job_id(), receipt = %delivery.receipt, "Delivery is no longer pending");
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        self.remove_message(&mut conn, &delivery.receipt).await?;
        debug!("Acknowledged job: {}", delivery.receipt);
        Ok(())
    }

    async fn report(&self, job: &RenderJob) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        if let Some(current) = self.load(&mut conn, &job.id).await? {
            if current.status.is_terminal() && current.status != job.status {
                return Err(QueueError::settled(&job.id, current.status));
            }
        }
        self.store(&mut conn, job).await?;

        if matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            let dedup_key = self.config.dedup_key(&job.idempotency_key());
            let owner: Option<String> = conn.get(&dedup_key).await?;
            if owner.as_deref() == Some(job.id.as_str()) {
                conn.del::<_, ()>(&dedup_key).await?;
            }
        }
        if job.status == JobStatus::Failed {
            self.dead_letter(&mut conn, job).await?;
        }

        self.publish(job).await;
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

        let mut conn = self.conn().await?;
        self.store(&mut conn, &job).await?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(self.config.delayed_key(), job.id.as_str(), due_ms)
            .await?;
        self.publish(&job).await;

        debug!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "Scheduled retry");
        Ok(())
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let Some(mut job) = self.load(&mut conn, id).await? else {
            return Err(QueueError::job_not_found(id));
        };
        if !matches!(job.status, JobStatus::Waiting | JobStatus::Retried) {
            return Ok(false);
        }

        job.cancel()?;
        conn.zrem::<_, _, ()>(self.config.delayed_key(), id.as_str()).await?;
        // Report drops the dedup key; the stream entry is skipped on delivery.
        self.report(&job).await?;

        info!(job_id = %id, "Cancelled queued job");
        Ok(true)
    }

    async fn status(&self, id: &JobId) -> QueueResult<Option<RenderJob>> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, id).await
    }

    async fn subscribe(&self, id: &JobId) -> QueueResult<StatusStream> {
        self.channel.subscribe(id).await
    }

    async fn depth(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Claim deliveries idle for longer than `min_idle`.
    ///
    /// Live deliveries are kept fresh by [`JobQueue::heartbeat`], so these
    /// belong to a consumer that went away. An active job counts the lost
    /// attempt: requeued while the budget lasts, failed otherwise. A job
    /// still `waiting` never had its pickup recorded and is pushed again.
    async fn recover(&self, min_idle: Duration) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(PROMOTE_BATCH)
            .query_async(&mut conn)
            .await?;

        let mut recovered = 0;
        for stale in pending.ids {
            let claimed: StreamClaimReply = conn
                .xclaim(
                    &self.config.stream_name,
                    &self.config.consumer_group,
                    &self.config.consumer_name,
                    min_idle_ms,
                    &[&stale.id],
                )
                .await?;
            // Another consumer got there first.
            let Some(entry) = claimed.ids.into_iter().next() else {
                continue;
            };

            if let Some(raw_id) = entry.get::<String>("job_id") {
                let id = JobId::from_string(raw_id);
                match self.load(&mut conn, &id).await? {
                    Some(mut job) if job.status == JobStatus::Active => {
                        let reason = format!("worker {} stopped responding", stale.consumer);
                        if job.can_retry() {
                            job.mark_retried(reason)?;
                            job.requeue()?;
                            self.store(&mut conn, &job).await?;
                            self.push(&mut conn, &id).await?;
                            self.publish(&job).await;
                        } else {
                            job.fail(reason)?;
                            self.report(&job).await?;
                        }
                        info!(job_id = %id, status = %job.status, "Recovered stale job");
                    }
                    Some(job) if job.status == JobStatus::Waiting => {
                        self.push(&mut conn, &id).await?;
                        info!(job_id = %id, "Redelivering job that was never started");
                    }
                    _ => {}
                }
            }

            self.remove_message(&mut conn, &entry.id).await?;
            recovered += 1;
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let config = QueueConfig {
            key_prefix: "test".to_string(),
            ..QueueConfig::default()
        };
        let id = JobId::from_string("42");
        assert_eq!(config.job_key(&id), "test:job:42");
        assert_eq!(config.dedup_key("trim:/out/a.mp4"), "test:dedup:trim:/out/a.mp4");
        assert_eq!(config.delayed_key(), "test:delayed");
    }

    #[test]
    fn test_consumer_names_are_unique() {
        let a = QueueConfig::default();
        let b = QueueConfig::default();
        assert!(a.consumer_name.starts_with("worker-"));
        assert_ne!(a.consumer_name, b.consumer_name);
    }

    #[test]
    fn test_ttl_never_zero() {
        let config = QueueConfig {
            job_ttl: Duration::from_millis(10),
            ..QueueConfig::default()
        };
        assert_eq!(config.ttl_secs(), 1);
    }
}
