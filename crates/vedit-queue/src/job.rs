//! Jobs as handed out by a queue.

use serde::{Deserialize, Serialize};
use vedit_models::{JobId, RenderJob};

/// A job taken off the queue, together with the receipt needed to ack it.
///
/// The job snapshot is the state at pickup. A delivery that is never acked
/// stays claimed by its consumer until the queue recovers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Adapter specific handle, e.g. the stream message id
    pub receipt: String,
    pub job: RenderJob,
}

impl Delivery {
    pub fn new(receipt: impl Into<String>, job: RenderJob) -> Self {
        Self {
            receipt: receipt.into(),
            job,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_models::{JobPayload, ShotDetectionRequest};

    #[test]
    fn test_delivery_serde_roundtrip() {
        let job = RenderJob::new(JobPayload::DetectShots(ShotDetectionRequest::new("/in.mp4")));
        let delivery = Delivery::new("1700000000000-0", job.clone());

        let json = serde_json::to_string(&delivery).expect("serialize Delivery");
        let decoded: Delivery = serde_json::from_str(&json).expect("deserialize Delivery");

        assert_eq!(decoded.receipt, "1700000000000-0");
        assert_eq!(decoded.job_id(), &job.id);
        assert_eq!(decoded.job.payload, job.payload);
    }
}
