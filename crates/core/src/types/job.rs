//! Webhook job types shared by the queue backends and the worker.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ShopDomain, TopicKey};

/// Lifecycle status of a webhook job.
///
/// ```text
/// Pending ──> Processing ──> Completed
///    │            │
///    │            └───────> Failed ──> Pending | Processing (retry)
///    └──> Completed | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether a job in this status may move to `next`.
    ///
    /// `Completed` is terminal. `Failed` may only go back to `Pending` or
    /// `Processing` (a retry).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Processing | Self::Completed | Self::Failed
            ) | (Self::Processing, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Pending | Self::Processing)
        )
    }

    /// Whether this is a settled status (no worker is expected to pick it up).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Status name as used in logs and the JSON representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// Native bookkeeping carried by jobs that live in the durable (Redis) backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableJobMeta {
    /// Name of the Redis queue holding the job.
    pub queue_name: String,
    /// Job name as stored by the queue (the topic key).
    pub job_name: String,
    /// Enqueue time as recorded by the queue (epoch milliseconds).
    pub timestamp_ms: i64,
    /// When a worker last claimed the job (epoch milliseconds).
    pub processed_on_ms: Option<i64>,
    /// When the job settled (epoch milliseconds).
    pub finished_on_ms: Option<i64>,
}

/// A webhook job as observed through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Opaque identifier, unique within its backend.
    pub id: String,
    /// Webhook topic key (e.g. `ORDERS_CREATE`).
    #[serde(rename = "topicKey")]
    pub topic: TopicKey,
    /// Shop the webhook was delivered for.
    pub shop_domain: ShopDomain,
    /// Webhook body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Current status.
    pub status: JobStatus,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Reason for the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Durable-backend metadata (absent for in-memory jobs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<DurableJobMeta>,
}

impl Job {
    /// Create a new pending job.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        topic: TopicKey,
        shop_domain: ShopDomain,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            topic,
            shop_domain,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            error: None,
            enqueued_at: Utc::now(),
            durable: None,
        }
    }

    /// The view of this job handed to a worker handler.
    #[must_use]
    pub fn to_webhook_job(&self) -> WebhookJob {
        WebhookJob {
            webhook_id: self.id.clone(),
            topic: self.topic.clone(),
            shop_domain: self.shop_domain.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// What a worker handler receives for each dequeued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookJob {
    /// Queue identifier of the job.
    pub webhook_id: String,
    /// Webhook topic key.
    #[serde(rename = "topicKey")]
    pub topic: TopicKey,
    /// Shop the webhook was delivered for.
    pub shop_domain: ShopDomain,
    /// Webhook body.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            "job-1",
            TopicKey::parse("ORDERS_CREATE").unwrap(),
            ShopDomain::parse("pineapple.myshopify.com").unwrap(),
            Some(serde_json::json!({"id": 42})),
        )
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.error.is_none());
        assert!(job.durable.is_none());
    }

    #[test]
    fn test_valid_transitions() {
        use JobStatus::{Completed, Failed, Pending, Processing};

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_invalid_transitions() {
        use JobStatus::{Completed, Failed, Pending, Processing};

        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
        for status in [Pending, Processing, Completed, Failed] {
            assert!(!status.can_transition_to(status), "{status} -> {status}");
        }
    }

    #[test]
    fn test_status_roundtrip_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_json_shape() {
        let json = serde_json::to_value(sample_job()).unwrap();
        assert_eq!(json["id"], "job-1");
        assert_eq!(json["topicKey"], "ORDERS_CREATE");
        assert_eq!(json["shopDomain"], "pineapple.myshopify.com");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["attempts"], 0);
        assert!(json.get("error").is_none());
        assert!(json.get("durable").is_none());
    }

    #[test]
    fn test_to_webhook_job() {
        let job = sample_job();
        let webhook = job.to_webhook_job();
        assert_eq!(webhook.webhook_id, "job-1");
        assert_eq!(webhook.topic, job.topic);
        assert_eq!(webhook.shop_domain, job.shop_domain);
        assert_eq!(webhook.payload, job.payload);
    }
}
