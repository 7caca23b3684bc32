//! Process-local webhook queue.

use std::sync::Arc;

use pulse_core::{Job, JobStatus, ShopDomain, TopicKey};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::QueueError;

/// In-memory job store. Insertion ordered; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl MemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) async fn enqueue(
        &self,
        topic: TopicKey,
        shop_domain: ShopDomain,
        payload: Option<serde_json::Value>,
    ) -> Job {
        let job = Job::new(Uuid::new_v4().to_string(), topic, shop_domain, payload);
        self.jobs.lock().await.push(job.clone());
        job
    }

    pub(super) async fn mark_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if !job.status.can_transition_to(status) {
            return Err(QueueError::InvalidTransition {
                from: job.status,
                to: status,
            });
        }

        debug!(job_id = id, from = %job.status, to = %status, "Job status changed");
        job.status = status;
        if status == JobStatus::Failed {
            job.attempts = job.attempts.saturating_add(1);
            job.error = Some(error.unwrap_or_else(|| "unknown error".to_string()));
        } else {
            job.error = None;
        }

        Ok(job.clone())
    }

    pub(super) async fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }

    pub(super) async fn clear(&self) {
        self.jobs.lock().await.clear();
    }
}
