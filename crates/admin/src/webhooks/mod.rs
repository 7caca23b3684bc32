//! Webhook job queue.
//!
//! Jobs are created by the ingestion route and processed by the worker
//! process. Two interchangeable backends hold them:
//!
//! - [`MemoryQueue`] - process-local, insertion ordered, lost on restart.
//!   Supports [`WebhookQueue::mark_job_status`] but no worker.
//! - [`RedisQueue`] - durable, shared between the server and any number of
//!   worker processes. Status is owned by the worker, so manual status
//!   changes are rejected.
//!
//! The backend is chosen once, when [`WebhookQueue::from_config`] runs at
//! startup, and can be inspected through [`WebhookQueue::capabilities`].

mod durable;
mod memory;
mod worker;

pub use durable::{ClaimedJob, FailOutcome, QueueKeys, RedisQueue, job_from_hash};
pub use memory::MemoryQueue;
pub use worker::{HandlerError, WebhookHandler, WebhookWorker, WorkerEvent, WorkerOptions};

use pulse_core::{Job, JobStatus, ShopDomain, TopicKey};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::config::{QueueBackendKind, QueueConfig};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The active backend does not implement the operation.
    #[error("{0} is not supported by this queue backend")]
    Unsupported(&'static str),

    /// No job with the given id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The requested status change is not allowed.
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },

    /// A durable job record could not be read.
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Operations the active backend supports beyond the common contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCapabilities {
    /// [`WebhookQueue::mark_job_status`] is available.
    pub mark_status: bool,
    /// [`WebhookQueue::create_webhook_queue_worker`] is available.
    pub worker: bool,
}

/// The webhook queue, backed by memory or Redis.
///
/// Cheap to clone; clones share the same jobs.
#[derive(Debug, Clone)]
pub enum WebhookQueue {
    /// Process-local queue.
    InMemory(MemoryQueue),
    /// Redis-backed durable queue.
    Durable(RedisQueue),
}

impl WebhookQueue {
    /// Build the queue selected by configuration.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Redis` if the durable backend is selected and the
    /// connection cannot be established.
    pub async fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        match (config.backend, &config.redis_url) {
            (QueueBackendKind::Redis, Some(url)) => {
                let queue = RedisQueue::connect(url, &config.queue_name, &config.prefix).await?;
                info!(queue = %config.queue_name, "Using durable webhook queue");
                Ok(Self::Durable(queue))
            }
            (QueueBackendKind::Redis, None) => {
                warn!("WEBHOOK_QUEUE_BACKEND=redis but REDIS_URL is not set; using in-memory queue");
                Ok(Self::in_memory())
            }
            (QueueBackendKind::Memory, _) => {
                info!("Using in-memory webhook queue");
                Ok(Self::in_memory())
            }
        }
    }

    /// An empty in-memory queue.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::InMemory(MemoryQueue::new())
    }

    /// Whether jobs are persisted in Redis.
    #[must_use]
    pub const fn is_durable_backend_enabled(&self) -> bool {
        matches!(self, Self::Durable(_))
    }

    /// What the active backend supports.
    #[must_use]
    pub const fn capabilities(&self) -> QueueCapabilities {
        match self {
            Self::InMemory(_) => QueueCapabilities {
                mark_status: true,
                worker: false,
            },
            Self::Durable(_) => QueueCapabilities {
                mark_status: false,
                worker: true,
            },
        }
    }

    /// Add a pending job.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Redis` or `QueueError::Serialization` from the
    /// durable backend. The in-memory backend never fails.
    #[instrument(skip(self, payload), fields(topic = %topic, shop = %shop_domain))]
    pub async fn enqueue_webhook_job(
        &self,
        topic: TopicKey,
        shop_domain: ShopDomain,
        payload: Option<serde_json::Value>,
    ) -> Result<Job, QueueError> {
        let job = match self {
            Self::InMemory(queue) => Ok(queue.enqueue(topic, shop_domain, payload).await),
            Self::Durable(queue) => queue.enqueue(topic, shop_domain, payload).await,
        }?;
        info!(job_id = %job.id, "Webhook job enqueued");
        Ok(job)
    }

    /// Set a job's status by hand.
    ///
    /// Marking a job `Failed` increments its attempt count and records
    /// `error`; any other status clears the error.
    ///
    /// # Errors
    ///
    /// - `Unsupported` on the durable backend
    /// - `NotFound` for an unknown id
    /// - `InvalidTransition` if the status change is not allowed
    #[instrument(skip(self, error))]
    pub async fn mark_job_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, QueueError> {
        match self {
            Self::InMemory(queue) => queue.mark_status(id, status, error).await,
            Self::Durable(_) => Err(QueueError::Unsupported("mark_job_status")),
        }
    }

    /// List the jobs currently known to the queue.
    ///
    /// In memory this is exact and in insertion order. The durable backend
    /// lists waiting, delayed, active, completed and failed jobs, each up to
    /// a fixed limit.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Redis` from the durable backend.
    pub async fn snapshot_queue(&self) -> Result<Vec<Job>, QueueError> {
        match self {
            Self::InMemory(queue) => Ok(queue.snapshot().await),
            Self::Durable(queue) => queue.snapshot().await,
        }
    }

    /// Remove all jobs.
    ///
    /// The durable backend leaves jobs that a worker is processing right now.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Redis` from the durable backend.
    #[instrument(skip(self))]
    pub async fn clear_queue(&self) -> Result<(), QueueError> {
        match self {
            Self::InMemory(queue) => {
                queue.clear().await;
                Ok(())
            }
            Self::Durable(queue) => queue.clear().await.map(|removed| {
                info!(removed, "Durable webhook queue cleared");
            }),
        }
    }

    /// Create a worker for the durable backend.
    ///
    /// Returns the worker and the receiving end of its event stream. Run the
    /// worker with [`WebhookWorker::run`].
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Unsupported` on the in-memory backend.
    pub fn create_webhook_queue_worker<H: WebhookHandler>(
        &self,
        handler: H,
        options: WorkerOptions,
    ) -> Result<(WebhookWorker<H>, mpsc::UnboundedReceiver<WorkerEvent>), QueueError> {
        match self {
            Self::InMemory(_) => Err(QueueError::Unsupported("create_webhook_queue_worker")),
            Self::Durable(queue) => Ok(WebhookWorker::new(queue.clone(), handler, options)),
        }
    }

    /// Check that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Redis` if Redis does not answer.
    pub async fn ping(&self) -> Result<(), QueueError> {
        match self {
            Self::InMemory(_) => Ok(()),
            Self::Durable(queue) => queue.ping().await,
        }
    }
}
