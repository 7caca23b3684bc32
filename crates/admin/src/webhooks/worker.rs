//! Durable queue consumer.
//!
//! A [`WebhookWorker`] runs `concurrency` claim loops against a
//! [`RedisQueue`]. Each loop claims one job, runs the handler on its own
//! task (so a panic is contained), renews the claim while the handler runs,
//! then settles the job and emits a [`WorkerEvent`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::{Job, JobStatus, WebhookJob};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::durable::{ClaimedJob, RedisQueue};
use crate::config::QueueConfig;

/// Error type handlers report failures with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Pause after a Redis error inside a loop.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Shortest claim a worker takes; renewal runs at half of it.
pub const MIN_LOCK_DURATION: Duration = Duration::from_millis(10);

/// Processes one webhook job.
///
/// Implemented for any `Fn(WebhookJob) -> impl Future<Output = Result<(), HandlerError>>`.
pub trait WebhookHandler: Send + Sync + 'static {
    /// Handle a job. An `Err` counts as a failed attempt.
    fn handle(&self, job: WebhookJob) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

impl<F, Fut> WebhookHandler for F
where
    F: Fn(WebhookJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn handle(&self, job: WebhookJob) -> impl Future<Output = Result<(), HandlerError>> + Send {
        self(job)
    }
}

/// Something that happened to a job.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The handler succeeded and the job was marked completed.
    Completed {
        /// The settled job.
        job: Job,
    },
    /// The handler failed (or panicked).
    Failed {
        /// The job after recording the failure.
        job: Job,
        /// Failure reason.
        error: String,
        /// Whether the job was scheduled for another attempt.
        will_retry: bool,
    },
}

/// Worker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Claim loops run in parallel.
    pub concurrency: usize,
    /// Attempts before a job is moved to failed.
    pub max_attempts: u32,
    /// Retry delay base; attempt `n` waits `backoff * 2^(n-1)`.
    pub backoff: Duration,
    /// How long a claim stays valid without renewal.
    pub lock_duration: Duration,
    /// How often expired claims are returned to the wait list.
    pub stalled_interval: Duration,
    /// Sleep between claim attempts on an empty queue.
    pub poll_interval: Duration,
    /// Completed jobs kept for inspection.
    pub remove_on_complete: usize,
    /// Failed jobs kept for inspection.
    pub remove_on_fail: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            remove_on_complete: 1000,
            remove_on_fail: 5000,
        }
    }
}

impl WorkerOptions {
    /// Options from queue configuration, defaults for the rest.
    #[must_use]
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
            ..Self::default()
        }
    }

    /// Clamp values a worker cannot run with: at least one loop, one
    /// attempt and [`MIN_LOCK_DURATION`].
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            concurrency: self.concurrency.max(1),
            max_attempts: self.max_attempts.max(1),
            lock_duration: self.lock_duration.max(MIN_LOCK_DURATION),
            ..self
        }
    }
}

/// Consumer for the durable webhook queue.
pub struct WebhookWorker<H> {
    queue: RedisQueue,
    handler: Arc<H>,
    options: WorkerOptions,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl<H> std::fmt::Debug for WebhookWorker<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookWorker")
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<H: WebhookHandler> WebhookWorker<H> {
    pub(super) fn new(
        queue: RedisQueue,
        handler: H,
        options: WorkerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let worker = Self {
            queue,
            handler: Arc::new(handler),
            options: options.normalized(),
            events,
        };
        (worker, receiver)
    }

    /// Worker options.
    #[must_use]
    pub const fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Process jobs until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Claiming stops as soon as shutdown is signalled; jobs already being
    /// handled run to completion and are settled before this returns.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            queue = self.queue.queue_name(),
            concurrency = self.options.concurrency,
            "Webhook worker started"
        );

        match self.queue.recover_stalled().await {
            Ok(0) => {}
            Ok(moved) => warn!(moved, "Returned stalled jobs to the queue"),
            Err(e) => error!(error = %e, "Stalled job check failed"),
        }

        let worker = Arc::new(self);
        let mut loops = JoinSet::new();
        for slot in 0..worker.options.concurrency {
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            loops.spawn(async move { worker.claim_loop(slot, shutdown).await });
        }
        {
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            loops.spawn(async move { worker.stalled_loop(shutdown).await });
        }

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker loop ended abnormally");
            }
        }

        info!("Webhook worker stopped");
    }

    async fn claim_loop(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(slot, "Claim loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.queue.claim(self.options.lock_duration).await {
                Ok(Some(claimed)) => {
                    self.process(claimed).await;
                    continue;
                }
                Ok(None) => self.options.poll_interval,
                Err(e) => {
                    error!(slot, error = %e, "Failed to claim webhook job");
                    ERROR_PAUSE
                }
            };

            if wait_or_shutdown(&mut shutdown, pause).await {
                break;
            }
        }
        debug!(slot, "Claim loop stopped");
    }

    async fn stalled_loop(&self, mut shutdown: watch::Receiver<bool>) {
        while !wait_or_shutdown(&mut shutdown, self.options.stalled_interval).await {
            match self.queue.recover_stalled().await {
                Ok(0) => {}
                Ok(moved) => warn!(moved, "Returned stalled jobs to the queue"),
                Err(e) => error!(error = %e, "Stalled job check failed"),
            }
        }
    }

    #[instrument(skip_all, fields(job_id = %claimed.job.id, topic = %claimed.job.topic, shop = %claimed.job.shop_domain))]
    async fn process(&self, claimed: ClaimedJob) {
        let handler = Arc::clone(&self.handler);
        let webhook = claimed.job.to_webhook_job();
        let mut task = tokio::spawn(async move { handler.handle(webhook).await });

        let renew_every = self.options.lock_duration / 2;
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);
        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = renew.tick() => match self.queue.extend_lock(&claimed, self.options.lock_duration).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Lost claim on running job"),
                    Err(e) => warn!(error = %e, "Failed to extend job claim"),
                },
            }
        };

        match handler_outcome(joined) {
            Ok(()) => self.settle_completed(claimed).await,
            Err(reason) => self.settle_failed(claimed, reason).await,
        }
    }

    async fn settle_completed(&self, claimed: ClaimedJob) {
        match self
            .queue
            .complete(&claimed, self.options.remove_on_complete)
            .await
        {
            Ok(true) => {
                let mut job = claimed.job;
                job.status = JobStatus::Completed;
                job.error = None;
                if let Some(durable) = job.durable.as_mut() {
                    durable.finished_on_ms = Some(chrono::Utc::now().timestamp_millis());
                }
                info!("Webhook job completed");
                self.emit(WorkerEvent::Completed { job });
            }
            Ok(false) => warn!("Job finished after its claim was lost; it will run again"),
            Err(e) => error!(error = %e, "Failed to mark job completed"),
        }
    }

    async fn settle_failed(&self, claimed: ClaimedJob, reason: String) {
        let result = self
            .queue
            .fail(
                &claimed,
                &reason,
                self.options.max_attempts,
                self.options.backoff,
                self.options.remove_on_fail,
            )
            .await;

        match result {
            Ok(Some(outcome)) => {
                let mut job = claimed.job;
                job.attempts = outcome.attempts;
                job.error = (!outcome.will_retry).then(|| reason.clone());
                job.status = if outcome.will_retry {
                    JobStatus::Pending
                } else {
                    JobStatus::Failed
                };
                warn!(
                    attempts = outcome.attempts,
                    will_retry = outcome.will_retry,
                    error = %reason,
                    "Webhook job failed"
                );
                self.emit(WorkerEvent::Failed {
                    job,
                    error: reason,
                    will_retry: outcome.will_retry,
                });
            }
            Ok(None) => warn!(error = %reason, "Job failed after its claim was lost; it will run again"),
            Err(e) => error!(error = %e, "Failed to record job failure"),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("Worker event receiver dropped");
        }
    }
}

/// Turn a joined handler task into a failure reason.
fn handler_outcome(joined: Result<Result<(), HandlerError>, JoinError>) -> Result<(), String> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err("handler panicked".to_string()),
        Err(e) => Err(format!("handler task failed: {e}")),
    }
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` if the caller should stop.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let changed = tokio::select! {
        () = tokio::time::sleep(duration) => return false,
        changed = shutdown.changed() => changed,
    };
    changed.is_err() || *shutdown.borrow()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = QueueConfig {
            worker_concurrency: 4,
            max_attempts: 5,
            backoff: Duration::from_millis(250),
            ..QueueConfig::default()
        };
        let options = WorkerOptions::from_config(&config);

        assert_eq!(options.concurrency, 4);
        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.backoff, Duration::from_millis(250));
        assert_eq!(options.lock_duration, Duration::from_secs(30));
        assert_eq!(options.remove_on_complete, 1000);
        assert_eq!(options.remove_on_fail, 5000);
    }

    #[test]
    fn test_options_are_normalized() {
        let options = WorkerOptions {
            concurrency: 0,
            max_attempts: 0,
            lock_duration: Duration::from_nanos(1),
            ..WorkerOptions::default()
        }
        .normalized();

        assert_eq!(options.concurrency, 1);
        assert_eq!(options.max_attempts, 1);
        assert_eq!(options.lock_duration, MIN_LOCK_DURATION);
        assert!(!(options.lock_duration / 2).is_zero());

        let sane = WorkerOptions::default();
        assert_eq!(sane.clone().normalized(), sane);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_reason() {
        let handler = |_job: WebhookJob| async { Err::<(), HandlerError>("shop not installed".into()) };
        let job = WebhookJob {
            webhook_id: "1".to_string(),
            topic: pulse_core::TopicKey::parse("ORDERS_CREATE").unwrap(),
            shop_domain: pulse_core::ShopDomain::parse("pineapple.myshopify.com").unwrap(),
            payload: None,
        };

        let joined = tokio::spawn(async move { handler.handle(job).await }).await;
        assert_eq!(handler_outcome(joined), Err("shop not installed".to_string()));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let joined = tokio::spawn(async {
            let missing: Option<()> = None;
            missing.unwrap();
            Ok::<(), HandlerError>(())
        })
        .await;
        assert_eq!(handler_outcome(joined), Err("handler panicked".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_or_shutdown_times_out() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(&mut rx, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_or_shutdown_wakes_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_or_shutdown(&mut rx, Duration::from_secs(3600)).await });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_or_shutdown_stops_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(wait_or_shutdown(&mut rx, Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_wait_or_shutdown_already_signalled() {
        let (_tx, mut rx) = watch::channel(true);
        assert!(wait_or_shutdown(&mut rx, Duration::from_secs(3600)).await);
    }
}
