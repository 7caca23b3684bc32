//! Integration tests for the Redis-backed queue and worker.
//!
//! These need a disposable Redis and are ignored by default:
//!
//! ```bash
//! REDIS_URL=redis://127.0.0.1:6379 cargo test -p pulse-integration-tests -- --ignored
//! ```
//!
//! Each test uses its own uniquely named queue.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use pulse_admin::webhooks::{
    HandlerError, QueueCapabilities, QueueError, WebhookQueue, WorkerEvent, WorkerOptions,
};
use pulse_core::{JobStatus, ShopDomain, TopicKey, WebhookJob};
use pulse_integration_tests::{TEST_SHOP, durable_queue};
use tokio::sync::{Mutex, mpsc, oneshot, watch};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

async fn queue() -> WebhookQueue {
    durable_queue()
        .await
        .unwrap()
        .expect("REDIS_URL must be set for durable queue tests")
}

fn topic(raw: &str) -> TopicKey {
    TopicKey::parse(raw).unwrap()
}

fn shop() -> ShopDomain {
    ShopDomain::parse(TEST_SHOP).unwrap()
}

fn fast_options() -> WorkerOptions {
    WorkerOptions {
        max_attempts: 2,
        backoff: Duration::from_millis(20),
        lock_duration: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        ..WorkerOptions::default()
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a worker event")
        .expect("worker event channel closed")
}

// =============================================================================
// Queue contract
// =============================================================================

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_enqueue_then_snapshot() {
    let queue = queue().await;
    assert!(queue.is_durable_backend_enabled());
    assert_eq!(
        queue.capabilities(),
        QueueCapabilities {
            mark_status: false,
            worker: true,
        }
    );

    let payload = serde_json::json!({ "id": 820982911946154508_i64 });
    let first = queue
        .enqueue_webhook_job(topic("ORDERS_CREATE"), shop(), Some(payload.clone()))
        .await
        .unwrap();
    let second = queue
        .enqueue_webhook_job(topic("CUSTOMERS_UPDATE"), shop(), None)
        .await
        .unwrap();

    let snapshot = queue.snapshot_queue().await.unwrap();
    let ids: Vec<&str> = snapshot.iter().map(|job| job.id.as_str()).collect();
    assert_eq!(ids, [first.id.as_str(), second.id.as_str()]);
    assert!(snapshot.iter().all(|job| job.status == JobStatus::Pending));
    assert_eq!(snapshot[0].payload, Some(payload));
    assert!(snapshot[0].durable.is_some());

    queue.clear_queue().await.unwrap();
    assert!(queue.snapshot_queue().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_manual_status_changes_are_unsupported() {
    let queue = queue().await;
    let job = queue
        .enqueue_webhook_job(topic("ORDERS_CREATE"), shop(), None)
        .await
        .unwrap();

    let err = queue
        .mark_job_status(&job.id, JobStatus::Completed, None)
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::Unsupported("mark_job_status")));
    queue.clear_queue().await.unwrap();
}

// =============================================================================
// Worker
// =============================================================================

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_worker_completes_jobs() {
    let queue = queue().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<WebhookJob>();
    let handler = move |job: WebhookJob| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(job);
            Ok::<(), HandlerError>(())
        }
    };

    let (worker, mut events) = queue
        .create_webhook_queue_worker(handler, fast_options())
        .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(worker.run(shutdown_rx));

    let job = queue
        .enqueue_webhook_job(
            topic("ORDERS_CREATE"),
            shop(),
            Some(serde_json::json!({ "id": 1 })),
        )
        .await
        .unwrap();

    match next_event(&mut events).await {
        WorkerEvent::Completed { job: done } => {
            assert_eq!(done.id, job.id);
            assert_eq!(done.status, JobStatus::Completed);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let handled = seen_rx.recv().await.unwrap();
    assert_eq!(handled.webhook_id, job.id);
    assert_eq!(handled.payload, Some(serde_json::json!({ "id": 1 })));

    let snapshot = queue.snapshot_queue().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, JobStatus::Completed);

    shutdown_tx.send(true).unwrap();
    running.await.unwrap();
    queue.clear_queue().await.unwrap();
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_worker_retries_then_fails() {
    let queue = queue().await;
    let handler =
        |_job: WebhookJob| async { Err::<(), HandlerError>("shop not installed".into()) };

    let (worker, mut events) = queue
        .create_webhook_queue_worker(handler, fast_options())
        .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(worker.run(shutdown_rx));

    let job = queue
        .enqueue_webhook_job(topic("ORDERS_CREATE"), shop(), None)
        .await
        .unwrap();

    match next_event(&mut events).await {
        WorkerEvent::Failed {
            job: failed,
            error,
            will_retry,
        } => {
            assert_eq!(failed.id, job.id);
            assert_eq!(failed.attempts, 1);
            assert_eq!(error, "shop not installed");
            assert!(will_retry);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    match next_event(&mut events).await {
        WorkerEvent::Failed {
            job: failed,
            will_retry,
            ..
        } => {
            assert_eq!(failed.attempts, 2);
            assert_eq!(failed.status, JobStatus::Failed);
            assert!(!will_retry);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = queue.snapshot_queue().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, JobStatus::Failed);
    assert_eq!(snapshot[0].attempts, 2);
    assert_eq!(snapshot[0].error.as_deref(), Some("shop not installed"));

    shutdown_tx.send(true).unwrap();
    running.await.unwrap();
    queue.clear_queue().await.unwrap();
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_worker_survives_panicking_handler() {
    let queue = queue().await;
    let handler = |job: WebhookJob| async move {
        assert_ne!(job.topic.as_str(), "ORDERS_CREATE", "boom");
        Ok::<(), HandlerError>(())
    };

    let options = WorkerOptions {
        max_attempts: 1,
        ..fast_options()
    };
    let (worker, mut events) = queue.create_webhook_queue_worker(handler, options).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(worker.run(shutdown_rx));

    queue
        .enqueue_webhook_job(topic("ORDERS_CREATE"), shop(), None)
        .await
        .unwrap();
    queue
        .enqueue_webhook_job(topic("CUSTOMERS_UPDATE"), shop(), None)
        .await
        .unwrap();

    match next_event(&mut events).await {
        WorkerEvent::Failed {
            error, will_retry, ..
        } => {
            assert_eq!(error, "handler panicked");
            assert!(!will_retry);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        WorkerEvent::Completed { .. }
    ));

    shutdown_tx.send(true).unwrap();
    running.await.unwrap();
    queue.clear_queue().await.unwrap();
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_shutdown_waits_for_running_handler() {
    let queue = queue().await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel::<String>();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let release = Arc::new(Mutex::new(Some(release_rx)));

    let handler = move |job: WebhookJob| {
        let started_tx = started_tx.clone();
        let release = Arc::clone(&release);
        async move {
            let _ = started_tx.send(job.webhook_id);
            let gate = release.lock().await.take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok::<(), HandlerError>(())
        }
    };

    let (worker, mut events) = queue
        .create_webhook_queue_worker(handler, fast_options())
        .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(worker.run(shutdown_rx));

    let first = queue
        .enqueue_webhook_job(topic("ORDERS_CREATE"), shop(), None)
        .await
        .unwrap();
    let started = tokio::time::timeout(EVENT_TIMEOUT, started_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(started, first.id);

    let second = queue
        .enqueue_webhook_job(topic("CUSTOMERS_UPDATE"), shop(), None)
        .await
        .unwrap();
    shutdown_tx.send(true).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running.is_finished(), "worker stopped before its handler finished");

    release_tx.send(()).unwrap();
    tokio::time::timeout(EVENT_TIMEOUT, running)
        .await
        .expect("worker did not stop after draining")
        .unwrap();

    match events.recv().await {
        Some(WorkerEvent::Completed { job }) => assert_eq!(job.id, first.id),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(events.recv().await.is_none());
    assert!(started_rx.try_recv().is_err(), "a job was claimed after shutdown");

    let snapshot = queue.snapshot_queue().await.unwrap();
    let waiting = snapshot.iter().find(|job| job.id == second.id).unwrap();
    assert_eq!(waiting.status, JobStatus::Pending);
    assert_eq!(waiting.attempts, 0);

    queue.clear_queue().await.unwrap();
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_retrying_job_reports_no_error() {
    let queue = queue().await;
    let handler = |_job: WebhookJob| async { Err::<(), HandlerError>("rate limited".into()) };
    let options = WorkerOptions {
        max_attempts: 2,
        backoff: Duration::from_secs(60),
        ..fast_options()
    };

    let (worker, mut events) = queue.create_webhook_queue_worker(handler, options).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(worker.run(shutdown_rx));

    queue
        .enqueue_webhook_job(topic("ORDERS_CREATE"), shop(), None)
        .await
        .unwrap();

    match next_event(&mut events).await {
        WorkerEvent::Failed {
            job,
            error,
            will_retry,
        } => {
            assert!(will_retry);
            assert_eq!(error, "rate limited");
            assert_eq!(job.status, JobStatus::Pending);
            assert!(job.error.is_none());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = queue.snapshot_queue().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, JobStatus::Pending);
    assert_eq!(snapshot[0].attempts, 1);
    assert!(snapshot[0].error.is_none());

    shutdown_tx.send(true).unwrap();
    running.await.unwrap();
    queue.clear_queue().await.unwrap();
}
