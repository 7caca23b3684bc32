//! Integration tests for Merchant Pulse.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory and fake-transport tests
//! cargo test -p pulse-integration-tests
//!
//! # Durable queue tests (need a disposable Redis)
//! REDIS_URL=redis://127.0.0.1:6379 cargo test -p pulse-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `webhook_ingestion` - HTTP ingestion against a live server
//! - `queue_lifecycle` - in-memory queue contract
//! - `durable_queue` - Redis queue and worker (ignored without Redis)
//! - `admin_gateway` - session resolution and gateway behavior

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::SocketAddr;

use pulse_admin::config::{QueueBackendKind, QueueConfig};
use pulse_admin::routes;
use pulse_admin::state::AppState;
use pulse_admin::webhooks::{QueueError, WebhookQueue};
use secrecy::SecretString;
use tokio::task::JoinHandle;

/// Webhook secret used by every test server.
pub const TEST_SECRET: &str = "shpss_integration_7d1f0c2e9b8a4c3d";

/// Shop domain used by fixtures.
pub const TEST_SHOP: &str = "pineapple.myshopify.com";

/// The test webhook secret.
#[must_use]
pub fn test_secret() -> SecretString {
    SecretString::from(TEST_SECRET)
}

/// A webhook server bound to an ephemeral local port.
pub struct TestServer {
    /// Address the server listens on.
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start the webhook server over `queue`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if no local port can be bound.
    pub async fn spawn(queue: WebhookQueue) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = routes::router(AppState::new(queue, test_secret()));

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, handle })
    }

    /// Absolute URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Redis URL for durable tests, from `REDIS_URL`.
#[must_use]
pub fn redis_url() -> Option<SecretString> {
    std::env::var("REDIS_URL").ok().map(SecretString::from)
}

/// Queue configuration for a fresh, uniquely named durable queue.
#[must_use]
pub fn durable_config(redis_url: SecretString) -> QueueConfig {
    QueueConfig {
        backend: QueueBackendKind::Redis,
        redis_url: Some(redis_url),
        queue_name: format!("it-{}", uuid::Uuid::new_v4()),
        prefix: "pulse-test".to_string(),
        ..QueueConfig::default()
    }
}

/// Connect to a fresh durable queue.
///
/// Returns `Ok(None)` when `REDIS_URL` is not set.
///
/// # Errors
///
/// Returns `QueueError::Redis` if Redis cannot be reached.
pub async fn durable_queue() -> Result<Option<WebhookQueue>, QueueError> {
    let Some(url) = redis_url() else {
        return Ok(None);
    };
    WebhookQueue::from_config(&durable_config(url)).await.map(Some)
}
