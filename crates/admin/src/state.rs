//! Application state shared across handlers.

use std::sync::Arc;

use secrecy::SecretString;

use crate::webhooks::WebhookQueue;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    queue: WebhookQueue,
    webhook_secret: SecretString,
}

impl AppState {
    /// Create application state.
    #[must_use]
    pub fn new(queue: WebhookQueue, webhook_secret: SecretString) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                queue,
                webhook_secret,
            }),
        }
    }

    /// The webhook job queue.
    #[must_use]
    pub fn queue(&self) -> &WebhookQueue {
        &self.inner.queue
    }

    /// Shopify app secret used to verify webhook signatures.
    #[must_use]
    pub fn webhook_secret(&self) -> &SecretString {
        &self.inner.webhook_secret
    }
}
