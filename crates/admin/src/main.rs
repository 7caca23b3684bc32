//! Merchant Pulse webhook server.
//!
//! Receives Shopify webhooks on `POST /webhooks`, verifies their signature
//! and enqueues them on the webhook queue. Processing happens in the worker
//! (`pulse-cli worker`).
//!
//! # Security
//!
//! - Requires `SHOPIFY_API_SECRET`; unsigned or mis-signed deliveries are
//!   rejected with 401
//! - Binds to 127.0.0.1 by default; expose it through a reverse proxy

#![cfg_attr(not(test), forbid(unsafe_code))]

use pulse_admin::config::{ConfigError, PulseConfig};
use pulse_admin::routes;
use pulse_admin::state::AppState;
use pulse_admin::telemetry;
use pulse_admin::webhooks::WebhookQueue;

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = PulseConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = telemetry::init_sentry(&config);
    telemetry::init_tracing("pulse_admin=info,tower_http=debug", config.log_json);
    config.log_warnings();

    let webhook_secret = config
        .webhook_secret
        .clone()
        .ok_or_else(|| ConfigError::MissingEnvVar("SHOPIFY_API_SECRET".to_string()))
        .expect("Webhook signatures cannot be verified");

    let queue = WebhookQueue::from_config(&config.queue)
        .await
        .expect("Failed to create webhook queue");
    tracing::info!(
        durable = queue.is_durable_backend_enabled(),
        capabilities = ?queue.capabilities(),
        "Webhook queue ready"
    );
    if !queue.is_durable_backend_enabled() {
        tracing::warn!("Jobs are kept in memory; they will not reach a worker process");
    }

    let state = AppState::new(queue, webhook_secret);

    let app = routes::router(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("pulse-admin listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
