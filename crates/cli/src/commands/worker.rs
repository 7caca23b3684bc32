//! `pulse-cli worker` - consume the durable webhook queue.
//!
//! With `DATABASE_URL` set, each job refreshes its subject from the Admin
//! API using the shop's stored token. Without it, jobs are only logged.

use std::future::Future;

use pulse_admin::config::PulseConfig;
use pulse_admin::db::{PgStoreRepository, create_pool};
use pulse_admin::shopify::{
    AdminGateway, AdminTransport, HttpTransport, SessionResolver, StoreRepository, TokenDecoder,
};
use pulse_admin::webhooks::{
    HandlerError, WebhookHandler, WebhookQueue, WorkerEvent, WorkerOptions,
};
use pulse_core::WebhookJob;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use super::CliError;

const NODE_QUERY: &str = "query WebhookSubject($id: ID!) { node(id: $id) { id __typename } }";
const SHOP_QUERY: &str = "query ShopInfo { shop { name myshopifyDomain } }";

/// Run the worker until Ctrl+C or SIGTERM.
pub async fn run(config: &PulseConfig, concurrency: Option<usize>) -> Result<(), CliError> {
    let queue = WebhookQueue::from_config(&config.queue).await?;
    if !queue.is_durable_backend_enabled() {
        return Err(CliError::Refused(
            "the worker needs the durable queue; set WEBHOOK_QUEUE_BACKEND=redis and REDIS_URL"
                .to_string(),
        ));
    }

    let mut options = WorkerOptions::from_config(&config.queue);
    if let Some(concurrency) = concurrency {
        options.concurrency = concurrency.max(1);
    }

    if let Some(database_url) = &config.database_url {
        let pool = create_pool(database_url).await?;
        let sessions = SessionResolver::new(
            PgStoreRepository::new(pool),
            TokenDecoder::from_config(&config.shopify)?,
        );
        let gateway = AdminGateway::new(&config.shopify)?;
        info!(
            concurrency_limit = gateway.concurrency_limit(),
            "Admin API gateway ready"
        );
        drive(&queue, SubjectRefresh::new(gateway, sessions), options).await
    } else {
        warn!("DATABASE_URL not set; jobs are acknowledged without calling Shopify");
        drive(&queue, log_only, options).await
    }
}

async fn drive<H: WebhookHandler>(
    queue: &WebhookQueue,
    handler: H,
    options: WorkerOptions,
) -> Result<(), CliError> {
    let (worker, events) = queue.create_webhook_queue_worker(handler, options)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reporter = tokio::spawn(report_events(events));
    let signal = tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    signal.abort();

    // The event channel closes once the worker is gone.
    if let Err(e) = reporter.await {
        error!(error = %e, "Event reporter stopped unexpectedly");
    }
    info!("Webhook worker stopped");
    Ok(())
}

async fn report_events(mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Completed { job } => {
                info!(job_id = %job.id, topic = %job.topic, shop = %job.shop_domain, "Job completed");
            }
            WorkerEvent::Failed {
                job,
                error,
                will_retry: true,
            } => {
                warn!(
                    job_id = %job.id,
                    topic = %job.topic,
                    attempts = job.attempts,
                    error = %error,
                    "Job failed, will retry"
                );
            }
            WorkerEvent::Failed { job, error, .. } => {
                error!(
                    job_id = %job.id,
                    topic = %job.topic,
                    shop = %job.shop_domain,
                    attempts = job.attempts,
                    error = %error,
                    "Job failed permanently"
                );
            }
        }
    }
}

async fn log_only(job: WebhookJob) -> Result<(), HandlerError> {
    info!(
        webhook_id = %job.webhook_id,
        topic = %job.topic,
        shop = %job.shop_domain,
        "Webhook received"
    );
    Ok(())
}

/// Admin API GID of the webhook's subject, when the payload carries one.
fn subject_id(payload: Option<&Value>) -> Option<String> {
    payload?
        .get("admin_graphql_api_id")?
        .as_str()
        .filter(|id| id.starts_with("gid://shopify/"))
        .map(str::to_string)
}

/// Re-reads each webhook's subject through the Admin API.
///
/// Confirms the shop's session is usable and the subject still exists;
/// shop-level topics without a subject fetch the shop itself.
struct SubjectRefresh<R, T = HttpTransport> {
    gateway: AdminGateway<T>,
    sessions: SessionResolver<R>,
}

impl<R, T> SubjectRefresh<R, T> {
    const fn new(gateway: AdminGateway<T>, sessions: SessionResolver<R>) -> Self {
        Self { gateway, sessions }
    }
}

impl<R, T> SubjectRefresh<R, T>
where
    R: StoreRepository + 'static,
    T: AdminTransport,
{
    async fn refresh(&self, job: &WebhookJob) -> Result<Value, HandlerError> {
        let subject = subject_id(job.payload.as_ref());
        let gateway = self.gateway.clone();

        let data = self
            .sessions
            .with_store_session(&job.shop_domain, move |session| async move {
                match subject {
                    Some(id) => {
                        gateway
                            .graphql(&session, NODE_QUERY, json!({ "id": id }))
                            .await
                    }
                    None => gateway.graphql(&session, SHOP_QUERY, json!({})).await,
                }
            })
            .await?;

        if data.get("node").is_some_and(Value::is_null) {
            warn!(
                webhook_id = %job.webhook_id,
                topic = %job.topic,
                "Webhook subject no longer exists"
            );
        }
        Ok(data)
    }
}

impl<R, T> WebhookHandler for SubjectRefresh<R, T>
where
    R: StoreRepository + 'static,
    T: AdminTransport,
{
    fn handle(&self, job: WebhookJob) -> impl Future<Output = Result<(), HandlerError>> + Send {
        async move {
            self.refresh(&job).await?;
            info!(
                webhook_id = %job.webhook_id,
                topic = %job.topic,
                shop = %job.shop_domain,
                "Webhook subject refreshed"
            );
            Ok(())
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, finishing in-flight jobs");
}
