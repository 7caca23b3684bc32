//! `pulse-cli queue` - inspect or clear the webhook queue.

use std::collections::BTreeMap;
use std::io::Write;

use pulse_admin::config::PulseConfig;
use pulse_admin::webhooks::WebhookQueue;
use pulse_core::Job;

use super::CliError;

/// Connect to the configured queue.
///
/// A fresh process's in-memory queue is always empty, so only the durable
/// backend is worth inspecting.
async fn open_queue(config: &PulseConfig) -> Result<WebhookQueue, CliError> {
    let queue = WebhookQueue::from_config(&config.queue).await?;
    if !queue.is_durable_backend_enabled() {
        return Err(CliError::Refused(
            "the in-memory queue lives inside the server process; set WEBHOOK_QUEUE_BACKEND=redis and REDIS_URL".to_string(),
        ));
    }
    Ok(queue)
}

/// Count jobs per status, in a stable order.
fn count_by_status(jobs: &[Job]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for job in jobs {
        *counts.entry(job.status.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Print backend, capabilities and per-status job counts.
pub async fn status(config: &PulseConfig) -> Result<(), CliError> {
    let queue = open_queue(config).await?;
    queue.ping().await?;
    let jobs = queue.snapshot_queue().await?;

    let report = serde_json::json!({
        "queue": config.queue.queue_name,
        "durable": queue.is_durable_backend_enabled(),
        "capabilities": queue.capabilities(),
        "jobs": jobs.len(),
        "byStatus": count_by_status(&jobs),
    });

    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &report)?;
    writeln!(out)?;
    Ok(())
}

/// Print every job as a JSON array.
pub async fn snapshot(config: &PulseConfig, pretty: bool) -> Result<(), CliError> {
    let queue = open_queue(config).await?;
    let jobs = queue.snapshot_queue().await?;
    tracing::info!(jobs = jobs.len(), "Queue snapshot taken");

    let mut out = std::io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut out, &jobs)?;
    } else {
        serde_json::to_writer(&mut out, &jobs)?;
    }
    writeln!(out)?;
    Ok(())
}

/// Remove every job that is not being processed.
pub async fn clear(config: &PulseConfig, confirmed: bool) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::Refused(
            "refusing to clear the queue without --yes".to_string(),
        ));
    }

    let queue = open_queue(config).await?;
    queue.clear_queue().await?;
    tracing::info!(queue = %config.queue.queue_name, "Webhook queue cleared");
    Ok(())
}
