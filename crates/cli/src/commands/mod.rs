//! Command implementations.

pub mod queue;
pub mod token;
pub mod worker;

use pulse_admin::shopify::{AdminShopifyError, TokenCipherError};
use pulse_admin::webhooks::QueueError;
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("{0}")]
    Refused(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Shopify error: {0}")]
    Shopify(#[from] AdminShopifyError),

    #[error("Token error: {0}")]
    Token(#[from] TokenCipherError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
