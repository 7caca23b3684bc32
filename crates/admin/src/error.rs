//! Unified error handling for the webhook server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::shopify::AdminShopifyError;
use crate::webhooks::QueueError;

/// Application-level error type for HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Shopify API operation failed.
    #[error("Shopify error: {0}")]
    Shopify(#[from] AdminShopifyError),

    /// Request signature missing or invalid.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Queue(QueueError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Queue(QueueError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            Self::Queue(QueueError::Unsupported(_)) => StatusCode::NOT_IMPLEMENTED,
            Self::Queue(QueueError::Redis(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Queue(QueueError::Serialization(_) | QueueError::Corrupt(_))
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Shopify(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors with Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Queue(QueueError::NotFound(_) | QueueError::InvalidTransition { .. })
            | Self::Unauthorized(_)
            | Self::BadRequest(_) => self.to_string(),
            Self::Shopify(_) => "External service error".to_string(),
            _ if status == StatusCode::SERVICE_UNAVAILABLE => "Service unavailable".to_string(),
            _ => "Internal server error".to_string(),
        };

        (status, message).into_response()
    }
}
