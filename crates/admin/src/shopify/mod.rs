//! Shopify Admin API gateway (HIGH PRIVILEGE - per-store access tokens).
//!
//! # Security
//!
//! **CRITICAL: this module handles decrypted per-store Admin API tokens.**
//!
//! Tokens are stored encrypted (AES-256-GCM) by the persistence layer and are
//! only decrypted for the duration of one gateway operation. Decrypted tokens
//! are held in `SecretString` and redacted from `Debug` output.
//!
//! # Architecture
//!
//! - [`AdminGateway`] - bounded-concurrency, retrying GraphQL executor
//! - [`SessionResolver`] - store lookup + token decryption into a [`StoreSession`]
//! - [`AdminTransport`] - the HTTP seam (`reqwest` in production, fakes in tests)
//! - `graphql-client` query bodies via [`AdminGateway::execute`]
//!
//! # Example
//!
//! ```rust,ignore
//! use pulse_admin::shopify::{AdminGateway, SessionResolver, TokenDecoder};
//!
//! let gateway = AdminGateway::new(&config.shopify)?;
//! let sessions = SessionResolver::new(repository, TokenDecoder::from_config(&config.shopify)?);
//!
//! let shop_name = sessions
//!     .with_store_session(&shop, |session| async move {
//!         gateway.graphql(&session, "{ shop { name } }", serde_json::json!({})).await
//!     })
//!     .await?;
//! ```

mod gateway;
mod session;
mod token;
mod transport;

pub use gateway::{AdminGateway, RETRYABLE_STATUSES};
pub use session::{SessionResolver, StoreRecord, StoreRepository, StoreSession};
pub use token::{TokenCipher, TokenCipherError, TokenDecoder};
pub use transport::{AdminTransport, GraphqlRequest, HttpTransport, TransportResponse};

use thiserror::Error;

/// Errors that can occur when interacting with Shopify Admin API.
#[derive(Debug, Error)]
pub enum AdminShopifyError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-HTTP transport failure (connection reset, timeout in a custom transport).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Shopify answered with a non-success HTTP status.
    #[error("Shopify returned HTTP {status}: {body}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body, parsed as JSON when possible.
        body: ErrorBody,
    },

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {}", format_graphql_errors(.0))]
    GraphQL(Vec<GraphQLError>),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// No usable session for the shop (missing store record or unreadable token).
    #[error("Store session unavailable: {0}")]
    SessionUnavailable(String),
}

impl AdminShopifyError {
    /// Whether the gateway should try the call again.
    ///
    /// Transport failures and HTTP 429/500/502/503/504 are transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Transport(_) => true,
            Self::Upstream { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::GraphQL(_) | Self::Parse(_) | Self::SessionUnavailable(_) => false,
        }
    }

    /// HTTP status of an upstream error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Body of a failed upstream response.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// The body was valid JSON (Shopify error objects usually are).
    Json(serde_json::Value),
    /// The body was not JSON; kept verbatim.
    Text(String),
}

impl ErrorBody {
    /// Parse a response body, falling back to the raw text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).map_or_else(|_| Self::Text(raw.to_string()), Self::Json)
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// A GraphQL error returned by the Shopify Admin API.
#[derive(Debug, Clone)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
    /// Source locations in the query.
    pub locations: Vec<GraphQLErrorLocation>,
    /// Path to the error in the response.
    pub path: Vec<serde_json::Value>,
}

/// Location in a GraphQL query where an error occurred.
#[derive(Debug, Clone)]
pub struct GraphQLErrorLocation {
    /// Line number (1-indexed).
    pub line: i64,
    /// Column number (1-indexed).
    pub column: i64,
}

fn format_graphql_errors(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.clone())
        .collect::<Vec<_>>()
        .join("; ")
}
