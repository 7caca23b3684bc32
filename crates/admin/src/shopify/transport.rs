//! HTTP seam between the gateway and Shopify.

use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};

use super::AdminShopifyError;

/// A single GraphQL POST to the Admin API.
pub struct GraphqlRequest {
    /// Full `graphql.json` endpoint for the shop.
    pub endpoint: String,
    /// Decrypted access token (sent as `X-Shopify-Access-Token`).
    pub access_token: SecretString,
    /// JSON request body (`query` + `variables`).
    pub body: serde_json::Value,
}

impl std::fmt::Debug for GraphqlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlRequest")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"[REDACTED]")
            .field("body", &self.body)
            .finish()
    }
}

/// Raw response: status and body text. Interpretation is up to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// Sends GraphQL requests.
///
/// Implementations return `Err` only for transport failures; any HTTP
/// response, successful or not, is `Ok`.
pub trait AdminTransport: Send + Sync + 'static {
    /// Send one request.
    fn send(
        &self,
        request: &GraphqlRequest,
    ) -> impl Future<Output = Result<TransportResponse, AdminShopifyError>> + Send;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a 30 second request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::Http` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, AdminShopifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl AdminTransport for HttpTransport {
    async fn send(&self, request: &GraphqlRequest) -> Result<TransportResponse, AdminShopifyError> {
        let response = self
            .client
            .post(&request.endpoint)
            .header("X-Shopify-Access-Token", request.access_token.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .json(&request.body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}
