//! Bounded-concurrency, retrying Admin GraphQL executor.

use std::sync::Arc;

use graphql_client::GraphQLQuery;
use pulse_core::ShopDomain;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use super::{
    AdminShopifyError, AdminTransport, ErrorBody, GraphQLError, GraphQLErrorLocation,
    GraphqlRequest, HttpTransport, StoreSession,
};
use crate::config::ShopifyGatewayConfig;
use crate::retry::RetryPolicy;

/// HTTP statuses treated as transient.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Shopify Admin API gateway.
///
/// Every call waits for a slot in a FIFO concurrency gate, then runs under
/// the retry policy. The slot is held until the last attempt finishes, so
/// retries do not let more than `concurrency_limit` calls hit Shopify at
/// once. Clones share the gate.
pub struct AdminGateway<T = HttpTransport> {
    inner: Arc<GatewayInner<T>>,
}

struct GatewayInner<T> {
    transport: T,
    gate: Semaphore,
    concurrency_limit: usize,
    retry: RetryPolicy,
    api_version: String,
}

impl<T> Clone for AdminGateway<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for AdminGateway<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGateway")
            .field("api_version", &self.inner.api_version)
            .field("concurrency_limit", &self.inner.concurrency_limit)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

/// GraphQL response wrapper.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLErrorResponse>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
    #[serde(default)]
    locations: Vec<GraphQLErrorLocationResponse>,
    #[serde(default)]
    path: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorLocationResponse {
    line: i64,
    column: i64,
}

impl AdminGateway<HttpTransport> {
    /// Create a gateway backed by `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ShopifyGatewayConfig) -> Result<Self, AdminShopifyError> {
        Ok(Self::with_transport(config, HttpTransport::new()?))
    }
}

impl<T: AdminTransport> AdminGateway<T> {
    /// Create a gateway over a custom transport.
    #[must_use]
    pub fn with_transport(config: &ShopifyGatewayConfig, transport: T) -> Self {
        let concurrency_limit = config.concurrency_limit.max(1);
        Self {
            inner: Arc::new(GatewayInner {
                transport,
                gate: Semaphore::new(concurrency_limit),
                concurrency_limit,
                retry: RetryPolicy::new(config.max_attempts, config.base_delay),
                api_version: config.api_version.clone(),
            }),
        }
    }

    /// GraphQL endpoint for `shop`.
    #[must_use]
    pub fn endpoint(&self, shop: &ShopDomain) -> String {
        format!(
            "https://{shop}/admin/api/{}/graphql.json",
            self.inner.api_version
        )
    }

    /// Maximum number of calls in flight.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.inner.concurrency_limit
    }

    /// Free slots in the concurrency gate right now.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.inner.gate.available_permits()
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// POST a raw GraphQL body and return the successful response text.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt: `Upstream` for a non-2xx
    /// status (body parsed as JSON when possible) or a transport error.
    #[instrument(skip(self, session, body), fields(shop = %session.shop_domain))]
    pub async fn post_graphql(
        &self,
        session: &StoreSession,
        body: serde_json::Value,
    ) -> Result<String, AdminShopifyError> {
        let _permit = self
            .inner
            .gate
            .acquire()
            .await
            .map_err(|_| AdminShopifyError::Transport("gateway closed".to_string()))?;

        let request = GraphqlRequest {
            endpoint: self.endpoint(&session.shop_domain),
            access_token: session.access_token.clone(),
            body,
        };
        let transport = &self.inner.transport;
        let request = &request;

        let result = self
            .inner
            .retry
            .run(
                |attempt| async move {
                    let response = transport.send(request).await?;
                    if (200..300).contains(&response.status) {
                        return Ok(response.body);
                    }
                    warn!(attempt, status = response.status, "Shopify Admin API call failed");
                    Err(AdminShopifyError::Upstream {
                        status: response.status,
                        body: ErrorBody::parse(&response.body),
                    })
                },
                AdminShopifyError::is_retryable,
            )
            .await;

        if let Err(e) = &result {
            warn!(error = %e, "Shopify Admin API call gave up");
        }
        result
    }

    /// Run a raw GraphQL query and return its `data` object.
    ///
    /// # Errors
    ///
    /// Everything [`post_graphql`](Self::post_graphql) returns, plus
    /// `GraphQL` for a response with errors or without data, and `Parse` for
    /// a body that is not a GraphQL response.
    pub async fn graphql(
        &self,
        session: &StoreSession,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, AdminShopifyError> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let raw = self.post_graphql(session, body).await?;
        decode_response(&raw)
    }

    /// Execute a typed `graphql_client` query.
    ///
    /// # Errors
    ///
    /// See [`graphql`](Self::graphql).
    pub async fn execute<Q: GraphQLQuery>(
        &self,
        session: &StoreSession,
        variables: Q::Variables,
    ) -> Result<Q::ResponseData, AdminShopifyError>
    where
        Q::ResponseData: DeserializeOwned,
    {
        let body = serde_json::to_value(Q::build_query(variables))?;
        let raw = self.post_graphql(session, body).await?;
        decode_response(&raw)
    }
}

fn decode_response<D: DeserializeOwned>(raw: &str) -> Result<D, AdminShopifyError> {
    let response: GraphQLResponse<D> = serde_json::from_str(raw)?;

    if let Some(errors) = response.errors
        && !errors.is_empty()
    {
        let converted_errors: Vec<GraphQLError> = errors
            .into_iter()
            .map(|e| GraphQLError {
                message: e.message,
                locations: e
                    .locations
                    .into_iter()
                    .map(|l| GraphQLErrorLocation {
                        line: l.line,
                        column: l.column,
                    })
                    .collect(),
                path: e.path,
            })
            .collect();
        return Err(AdminShopifyError::GraphQL(converted_errors));
    }

    response.data.ok_or_else(|| {
        AdminShopifyError::GraphQL(vec![GraphQLError {
            message: "No data in response".to_string(),
            locations: vec![],
            path: vec![],
        }])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pulse_core::StoreId;
    use secrecy::{ExposeSecret, SecretString};
    use tokio::time::Instant;

    use super::*;
    use crate::shopify::TransportResponse;

    // =========================================================================
    // Fake transport
    // =========================================================================

    #[derive(Default)]
    struct FakeTransport {
        script: Mutex<VecDeque<Result<TransportResponse, AdminShopifyError>>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
        seen_tokens: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn scripted(responses: Vec<Result<TransportResponse, AdminShopifyError>>) -> Self {
            Self {
                script: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn slow(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }
    }

    impl AdminTransport for FakeTransport {
        async fn send(
            &self,
            request: &GraphqlRequest,
        ) -> Result<TransportResponse, AdminShopifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens
                .lock()
                .unwrap()
                .push(request.access_token.expose_secret().to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok(r#"{"data":{"shop":{"name":"Pineapple"}}}"#)))
        }
    }

    fn ok(body: &str) -> TransportResponse {
        TransportResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    fn status(code: u16, body: &str) -> TransportResponse {
        TransportResponse {
            status: code,
            body: body.to_string(),
        }
    }

    fn config(limit: usize, base_delay_ms: u64) -> ShopifyGatewayConfig {
        ShopifyGatewayConfig {
            concurrency_limit: limit,
            base_delay: Duration::from_millis(base_delay_ms),
            ..ShopifyGatewayConfig::default()
        }
    }

    fn session() -> StoreSession {
        StoreSession {
            store_id: StoreId::new(1),
            shop_domain: ShopDomain::parse("pineapple.myshopify.com").unwrap(),
            plan_level: "basic".to_string(),
            access_token: SecretString::from("shpat_test"),
        }
    }

    struct ShopName;

    #[derive(Debug, serde::Deserialize)]
    struct ShopNameData {
        shop: ShopNameShop,
    }

    #[derive(Debug, serde::Deserialize)]
    struct ShopNameShop {
        name: String,
    }

    impl GraphQLQuery for ShopName {
        type Variables = serde_json::Value;
        type ResponseData = ShopNameData;

        fn build_query(variables: Self::Variables) -> graphql_client::QueryBody<Self::Variables> {
            graphql_client::QueryBody {
                variables,
                query: "query ShopName { shop { name } }",
                operation_name: "ShopName",
            }
        }
    }

    #[tokio::test]
    async fn test_execute_typed_query() {
        let gateway = AdminGateway::with_transport(&config(4, 10), FakeTransport::default());

        let data = gateway
            .execute::<ShopName>(&session(), serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(data.shop.name, "Pineapple");
        assert_eq!(gateway.inner.transport.calls.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // Retry behaviour
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_statuses_then_succeeds() {
        let gateway = AdminGateway::with_transport(
            &config(4, 100),
            FakeTransport::scripted(vec![
                Ok(status(503, "unavailable")),
                Ok(status(503, "unavailable")),
                Ok(ok(r#"{"data":{"ok":true}}"#)),
            ]),
        );
        let start = Instant::now();

        let data = gateway
            .graphql(&session(), "{ ok }", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(data, serde_json::json!({"ok": true}));
        assert_eq!(gateway.inner.transport.calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(100 * (1 + 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_fails_immediately() {
        let gateway = AdminGateway::with_transport(
            &config(4, 100),
            FakeTransport::scripted(vec![Ok(status(404, r#"{"errors":"Not Found"}"#))]),
        );

        let err = gateway
            .graphql(&session(), "{ ok }", serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(gateway.inner.transport.calls.load(Ordering::SeqCst), 1);
        match err {
            AdminShopifyError::Upstream { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, ErrorBody::Json(serde_json::json!({"errors": "Not Found"})));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let gateway = AdminGateway::with_transport(
            &config(4, 10),
            FakeTransport::scripted(vec![
                Ok(status(429, "slow down")),
                Ok(status(502, "bad gateway")),
                Ok(status(504, "<html>timeout</html>")),
                Ok(ok(r#"{"data":{}}"#)),
            ]),
        );

        let err = gateway
            .post_graphql(&session(), serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(gateway.inner.transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.status(), Some(504));
        assert!(err.to_string().contains("<html>timeout</html>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_retried() {
        let gateway = AdminGateway::with_transport(
            &config(4, 10),
            FakeTransport::scripted(vec![
                Err(AdminShopifyError::Transport("connection reset".to_string())),
                Ok(ok(r#"{"data":{"ok":1}}"#)),
            ]),
        );

        let data = gateway
            .graphql(&session(), "{ ok }", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(data["ok"], 1);
        assert_eq!(gateway.inner.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_graphql_errors_are_not_retried() {
        let gateway = AdminGateway::with_transport(
            &config(4, 10),
            FakeTransport::scripted(vec![Ok(ok(
                r#"{"errors":[{"message":"Field 'nope' doesn't exist","locations":[{"line":1,"column":3}]}]}"#,
            ))]),
        );

        let err = gateway
            .graphql(&session(), "{ nope }", serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(gateway.inner.transport.calls.load(Ordering::SeqCst), 1);
        match err {
            AdminShopifyError::GraphQL(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].locations[0].line, 1);
            }
            other => panic!("expected GraphQL error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_data_is_an_error() {
        let gateway = AdminGateway::with_transport(
            &config(4, 10),
            FakeTransport::scripted(vec![Ok(ok(r#"{"data":null}"#))]),
        );

        let err = gateway
            .graphql(&session(), "{ shop { name } }", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No data in response"));
    }

    // =========================================================================
    // Concurrency gate
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_in_flight_calls() {
        let limit = 3;
        let gateway = AdminGateway::with_transport(
            &config(limit, 10),
            FakeTransport::slow(Duration::from_millis(50)),
        );

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let gateway = gateway.clone();
            tasks.spawn(async move {
                gateway
                    .graphql(&session(), "{ shop { name } }", serde_json::json!({}))
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap().is_ok());
        }

        let transport = &gateway.inner.transport;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 20);
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= limit);
        assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), limit);
        assert_eq!(gateway.available_slots(), limit);
    }

    #[test]
    fn test_zero_limit_still_admits_one_call() {
        let gateway = AdminGateway::with_transport(&config(0, 10), FakeTransport::default());
        assert_eq!(gateway.concurrency_limit(), 1);
    }

    // =========================================================================
    // Request shape
    // =========================================================================

    #[test]
    fn test_endpoint_uses_shop_and_version() {
        let gateway = AdminGateway::with_transport(&config(1, 10), FakeTransport::default());
        let shop = ShopDomain::parse("pineapple.myshopify.com").unwrap();
        assert_eq!(
            gateway.endpoint(&shop),
            "https://pineapple.myshopify.com/admin/api/2026-01/graphql.json"
        );
    }

    #[tokio::test]
    async fn test_session_token_is_sent() {
        let gateway = AdminGateway::with_transport(&config(1, 10), FakeTransport::default());
        gateway
            .graphql(&session(), "{ shop { name } }", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(
            *gateway.inner.transport.seen_tokens.lock().unwrap(),
            vec!["shpat_test".to_string()]
        );
    }

    #[test]
    fn test_debug_hides_transport() {
        let gateway = AdminGateway::with_transport(&config(2, 10), FakeTransport::default());
        let output = format!("{gateway:?}");
        assert!(output.contains("AdminGateway"));
        assert!(output.contains("concurrency_limit: 2"));
    }
}
