//! Configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Webhook queue
//! - `WEBHOOK_QUEUE_BACKEND` - `memory` (default) or `redis`
//! - `REDIS_URL` - Redis connection string (required for the `redis` backend;
//!   without it the queue falls back to `memory`)
//! - `WEBHOOK_QUEUE_NAME` - Queue name (default: webhooks)
//! - `WEBHOOK_QUEUE_PREFIX` - Redis key prefix (default: pulse)
//! - `WEBHOOK_WORKER_CONCURRENCY` - Jobs processed in parallel per worker (default: 1)
//! - `WEBHOOK_JOB_MAX_ATTEMPTS` - Attempts before a job is marked failed (default: 3)
//! - `WEBHOOK_JOB_BACKOFF_MS` - Base delay between job retries (default: 5000)
//!
//! ## Shopify Admin gateway
//! - `SHOPIFY_API_VERSION` - API version (default: 2026-01)
//! - `SHOPIFY_GATEWAY_CONCURRENCY` - Max in-flight Admin API calls (default: 4)
//! - `SHOPIFY_GATEWAY_MAX_ATTEMPTS` - Attempts per call (default: 3)
//! - `SHOPIFY_GATEWAY_BASE_DELAY_MS` - Backoff base delay (default: 500)
//! - `SHOPIFY_TOKEN_ENCRYPTION_KEY` - Base64 AES-256 key for stored access tokens
//! - `SHOPIFY_ALLOW_PLAINTEXT_TOKENS` - Accept unencrypted stored tokens (default: false)
//!
//! ## Server
//! - `SHOPIFY_API_SECRET` - App secret used to verify webhook signatures
//! - `DATABASE_URL` - `PostgreSQL` connection string (store records)
//! - `PULSE_HOST` - Bind address (default: 127.0.0.1)
//! - `PULSE_PORT` - Listen port (default: 3002)
//!
//! ## Observability
//! - `PULSE_LOG_JSON` - Emit JSON logs when set to `true`
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` / `SENTRY_TRACES_SAMPLE_RATE` - Sample rates (default: 1.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_API_VERSION: &str = "2026-01";
const TOKEN_KEY_LENGTH: usize = 32;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Application configuration shared by the server and the worker.
#[derive(Debug, Clone)]
pub struct PulseConfig {
    /// `PostgreSQL` connection URL for store records (contains password)
    pub database_url: Option<SecretString>,
    /// IP address to bind the webhook server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Shopify app secret for webhook HMAC verification
    pub webhook_secret: Option<SecretString>,
    /// Webhook job queue configuration
    pub queue: QueueConfig,
    /// Shopify Admin gateway configuration
    pub shopify: ShopifyGatewayConfig,
    /// Emit logs as JSON
    pub log_json: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
    /// Problems found while loading that do not stop startup
    pub warnings: Vec<String>,
}

/// Which queue backend holds webhook jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackendKind {
    /// Process-local, lost on restart.
    #[default]
    Memory,
    /// Redis-backed, shared between processes.
    Redis,
}

impl std::str::FromStr for QueueBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            "redis" | "durable" | "bullmq" => Ok(Self::Redis),
            other => Err(format!("unknown queue backend '{other}' (expected memory or redis)")),
        }
    }
}

/// Webhook queue configuration.
///
/// Implements `Debug` manually to redact the Redis URL (may contain a password).
#[derive(Clone)]
pub struct QueueConfig {
    /// Backend requested by the operator
    pub backend: QueueBackendKind,
    /// Redis connection string
    pub redis_url: Option<SecretString>,
    /// Queue name
    pub queue_name: String,
    /// Redis key prefix
    pub prefix: String,
    /// Jobs processed in parallel by one worker process
    pub worker_concurrency: usize,
    /// Attempts before a job is moved to failed
    pub max_attempts: u32,
    /// Base delay between retries (doubled per attempt)
    pub backoff: Duration,
}

impl std::fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConfig")
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("queue_name", &self.queue_name)
            .field("prefix", &self.prefix)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::Memory,
            redis_url: None,
            queue_name: "webhooks".to_string(),
            prefix: "pulse".to_string(),
            worker_concurrency: 1,
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Shopify Admin gateway configuration.
///
/// Implements `Debug` manually to redact the token encryption key.
#[derive(Clone)]
pub struct ShopifyGatewayConfig {
    /// Shopify API version (e.g., 2026-01)
    pub api_version: String,
    /// Max in-flight Admin API calls
    pub concurrency_limit: usize,
    /// Attempts per call (first try included)
    pub max_attempts: u32,
    /// Backoff base delay; attempt `n` waits `base * n²`
    pub base_delay: Duration,
    /// AES-256 key for stored access tokens (32 raw bytes)
    pub token_key: Option<SecretString>,
    /// Accept stored tokens that are not in the cipher format
    pub allow_plaintext_tokens: bool,
}

impl std::fmt::Debug for ShopifyGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyGatewayConfig")
            .field("api_version", &self.api_version)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("token_key", &self.token_key.as_ref().map(|_| "[REDACTED]"))
            .field("allow_plaintext_tokens", &self.allow_plaintext_tokens)
            .finish()
    }
}

impl Default for ShopifyGatewayConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            concurrency_limit: 4,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            token_key: None,
            allow_plaintext_tokens: false,
        }
    }
}

impl PulseConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_vars(&|key: &str| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Vars(vars);

        let host = env
            .get_or("PULSE_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("PULSE_HOST".to_string(), e.to_string()))?;
        let port = env.parse_or("PULSE_PORT", 3002_u16)?;

        let mut warnings = Vec::new();

        let webhook_secret = env.get("SHOPIFY_API_SECRET").map(|secret| {
            if let Err(e) = validate_secret_strength(&secret, "SHOPIFY_API_SECRET") {
                warnings.push(format!("SHOPIFY_API_SECRET validation warning: {e}"));
            }
            SecretString::from(secret)
        });

        let shopify = ShopifyGatewayConfig::from_vars(&env)?;
        if shopify.allow_plaintext_tokens {
            warnings.push(
                "SHOPIFY_ALLOW_PLAINTEXT_TOKENS is enabled; unencrypted store tokens will be accepted"
                    .to_string(),
            );
        }

        Ok(Self {
            database_url: env.get("DATABASE_URL").map(SecretString::from),
            host,
            port,
            webhook_secret,
            queue: QueueConfig::from_vars(&env)?,
            shopify,
            log_json: env.flag("PULSE_LOG_JSON")?,
            sentry_dsn: env.get("SENTRY_DSN"),
            sentry_environment: env.get("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: env
                .get("SENTRY_SAMPLE_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
            sentry_traces_sample_rate: env
                .get("SENTRY_TRACES_SAMPLE_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
            warnings,
        })
    }

    /// Log the warnings collected while loading.
    ///
    /// Call after the tracing subscriber is installed.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!("{warning}");
        }
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl QueueConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let requested = env
            .get_or("WEBHOOK_QUEUE_BACKEND", "memory")
            .parse::<QueueBackendKind>()
            .map_err(|e| ConfigError::InvalidEnvVar("WEBHOOK_QUEUE_BACKEND".to_string(), e))?;
        let redis_url = env.get("REDIS_URL").map(SecretString::from);

        let worker_concurrency = env.parse_or("WEBHOOK_WORKER_CONCURRENCY", 1_usize)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "WEBHOOK_WORKER_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let max_attempts = env.parse_or("WEBHOOK_JOB_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "WEBHOOK_JOB_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            backend: requested,
            redis_url,
            queue_name: env.get_or("WEBHOOK_QUEUE_NAME", &defaults.queue_name),
            prefix: env.get_or("WEBHOOK_QUEUE_PREFIX", &defaults.prefix),
            worker_concurrency,
            max_attempts,
            backoff: Duration::from_millis(env.parse_or("WEBHOOK_JOB_BACKOFF_MS", 5_000_u64)?),
        })
    }
}

impl ShopifyGatewayConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self, ConfigError> {
        let concurrency_limit = env.parse_or("SHOPIFY_GATEWAY_CONCURRENCY", 4_usize)?;
        if concurrency_limit == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "SHOPIFY_GATEWAY_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let max_attempts = env.parse_or("SHOPIFY_GATEWAY_MAX_ATTEMPTS", 3_u32)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "SHOPIFY_GATEWAY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let token_key = env
            .get("SHOPIFY_TOKEN_ENCRYPTION_KEY")
            .map(|key| {
                validate_token_key(&key)?;
                Ok::<_, ConfigError>(SecretString::from(key))
            })
            .transpose()?;

        let allow_plaintext_tokens = env.flag("SHOPIFY_ALLOW_PLAINTEXT_TOKENS")?;

        Ok(Self {
            api_version: env.get_or("SHOPIFY_API_VERSION", DEFAULT_API_VERSION),
            concurrency_limit,
            max_attempts,
            base_delay: Duration::from_millis(env.parse_or("SHOPIFY_GATEWAY_BASE_DELAY_MS", 500_u64)?),
            token_key,
            allow_plaintext_tokens,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Variable lookup with typed accessors.
struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    /// Get an optional variable (empty counts as unset).
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a variable with a default value.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable, falling back to `default` when unset.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }

    /// Parse a boolean flag (`true`/`false`/`1`/`0`), unset means false.
    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.get(key).as_deref().map(str::trim) {
            None => Ok(false),
            Some("1" | "true" | "TRUE" | "True" | "yes") => Ok(true),
            Some("0" | "false" | "FALSE" | "False" | "no") => Ok(false),
            Some(other) => Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("expected true or false, got '{other}'"),
            )),
        }
    }
}

/// Validate that the token encryption key decodes to 32 bytes.
fn validate_token_key(key: &str) -> Result<(), ConfigError> {
    let bytes = BASE64.decode(key.trim()).map_err(|e| {
        ConfigError::InvalidEnvVar("SHOPIFY_TOKEN_ENCRYPTION_KEY".to_string(), e.to_string())
    })?;
    if bytes.len() != TOKEN_KEY_LENGTH {
        return Err(ConfigError::InsecureSecret(
            "SHOPIFY_TOKEN_ENCRYPTION_KEY".to_string(),
            format!(
                "must decode to {TOKEN_KEY_LENGTH} bytes (got {})",
                bytes.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<PulseConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PulseConfig::from_vars(&move |key: &str| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 3002);
        assert_eq!(config.host.to_string(), "127.0.0.1");
        assert!(config.webhook_secret.is_none());
        assert!(!config.log_json);

        assert_eq!(config.queue.backend, QueueBackendKind::Memory);
        assert_eq!(config.queue.queue_name, "webhooks");
        assert_eq!(config.queue.prefix, "pulse");
        assert_eq!(config.queue.worker_concurrency, 1);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.backoff, Duration::from_secs(5));

        assert_eq!(config.shopify.api_version, "2026-01");
        assert_eq!(config.shopify.concurrency_limit, 4);
        assert_eq!(config.shopify.max_attempts, 3);
        assert_eq!(config.shopify.base_delay, Duration::from_millis(500));
        assert!(config.shopify.token_key.is_none());
        assert!(!config.shopify.allow_plaintext_tokens);
    }

    #[test]
    fn test_redis_backend_kept_without_url() {
        let config = load(&[("WEBHOOK_QUEUE_BACKEND", "redis")]).unwrap();
        assert_eq!(config.queue.backend, QueueBackendKind::Redis);
        assert!(config.queue.redis_url.is_none());

        let config = load(&[
            ("WEBHOOK_QUEUE_BACKEND", "redis"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
        ])
        .unwrap();
        assert_eq!(config.queue.backend, QueueBackendKind::Redis);
    }

    #[test]
    fn test_redis_url_alone_does_not_enable_durable_backend() {
        let config = load(&[("REDIS_URL", "redis://127.0.0.1:6379")]).unwrap();
        assert_eq!(config.queue.backend, QueueBackendKind::Memory);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = load(&[("WEBHOOK_QUEUE_BACKEND", "kafka")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "WEBHOOK_QUEUE_BACKEND"));
    }

    #[test]
    fn test_warnings_are_collected_not_logged() {
        let config = load(&[]).unwrap();
        assert!(config.warnings.is_empty());

        let config = load(&[
            ("SHOPIFY_API_SECRET", "your-api-secret-here"),
            ("SHOPIFY_ALLOW_PLAINTEXT_TOKENS", "true"),
        ])
        .unwrap();
        assert_eq!(config.warnings.len(), 2);
        assert!(config.warnings[0].contains("SHOPIFY_API_SECRET"));
        assert!(config.warnings[1].contains("SHOPIFY_ALLOW_PLAINTEXT_TOKENS"));
        assert!(config.webhook_secret.is_some());
    }

    #[test]
    fn test_gateway_overrides() {
        let config = load(&[
            ("SHOPIFY_GATEWAY_CONCURRENCY", "8"),
            ("SHOPIFY_GATEWAY_MAX_ATTEMPTS", "5"),
            ("SHOPIFY_GATEWAY_BASE_DELAY_MS", "250"),
            ("SHOPIFY_ALLOW_PLAINTEXT_TOKENS", "true"),
        ])
        .unwrap();
        assert_eq!(config.shopify.concurrency_limit, 8);
        assert_eq!(config.shopify.max_attempts, 5);
        assert_eq!(config.shopify.base_delay, Duration::from_millis(250));
        assert!(config.shopify.allow_plaintext_tokens);
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        assert!(load(&[("SHOPIFY_GATEWAY_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("SHOPIFY_GATEWAY_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("WEBHOOK_WORKER_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("WEBHOOK_JOB_MAX_ATTEMPTS", "0")]).is_err());
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("PULSE_PORT", "not-a-port")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "PULSE_PORT"));
    }

    #[test]
    fn test_invalid_flag() {
        assert!(load(&[("SHOPIFY_ALLOW_PLAINTEXT_TOKENS", "maybe")]).is_err());
    }

    #[test]
    fn test_token_key_must_be_32_bytes() {
        let short = BASE64.encode([7_u8; 16]);
        let err = load(&[("SHOPIFY_TOKEN_ENCRYPTION_KEY", short.as_str())]).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));

        let err = load(&[("SHOPIFY_TOKEN_ENCRYPTION_KEY", "%%% not base64")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));

        let key = BASE64.encode([7_u8; 32]);
        let config = load(&[("SHOPIFY_TOKEN_ENCRYPTION_KEY", key.as_str())]).unwrap();
        assert!(config.shopify.token_key.is_some());
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_validate_secret_strength() {
        assert!(validate_secret_strength("your-api-secret-here", "TEST_VAR").is_err());
        assert!(validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR").is_err());
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR").is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let key = BASE64.encode([9_u8; 32]);
        let config = load(&[
            ("WEBHOOK_QUEUE_BACKEND", "redis"),
            ("REDIS_URL", "redis://:hunter2@cache.internal:6379"),
            ("SHOPIFY_TOKEN_ENCRYPTION_KEY", key.as_str()),
        ])
        .unwrap();

        let queue_debug = format!("{:?}", config.queue);
        assert!(queue_debug.contains("[REDACTED]"));
        assert!(!queue_debug.contains("hunter2"));

        let shopify_debug = format!("{:?}", config.shopify);
        assert!(shopify_debug.contains("[REDACTED]"));
        assert!(!shopify_debug.contains(&key));
    }

    #[test]
    fn test_socket_addr() {
        let config = load(&[("PULSE_HOST", "0.0.0.0"), ("PULSE_PORT", "8080")]).unwrap();
        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
        assert_eq!(addr.port(), 8080);
    }
}
