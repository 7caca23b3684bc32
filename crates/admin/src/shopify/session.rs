//! Per-store session resolution.

use std::future::Future;

use pulse_core::{ShopDomain, StoreId};
use secrecy::SecretString;
use tracing::{debug, error, instrument, warn};

use super::{AdminShopifyError, TokenDecoder};
use crate::db::RepositoryError;

/// A store as persisted by the dashboard.
///
/// Implements `Debug` manually to redact the token cipher text.
#[derive(Clone)]
pub struct StoreRecord {
    /// Store primary key.
    pub id: StoreId,
    /// Shop domain (e.g., pineapple.myshopify.com).
    pub shop_domain: ShopDomain,
    /// Billing plan level (e.g., "basic", "plus").
    pub plan_level: String,
    /// Stored access token (cipher text, or plaintext for legacy rows).
    pub access_token_cipher: String,
}

impl std::fmt::Debug for StoreRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRecord")
            .field("id", &self.id)
            .field("shop_domain", &self.shop_domain)
            .field("plan_level", &self.plan_level)
            .field("access_token_cipher", &"[REDACTED]")
            .finish()
    }
}

/// Credentials for calling the Admin API on behalf of one shop.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct StoreSession {
    /// Store primary key.
    pub store_id: StoreId,
    /// Shop domain.
    pub shop_domain: ShopDomain,
    /// Billing plan level.
    pub plan_level: String,
    /// Decrypted Admin API access token (HIGH PRIVILEGE).
    pub access_token: SecretString,
}

impl std::fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSession")
            .field("store_id", &self.store_id)
            .field("shop_domain", &self.shop_domain)
            .field("plan_level", &self.plan_level)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Looks up store records by shop domain.
pub trait StoreRepository: Send + Sync {
    /// Find the store for `shop`, if one is installed.
    fn find_by_shop(
        &self,
        shop: &ShopDomain,
    ) -> impl Future<Output = Result<Option<StoreRecord>, RepositoryError>> + Send;
}

/// Resolves a shop domain into a [`StoreSession`].
#[derive(Debug, Clone)]
pub struct SessionResolver<R> {
    repository: R,
    decoder: TokenDecoder,
}

impl<R: StoreRepository> SessionResolver<R> {
    /// Create a resolver.
    #[must_use]
    pub const fn new(repository: R, decoder: TokenDecoder) -> Self {
        Self {
            repository,
            decoder,
        }
    }

    /// Load the session for `shop`.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::SessionUnavailable` if the store cannot be
    /// looked up, does not exist, or its token cannot be decoded.
    #[instrument(skip(self), fields(shop = %shop))]
    pub async fn resolve(&self, shop: &ShopDomain) -> Result<StoreSession, AdminShopifyError> {
        let record = match self.repository.find_by_shop(shop).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No store record for shop");
                return Err(AdminShopifyError::SessionUnavailable(format!(
                    "no store record for {shop}"
                )));
            }
            Err(e) => {
                error!(error = %e, "Store lookup failed");
                return Err(AdminShopifyError::SessionUnavailable(format!(
                    "store lookup failed for {shop}: {e}"
                )));
            }
        };

        let access_token = self
            .decoder
            .decode(&record.access_token_cipher)
            .map_err(|e| {
                warn!(error = %e, store_id = %record.id, "Stored access token rejected");
                AdminShopifyError::SessionUnavailable(format!("{shop}: {e}"))
            })?;

        Ok(StoreSession {
            store_id: record.id,
            shop_domain: record.shop_domain,
            plan_level: record.plan_level,
            access_token,
        })
    }

    /// Run `f` with a valid session for `shop`.
    ///
    /// The session lives only as long as `f`'s future.
    ///
    /// # Errors
    ///
    /// Returns `SessionUnavailable` if no session can be built, otherwise
    /// whatever `f` returns.
    pub async fn with_store_session<T, F, Fut>(
        &self,
        shop: &ShopDomain,
        f: F,
    ) -> Result<T, AdminShopifyError>
    where
        F: FnOnce(StoreSession) -> Fut,
        Fut: Future<Output = Result<T, AdminShopifyError>>,
    {
        let session = self.resolve(shop).await?;
        f(session).await
    }
}
