//! Store record lookups.

use sqlx::PgPool;
use tracing::instrument;

use pulse_core::{ShopDomain, StoreId};

use super::RepositoryError;
use crate::shopify::{StoreRecord, StoreRepository};

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StoreRow {
    id: i32,
    shop_domain: String,
    plan_level: String,
    access_token: String,
}

impl TryFrom<StoreRow> for StoreRecord {
    type Error = RepositoryError;

    fn try_from(row: StoreRow) -> Result<Self, Self::Error> {
        let shop_domain = ShopDomain::parse(&row.shop_domain).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid shop domain in database: {e}"))
        })?;

        Ok(Self {
            id: StoreId::new(row.id),
            shop_domain,
            plan_level: row.plan_level,
            access_token_cipher: row.access_token,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// `PostgreSQL`-backed [`StoreRepository`].
#[derive(Debug, Clone)]
pub struct PgStoreRepository {
    pool: PgPool,
}

impl PgStoreRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl StoreRepository for PgStoreRepository {
    #[instrument(skip(self), fields(shop = %shop))]
    async fn find_by_shop(&self, shop: &ShopDomain) -> Result<Option<StoreRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, StoreRow>(
            r"
            SELECT id, shop_domain, plan_level, access_token
            FROM stores
            WHERE shop_domain = $1
            ",
        )
        .bind(shop.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}
