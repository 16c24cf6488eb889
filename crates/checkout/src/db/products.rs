//! `PostgreSQL` product catalog.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::instrument;

use makelifebetter_core::ProductId;

use super::{ProductCatalog, RepositoryError};
use crate::models::product::Product;

/// Product documents stored in `checkout.products`.
#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    /// Create a new product catalog.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    #[instrument(skip(self), fields(product_id = %id))]
    async fn find(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row: Option<(Json<Value>,)> =
            sqlx::query_as("SELECT document FROM checkout.products WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(Json(document),)| {
            serde_json::from_value(document).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid product document {id}: {e}"))
            })
        })
        .transpose()
    }
}
