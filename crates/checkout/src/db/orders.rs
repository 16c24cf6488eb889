//! `PostgreSQL` order document store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::{debug, instrument};

use makelifebetter_core::{OrderId, OrderStatus};

use super::{DocumentPatcher, OrderStore, RepositoryError, document_status, merge_documents};
use crate::models::order::OrderDocument;

/// Order documents stored in `checkout.orders`.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new order store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    document: Json<Value>,
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, document), fields(order_id = %id))]
    async fn insert(&self, id: &OrderId, document: Value) -> Result<(), RepositoryError> {
        let status = document_status(&document);
        sqlx::query(
            r"
            INSERT INTO checkout.orders (id, document, status)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(id)
        .bind(Json(&document))
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        debug!("Inserted order");
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn fetch(&self, id: &OrderId) -> Result<Option<Value>, RepositoryError> {
        let row: Option<(Json<Value>,)> =
            sqlx::query_as("SELECT document FROM checkout.orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(document),)| document))
    }

    #[instrument(skip(self, patcher), fields(order_id = %id))]
    async fn apply(
        &self,
        id: &OrderId,
        upsert: bool,
        patcher: DocumentPatcher,
    ) -> Result<Option<Value>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let created = if upsert {
            sqlx::query_as::<_, (OrderId,)>(
                r"
                INSERT INTO checkout.orders (id, document, status)
                VALUES ($1, '{}'::jsonb, 'pending')
                ON CONFLICT (id) DO NOTHING
                RETURNING id
                ",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some()
        } else {
            false
        };

        let current: Option<(Json<Value>,)> =
            sqlx::query_as("SELECT document FROM checkout.orders WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((Json(mut document),)) = current else {
            return Ok(None);
        };

        let patch = patcher(if created { None } else { Some(&document) });
        merge_documents(&mut document, patch);
        let status = document_status(&document);

        sqlx::query(
            r"
            UPDATE checkout.orders
            SET document = $2, status = $3, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(Json(&document))
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(created, %status, "Applied order patch");
        Ok(Some(document))
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        status: OrderStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderDocument>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, document
            FROM checkout.orders
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at ASC
            ",
        )
        .bind(status.as_str())
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrderDocument::new(row.id, row.document.0))
            .collect())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
