//! Document persistence for the checkout service.
//!
//! # Schema: `checkout`
//!
//! Products and orders are schemaless documents (JSONB) keyed by string IDs:
//!
//! ## Tables
//!
//! - `products` - Catalog documents, read-only to checkout
//! - `orders` - Order documents, plus `status`/`created_at`/`updated_at`
//!   columns mirrored from the document for operator queries
//!
//! # Migrations
//!
//! Migrations are stored in `crates/checkout/migrations/` and run via:
//! ```bash
//! cargo run -p makelifebetter-cli -- migrate
//! ```
//!
//! Services talk to the [`OrderStore`] and [`ProductCatalog`] traits, so the
//! router can be exercised against in-memory stores in tests.

pub mod orders;
pub mod products;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use makelifebetter_core::{OrderId, OrderStatus, ProductId};

use crate::models::order::OrderDocument;
use crate::models::product::Product;

pub use orders::PgOrderStore;
pub use products::PgProductCatalog;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// A document could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Computes the patch to merge into a document.
///
/// Receives the current document, or `None` when the document is being
/// created by an upsert. Runs while the document is locked, so the decision
/// and the write are atomic.
pub type DocumentPatcher = Box<dyn FnOnce(Option<&Value>) -> Value + Send>;

/// Storage for order documents.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order document.
    async fn insert(&self, id: &OrderId, document: Value) -> Result<(), RepositoryError>;

    /// Fetch an order document by ID.
    async fn fetch(&self, id: &OrderId) -> Result<Option<Value>, RepositoryError>;

    /// Merge a computed patch into an order document.
    ///
    /// With `upsert` set, a missing document is created from the patch.
    /// Returns the resulting document, or `None` if the order does not exist
    /// and `upsert` is false.
    async fn apply(
        &self,
        id: &OrderId,
        upsert: bool,
        patcher: DocumentPatcher,
    ) -> Result<Option<Value>, RepositoryError>;

    /// List orders with the given status created before `created_before`,
    /// oldest first.
    async fn list_by_status(
        &self,
        status: OrderStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderDocument>, RepositoryError>;

    /// Check that the backing store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Read access to the product catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Look up a product by ID.
    async fn find(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
}

/// Merge `patch` into `target`.
///
/// Nested objects are merged key by key. Scalars and arrays replace whatever
/// was there before.
pub fn merge_documents(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        merge_documents(slot, value);
                    }
                    _ => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Read the status column value from an order document.
///
/// Documents without a recognizable status are treated as `pending`.
#[must_use]
pub fn document_status(document: &Value) -> OrderStatus {
    document
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

/// Embedded migrations for the `checkout` schema.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_merge_is_recursive_for_objects() {
        let mut doc = json!({
            "status": "pending",
            "payment": {"method": "credit", "installments": 3, "provider": "pagbank"}
        });
        merge_documents(
            &mut doc,
            json!({"status": "paid", "payment": {"status": "PAID"}}),
        );

        assert_eq!(doc["status"], "paid");
        assert_eq!(doc["payment"]["method"], "credit");
        assert_eq!(doc["payment"]["installments"], 3);
        assert_eq!(doc["payment"]["status"], "PAID");
    }

    #[test]
    fn test_merge_replaces_arrays_and_scalars() {
        let mut doc = json!({"links": [1, 2, 3], "pagbank": {"status": "OLD"}});
        merge_documents(&mut doc, json!({"links": [4], "pagbank": "gone"}));

        assert_eq!(doc["links"], json!([4]));
        assert_eq!(doc["pagbank"], "gone");
    }

    #[test]
    fn test_document_status_defaults_to_pending() {
        assert_eq!(document_status(&json!({})), OrderStatus::Pending);
        assert_eq!(document_status(&json!({"status": "bogus"})), OrderStatus::Pending);
        assert_eq!(document_status(&json!({"status": "paid"})), OrderStatus::Paid);
    }
}
