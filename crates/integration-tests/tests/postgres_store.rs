//! Integration tests for the `PostgreSQL` order store and catalog.
//!
//! These need a migrated database:
//!
//! ```bash
//! CHECKOUT_DATABASE_URL=postgres://... cargo run -p makelifebetter-cli -- migrate
//! CHECKOUT_DATABASE_URL=postgres://... cargo test -p makelifebetter-integration-tests -- --ignored
//! ```

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use secrecy::SecretString;
use serde_json::json;
use sqlx::PgPool;

use makelifebetter_checkout::db::orders::PgOrderStore;
use makelifebetter_checkout::db::products::PgProductCatalog;
use makelifebetter_checkout::db::{ProductCatalog, create_pool};
use makelifebetter_checkout::services::OrderLedger;
use makelifebetter_core::{OrderId, OrderStatus, ProductId};

async fn pool() -> PgPool {
    let url = std::env::var("CHECKOUT_DATABASE_URL").unwrap();
    create_pool(&SecretString::from(url)).await.unwrap()
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CHECKOUT_DATABASE_URL)"]
async fn test_record_status_upserts_and_guards_terminal_orders() {
    let ledger = OrderLedger::new(Arc::new(PgOrderStore::new(pool().await)));
    let id = OrderId::new(unique("order"));

    let change = ledger
        .record_status(
            &id,
            OrderStatus::Paid,
            json!({"pagbank": {"lastEvent": {"status": "PAID"}}}),
            true,
        )
        .await
        .unwrap();
    assert_eq!(change.previous, None);
    assert!(change.applied);

    let change = ledger
        .record_status(&id, OrderStatus::Cancelled, json!({}), true)
        .await
        .unwrap();
    assert_eq!(change.previous, Some(OrderStatus::Paid));
    assert!(!change.applied);

    let order = ledger.get(&id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(order.data["pagbank"]["lastEvent"]["status"], "PAID");
    assert!(order.data["createdAt"].is_i64());
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CHECKOUT_DATABASE_URL)"]
async fn test_update_without_upsert_requires_existing_order() {
    let ledger = OrderLedger::new(Arc::new(PgOrderStore::new(pool().await)));
    let id = OrderId::new(unique("missing"));

    assert!(ledger.update(&id, json!({"note": "x"})).await.is_err());
    assert!(ledger.get(&id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CHECKOUT_DATABASE_URL)"]
async fn test_stale_pending_orders_are_listed() {
    let pool = pool().await;
    let ledger = OrderLedger::new(Arc::new(PgOrderStore::new(pool.clone())));
    let id = OrderId::new(unique("stale"));

    ledger
        .upsert_by_reference(&id, json!({"status": "pending"}))
        .await
        .unwrap();
    sqlx::query("UPDATE checkout.orders SET created_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(id.as_str())
        .execute(&pool)
        .await
        .unwrap();

    let stale = ledger
        .list_by_status(OrderStatus::Pending, Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert!(stale.iter().any(|order| order.id == id));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CHECKOUT_DATABASE_URL)"]
async fn test_catalog_reads_product_documents() {
    let pool = pool().await;
    let id = unique("product");
    sqlx::query("INSERT INTO checkout.products (id, document) VALUES ($1, $2)")
        .bind(&id)
        .bind(sqlx::types::Json(json!({"nome": "Vela", "preco": 12.5, "ativo": true})))
        .execute(&pool)
        .await
        .unwrap();

    let catalog = PgProductCatalog::new(pool);
    let product = catalog.find(&ProductId::new(id)).await.unwrap().unwrap();
    assert_eq!(product.name.as_deref(), Some("Vela"));
    assert!(product.is_available());

    assert!(
        catalog
            .find(&ProductId::new("does-not-exist"))
            .await
            .unwrap()
            .is_none()
    );
}
