//! Order ledger.
//!
//! The single writer of order documents. Every mutation stamps `updatedAt`;
//! `createdAt` is written once, when the document comes into existence, and
//! is stripped from caller-supplied patches.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{instrument, warn};

use makelifebetter_core::{OrderId, OrderStatus};

use crate::db::{OrderStore, RepositoryError, document_status};
use crate::models::order::{NewOrder, OrderDocument};

const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";

/// Result of a guarded status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// Status the order had before the write (`None` if it was just created).
    pub previous: Option<OrderStatus>,
    /// Status the order has now.
    pub current: OrderStatus,
    /// Whether the requested status was applied.
    pub applied: bool,
}

/// Creates and mutates order documents.
#[derive(Clone)]
pub struct OrderLedger {
    store: Arc<dyn OrderStore>,
}

impl OrderLedger {
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Persist a new order and return its assigned ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the order cannot be serialized or stored.
    #[instrument(skip(self, order), fields(user_id = %order.user_id))]
    pub async fn create(&self, order: &NewOrder) -> Result<OrderId, RepositoryError> {
        let id = OrderId::new(uuid::Uuid::new_v4().simple().to_string());
        let mut document = serde_json::to_value(order)?;
        let now = now_millis();
        if let Some(fields) = document.as_object_mut() {
            fields.insert(CREATED_AT.to_string(), json!(now));
            fields.insert(UPDATED_AT.to_string(), json!(now));
        }

        self.store.insert(&id, document).await?;
        Ok(id)
    }

    /// Merge fields into an existing order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    #[instrument(skip(self, fields), fields(order_id = %id))]
    pub async fn update(&self, id: &OrderId, fields: Value) -> Result<(), RepositoryError> {
        self.store
            .apply(id, false, Box::new(move |_| stamp(fields, false)))
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok(())
    }

    /// Merge fields into the order with this reference, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    #[instrument(skip(self, fields), fields(order_id = %id))]
    pub async fn upsert_by_reference(&self, id: &OrderId, fields: Value) -> Result<(), RepositoryError> {
        self.store
            .apply(id, true, Box::new(move |current| stamp(fields, current.is_none())))
            .await?;
        Ok(())
    }

    /// Move an order to `status`, merging `fields` alongside.
    ///
    /// A terminal order (`paid`, `cancelled`) keeps its status when asked to
    /// move anywhere else; `fields` are still merged so the attempt is on
    /// record. With `upsert` set, a missing order is created.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist and
    /// `upsert` is false.
    #[instrument(skip(self, fields), fields(order_id = %id, status = %status))]
    pub async fn record_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        fields: Value,
        upsert: bool,
    ) -> Result<StatusChange, RepositoryError> {
        let seen = Arc::new(OnceLock::new());
        let slot = Arc::clone(&seen);

        let patcher = Box::new(move |current: Option<&Value>| {
            let previous = current.map(document_status);
            let allowed = previous.is_none_or(|from| from.can_transition_to(status));
            let _ = slot.set(previous);

            let mut patch = stamp(fields, current.is_none());
            if allowed && let Some(map) = patch.as_object_mut() {
                map.insert("status".to_string(), json!(status));
            }
            patch
        });

        let document = self
            .store
            .apply(id, upsert, patcher)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let previous = seen.get().copied().flatten();
        let current = document_status(&document);
        let applied = current == status;
        if !applied {
            warn!(
                status = %current,
                requested = %status,
                "Refused status change on terminal order"
            );
        }

        Ok(StatusChange {
            previous,
            current,
            applied,
        })
    }

    /// Fetch an order by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn get(&self, id: &OrderId) -> Result<Option<OrderDocument>, RepositoryError> {
        Ok(self
            .store
            .fetch(id)
            .await?
            .map(|data| OrderDocument::new(id.clone(), data)))
    }

    /// Orders in `status` that were created before `created_before`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn list_by_status(
        &self,
        status: OrderStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderDocument>, RepositoryError> {
        self.store.list_by_status(status, created_before).await
    }

    /// Check that the backing store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store is unreachable.
    pub async fn ping(&self) -> Result<(), RepositoryError> {
        self.store.ping().await
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Stamp timestamps onto a caller-supplied patch.
fn stamp(fields: Value, creating: bool) -> Value {
    let mut map = match fields {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            warn!(patch = %other, "Ignoring non-object order patch");
            serde_json::Map::new()
        }
    };
    map.remove(CREATED_AT);

    let now = now_millis();
    map.insert(UPDATED_AT.to_string(), json!(now));
    if creating {
        map.insert(CREATED_AT.to_string(), json!(now));
    }
    Value::Object(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use makelifebetter_core::{PaymentProvider, ShippingOption, UserId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::memory::MemoryOrderStore;
    use crate::models::order::PaymentDescriptor;

    fn sample_order() -> NewOrder {
        NewOrder {
            user_id: UserId::new("u1"),
            user_email: String::new(),
            items: Vec::new(),
            address: json!({}),
            shipping: ShippingOption::lookup(None).into(),
            payment: PaymentDescriptor {
                method: "credit".to_string(),
                installments: 1,
                provider: PaymentProvider::PagBank,
                capture: None,
            },
            subtotal: Decimal::ZERO,
            shipping_cost: Decimal::new(1590, 2),
            total: Decimal::new(1590, 2),
            status: OrderStatus::Pending,
        }
    }

    fn ledger() -> (Arc<MemoryOrderStore>, OrderLedger) {
        let store = Arc::new(MemoryOrderStore::new());
        (store.clone(), OrderLedger::new(store))
    }

    #[tokio::test]
    async fn test_create_sets_timestamps() {
        let (store, ledger) = ledger();
        let id = ledger.create(&sample_order()).await.unwrap();

        let doc = store.document(&id).await.unwrap();
        assert_eq!(doc["status"], "pending");
        assert!(doc["createdAt"].is_i64());
        assert_eq!(doc["createdAt"], doc["updatedAt"]);
    }

    #[tokio::test]
    async fn test_update_never_overwrites_created_at() {
        let (store, ledger) = ledger();
        let id = ledger.create(&sample_order()).await.unwrap();
        let created_at = store.document(&id).await.unwrap()["createdAt"].clone();

        ledger
            .update(&id, json!({"createdAt": 1, "pagbank": {"status": "OPEN"}}))
            .await
            .unwrap();

        let doc = store.document(&id).await.unwrap();
        assert_eq!(doc["createdAt"], created_at);
        assert_eq!(doc["pagbank"]["status"], "OPEN");
    }

    #[tokio::test]
    async fn test_update_missing_order_is_not_found() {
        let (store, ledger) = ledger();
        let result = ledger.update(&OrderId::new("nope"), json!({"a": 1})).await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_upsert_creates_missing_document() {
        let (store, ledger) = ledger();
        let id = OrderId::new("ref-1");
        ledger
            .upsert_by_reference(&id, json!({"payment": {"status": "PAID"}}))
            .await
            .unwrap();

        let doc = store.document(&id).await.unwrap();
        assert_eq!(doc["payment"]["status"], "PAID");
        assert!(doc["createdAt"].is_i64());
    }

    #[tokio::test]
    async fn test_record_status_refuses_terminal_regression() {
        let (store, ledger) = ledger();
        let id = ledger.create(&sample_order()).await.unwrap();

        let paid = ledger
            .record_status(&id, OrderStatus::Paid, json!({}), false)
            .await
            .unwrap();
        assert!(paid.applied);
        assert_eq!(paid.previous, Some(OrderStatus::Pending));

        let regressed = ledger
            .record_status(&id, OrderStatus::Pending, json!({"note": "late"}), false)
            .await
            .unwrap();
        assert!(!regressed.applied);
        assert_eq!(regressed.current, OrderStatus::Paid);

        let doc = store.document(&id).await.unwrap();
        assert_eq!(doc["status"], "paid");
        assert_eq!(doc["note"], "late");
    }

    #[tokio::test]
    async fn test_record_status_upsert_on_missing_order() {
        let (store, ledger) = ledger();
        let id = OrderId::new("external");

        let change = ledger
            .record_status(&id, OrderStatus::Cancelled, json!({}), true)
            .await
            .unwrap();
        assert!(change.applied);
        assert_eq!(change.previous, None);
        assert_eq!(store.document(&id).await.unwrap()["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_list_by_status_returns_old_orders_first() {
        let (store, ledger) = ledger();
        let now = Utc::now();
        let recent = ledger.create(&sample_order()).await.unwrap();
        let older = ledger.create(&sample_order()).await.unwrap();
        let oldest = ledger.create(&sample_order()).await.unwrap();
        store.set_created_at(&older, now - chrono::Duration::hours(2)).await;
        store.set_created_at(&oldest, now - chrono::Duration::hours(5)).await;

        let paid = ledger.create(&sample_order()).await.unwrap();
        store.set_created_at(&paid, now - chrono::Duration::hours(3)).await;
        ledger
            .record_status(&paid, OrderStatus::Paid, json!({}), false)
            .await
            .unwrap();

        let stale: Vec<OrderId> = ledger
            .list_by_status(OrderStatus::Pending, now - chrono::Duration::hours(1))
            .await
            .unwrap()
            .into_iter()
            .map(|order| order.id)
            .collect();
        assert_eq!(stale, vec![oldest, older]);
        assert!(!stale.contains(&recent));
    }
}
