//! In-memory stores for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use makelifebetter_core::{OrderId, OrderStatus, ProductId};

use super::{
    DocumentPatcher, OrderStore, ProductCatalog, RepositoryError, document_status, merge_documents,
};
use crate::models::order::OrderDocument;
use crate::models::product::Product;

struct StoredOrder {
    document: Value,
    created_at: DateTime<Utc>,
}

/// Order store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<OrderId, StoredOrder>>,
}

impl MemoryOrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of an order document.
    pub async fn document(&self, id: &OrderId) -> Option<Value> {
        self.orders
            .lock()
            .await
            .get(id)
            .map(|stored| stored.document.clone())
    }

    /// Number of stored orders.
    pub async fn len(&self) -> usize {
        self.orders.lock().await.len()
    }

    /// Whether no orders are stored.
    pub async fn is_empty(&self) -> bool {
        self.orders.lock().await.is_empty()
    }

    /// Backdate an order's creation time.
    pub async fn set_created_at(&self, id: &OrderId, created_at: DateTime<Utc>) {
        if let Some(stored) = self.orders.lock().await.get_mut(id) {
            stored.created_at = created_at;
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, id: &OrderId, document: Value) -> Result<(), RepositoryError> {
        self.orders.lock().await.insert(
            id.clone(),
            StoredOrder {
                document,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn fetch(&self, id: &OrderId) -> Result<Option<Value>, RepositoryError> {
        Ok(self.document(id).await)
    }

    async fn apply(
        &self,
        id: &OrderId,
        upsert: bool,
        patcher: DocumentPatcher,
    ) -> Result<Option<Value>, RepositoryError> {
        let mut orders = self.orders.lock().await;

        match orders.get_mut(id) {
            Some(stored) => {
                let patch = patcher(Some(&stored.document));
                merge_documents(&mut stored.document, patch);
                Ok(Some(stored.document.clone()))
            }
            None if upsert => {
                let mut document = Value::Object(serde_json::Map::new());
                merge_documents(&mut document, patcher(None));
                orders.insert(
                    id.clone(),
                    StoredOrder {
                        document: document.clone(),
                        created_at: Utc::now(),
                    },
                );
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    async fn list_by_status(
        &self,
        status: OrderStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderDocument>, RepositoryError> {
        let orders = self.orders.lock().await;
        let mut matches: Vec<_> = orders
            .iter()
            .filter(|(_, stored)| {
                document_status(&stored.document) == status && stored.created_at < created_before
            })
            .map(|(id, stored)| (stored.created_at, id.clone(), stored.document.clone()))
            .collect();
        matches.sort_by_key(|(created_at, _, _)| *created_at);

        Ok(matches
            .into_iter()
            .map(|(_, id, document)| OrderDocument::new(id, document))
            .collect())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Product catalog backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryCatalog {
    products: HashMap<ProductId, Product>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product, replacing any existing product with the same ID.
    #[must_use]
    pub fn with_product(mut self, id: impl Into<ProductId>, product: Product) -> Self {
        self.products.insert(id.into(), product);
        self
    }
}

#[async_trait]
impl ProductCatalog for MemoryCatalog {
    async fn find(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.products.get(id).cloned())
    }
}
