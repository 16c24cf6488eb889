//! Order documents.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use makelifebetter_core::{
    OrderId, OrderStatus, PaymentProvider, ProductId, ShippingOption, ShippingType, UserId,
};

use crate::db::document_status;

/// A new order, as written by the checkout orchestrator.
///
/// Monetary fields are major-unit decimals derived from the authoritative
/// cent amounts. They are serialized as JSON numbers because that is what the
/// storefront and admin panel read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub user_id: UserId,
    pub user_email: String,
    pub items: Vec<OrderItem>,
    /// Shipping address exactly as submitted by the client.
    pub address: Value,
    pub shipping: ShippingRecord,
    pub payment: PaymentDescriptor,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub status: OrderStatus,
}

/// One purchased product line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    #[serde(rename = "nome")]
    pub name: String,
    /// Unit price in major units.
    #[serde(rename = "preco", with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: u32,
}

/// Snapshot of the shipping option chosen at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingRecord {
    #[serde(rename = "type")]
    pub kind: ShippingType,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub time: String,
    pub label: String,
}

impl From<ShippingOption> for ShippingRecord {
    fn from(option: ShippingOption) -> Self {
        Self {
            kind: option.kind,
            price: option.price.to_major(),
            time: option.time.to_string(),
            label: option.label.to_string(),
        }
    }
}

/// How the order is being paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentDescriptor {
    /// Payment method as chosen by the customer (`credit`, `debit`, `pix`...).
    pub method: String,
    pub installments: u32,
    pub provider: PaymentProvider,
    /// Whether the charge is captured immediately. Direct charges only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<bool>,
}

/// A persisted order document.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDocument {
    pub id: OrderId,
    pub data: Value,
}

impl OrderDocument {
    #[must_use]
    pub const fn new(id: OrderId, data: Value) -> Self {
        Self { id, data }
    }

    /// Current order status. Unknown values read as `pending`.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        document_status(&self.data)
    }

    /// ID of the user who placed the order.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.data.get("userId").and_then(Value::as_str)
    }

    /// Look up a top-level field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use makelifebetter_core::Cents;

    use super::*;

    #[test]
    fn test_new_order_document_shape() {
        let order = NewOrder {
            user_id: UserId::new("u1"),
            user_email: "ana@example.com".to_string(),
            items: vec![OrderItem {
                product_id: ProductId::new("p1"),
                name: "Vela".to_string(),
                price: Cents::new(800).to_major(),
                quantity: 2,
            }],
            address: json!({"name": "Ana"}),
            shipping: ShippingOption::lookup(Some("express")).into(),
            payment: PaymentDescriptor {
                method: "credit".to_string(),
                installments: 1,
                provider: PaymentProvider::PagBank,
                capture: None,
            },
            subtotal: Cents::new(1600).to_major(),
            shipping_cost: Cents::new(2990).to_major(),
            total: Cents::new(4590).to_major(),
            status: OrderStatus::Pending,
        };

        let doc = serde_json::to_value(&order).unwrap();
        assert_eq!(doc["userId"], "u1");
        assert_eq!(doc["items"][0]["productId"], "p1");
        assert_eq!(doc["items"][0]["nome"], "Vela");
        assert_eq!(doc["items"][0]["preco"], json!(8.0));
        assert_eq!(doc["shipping"]["type"], "express");
        assert_eq!(doc["shipping"]["price"], json!(29.9));
        assert_eq!(doc["shippingCost"], json!(29.9));
        assert_eq!(doc["total"], json!(45.9));
        assert_eq!(doc["payment"]["provider"], "pagbank");
        assert!(doc["payment"].get("capture").is_none());
        assert_eq!(doc["status"], "pending");
    }

    #[test]
    fn test_order_document_accessors() {
        let doc = OrderDocument::new(
            OrderId::new("o1"),
            json!({"userId": "u1", "status": "authorized", "total": 10.5}),
        );
        assert_eq!(doc.status(), OrderStatus::Authorized);
        assert_eq!(doc.user_id(), Some("u1"));
        assert_eq!(doc.field("total"), Some(&json!(10.5)));
    }
}
