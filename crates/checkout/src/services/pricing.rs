//! Cart pricing.
//!
//! Turns an untrusted client cart into priced line items by re-reading every
//! referenced product from the catalog. Client-submitted prices are never
//! read.

use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use makelifebetter_core::{Cents, ProductId};

use crate::db::{ProductCatalog, RepositoryError};
use crate::models::order::OrderItem;

/// Name used for products without one.
pub const DEFAULT_PRODUCT_NAME: &str = "Produto";

/// Errors that can occur while pricing a cart.
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("Carrinho vazio.")]
    EmptyCart,

    #[error("Produto invalido.")]
    InvalidProduct,

    #[error("Produto nao encontrado.")]
    ProductNotFound(ProductId),

    #[error("Produto indisponivel.")]
    ProductUnavailable(ProductId),

    #[error("Preco invalido.")]
    InvalidPrice(ProductId),

    #[error("catalog error: {0}")]
    Repository(#[from] RepositoryError),
}

/// One line of a client-submitted cart.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineRequest {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub product_id: Option<Value>,
    #[serde(default)]
    pub quantity: Option<Value>,
}

impl CartLineRequest {
    /// Product reference, preferring `id` over `productId`.
    #[must_use]
    pub fn product_ref(&self) -> Option<ProductId> {
        reference(self.id.as_ref()).or_else(|| reference(self.product_id.as_ref()))
    }

    /// Requested quantity, coerced to an integer of at least one.
    #[must_use]
    pub fn quantity(&self) -> u32 {
        self.quantity.as_ref().map_or(1, coerce_quantity)
    }
}

/// A line item priced from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLineItem {
    pub product_id: ProductId,
    pub name: String,
    pub unit_amount: Cents,
    pub quantity: u32,
}

impl PricedLineItem {
    /// Unit amount times quantity.
    #[must_use]
    pub fn line_total(&self) -> Cents {
        self.unit_amount.times(self.quantity)
    }

    /// The line as stored on the order, with the unit price in major units.
    #[must_use]
    pub fn to_order_item(&self) -> OrderItem {
        OrderItem {
            product_id: self.product_id.clone(),
            name: self.name.clone(),
            price: self.unit_amount.to_major(),
            quantity: self.quantity,
        }
    }
}

/// A fully priced cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    /// Line items in the order they were submitted.
    pub items: Vec<PricedLineItem>,
    pub subtotal: Cents,
}

/// Price a client cart against the catalog.
///
/// All products are fetched concurrently. Any missing, inactive or unpriced
/// product fails the whole cart.
///
/// # Errors
///
/// Returns a `PricingError` describing the first offending line.
#[instrument(skip_all, fields(lines = lines.map_or(0, <[CartLineRequest]>::len)))]
pub async fn resolve_cart(
    catalog: &dyn ProductCatalog,
    lines: Option<&[CartLineRequest]>,
) -> Result<PricedCart, PricingError> {
    let lines = lines.filter(|l| !l.is_empty()).ok_or(PricingError::EmptyCart)?;

    let ids = lines
        .iter()
        .map(|line| line.product_ref().ok_or(PricingError::InvalidProduct))
        .collect::<Result<Vec<_>, _>>()?;

    let products = try_join_all(ids.iter().map(|id| catalog.find(id))).await?;

    let mut items = Vec::with_capacity(lines.len());
    for ((line, id), product) in lines.iter().zip(ids).zip(products) {
        let product = product.ok_or_else(|| PricingError::ProductNotFound(id.clone()))?;
        if !product.is_available() {
            return Err(PricingError::ProductUnavailable(id));
        }

        let unit_amount = Cents::from_major(product.effective_price())
            .filter(|c| c.is_positive())
            .ok_or_else(|| PricingError::InvalidPrice(id.clone()))?;

        items.push(PricedLineItem {
            name: product
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_PRODUCT_NAME.to_string()),
            product_id: id,
            unit_amount,
            quantity: line.quantity(),
        });
    }

    let subtotal = items.iter().map(PricedLineItem::line_total).sum();
    Ok(PricedCart { items, subtotal })
}

fn reference(value: Option<&Value>) -> Option<ProductId> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(ProductId::new(s.as_str())),
        Value::Number(n) => Some(ProductId::new(n.to_string())),
        _ => None,
    }
}

/// Coerce a client quantity to an integer of at least one.
///
/// Numbers are truncated. Strings are read like a lenient integer parse:
/// leading whitespace and sign, then as many digits as present ("3 un" is 3).
/// Anything unreadable, zero or negative becomes 1.
#[must_use]
pub fn coerce_quantity(value: &Value) -> u32 {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(truncate)),
        Value::String(s) => parse_leading_int(s),
        _ => None,
    };

    parsed
        .filter(|q| *q >= 1)
        .map_or(1, |q| u32::try_from(q).unwrap_or(u32::MAX))
}

#[allow(clippy::cast_possible_truncation)] // Saturating float-to-int cast is the intent
fn truncate(f: f64) -> i64 {
    f.trunc() as i64
}

fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, s.get(1..)?),
        Some(b'+') => (false, s.get(1..)?),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let magnitude: i64 = digits.get(..end)?.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::db::memory::MemoryCatalog;
    use crate::models::product::Product;

    fn priced(cents: i64) -> Product {
        Product {
            name: Some(format!("Item {cents}")),
            price: Some(Decimal::new(cents, 2)),
            ..Product::default()
        }
    }

    fn line(id: &str, quantity: Value) -> CartLineRequest {
        CartLineRequest {
            id: Some(json!(id)),
            quantity: Some(quantity),
            ..CartLineRequest::default()
        }
    }

    #[test]
    fn test_coerce_quantity() {
        assert_eq!(coerce_quantity(&json!(3)), 3);
        assert_eq!(coerce_quantity(&json!(2.9)), 2);
        assert_eq!(coerce_quantity(&json!("4")), 4);
        assert_eq!(coerce_quantity(&json!(" 5 unidades")), 5);
        assert_eq!(coerce_quantity(&json!(0)), 1);
        assert_eq!(coerce_quantity(&json!(-7)), 1);
        assert_eq!(coerce_quantity(&json!("abc")), 1);
        assert_eq!(coerce_quantity(&json!(null)), 1);
        assert_eq!(coerce_quantity(&json!([2])), 1);
    }

    #[test]
    fn test_product_ref_prefers_id() {
        let line = CartLineRequest {
            id: Some(json!("a")),
            product_id: Some(json!("b")),
            quantity: None,
        };
        assert_eq!(line.product_ref(), Some(ProductId::new("a")));

        let fallback = CartLineRequest {
            id: Some(json!("")),
            product_id: Some(json!(42)),
            quantity: None,
        };
        assert_eq!(fallback.product_ref(), Some(ProductId::new("42")));
        assert_eq!(CartLineRequest::default().quantity(), 1);
    }

    #[tokio::test]
    async fn test_subtotal_is_exact_integer_sum() {
        let catalog = MemoryCatalog::new()
            .with_product("a", priced(1999))
            .with_product("b", priced(10))
            .with_product("c", priced(333));
        let lines = vec![line("a", json!(3)), line("b", json!(7)), line("c", json!(1))];

        let cart = resolve_cart(&catalog, Some(lines.as_slice())).await.unwrap();

        assert_eq!(cart.subtotal, Cents::new(1999 * 3 + 10 * 7 + 333));
        let ids: Vec<_> = cart.items.iter().map(|i| i.product_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_promotional_price_and_default_name() {
        let catalog = MemoryCatalog::new().with_product(
            "p1",
            Product {
                price: Some(Decimal::new(1000, 2)),
                promotional_price: Some(Decimal::new(800, 2)),
                ..Product::default()
            },
        );
        let lines = vec![line("p1", json!(2))];

        let cart = resolve_cart(&catalog, Some(lines.as_slice())).await.unwrap();
        let item = &cart.items[0];
        assert_eq!(item.name, DEFAULT_PRODUCT_NAME);
        assert_eq!(item.unit_amount, Cents::new(800));
        assert_eq!(cart.subtotal, Cents::new(1600));
        assert_eq!(item.to_order_item().price, Decimal::new(800, 2));
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let catalog = MemoryCatalog::new();
        assert!(matches!(
            resolve_cart(&catalog, None).await,
            Err(PricingError::EmptyCart)
        ));
        assert!(matches!(
            resolve_cart(&catalog, Some(&[][..])).await,
            Err(PricingError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_line_without_reference_is_invalid() {
        let catalog = MemoryCatalog::new();
        let lines = vec![CartLineRequest::default()];
        assert!(matches!(
            resolve_cart(&catalog, Some(lines.as_slice())).await,
            Err(PricingError::InvalidProduct)
        ));
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let catalog = MemoryCatalog::new();
        let lines = vec![line("ghost", json!(1))];
        assert!(matches!(
            resolve_cart(&catalog, Some(lines.as_slice())).await,
            Err(PricingError::ProductNotFound(id)) if id.as_str() == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_inactive_product_fails_whole_cart() {
        let catalog = MemoryCatalog::new()
            .with_product("ok", priced(500))
            .with_product(
                "off",
                Product {
                    active: Some(false),
                    ..priced(500)
                },
            );
        let lines = vec![line("ok", json!(1)), line("off", json!(1))];
        assert!(matches!(
            resolve_cart(&catalog, Some(lines.as_slice())).await,
            Err(PricingError::ProductUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unpriced_product() {
        let catalog = MemoryCatalog::new()
            .with_product("free", Product::default())
            .with_product("tiny", priced(0));
        for id in ["free", "tiny"] {
            let lines = vec![line(id, json!(1))];
            assert!(matches!(
                resolve_cart(&catalog, Some(lines.as_slice())).await,
                Err(PricingError::InvalidPrice(_))
            ));
        }
    }
}
