//! Catalog product document.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A product as stored in the catalog.
///
/// Every field is optional because catalog documents are edited by hand in
/// the admin panel and older documents may lack newer fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "nome", default)]
    pub name: Option<String>,
    /// Base unit price in major units.
    #[serde(rename = "preco", default)]
    pub price: Option<Decimal>,
    #[serde(rename = "precoPromocional", default)]
    pub promotional_price: Option<Decimal>,
    #[serde(rename = "ativo", default)]
    pub active: Option<bool>,
    #[serde(rename = "estoque", default)]
    pub stock: Option<i64>,
}

impl Product {
    /// Price charged for one unit.
    ///
    /// A non-zero promotional price wins over the base price. A product with
    /// neither is priced at zero, which the pricing resolver rejects.
    #[must_use]
    pub fn effective_price(&self) -> Decimal {
        self.promotional_price
            .filter(|p| !p.is_zero())
            .or(self.price)
            .unwrap_or(Decimal::ZERO)
    }

    /// Whether the product may be sold. Only an explicit `false` disables it.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.active != Some(false)
    }
}
