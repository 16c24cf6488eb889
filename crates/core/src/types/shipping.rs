//! Fixed shipping catalog.

use serde::{Deserialize, Serialize};

use super::money::Cents;

/// Shipping service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShippingType {
    #[default]
    Normal,
    Express,
    Sameday,
}

/// A shipping catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingOption {
    pub kind: ShippingType,
    pub price: Cents,
    /// Human-readable delivery estimate.
    pub time: &'static str,
    /// Label shown at checkout and on the gateway line item.
    pub label: &'static str,
}

impl ShippingType {
    /// Resolve a client-supplied shipping type.
    ///
    /// Matching is case-insensitive. Absent or unknown values fall back to
    /// [`ShippingType::Normal`] instead of failing the checkout.
    #[must_use]
    pub fn resolve(requested: Option<&str>) -> Self {
        match requested.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("express") => Self::Express,
            Some("sameday") => Self::Sameday,
            _ => Self::Normal,
        }
    }

    /// The catalog entry for this service level.
    #[must_use]
    pub const fn option(self) -> ShippingOption {
        match self {
            Self::Normal => ShippingOption {
                kind: self,
                price: Cents::new(1590),
                time: "5-8 dias",
                label: "Normal",
            },
            Self::Express => ShippingOption {
                kind: self,
                price: Cents::new(2990),
                time: "2-3 dias",
                label: "Expresso",
            },
            Self::Sameday => ShippingOption {
                kind: self,
                price: Cents::new(4990),
                time: "Hoje",
                label: "Same Day",
            },
        }
    }
}

impl ShippingOption {
    /// Look up a shipping option by its (case-insensitive) type name.
    #[must_use]
    pub fn lookup(requested: Option<&str>) -> Self {
        ShippingType::resolve(requested).option()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let upper = ShippingOption::lookup(Some("EXPRESS"));
        let lower = ShippingOption::lookup(Some("express"));
        assert_eq!(upper, lower);
        assert_eq!(upper.kind, ShippingType::Express);
        assert_eq!(upper.price, Cents::new(2990));
    }

    #[test]
    fn test_lookup_defaults_to_normal() {
        assert_eq!(ShippingOption::lookup(None).kind, ShippingType::Normal);
        assert_eq!(
            ShippingOption::lookup(Some("teleport")).kind,
            ShippingType::Normal
        );
        assert_eq!(ShippingOption::lookup(None).price, Cents::new(1590));
    }

    #[test]
    fn test_sameday_entry() {
        let option = ShippingOption::lookup(Some("SameDay"));
        assert_eq!(option.label, "Same Day");
        assert_eq!(option.time, "Hoje");
    }
}
