//! Status enums for orders and payments.

use serde::{Deserialize, Serialize};

/// Order payment status.
///
/// `Paid` and `Cancelled` are terminal. `Authorized` marks a card charge that
/// was approved without capture and still awaits settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Authorized,
    Paid,
    Cancelled,
}

impl OrderStatus {
    /// Whether no further status change is accepted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a valid transition.
    ///
    /// Non-terminal statuses may move anywhere (latest provider report wins).
    /// Terminal statuses only accept re-applying the same status, which keeps
    /// duplicate webhook deliveries idempotent while refusing regressions such
    /// as a stale `pending` event arriving after `paid`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() || self == next
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "authorized" => Ok(Self::Authorized),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// Payment gateway that processed an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    /// Hosted checkout with redirect and webhook notification.
    PagBank,
    /// Direct card charge with synchronous result.
    Rede,
}

impl PaymentProvider {
    /// Lowercase wire name, also used as the order metadata key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PagBank => "pagbank",
            Self::Rede => "rede",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Card transaction kind for direct charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    #[default]
    Credit,
    Debit,
}

impl PaymentKind {
    /// Parse a client-supplied kind. Anything but `debit` is credit.
    #[must_use]
    pub fn resolve(requested: Option<&str>) -> Self {
        match requested {
            Some(kind) if kind.trim().eq_ignore_ascii_case("debit") => Self::Debit,
            _ => Self::Credit,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Authorized.is_terminal());
    }

    #[test]
    fn test_transitions_from_non_terminal() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Authorized,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
        ] {
            assert!(OrderStatus::Pending.can_transition_to(next));
            assert!(OrderStatus::Authorized.can_transition_to(next));
        }
    }

    #[test]
    fn test_terminal_statuses_refuse_regression() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        let parsed: OrderStatus = "authorized".parse().expect("valid status");
        assert_eq!(parsed, OrderStatus::Authorized);
        assert_eq!(parsed.to_string(), "authorized");
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_payment_kind_resolve() {
        assert_eq!(PaymentKind::resolve(Some("DEBIT")), PaymentKind::Debit);
        assert_eq!(PaymentKind::resolve(Some("pix")), PaymentKind::Credit);
        assert_eq!(PaymentKind::resolve(None).as_str(), "credit");
    }

    #[test]
    fn test_provider_wire_names() {
        let json = serde_json::to_string(&PaymentProvider::PagBank).expect("serialize");
        assert_eq!(json, "\"pagbank\"");
        assert_eq!(PaymentProvider::Rede.as_str(), "rede");
    }
}
