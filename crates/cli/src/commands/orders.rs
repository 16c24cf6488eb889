//! Order inspection commands.
//!
//! Checkouts are not transactional across the order write and the gateway
//! call, so a crash can leave an order `pending` forever. `stale` lists them
//! for manual reconciliation against the provider dashboards.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;

use makelifebetter_checkout::db::orders::PgOrderStore;
use makelifebetter_checkout::models::order::OrderDocument;
use makelifebetter_checkout::services::OrderLedger;
use makelifebetter_core::{OrderId, OrderStatus};

use super::{CommandError, connect};

async fn ledger() -> Result<OrderLedger, CommandError> {
    let pool = connect().await?;
    Ok(OrderLedger::new(Arc::new(PgOrderStore::new(pool))))
}

/// Print one order document.
///
/// # Errors
///
/// Returns `CommandError::OrderNotFound` if no order has this ID.
pub async fn show(id: &str) -> Result<(), CommandError> {
    let order = ledger()
        .await?
        .get(&OrderId::new(id))
        .await?
        .ok_or_else(|| CommandError::OrderNotFound(id.to_string()))?;

    let rendered = serde_json::to_string_pretty(&order.data)?;
    #[allow(clippy::print_stdout)]
    {
        println!("{rendered}");
    }
    Ok(())
}

/// List pending orders created more than `minutes` ago, oldest first.
///
/// # Errors
///
/// Returns `CommandError` if the database query fails.
pub async fn stale(minutes: u32) -> Result<(), CommandError> {
    let cutoff = Utc::now() - Duration::minutes(i64::from(minutes));
    let orders = ledger()
        .await?
        .list_by_status(OrderStatus::Pending, cutoff)
        .await?;

    tracing::info!(count = orders.len(), minutes, "Found stale pending orders");

    #[allow(clippy::print_stdout)]
    {
        for order in &orders {
            println!("{}", summary_line(order));
        }
    }
    Ok(())
}

/// One line per order: id, provider, total, email.
fn summary_line(order: &OrderDocument) -> String {
    let text = |pointer: &str| {
        order
            .data
            .pointer(pointer)
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => "-".to_string(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "-".to_string())
    };

    format!(
        "{}\t{}\t{}\t{}",
        order.id,
        text("/payment/provider"),
        text("/total"),
        text("/userEmail"),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_summary_line() {
        let order = OrderDocument::new(
            OrderId::new("o1"),
            json!({"payment": {"provider": "rede"}, "total": 45.9, "userEmail": "ana@example.com"}),
        );
        assert_eq!(summary_line(&order), "o1\trede\t45.9\tana@example.com");

        let order = OrderDocument::new(OrderId::new("o2"), json!({}));
        assert_eq!(summary_line(&order), "o2\t-\t-\t-");
    }
}
