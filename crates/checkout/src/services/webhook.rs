//! PagBank notification reconciler.
//!
//! Notifications are authenticated against the raw body, then merged into
//! the referenced order. Documents are created when the reference is unknown,
//! so notifications that race order creation are not lost.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use makelifebetter_core::{OrderId, OrderStatus, PaymentProvider};

use super::ledger::{OrderLedger, StatusChange};
use crate::db::RepositoryError;
use crate::gateway::pagbank::verify_authenticity;

/// Header carrying the notification signature.
pub const AUTHENTICITY_HEADER: &str = "x-authenticity-token";

/// Errors that can occur while handling a notification.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// No shared secret is configured.
    #[error("Missing token")]
    MissingSecret,

    /// The signature is absent or wrong.
    #[error("Unauthorized")]
    Unauthorized,

    /// The ledger write failed.
    #[error("ledger error: {0}")]
    Repository(#[from] RepositoryError),
}

/// What a notification did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Not JSON, or no order reference. Acknowledged without action.
    Ignored,
    /// The referenced order was updated.
    Applied {
        order_id: OrderId,
        change: StatusChange,
    },
}

/// Fields read from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Notification {
    reference: String,
    status: Option<String>,
    event_type: Option<String>,
    event_id: Option<String>,
}

impl Notification {
    /// Read fields from the top level, falling back to `data`.
    fn parse(payload: &Value) -> Option<Self> {
        let field = |key: &str| {
            payload.get(key).and_then(scalar).or_else(|| {
                payload
                    .get("data")
                    .and_then(|data| data.get(key))
                    .and_then(scalar)
            })
        };

        Some(Self {
            reference: field("reference_id")?,
            status: field("status").map(|s| s.to_uppercase()),
            event_type: field("type"),
            event_id: field("id"),
        })
    }
}

fn scalar(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Map an upper-cased PagBank status to an order status.
#[must_use]
pub fn map_pagbank_status(status: Option<&str>) -> OrderStatus {
    match status {
        Some("PAID") => OrderStatus::Paid,
        Some("DECLINED" | "CANCELED" | "CANCELLED" | "EXPIRED" | "INACTIVE") => {
            OrderStatus::Cancelled
        }
        _ => OrderStatus::Pending,
    }
}

/// Applies PagBank notifications to the order ledger.
#[derive(Clone)]
pub struct WebhookReconciler {
    secret: Option<SecretString>,
    ledger: OrderLedger,
}

impl WebhookReconciler {
    #[must_use]
    pub const fn new(secret: Option<SecretString>, ledger: OrderLedger) -> Self {
        Self { secret, ledger }
    }

    /// Authenticate and apply one notification.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::MissingSecret` when no secret is configured,
    /// `WebhookError::Unauthorized` when the signature does not match, and
    /// `WebhookError::Repository` when the ledger write fails.
    #[instrument(skip_all, fields(len = body.len()))]
    pub async fn handle(
        &self,
        provided_token: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        let secret = self.secret.as_ref().ok_or(WebhookError::MissingSecret)?;
        let provided = provided_token.ok_or(WebhookError::Unauthorized)?;
        if !verify_authenticity(secret.expose_secret(), body, provided.trim()) {
            warn!("Rejected notification with invalid authenticity token");
            return Err(WebhookError::Unauthorized);
        }

        let Ok(payload) = serde_json::from_slice::<Value>(body) else {
            debug!("Ignoring notification with non-JSON body");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(notification) = Notification::parse(&payload) else {
            debug!("Ignoring notification without reference");
            return Ok(WebhookOutcome::Ignored);
        };

        let order_id = OrderId::new(notification.reference);
        let status = map_pagbank_status(notification.status.as_deref());
        let fields = json!({
            "payment": {
                "provider": PaymentProvider::PagBank,
                "status": notification.status.as_deref().unwrap_or_default(),
            },
            "pagbank": {
                "lastEvent": {
                    "type": notification.event_type,
                    "status": notification.status,
                    "id": notification.event_id,
                    "receivedAt": Utc::now().timestamp_millis(),
                }
            }
        });

        let change = self
            .ledger
            .record_status(&order_id, status, fields, true)
            .await?;

        info!(
            order_id = %order_id,
            previous = ?change.previous,
            status = %change.current,
            applied = change.applied,
            "Applied PagBank notification"
        );
        Ok(WebhookOutcome::Applied { order_id, change })
    }
}
