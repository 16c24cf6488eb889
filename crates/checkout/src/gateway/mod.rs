//! Payment gateway adapters.
//!
//! Each adapter owns one provider's authentication, request shape and status
//! mapping. Adapters never touch the order ledger: they return a
//! [`GatewayOutcome`] or a [`GatewayError`] and the checkout orchestrator
//! decides what to record.
//!
//! # Providers
//!
//! - [`pagbank`] - Hosted checkout. Returns a pay link; the final status
//!   arrives later by webhook.
//! - [`rede`] - Direct card charge with a synchronous result, authenticated
//!   with OAuth client credentials cached in a [`token::TokenCache`].

pub mod pagbank;
pub mod rede;
pub mod token;

pub use pagbank::PagBankClient;
pub use rede::RedeClient;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use makelifebetter_core::{Cents, OrderId, PaymentProvider, ShippingOption};

use crate::services::pricing::PricedLineItem;
use rede::{CardData, PaymentOptions};

/// Timeout applied to every gateway HTTP call.
pub const GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Provider environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    /// Parse an environment name. Anything but `production` is the sandbox.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Sandbox,
        }
    }

    /// PagBank API base URL.
    #[must_use]
    pub const fn pagbank_base_url(self) -> &'static str {
        match self {
            Self::Production => "https://api.pagseguro.com",
            Self::Sandbox => "https://sandbox.api.pagseguro.com",
        }
    }

    /// Rede transactions API base URL.
    #[must_use]
    pub const fn rede_api_url(self) -> &'static str {
        match self {
            Self::Production => "https://api.userede.com.br/erede",
            Self::Sandbox => "https://sandbox-erede.useredecloud.com.br",
        }
    }

    /// Rede OAuth token endpoint.
    #[must_use]
    pub const fn rede_token_url(self) -> &'static str {
        match self {
            Self::Production => "https://api.userede.com.br/redelabs/oauth2/token",
            Self::Sandbox => "https://rl7-sandbox-api.useredecloud.com.br/oauth2/token",
        }
    }
}

/// Errors returned by gateway adapters.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider refused our credentials.
    #[error("gateway authentication failed: {0}")]
    AuthFailed(String),

    /// The provider answered with a non-success HTTP status.
    #[error("gateway rejected request with HTTP {status}")]
    Rejected {
        status: u16,
        /// Raw response body, JSON when the provider sent JSON.
        body: Value,
    },

    /// The request never got an HTTP answer.
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with something we could not read.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    /// The adapter does not handle this kind of request.
    #[error("{0} does not support this request")]
    UnsupportedRequest(PaymentProvider),
}

impl GatewayError {
    /// Error payload recorded on the order for this failure.
    #[must_use]
    pub fn to_metadata(&self) -> Value {
        match self {
            Self::Rejected { status, body } => serde_json::json!({
                "error": body,
                "status": status,
            }),
            other => serde_json::json!({
                "error": other.to_string(),
                "status": Value::Null,
            }),
        }
    }
}

/// Buyer details forwarded to hosted checkouts when known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Customer {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Hosted checkout request.
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub order_id: &'a OrderId,
    pub items: &'a [PricedLineItem],
    pub shipping: ShippingOption,
    pub customer: Customer,
    /// Where the buyer lands after paying (or giving up).
    pub return_url: String,
    /// Where the provider posts status notifications, when reachable.
    pub notification_url: Option<String>,
}

/// Direct card charge request.
#[derive(Debug, Clone)]
pub struct ChargeRequest<'a> {
    pub order_id: &'a OrderId,
    pub amount: Cents,
    pub card: &'a CardData,
    pub options: PaymentOptions,
}

/// A request to a payment gateway.
#[derive(Debug, Clone)]
pub enum GatewayRequest<'a> {
    Checkout(CheckoutRequest<'a>),
    Charge(ChargeRequest<'a>),
}

/// A hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_id: Option<String>,
    /// Link the buyer follows to pay, if the provider returned one.
    pub pay_link: Option<String>,
    /// All links returned by the provider.
    pub links: Value,
    pub status: Option<String>,
}

/// Result of a direct card charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeResult {
    pub approved: bool,
    /// Whether the charge was captured, as requested.
    pub captured: bool,
    pub return_code: Option<String>,
    pub return_message: Option<String>,
    pub tid: Option<String>,
    pub authorization_code: Option<String>,
    pub brand: Option<String>,
    pub last4: Option<String>,
}

/// Successful gateway response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Checkout(CheckoutSession),
    Charge(ChargeResult),
}

/// A payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Which provider this adapter talks to.
    fn provider(&self) -> PaymentProvider;

    /// Submit a request to the provider.
    async fn submit(&self, request: GatewayRequest<'_>) -> Result<GatewayOutcome, GatewayError>;
}

/// Build the shared HTTP client for gateway calls.
///
/// # Errors
///
/// Returns `GatewayError::Transport` if the TLS backend cannot be initialized.
pub fn http_client() -> Result<reqwest::Client, GatewayError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(GATEWAY_TIMEOUT_SECS))
        .user_agent(concat!("makelifebetter-checkout/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Read a response body as JSON, falling back to the raw text.
async fn response_body(response: reqwest::Response) -> Value {
    match response.text().await {
        Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Err(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!(GatewayEnvironment::parse(None), GatewayEnvironment::Sandbox);
        assert_eq!(
            GatewayEnvironment::parse(Some("PRODUCTION")),
            GatewayEnvironment::Production
        );
        assert_eq!(
            GatewayEnvironment::parse(Some("prod")),
            GatewayEnvironment::Sandbox
        );
        assert_eq!(
            GatewayEnvironment::Production.pagbank_base_url(),
            "https://api.pagseguro.com"
        );
    }

    #[test]
    fn test_rejected_metadata_keeps_raw_body() {
        let err = GatewayError::Rejected {
            status: 500,
            body: serde_json::json!({"error_messages": [{"code": "40002"}]}),
        };
        let meta = err.to_metadata();
        assert_eq!(meta["status"], 500);
        assert_eq!(meta["error"]["error_messages"][0]["code"], "40002");
    }
}
