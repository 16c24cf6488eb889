//! Rede direct card charge adapter.
//!
//! Authenticates with OAuth client credentials (HTTP Basic against the token
//! endpoint) and charges cards with `POST {base}/v1/transactions`. The result
//! is synchronous: return code `00` means approved.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use makelifebetter_core::{PaymentKind, PaymentProvider};

use super::token::{AccessToken, TokenCache};
use super::{
    ChargeRequest, ChargeResult, GatewayError, GatewayOutcome, GatewayRequest, PaymentGateway,
    http_client, response_body,
};
use crate::config::RedeConfig;
use crate::services::pricing::coerce_quantity;

/// Return code for an approved transaction.
pub const APPROVED_RETURN_CODE: &str = "00";

/// Longest soft descriptor Rede accepts.
pub const SOFT_DESCRIPTOR_MAX_LEN: usize = 13;

/// Most installments a credit charge may be split into.
pub const MAX_INSTALLMENTS: u32 = 12;

/// Card details as submitted by the client. Every field is optional so that
/// missing data is reported as incomplete rather than as a malformed body.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInput {
    #[serde(default)]
    pub cardholder_name: Option<Value>,
    #[serde(default)]
    pub card_number: Option<Value>,
    #[serde(default)]
    pub expiration_month: Option<Value>,
    #[serde(default)]
    pub expiration_year: Option<Value>,
    #[serde(default)]
    pub security_code: Option<Value>,
}

impl std::fmt::Debug for CardInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardInput").finish_non_exhaustive()
    }
}

/// Card data is missing one or more required fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Dados do cartao incompletos.")]
pub struct IncompleteCardData;

/// Validated card details.
///
/// Implements `Debug` manually so card numbers never reach the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct CardData {
    pub holder_name: String,
    /// Digits only.
    pub number: String,
    /// Two digits, zero-padded.
    pub expiration_month: String,
    pub expiration_year: String,
    pub security_code: String,
}

impl std::fmt::Debug for CardData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardData")
            .field("holder_name", &self.holder_name)
            .field("last4", &self.last4())
            .field("security_code", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl CardInput {
    /// Normalize and check the card fields.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteCardData` if any field is missing or blank.
    pub fn validate(&self) -> Result<CardData, IncompleteCardData> {
        let holder_name = text(self.cardholder_name.as_ref()).ok_or(IncompleteCardData)?;
        let number: String = text(self.card_number.as_ref())
            .ok_or(IncompleteCardData)?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let month = text(self.expiration_month.as_ref()).ok_or(IncompleteCardData)?;
        let year = text(self.expiration_year.as_ref()).ok_or(IncompleteCardData)?;
        let security_code = text(self.security_code.as_ref()).ok_or(IncompleteCardData)?;

        Ok(CardData {
            holder_name,
            number,
            expiration_month: format!("{month:0>2}"),
            expiration_year: year,
            security_code,
        })
    }
}

impl CardData {
    /// Last four digits of the card number.
    #[must_use]
    pub fn last4(&self) -> &str {
        let start = self.number.len().saturating_sub(4);
        self.number.get(start..).unwrap_or_default()
    }
}

/// Trimmed, non-empty text from a string or number field.
fn text(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Charge options after provider rules are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentOptions {
    pub kind: PaymentKind,
    pub capture: bool,
    pub installments: u32,
}

impl PaymentOptions {
    /// Apply Rede's rules to client-requested options.
    ///
    /// Debit is always captured in a single installment. Credit honors the
    /// requested capture flag (default: capture) and keeps installments
    /// within 1 to [`MAX_INSTALLMENTS`].
    #[must_use]
    pub fn normalize(kind: PaymentKind, capture: Option<bool>, installments: Option<&Value>) -> Self {
        match kind {
            PaymentKind::Debit => Self {
                kind,
                capture: true,
                installments: 1,
            },
            PaymentKind::Credit => Self {
                kind,
                capture: capture.unwrap_or(true),
                installments: installments
                    .map_or(1, coerce_quantity)
                    .clamp(1, MAX_INSTALLMENTS),
            },
        }
    }
}

/// Rede API client.
#[derive(Clone)]
pub struct RedeClient {
    http: reqwest::Client,
    api_url: String,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    soft_descriptor: Option<String>,
    tokens: Arc<TokenCache>,
}

impl std::fmt::Debug for RedeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedeClient")
            .field("api_url", &self.api_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

const fn default_expires_in() -> i64 {
    3600
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionPayload<'a> {
    kind: PaymentKind,
    reference: &'a str,
    /// Amount in cents.
    amount: i64,
    installments: u32,
    cardholder_name: &'a str,
    card_number: &'a str,
    expiration_month: &'a str,
    expiration_year: &'a str,
    security_code: &'a str,
    capture: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    soft_descriptor: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    #[serde(default)]
    return_code: Option<String>,
    #[serde(default)]
    return_message: Option<String>,
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    authorization_code: Option<String>,
    #[serde(default)]
    brand: Option<Value>,
    #[serde(default)]
    last4: Option<String>,
}

impl RedeClient {
    /// Create a client from configuration.
    ///
    /// Returns `Ok(None)` if client credentials are not configured.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Transport` if the HTTP client cannot be built.
    pub fn from_config(config: &RedeConfig) -> Result<Option<Self>, GatewayError> {
        let (Some(client_id), Some(client_secret)) =
            (config.client_id.clone(), config.client_secret.clone())
        else {
            return Ok(None);
        };

        Self::new(
            config.api_url.clone(),
            config.token_url.clone(),
            client_id,
            client_secret,
        )
        .map(|client| Some(client.with_soft_descriptor(config.soft_descriptor.as_deref())))
    }

    /// Create a client against explicit endpoints.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Transport` if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            http: http_client()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            soft_descriptor: None,
            tokens: Arc::new(TokenCache::new()),
        })
    }

    /// Set the statement descriptor, truncated to Rede's limit.
    #[must_use]
    pub fn with_soft_descriptor(mut self, descriptor: Option<&str>) -> Self {
        self.soft_descriptor = descriptor
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(|d| d.chars().take(SOFT_DESCRIPTOR_MAX_LEN).collect());
        self
    }

    /// The token cache used by this client.
    #[must_use]
    pub fn token_cache(&self) -> &TokenCache {
        &self.tokens
    }

    /// Get a usable bearer token, fetching one if needed.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::AuthFailed` if the token endpoint refuses the
    /// client credentials or answers with something unreadable.
    pub async fn access_token(&self) -> Result<AccessToken, GatewayError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn fetch_token(&self) -> Result<AccessToken, GatewayError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| GatewayError::AuthFailed(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = status.as_u16(), "Rede token endpoint refused credentials");
            return Err(GatewayError::AuthFailed(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::AuthFailed(format!("invalid token response: {e}")))?;

        debug!(expires_in = token.expires_in, "Obtained Rede access token");
        Ok(AccessToken::new(token.access_token, token.expires_in))
    }

    /// Charge a card.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::AuthFailed` if no token can be obtained,
    /// `GatewayError::Rejected` on a non-success HTTP status and
    /// `GatewayError::Transport` if the request fails.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, kind = ?request.options.kind))]
    pub async fn charge(&self, request: &ChargeRequest<'_>) -> Result<ChargeResult, GatewayError> {
        let token = self.access_token().await?;
        let card = request.card;

        let payload = TransactionPayload {
            kind: request.options.kind,
            reference: request.order_id.as_str(),
            amount: request.amount.get(),
            installments: request.options.installments,
            cardholder_name: &card.holder_name,
            card_number: &card.number,
            expiration_month: &card.expiration_month,
            expiration_year: &card.expiration_year,
            security_code: &card.security_code,
            capture: request.options.capture,
            soft_descriptor: self.soft_descriptor.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}/v1/transactions", self.api_url))
            .bearer_auth(token.expose())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response_body(response).await;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked upstream before its expiry; fetch a new one next time.
            self.tokens.clear().await;
        }

        if !status.is_success() {
            warn!(status = status.as_u16(), "Rede rejected transaction");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TransactionResponse = serde_json::from_value(body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let approved = parsed.return_code.as_deref() == Some(APPROVED_RETURN_CODE);
        debug!(approved, return_code = ?parsed.return_code, "Rede transaction answered");

        Ok(ChargeResult {
            approved,
            captured: approved && request.options.capture,
            return_code: parsed.return_code,
            return_message: parsed.return_message,
            tid: parsed.tid,
            authorization_code: parsed.authorization_code,
            brand: parsed.brand.as_ref().and_then(brand_name),
            last4: parsed.last4.or_else(|| Some(card.last4().to_string())),
        })
    }
}

#[async_trait]
impl PaymentGateway for RedeClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Rede
    }

    async fn submit(&self, request: GatewayRequest<'_>) -> Result<GatewayOutcome, GatewayError> {
        match request {
            GatewayRequest::Charge(charge) => self.charge(&charge).await.map(GatewayOutcome::Charge),
            GatewayRequest::Checkout(_) => Err(GatewayError::UnsupportedRequest(self.provider())),
        }
    }
}

/// Brand name from either a plain string or a `{ "name": ... }` object.
fn brand_name(brand: &Value) -> Option<String> {
    match brand {
        Value::String(name) => Some(name.clone()),
        Value::Object(fields) => fields.get("name").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}
