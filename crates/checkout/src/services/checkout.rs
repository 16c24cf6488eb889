//! Checkout orchestration.
//!
//! Every checkout follows the same sequence:
//!
//! 1. Check the gateway is configured
//! 2. Verify the caller
//! 3. Price the cart from the catalog and add shipping
//! 4. Persist a `pending` order
//! 5. Call the gateway
//! 6. Record the outcome on the order and answer the client
//!
//! No transaction spans steps 4 to 6. A crash in between leaves a `pending`
//! order behind, which operators find with `mlb-cli orders stale`. Retried
//! requests create new orders.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use makelifebetter_core::{
    Cents, OrderId, OrderStatus, PaymentKind, PaymentProvider, ShippingOption,
};

use super::identity::{IdentityError, IdentityVerifier, VerifiedIdentity};
use super::ledger::OrderLedger;
use super::pricing::{CartLineRequest, PricedCart, PricingError, coerce_quantity, resolve_cart};
use crate::db::{ProductCatalog, RepositoryError};
use crate::gateway::rede::{CardInput, IncompleteCardData, PaymentOptions};
use crate::gateway::{
    ChargeRequest, ChargeResult, CheckoutRequest, Customer, GatewayError, GatewayOutcome,
    GatewayRequest, PaymentGateway,
};
use crate::models::order::{NewOrder, OrderDocument, PaymentDescriptor};

/// Errors that can end a checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// A required credential or URL is not configured.
    #[error("{0}")]
    Misconfigured(&'static str),

    /// The caller could not be verified.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] IdentityError),

    /// The cart could not be priced.
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// Card fields are missing. The order stays `pending`.
    #[error(transparent)]
    IncompleteCardData(#[from] IncompleteCardData),

    /// The gateway refused our credentials. The order was cancelled.
    #[error("gateway authentication failed for order {0}")]
    GatewayAuthFailed(OrderId),

    /// The gateway failed or rejected the request. The order was cancelled.
    #[error("gateway rejected order {0}")]
    GatewayRejected(OrderId),

    /// The card charge was declined. The order was cancelled.
    #[error("charge declined for order {}", .0.order_id)]
    Declined(Box<ChargeResponse>),

    /// The order does not exist or belongs to someone else.
    #[error("order not found")]
    OrderNotFound,

    /// The ledger failed.
    #[error("ledger error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Read a field as `T`, treating a value of any other shape as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Cart lines from a JSON list. Anything but a list reads as no cart, and a
/// malformed line reads as a line without a product reference.
fn lenient_lines<'de, D>(deserializer: D) -> Result<Option<Vec<CartLineRequest>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Array(lines)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        lines
            .into_iter()
            .map(|line| serde_json::from_value(line).unwrap_or_default())
            .collect(),
    ))
}

/// Body of a checkout request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    #[serde(default, deserialize_with = "lenient_lines")]
    pub items: Option<Vec<CartLineRequest>>,
    #[serde(default)]
    pub address: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub shipping_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub installments: Option<Value>,
}

/// Body of a direct charge request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeBody {
    #[serde(flatten)]
    pub checkout: CheckoutBody,
    #[serde(default, deserialize_with = "lenient")]
    pub payment: Option<ChargePayment>,
}

/// Card payment block of a direct charge request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargePayment {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub capture: Option<bool>,
    #[serde(default)]
    pub installments: Option<Value>,
    #[serde(default)]
    pub card: Option<CardInput>,
}

/// Answer to a hosted checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: OrderId,
    pub checkout_id: Option<String>,
    pub pay_link: Option<String>,
}

/// Answer to a direct charge request. Also the body of a declined charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub approved: bool,
    pub tid: Option<String>,
    pub return_code: Option<String>,
    pub return_message: Option<String>,
    pub authorization_code: Option<String>,
    pub brand: Option<String>,
    pub last4: Option<String>,
}

/// Order state shown to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total: Value,
    pub payment: Value,
}

/// URLs the orchestrator hands to gateways.
#[derive(Debug, Clone, Default)]
pub struct CheckoutUrls {
    /// Public storefront URL, without trailing slash.
    pub store_base_url: Option<String>,
    /// Full webhook URL for provider notifications.
    pub webhook_url: Option<String>,
}

impl CheckoutUrls {
    /// Build from the storefront URL and the public base URL of this service.
    #[must_use]
    pub fn new(store_base_url: Option<String>, service_base_url: Option<&str>) -> Self {
        Self {
            store_base_url,
            webhook_url: service_base_url.map(|base| format!("{base}/pagbankWebhook")),
        }
    }
}

/// Composes pricing, the ledger and gateways into checkouts.
#[derive(Clone)]
pub struct CheckoutService {
    catalog: Arc<dyn ProductCatalog>,
    ledger: OrderLedger,
    identity: Arc<dyn IdentityVerifier>,
    pagbank: Option<Arc<dyn PaymentGateway>>,
    rede: Option<Arc<dyn PaymentGateway>>,
    urls: CheckoutUrls,
}

struct PricedOrder {
    cart: PricedCart,
    shipping: ShippingOption,
    total: Cents,
}

impl CheckoutService {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        ledger: OrderLedger,
        identity: Arc<dyn IdentityVerifier>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            catalog,
            ledger,
            identity,
            pagbank: None,
            rede: None,
            urls,
        }
    }

    /// Enable hosted checkouts through `gateway`.
    #[must_use]
    pub fn with_pagbank(mut self, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        self.pagbank = gateway;
        self
    }

    /// Enable direct charges through `gateway`.
    #[must_use]
    pub fn with_rede(mut self, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        self.rede = gateway;
        self
    }

    /// Start a PagBank hosted checkout.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError` for configuration, identity, pricing and
    /// gateway failures. Gateway failures cancel the order first.
    #[instrument(skip_all)]
    pub async fn create_pagbank_checkout(
        &self,
        bearer: Option<&str>,
        body: CheckoutBody,
    ) -> Result<CheckoutResponse, CheckoutError> {
        let gateway = self
            .pagbank
            .as_ref()
            .ok_or(CheckoutError::Misconfigured("PAGBANK_TOKEN nao configurado."))?;
        let store_base_url = self
            .urls
            .store_base_url
            .as_deref()
            .ok_or(CheckoutError::Misconfigured("STORE_BASE_URL nao configurado."))?;

        let caller = self.authenticate(bearer).await?;
        let priced = self.price(&body).await?;

        let payment = PaymentDescriptor {
            method: body
                .payment_method
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| PaymentKind::Credit.as_str().to_string()),
            installments: body.installments.as_ref().map_or(1, coerce_quantity),
            provider: PaymentProvider::PagBank,
            capture: None,
        };
        let order_id = self.open_order(&caller, &body, &priced, payment).await?;

        let address_name = body
            .address
            .as_ref()
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(String::from);

        let request = CheckoutRequest {
            order_id: &order_id,
            items: &priced.cart.items,
            shipping: priced.shipping,
            customer: Customer {
                name: address_name,
                email: caller.email.clone(),
            },
            return_url: format!("{store_base_url}/store.html?order_id={order_id}"),
            notification_url: self.urls.webhook_url.clone(),
        };

        let session = match gateway.submit(GatewayRequest::Checkout(request)).await {
            Ok(GatewayOutcome::Checkout(session)) => session,
            Ok(GatewayOutcome::Charge(_)) => {
                let err = GatewayError::InvalidResponse("expected a checkout session".to_string());
                return Err(self.fail_order(&order_id, PaymentProvider::PagBank, &err).await);
            }
            Err(err) => return Err(self.fail_order(&order_id, PaymentProvider::PagBank, &err).await),
        };

        let metadata = json!({
            "pagbank": {
                "checkoutId": session.checkout_id,
                "links": session.links,
                "status": session.status,
            }
        });
        if let Err(e) = self.ledger.update(&order_id, metadata).await {
            // The checkout exists upstream; the buyer can still pay.
            error!(order_id = %order_id, error = %e, "Failed to record PagBank checkout");
        }

        info!(order_id = %order_id, checkout_id = ?session.checkout_id, "PagBank checkout created");
        Ok(CheckoutResponse {
            order_id,
            checkout_id: session.checkout_id,
            pay_link: session.pay_link,
        })
    }

    /// Charge a card through Rede.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError` for configuration, identity, pricing, card and
    /// gateway failures, and `CheckoutError::Declined` when the issuer
    /// declines.
    #[instrument(skip_all)]
    pub async fn create_rede_charge(
        &self,
        bearer: Option<&str>,
        body: ChargeBody,
    ) -> Result<ChargeResponse, CheckoutError> {
        let gateway = self
            .rede
            .as_ref()
            .ok_or(CheckoutError::Misconfigured("Credenciais da Rede nao configuradas."))?;

        let caller = self.authenticate(bearer).await?;
        let priced = self.price(&body.checkout).await?;

        let payment = body.payment.unwrap_or_default();
        let kind = PaymentKind::resolve(payment.kind.as_deref());
        let options = PaymentOptions::normalize(
            kind,
            payment.capture,
            payment
                .installments
                .as_ref()
                .or(body.checkout.installments.as_ref()),
        );

        let descriptor = PaymentDescriptor {
            method: kind.as_str().to_string(),
            installments: options.installments,
            provider: PaymentProvider::Rede,
            capture: Some(options.capture),
        };
        let order_id = self
            .open_order(&caller, &body.checkout, &priced, descriptor)
            .await?;

        // Validated after the order exists: incomplete card data leaves a
        // pending order for manual follow-up.
        let card = payment.card.unwrap_or_default().validate()?;

        let request = ChargeRequest {
            order_id: &order_id,
            amount: priced.total,
            card: &card,
            options,
        };

        let result = match gateway.submit(GatewayRequest::Charge(request)).await {
            Ok(GatewayOutcome::Charge(result)) => result,
            Ok(GatewayOutcome::Checkout(_)) => {
                let err = GatewayError::InvalidResponse("expected a charge result".to_string());
                return Err(self.fail_order(&order_id, PaymentProvider::Rede, &err).await);
            }
            Err(err) => return Err(self.fail_order(&order_id, PaymentProvider::Rede, &err).await),
        };

        let status = charge_status(&result);
        let metadata = json!({
            "rede": {
                "tid": result.tid,
                "authorizationCode": result.authorization_code,
                "returnCode": result.return_code,
                "returnMessage": result.return_message,
                "brand": result.brand,
                "last4": result.last4,
                "kind": options.kind,
                "capture": options.capture,
            }
        });
        if let Err(e) = self
            .ledger
            .record_status(&order_id, status, metadata, false)
            .await
        {
            // The charge already happened upstream; report it regardless.
            error!(order_id = %order_id, error = %e, "Failed to record Rede charge");
        }

        let response = ChargeResponse {
            order_id,
            status,
            approved: result.approved,
            tid: result.tid,
            return_code: result.return_code,
            return_message: result.return_message,
            authorization_code: result.authorization_code,
            brand: result.brand,
            last4: result.last4,
        };

        if response.approved {
            info!(order_id = %response.order_id, %status, "Rede charge approved");
            Ok(response)
        } else {
            warn!(order_id = %response.order_id, return_code = ?response.return_code, "Rede charge declined");
            Err(CheckoutError::Declined(Box::new(response)))
        }
    }

    /// Current state of one of the caller's orders.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::OrderNotFound` if the order does not exist or
    /// belongs to another user.
    #[instrument(skip(self, bearer), fields(order_id = %order_id))]
    pub async fn order_summary(
        &self,
        bearer: Option<&str>,
        order_id: &OrderId,
    ) -> Result<OrderSummary, CheckoutError> {
        let caller = self.authenticate(bearer).await?;
        let order = self
            .ledger
            .get(order_id)
            .await?
            .filter(|order| order.user_id() == Some(caller.user_id.as_str()))
            .ok_or(CheckoutError::OrderNotFound)?;

        Ok(summarize(order))
    }

    async fn authenticate(&self, bearer: Option<&str>) -> Result<VerifiedIdentity, CheckoutError> {
        let token = bearer.ok_or(IdentityError::MissingToken)?;
        let identity = self.identity.verify(token).await?;
        crate::error::set_sentry_user(&identity.user_id, identity.email.as_deref());
        Ok(identity)
    }

    async fn price(&self, body: &CheckoutBody) -> Result<PricedOrder, CheckoutError> {
        let cart = resolve_cart(self.catalog.as_ref(), body.items.as_deref()).await?;
        let shipping = ShippingOption::lookup(body.shipping_type.as_deref());
        let total = cart.subtotal + shipping.price;
        Ok(PricedOrder {
            cart,
            shipping,
            total,
        })
    }

    async fn open_order(
        &self,
        caller: &VerifiedIdentity,
        body: &CheckoutBody,
        priced: &PricedOrder,
        payment: PaymentDescriptor,
    ) -> Result<OrderId, CheckoutError> {
        let order = NewOrder {
            user_id: caller.user_id.clone(),
            user_email: caller.email.clone().unwrap_or_default(),
            items: priced
                .cart
                .items
                .iter()
                .map(|item| item.to_order_item())
                .collect(),
            address: body
                .address
                .clone()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            shipping: priced.shipping.into(),
            payment,
            subtotal: priced.cart.subtotal.to_major(),
            shipping_cost: priced.shipping.price.to_major(),
            total: priced.total.to_major(),
            status: OrderStatus::Pending,
        };

        let order_id = self.ledger.create(&order).await?;
        info!(order_id = %order_id, total = %priced.total, "Created pending order");
        Ok(order_id)
    }

    /// Cancel an order after a gateway failure and pick the client error.
    async fn fail_order(
        &self,
        order_id: &OrderId,
        provider: PaymentProvider,
        err: &GatewayError,
    ) -> CheckoutError {
        warn!(order_id = %order_id, %provider, error = %err, "Gateway call failed");

        let mut metadata = serde_json::Map::new();
        metadata.insert(provider.as_str().to_string(), err.to_metadata());
        if let Err(e) = self
            .ledger
            .record_status(order_id, OrderStatus::Cancelled, Value::Object(metadata), false)
            .await
        {
            error!(order_id = %order_id, error = %e, "Failed to cancel order after gateway failure");
        }

        match err {
            GatewayError::AuthFailed(_) => CheckoutError::GatewayAuthFailed(order_id.clone()),
            _ => CheckoutError::GatewayRejected(order_id.clone()),
        }
    }
}

/// Order status for a synchronous charge result.
#[must_use]
pub const fn charge_status(result: &ChargeResult) -> OrderStatus {
    match (result.approved, result.captured) {
        (true, true) => OrderStatus::Paid,
        (true, false) => OrderStatus::Authorized,
        (false, _) => OrderStatus::Cancelled,
    }
}

fn summarize(order: OrderDocument) -> OrderSummary {
    let status = order.status();
    let total = order.field("total").cloned().unwrap_or(Value::Null);
    let payment = order.field("payment").cloned().unwrap_or(Value::Null);
    OrderSummary {
        order_id: order.id,
        status,
        total,
        payment,
    }
}
