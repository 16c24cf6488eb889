//! PagBank hosted checkout adapter.
//!
//! Creates a checkout session with `POST {base}/checkouts` and hands back the
//! pay link. Status changes arrive later through the webhook, authenticated
//! with [`verify_authenticity`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use makelifebetter_core::PaymentProvider;

use super::{
    CheckoutRequest, CheckoutSession, GatewayError, GatewayOutcome, GatewayRequest,
    PaymentGateway, http_client, response_body,
};
use crate::config::PagBankConfig;

/// Reference used for the synthetic shipping line item.
const SHIPPING_REFERENCE: &str = "shipping";

/// PagBank API client.
#[derive(Clone)]
pub struct PagBankClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl std::fmt::Debug for PagBankClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagBankClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CheckoutPayload<'a> {
    reference_id: &'a str,
    items: Vec<CheckoutItem>,
    redirect_url: &'a str,
    return_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<CustomerPayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_urls: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_notification_urls: Option<Vec<&'a str>>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct CheckoutItem {
    reference_id: String,
    name: String,
    quantity: u32,
    /// Amount in cents.
    unit_amount: i64,
}

#[derive(Debug, Serialize)]
struct CustomerPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    links: Option<Value>,
}

impl PagBankClient {
    /// Create a client from configuration.
    ///
    /// Returns `Ok(None)` if no API token is configured.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Transport` if the HTTP client cannot be built.
    pub fn from_config(config: &PagBankConfig) -> Result<Option<Self>, GatewayError> {
        config
            .token
            .clone()
            .map(|token| Self::new(config.environment.pagbank_base_url(), token))
            .transpose()
    }

    /// Create a client against an explicit base URL.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Result<Self, GatewayError> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Create a hosted checkout session.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Rejected` with the raw body on a non-success
    /// status and `GatewayError::Transport` if the request fails.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, GatewayError> {
        let payload = build_payload(request);

        let response = self
            .http
            .post(format!("{}/checkouts", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response_body(response).await;

        if !status.is_success() {
            warn!(status = status.as_u16(), "PagBank rejected checkout");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // A success body we cannot read still created a checkout upstream.
        let parsed: CheckoutResponse = serde_json::from_value(body).unwrap_or_default();
        let links = parsed.links.unwrap_or_else(|| Value::Array(Vec::new()));
        let pay_link = resolve_pay_link(&links);
        debug!(checkout_id = ?parsed.id, has_pay_link = pay_link.is_some(), "Created PagBank checkout");

        Ok(CheckoutSession {
            checkout_id: parsed.id,
            pay_link,
            links,
            status: parsed.status,
        })
    }
}

#[async_trait]
impl PaymentGateway for PagBankClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::PagBank
    }

    async fn submit(&self, request: GatewayRequest<'_>) -> Result<GatewayOutcome, GatewayError> {
        match request {
            GatewayRequest::Checkout(checkout) => self
                .create_checkout(&checkout)
                .await
                .map(GatewayOutcome::Checkout),
            GatewayRequest::Charge(_) => Err(GatewayError::UnsupportedRequest(self.provider())),
        }
    }
}

fn build_payload<'a>(request: &'a CheckoutRequest<'a>) -> CheckoutPayload<'a> {
    let mut items: Vec<CheckoutItem> = request
        .items
        .iter()
        .map(|item| CheckoutItem {
            reference_id: item.product_id.to_string(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_amount: item.unit_amount.get(),
        })
        .collect();

    if request.shipping.price.is_positive() {
        items.push(CheckoutItem {
            reference_id: SHIPPING_REFERENCE.to_string(),
            name: format!("Frete ({})", request.shipping.label),
            quantity: 1,
            unit_amount: request.shipping.price.get(),
        });
    }

    let customer = &request.customer;
    let customer = (customer.name.is_some() || customer.email.is_some()).then(|| CustomerPayload {
        name: customer.name.as_deref(),
        email: customer.email.as_deref(),
    });

    let notify = request.notification_url.as_deref().map(|url| vec![url]);

    CheckoutPayload {
        reference_id: request.order_id.as_str(),
        items,
        redirect_url: &request.return_url,
        return_url: &request.return_url,
        customer,
        notification_urls: notify.clone(),
        payment_notification_urls: notify,
    }
}

/// Find the link the buyer should follow to pay.
///
/// Picks the first entry whose `rel` is `pay`, ignoring case.
#[must_use]
pub fn resolve_pay_link(links: &Value) -> Option<String> {
    links.as_array()?.iter().find_map(|link| {
        let rel = link.get("rel").and_then(Value::as_str)?;
        if rel.eq_ignore_ascii_case("pay") {
            link.get("href").and_then(Value::as_str).map(String::from)
        } else {
            None
        }
    })
}

/// Expected `x-authenticity-token` for a notification body.
#[must_use]
pub fn authenticity_token(secret: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"-");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Check a notification's `x-authenticity-token` against its raw body.
#[must_use]
pub fn verify_authenticity(secret: &str, body: &[u8], provided: &str) -> bool {
    constant_time_compare(&authenticity_token(secret, body), provided)
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use makelifebetter_core::{Cents, OrderId, ProductId, ShippingOption};

    use super::*;
    use crate::gateway::Customer;
    use crate::services::pricing::PricedLineItem;

    fn items() -> Vec<PricedLineItem> {
        vec![PricedLineItem {
            product_id: ProductId::new("p1"),
            name: "Vela".to_string(),
            unit_amount: Cents::new(800),
            quantity: 2,
        }]
    }

    fn request<'a>(order_id: &'a OrderId, items: &'a [PricedLineItem]) -> CheckoutRequest<'a> {
        CheckoutRequest {
            order_id,
            items,
            shipping: ShippingOption::lookup(Some("express")),
            customer: Customer {
                name: Some("Ana".to_string()),
                email: Some("ana@example.com".to_string()),
            },
            return_url: "https://loja.example/store.html?order_id=o1".to_string(),
            notification_url: Some("https://fn.example/pagbankWebhook".to_string()),
        }
    }

    #[test]
    fn test_payload_adds_shipping_line() {
        let order_id = OrderId::new("o1");
        let items = items();
        let request = request(&order_id, &items);
        let payload = serde_json::to_value(build_payload(&request)).unwrap();

        assert_eq!(payload["reference_id"], "o1");
        assert_eq!(payload["items"][0]["unit_amount"], 800);
        assert_eq!(payload["items"][0]["quantity"], 2);
        assert_eq!(payload["items"][1]["reference_id"], "shipping");
        assert_eq!(payload["items"][1]["name"], "Frete (Expresso)");
        assert_eq!(payload["items"][1]["unit_amount"], 2990);
        assert_eq!(payload["redirect_url"], payload["return_url"]);
        assert_eq!(payload["customer"]["email"], "ana@example.com");
        assert_eq!(
            payload["notification_urls"],
            json!(["https://fn.example/pagbankWebhook"])
        );
        assert_eq!(payload["payment_notification_urls"], payload["notification_urls"]);
    }

    #[test]
    fn test_payload_omits_unknown_blocks() {
        let order_id = OrderId::new("o1");
        let items = items();
        let mut request = request(&order_id, &items);
        request.customer = Customer::default();
        request.notification_url = None;

        let payload = serde_json::to_value(build_payload(&request)).unwrap();
        assert!(payload.get("customer").is_none());
        assert!(payload.get("notification_urls").is_none());
        assert!(payload.get("payment_notification_urls").is_none());
    }

    #[test]
    fn test_resolve_pay_link() {
        let links = json!([
            {"rel": "SELF", "href": "https://x/self"},
            {"rel": "PAY", "href": "https://x/pay"},
            {"rel": "pay", "href": "https://x/second"}
        ]);
        assert_eq!(resolve_pay_link(&links).as_deref(), Some("https://x/pay"));
        assert_eq!(resolve_pay_link(&json!([{"rel": "self"}])), None);
        assert_eq!(resolve_pay_link(&json!({"rel": "pay"})), None);
    }

    #[test]
    fn test_authenticity_token_detects_single_byte_change() {
        let body = br#"{"reference_id":"o1","status":"PAID"}"#;
        let token = authenticity_token("secret-token", body);
        assert_eq!(token.len(), 64);
        assert!(verify_authenticity("secret-token", body, &token));

        for i in 0..body.len() {
            let mut tampered = body.to_vec();
            tampered[i] ^= 0x01;
            assert!(!verify_authenticity("secret-token", &tampered, &token));
        }
        assert!(!verify_authenticity("other-token", body, &token));
        assert!(!verify_authenticity("secret-token", body, ""));
    }

    #[tokio::test]
    async fn test_create_checkout_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkouts"))
            .and(header("authorization", "Bearer pb-token"))
            .and(body_partial_json(json!({"reference_id": "o1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "CHEC_123",
                "status": "ACTIVE",
                "links": [{"rel": "PAY", "href": "https://pay.example/CHEC_123"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = PagBankClient::new(server.uri(), SecretString::from("pb-token")).unwrap();
        let order_id = OrderId::new("o1");
        let items = items();
        let session = client
            .create_checkout(&request(&order_id, &items))
            .await
            .unwrap();

        assert_eq!(session.checkout_id.as_deref(), Some("CHEC_123"));
        assert_eq!(session.pay_link.as_deref(), Some("https://pay.example/CHEC_123"));
        assert_eq!(session.status.as_deref(), Some("ACTIVE"));
    }

    #[tokio::test]
    async fn test_create_checkout_rejected_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkouts"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})),
            )
            .mount(&server)
            .await;

        let client = PagBankClient::new(server.uri(), SecretString::from("pb-token")).unwrap();
        let order_id = OrderId::new("o1");
        let items = items();
        let err = client
            .submit(GatewayRequest::Checkout(request(&order_id, &items)))
            .await
            .unwrap_err();

        match err {
            GatewayError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body["error"], "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
