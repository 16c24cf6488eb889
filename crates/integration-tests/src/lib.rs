//! Integration tests for the Make Life Better checkout service.
//!
//! # Running Tests
//!
//! ```bash
//! # Router tests (in-memory stores, mocked gateways)
//! cargo test -p makelifebetter-integration-tests
//!
//! # Including PostgreSQL store tests
//! CHECKOUT_DATABASE_URL=postgres://... cargo test -p makelifebetter-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `checkout_flow` - Checkout and charge endpoints end to end
//! - `webhook_flow` - PagBank notifications
//! - `http_surface` - Methods, CORS, health and order status
//! - `postgres_store` - `PostgreSQL` order store (ignored by default)
//!
//! [`TestApp`] builds the real router over in-memory stores, a static
//! identity verifier and gateway clients pointed at `wiremock` servers.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;
use wiremock::MockServer;

use makelifebetter_checkout::db::OrderStore;
use makelifebetter_checkout::db::memory::{MemoryCatalog, MemoryOrderStore};
use makelifebetter_checkout::gateway::{PagBankClient, PaymentGateway, RedeClient};
use makelifebetter_checkout::models::order::OrderDocument;
use makelifebetter_checkout::models::product::Product;
use makelifebetter_checkout::routes;
use makelifebetter_checkout::services::identity::StaticIdentityVerifier;
use makelifebetter_checkout::services::{
    CheckoutService, CheckoutUrls, OrderLedger, WebhookReconciler,
};
use makelifebetter_checkout::state::AppState;
use makelifebetter_core::{OrderId, OrderStatus};

/// Bearer token accepted as [`USER_ID`].
pub const USER_TOKEN: &str = "token-ana";
/// Owner of orders created with [`USER_TOKEN`].
pub const USER_ID: &str = "user-ana";
/// Bearer token accepted as a different user.
pub const OTHER_TOKEN: &str = "token-bruno";
/// PagBank API token, also the webhook secret.
pub const PAGBANK_TOKEN: &str = "pagbank-integration-token";
/// Storefront URL used for return links.
pub const STORE_BASE_URL: &str = "https://loja.example.com.br";
/// Public base URL of the service.
pub const SERVICE_BASE_URL: &str = "https://fn.example.com.br";

/// Catalog used by every test.
///
/// - `p1`: R$ 10,00, on sale for R$ 8,00
/// - `p2`: R$ 25,50
/// - `p-inactive`: disabled
/// - `p-free`: no price
#[must_use]
pub fn catalog() -> MemoryCatalog {
    MemoryCatalog::new()
        .with_product(
            "p1",
            Product {
                name: Some("Vela aromatica".to_string()),
                price: Some(Decimal::new(1000, 2)),
                promotional_price: Some(Decimal::new(800, 2)),
                active: Some(true),
                stock: Some(10),
            },
        )
        .with_product(
            "p2",
            Product {
                name: Some("Difusor".to_string()),
                price: Some(Decimal::new(2550, 2)),
                ..Product::default()
            },
        )
        .with_product(
            "p-inactive",
            Product {
                name: Some("Fora de linha".to_string()),
                price: Some(Decimal::new(1000, 2)),
                active: Some(false),
                ..Product::default()
            },
        )
        .with_product(
            "p-free",
            Product {
                name: Some("Brinde".to_string()),
                ..Product::default()
            },
        )
}

/// Which gateways a [`TestApp`] has configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gateways {
    Configured,
    Unconfigured,
}

/// The checkout router wired to in-memory stores and mock gateways.
pub struct TestApp {
    pub router: Router,
    pub orders: Arc<MemoryOrderStore>,
    /// Mock PagBank API.
    pub pagbank: MockServer,
    /// Mock Rede API, serving both the token endpoint and transactions.
    pub rede: MockServer,
}

impl TestApp {
    /// Spawn an app with both gateways configured.
    ///
    /// # Panics
    ///
    /// Panics if a gateway client cannot be built.
    pub async fn spawn() -> Self {
        Self::with_gateways(Gateways::Configured).await
    }

    /// Spawn an app, optionally without gateway credentials.
    ///
    /// # Panics
    ///
    /// Panics if a gateway client cannot be built.
    #[allow(clippy::expect_used)]
    pub async fn with_gateways(gateways: Gateways) -> Self {
        let pagbank = MockServer::start().await;
        let rede = MockServer::start().await;

        let orders = Arc::new(MemoryOrderStore::new());
        let ledger = OrderLedger::new(orders.clone());
        let identity = StaticIdentityVerifier::new()
            .with_user(USER_TOKEN, USER_ID, Some("ana@example.com"))
            .with_user(OTHER_TOKEN, "user-bruno", None);

        let mut checkout = CheckoutService::new(
            Arc::new(catalog()),
            ledger.clone(),
            Arc::new(identity),
            CheckoutUrls::new(Some(STORE_BASE_URL.to_string()), Some(SERVICE_BASE_URL)),
        );
        let mut secret = None;

        if gateways == Gateways::Configured {
            let pagbank_client =
                PagBankClient::new(pagbank.uri(), SecretString::from(PAGBANK_TOKEN))
                    .expect("pagbank client");
            let rede_client = RedeClient::new(
                rede.uri(),
                format!("{}/oauth2/token", rede.uri()),
                "rede-client",
                SecretString::from("rede-secret"),
            )
            .expect("rede client")
            .with_soft_descriptor(Some("MAKELIFEBETTER STORE"));

            checkout = checkout
                .with_pagbank(Some(Arc::new(pagbank_client) as Arc<dyn PaymentGateway>))
                .with_rede(Some(Arc::new(rede_client) as Arc<dyn PaymentGateway>));
            secret = Some(SecretString::from(PAGBANK_TOKEN));
        }

        let webhook = WebhookReconciler::new(secret, ledger.clone());
        let state = AppState::from_parts(
            checkout,
            webhook,
            ledger,
            vec![STORE_BASE_URL.to_string()],
        );

        Self {
            router: routes::router(state, None),
            orders,
            pagbank,
            rede,
        }
    }

    /// Send a request through the router.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built or the body cannot be read.
    #[allow(clippy::expect_used)]
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send a JSON request, with an optional bearer token.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built.
    #[allow(clippy::expect_used)]
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("request")).await
    }

    /// POST a JSON body as the default user.
    pub async fn post(&self, uri: &str, body: &Value) -> TestResponse {
        self.json(Method::POST, uri, Some(USER_TOKEN), Some(body)).await
    }

    /// POST a raw notification body with an optional authenticity token.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built.
    #[allow(clippy::expect_used)]
    pub async fn notify(&self, body: &[u8], token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/pagbankWebhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header("x-authenticity-token", token);
        }
        self.send(builder.body(Body::from(body.to_vec())).expect("request"))
            .await
    }

    /// Orders currently in `status`, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the in-memory store fails, which it does not.
    #[allow(clippy::expect_used)]
    pub async fn orders_with_status(&self, status: OrderStatus) -> Vec<OrderDocument> {
        self.orders
            .list_by_status(status, Utc::now() + Duration::days(1))
            .await
            .expect("memory store")
    }

    /// Snapshot of an order document.
    pub async fn order(&self, id: &str) -> Option<Value> {
        self.orders
            .document(&OrderId::new(id))
            .await
    }
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    /// Body parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the body is not JSON.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }

    /// Body as text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
