//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness check
//! GET  /health/ready           - Readiness check (database)
//!
//! # Checkout (CORS, rate limited)
//! POST /createPagBankCheckout  - Start a PagBank hosted checkout
//! POST /createRedeCharge       - Charge a card through Rede
//!
//! # Orders (CORS)
//! GET  /orders/{orderId}       - Order status for its owner
//!
//! # Notifications
//! POST /pagbankWebhook         - PagBank status notifications
//! ```

pub mod checkout;
pub mod health;
pub mod orders;
pub mod webhook;

use axum::{
    Router,
    body::Bytes,
    extract::Request,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, CHECKOUT_FAILED_MESSAGE};
use crate::middleware::{RateLimiterLayer, request_id_middleware};
use crate::state::AppState;

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/createPagBankCheckout",
            post(checkout::create_pagbank_checkout).fallback(checkout::method_not_allowed),
        )
        .route(
            "/createRedeCharge",
            post(checkout::create_rede_charge).fallback(checkout::method_not_allowed),
        )
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new().route("/orders/{order_id}", get(orders::show))
}

/// Create the notification routes router.
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/pagbankWebhook", post(webhook::pagbank))
}

/// Create the health routes router.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
}

/// Build the complete application router.
///
/// Sentry layers are added by the binary so tests can run without a client.
pub fn router(state: AppState, rate_limiter: Option<RateLimiterLayer>) -> Router {
    let mut checkout = checkout_routes();
    if let Some(layer) = rate_limiter {
        checkout = checkout.layer(layer);
    }

    let browser = checkout
        .merge(order_routes())
        .layer(cors_layer(state.allowed_origins()));

    Router::new()
        .merge(browser)
        .merge(webhook_routes())
        .merge(health_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = tracing::field::Empty,
            )
        }))
}

/// CORS policy for browser-facing routes.
///
/// An empty origin list allows any origin.
#[must_use]
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Parse a JSON request body. An empty body reads as the default value.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "Unreadable request body");
        AppError::BadRequest(CHECKOUT_FAILED_MESSAGE.to_string())
    })
}
