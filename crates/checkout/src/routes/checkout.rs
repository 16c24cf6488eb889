//! Checkout route handlers.

use axum::{Json, body::Bytes, extract::State};

use super::parse_body;
use crate::error::{AppError, Result};
use crate::middleware::BearerToken;
use crate::services::checkout::{ChargeBody, ChargeResponse, CheckoutBody, CheckoutResponse};
use crate::state::AppState;

/// Start a PagBank hosted checkout.
///
/// POST /createPagBankCheckout
pub async fn create_pagbank_checkout(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    body: Bytes,
) -> Result<Json<CheckoutResponse>> {
    let body: CheckoutBody = parse_body(&body)?;
    let response = state
        .checkout()
        .create_pagbank_checkout(token.as_deref(), body)
        .await?;
    Ok(Json(response))
}

/// Charge a card through Rede.
///
/// POST /createRedeCharge
pub async fn create_rede_charge(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    body: Bytes,
) -> Result<Json<ChargeResponse>> {
    let body: ChargeBody = parse_body(&body)?;
    let response = state
        .checkout()
        .create_rede_charge(token.as_deref(), body)
        .await?;
    Ok(Json(response))
}

/// Any other method on a checkout route.
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}
