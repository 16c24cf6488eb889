//! Order status route handler.

use axum::{
    Json,
    extract::{Path, State},
};

use makelifebetter_core::OrderId;

use crate::error::Result;
use crate::middleware::BearerToken;
use crate::services::checkout::OrderSummary;
use crate::state::AppState;

/// Order status for its owner. Used by the storefront after the buyer
/// returns from the hosted checkout.
///
/// GET /orders/{orderId}
pub async fn show(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Path(order_id): Path<String>,
) -> Result<Json<OrderSummary>> {
    let summary = state
        .checkout()
        .order_summary(token.as_deref(), &OrderId::new(order_id))
        .await?;
    Ok(Json(summary))
}
