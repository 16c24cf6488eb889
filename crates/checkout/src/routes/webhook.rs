//! PagBank notification handler.

use axum::{body::Bytes, extract::State, http::HeaderMap};

use crate::services::WebhookError;
use crate::services::webhook::AUTHENTICITY_HEADER;
use crate::state::AppState;

/// Receive a PagBank notification. Reads the raw body: the signature covers
/// the exact bytes sent.
///
/// POST /pagbankWebhook
pub async fn pagbank(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, WebhookError> {
    let token = headers
        .get(AUTHENTICITY_HEADER)
        .and_then(|v| v.to_str().ok());
    state.webhook().handle(token, &body).await?;
    Ok("ok")
}
