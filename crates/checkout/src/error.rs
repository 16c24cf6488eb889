//! Unified error handling with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`. Server-side failures are
//! captured to Sentry before responding; clients only ever see a short
//! `{message}` body.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::checkout::CheckoutError;
use crate::services::{IdentityError, WebhookError};
use crate::services::pricing::PricingError;

/// Generic message for unexpected checkout failures.
pub const CHECKOUT_FAILED_MESSAGE: &str = "Erro ao iniciar pagamento.";

/// Message for gateway failures.
pub const GATEWAY_FAILED_MESSAGE: &str = "Falha ao iniciar o checkout.";

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Checkout failed.
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// The request body could not be read.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The HTTP method is not allowed on this route.
    #[error("Metodo nao permitido.")]
    MethodNotAllowed,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Checkout(err) => match err {
                CheckoutError::Unauthenticated(_)
                | CheckoutError::Pricing(
                    PricingError::EmptyCart
                    | PricingError::InvalidProduct
                    | PricingError::ProductNotFound(_)
                    | PricingError::ProductUnavailable(_)
                    | PricingError::InvalidPrice(_),
                )
                | CheckoutError::IncompleteCardData(_) => StatusCode::BAD_REQUEST,
                CheckoutError::GatewayAuthFailed(_) | CheckoutError::GatewayRejected(_) => {
                    StatusCode::BAD_GATEWAY
                }
                CheckoutError::Declined(_) => StatusCode::PAYMENT_REQUIRED,
                CheckoutError::OrderNotFound => StatusCode::NOT_FOUND,
                CheckoutError::Misconfigured(_)
                | CheckoutError::Pricing(PricingError::Repository(_))
                | CheckoutError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Message shown to the client.
    fn client_message(&self) -> String {
        match self {
            Self::Checkout(err) => match err {
                CheckoutError::Unauthenticated(err @ IdentityError::MissingToken) => err.to_string(),
                // Token validation detail stays in the logs.
                CheckoutError::Unauthenticated(_)
                | CheckoutError::Pricing(PricingError::Repository(_))
                | CheckoutError::Repository(_) => CHECKOUT_FAILED_MESSAGE.to_string(),
                CheckoutError::GatewayAuthFailed(_) | CheckoutError::GatewayRejected(_) => {
                    GATEWAY_FAILED_MESSAGE.to_string()
                }
                CheckoutError::OrderNotFound => "Pedido nao encontrado.".to_string(),
                other => other.to_string(),
            },
            Self::BadRequest(message) => message.clone(),
            Self::MethodNotAllowed => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, %status, "Request rejected");
        }

        // A declined charge still reports its details.
        if let Self::Checkout(CheckoutError::Declined(charge)) = self {
            return (status, Json(*charge)).into_response();
        }

        let mut response = (status, Json(json!({"message": self.client_message()}))).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}

impl IntoResponse for WebhookError {
    /// Notification responses are plain text.
    fn into_response(self) -> Response {
        match self {
            Self::MissingSecret => {
                tracing::error!("PAGBANK_TOKEN not configured, rejecting notification");
                (StatusCode::INTERNAL_SERVER_ERROR, "Missing token").into_response()
            }
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            Self::Repository(_) => {
                let event_id = sentry::capture_error(&self);
                tracing::error!(
                    error = %self,
                    sentry_event_id = %event_id,
                    "Notification error"
                );
                (StatusCode::INTERNAL_SERVER_ERROR, "error").into_response()
            }
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}
