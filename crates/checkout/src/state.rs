//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::CheckoutConfig;
use crate::db::orders::PgOrderStore;
use crate::db::products::PgProductCatalog;
use crate::gateway::{GatewayError, PagBankClient, PaymentGateway, RedeClient};
use crate::services::{
    CheckoutService, CheckoutUrls, FirebaseVerifier, IdentityError, OrderLedger,
    WebhookReconciler,
};

/// Error building application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("gateway client error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("identity verifier error: {0}")]
    Identity(#[from] IdentityError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    checkout: CheckoutService,
    webhook: WebhookReconciler,
    ledger: OrderLedger,
    allowed_origins: Vec<String>,
}

impl AppState {
    /// Wire production services from configuration.
    ///
    /// Gateways whose credentials are missing are left out; their endpoints
    /// answer with a configuration error instead of failing startup.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: &CheckoutConfig, pool: PgPool) -> Result<Self, StateError> {
        let ledger = OrderLedger::new(Arc::new(PgOrderStore::new(pool.clone())));
        let catalog = Arc::new(PgProductCatalog::new(pool));
        let identity = Arc::new(FirebaseVerifier::new(&config.firebase_project_id)?);

        let pagbank = PagBankClient::from_config(&config.pagbank)?
            .map(|client| Arc::new(client) as Arc<dyn PaymentGateway>);
        let rede = RedeClient::from_config(&config.rede)?
            .map(|client| Arc::new(client) as Arc<dyn PaymentGateway>);

        if pagbank.is_none() {
            tracing::warn!("PAGBANK_TOKEN not set, hosted checkout disabled");
        }
        if rede.is_none() {
            tracing::warn!("Rede credentials not set, direct charges disabled");
        }

        let checkout = CheckoutService::new(
            catalog,
            ledger.clone(),
            identity,
            CheckoutUrls::new(
                config.store_base_url.clone(),
                config.webhook_base_url.as_deref(),
            ),
        )
        .with_pagbank(pagbank)
        .with_rede(rede);

        let webhook = WebhookReconciler::new(config.pagbank.token.clone(), ledger.clone());

        Ok(Self::from_parts(
            checkout,
            webhook,
            ledger,
            config.allowed_origins.clone(),
        ))
    }

    /// Assemble state from already-built services.
    #[must_use]
    pub fn from_parts(
        checkout: CheckoutService,
        webhook: WebhookReconciler,
        ledger: OrderLedger,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                checkout,
                webhook,
                ledger,
                allowed_origins,
            }),
        }
    }

    /// Get a reference to the checkout orchestrator.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    /// Get a reference to the webhook reconciler.
    #[must_use]
    pub fn webhook(&self) -> &WebhookReconciler {
        &self.inner.webhook
    }

    /// Get a reference to the order ledger.
    #[must_use]
    pub fn ledger(&self) -> &OrderLedger {
        &self.inner.ledger
    }

    /// Origins allowed to call browser-facing endpoints.
    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.inner.allowed_origins
    }
}
