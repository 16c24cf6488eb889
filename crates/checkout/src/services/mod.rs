//! Business logic services.
//!
//! # Services
//!
//! - `pricing` - Server-side cart pricing from the product catalog
//! - `identity` - Bearer token verification
//! - `ledger` - Order document writes and guarded status transitions
//! - `checkout` - Checkout orchestration across pricing, ledger and gateways
//! - `webhook` - PagBank notification reconciliation

pub mod checkout;
pub mod identity;
pub mod ledger;
pub mod pricing;
pub mod webhook;

pub use checkout::{CheckoutError, CheckoutService, CheckoutUrls};
pub use identity::{FirebaseVerifier, IdentityError, IdentityVerifier};
pub use ledger::OrderLedger;
pub use webhook::{WebhookError, WebhookReconciler};
