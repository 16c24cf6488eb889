//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! mlb-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (fallback `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Checkout migrations live in `crates/checkout/migrations/` and are embedded
//! in the checkout crate at build time.

use makelifebetter_checkout::db::MIGRATOR;

use super::{CommandError, connect};

/// Run checkout database migrations.
///
/// # Errors
///
/// Returns `CommandError` if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let pool = connect().await?;

    tracing::info!("Running checkout migrations...");
    MIGRATOR.run(&pool).await?;

    tracing::info!("Checkout migrations complete!");
    Ok(())
}
