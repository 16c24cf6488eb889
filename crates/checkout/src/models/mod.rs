//! Domain models for checkout.
//!
//! Products are read from the catalog as documents; orders are written as
//! documents whose field names match what the storefront and admin panel read.

pub mod order;
pub mod product;
