//! Make Life Better Core - Shared types library.
//!
//! This crate provides common types used across all store components:
//! - `checkout` - Checkout, payment gateway and webhook service
//! - `cli` - Command-line tools for migrations and order inspection
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, money, order statuses and shipping

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
