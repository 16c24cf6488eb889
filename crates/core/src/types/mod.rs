//! Core types for the store.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod shipping;
pub mod status;

pub use id::*;
pub use money::Cents;
pub use shipping::{ShippingOption, ShippingType};
pub use status::*;
