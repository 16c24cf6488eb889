//! Make Life Better checkout service library.
//!
//! Prices carts from the product catalog, records orders, drives the PagBank
//! and Rede payment gateways, and reconciles PagBank notifications. The
//! binary in `main.rs` only wires configuration, telemetry and the server.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
