//! HTTP middleware stack.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. CORS (checkout and order routes only)
//! 5. Rate limiting (checkout routes only)

pub mod auth;
pub mod rate_limit;
pub mod request_id;

pub use auth::BearerToken;
pub use rate_limit::{RateLimiterLayer, checkout_rate_limiter};
pub use request_id::request_id_middleware;
