//! Access token cache for client-credentials gateways.
//!
//! Tokens live only in process memory and are never shared across instances.
//! A cached token is handed out only while more than [`EXPIRY_MARGIN_SECS`]
//! remain before it expires. Refreshes are single-flight: concurrent callers
//! that find the cache empty wait for one fetch instead of each fetching.

use std::future::Future;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock};

/// Seconds before expiry at which a token stops being handed out.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// A bearer token with its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: SecretString,
    /// Unix timestamp when the token expires.
    expires_at: i64,
}

impl AccessToken {
    /// Create a token that expires `expires_in` seconds from now.
    #[must_use]
    pub fn new(value: impl Into<String>, expires_in: i64) -> Self {
        Self::expiring_at(
            value,
            chrono::Utc::now().timestamp().saturating_add(expires_in),
        )
    }

    /// Create a token with an absolute expiry.
    #[must_use]
    pub fn expiring_at(value: impl Into<String>, expires_at: i64) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
        }
    }

    /// Whether the token can still be used.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        now < self.expires_at.saturating_sub(EXPIRY_MARGIN_SECS)
    }

    /// The raw token value, for building an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Unix timestamp when the token expires.
    #[must_use]
    pub const fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// In-memory token cache with single-flight refresh.
#[derive(Debug, Default)]
pub struct TokenCache {
    token: RwLock<Option<AccessToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, if it is still usable.
    pub async fn get(&self) -> Option<AccessToken> {
        self.token
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_usable())
            .cloned()
    }

    /// Replace the cached token.
    pub async fn set(&self, token: AccessToken) {
        *self.token.write().await = Some(token);
    }

    /// Drop the cached token.
    pub async fn clear(&self) {
        *self.token.write().await = None;
    }

    /// Return the cached token or fetch a new one.
    ///
    /// Only one fetch runs at a time. Callers that queued behind it reuse the
    /// token it stored.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fetch` returns. The cache is left unchanged.
    pub async fn get_or_refresh<F, Fut, E>(&self, fetch: F) -> Result<AccessToken, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, E>>,
    {
        if let Some(token) = self.get().await {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        if let Some(token) = self.get().await {
            return Ok(token);
        }

        let token = fetch().await?;
        self.set(token.clone()).await;
        Ok(token)
    }
}
