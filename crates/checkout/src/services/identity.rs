//! Caller identity verification.
//!
//! Checkout requests carry a Firebase ID token (`Authorization: Bearer ...`).
//! Tokens are RS256 JWTs signed by Google's `securetoken` service account;
//! the signing keys are fetched from the public JWKS endpoint and cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use moka::future::Cache;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use makelifebetter_core::UserId;

/// Public signing keys for Firebase ID tokens.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);
const JWKS_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum spacing between key set fetches triggered by unknown key ids.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that can occur while verifying a caller.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No bearer token was sent.
    #[error("Auth token ausente.")]
    MissingToken,

    /// The token failed validation.
    #[error("invalid identity token: {0}")]
    InvalidToken(String),

    /// Signing keys could not be fetched.
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// Verifies bearer tokens.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a raw bearer token and return the caller's identity.
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// Firebase ID token verifier.
#[derive(Clone)]
pub struct FirebaseVerifier {
    http: reqwest::Client,
    jwks_url: String,
    validation: Validation,
    keys: Cache<String, DecodingKey>,
    last_refresh: Arc<Mutex<Option<Instant>>>,
}

impl FirebaseVerifier {
    /// Create a verifier for tokens issued to `project_id`.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::KeysUnavailable` if the HTTP client cannot be built.
    pub fn new(project_id: &str) -> Result<Self, IdentityError> {
        Self::with_jwks_url(project_id, FIREBASE_JWKS_URL)
    }

    /// Create a verifier that fetches keys from `jwks_url`.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::KeysUnavailable` if the HTTP client cannot be built.
    pub fn with_jwks_url(project_id: &str, jwks_url: &str) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(JWKS_TIMEOUT)
            .build()
            .map_err(|e| IdentityError::KeysUnavailable(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{project_id}")]);

        Ok(Self {
            http,
            jwks_url: jwks_url.to_string(),
            validation,
            keys: Cache::builder()
                .max_capacity(32)
                .time_to_live(KEY_CACHE_TTL)
                .build(),
            last_refresh: Arc::new(Mutex::new(None)),
        })
    }

    /// Fetch the key set and cache every RSA key by its `kid`.
    #[instrument(skip(self))]
    async fn refresh_keys(&self) -> Result<(), IdentityError> {
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| IdentityError::KeysUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| IdentityError::KeysUnavailable(e.to_string()))?;

        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => self.keys.insert(kid, key).await,
                Err(e) => warn!(kid = %kid, error = %e, "Skipping unusable signing key"),
            }
        }

        debug!(count = jwks.keys.len(), "Refreshed identity signing keys");
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        if let Some(key) = self.keys.get(kid).await {
            return Ok(key);
        }

        let unknown = || IdentityError::InvalidToken(format!("unknown signing key {kid}"));

        // Google rotates keys; an unknown kid may mean our copy is stale.
        // At most one refresh per MIN_REFRESH_INTERVAL.
        let mut last_refresh = self.last_refresh.lock().await;
        if let Some(key) = self.keys.get(kid).await {
            return Ok(key);
        }
        if last_refresh.is_some_and(|at| at.elapsed() < MIN_REFRESH_INTERVAL) {
            debug!(kid = %kid, "Unknown signing key, refresh skipped");
            return Err(unknown());
        }
        *last_refresh = Some(Instant::now());
        self.refresh_keys().await?;
        drop(last_refresh);

        self.keys.get(kid).await.ok_or_else(unknown)
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::MissingToken);
        }

        let header = decode_header(token).map_err(|e| IdentityError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidToken("missing key id".to_string()))?;

        let key = self.key_for(&kid).await?;
        let claims = decode::<FirebaseClaims>(token, &key, &self.validation)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?
            .claims;

        if claims.sub.is_empty() {
            return Err(IdentityError::InvalidToken("empty subject".to_string()));
        }

        Ok(VerifiedIdentity {
            user_id: UserId::new(claims.sub),
            email: claims.email.filter(|e| !e.is_empty()),
        })
    }
}

/// Verifier that accepts a fixed set of tokens.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityVerifier {
    identities: std::collections::HashMap<String, VerifiedIdentity>,
}

#[cfg(any(test, feature = "test-util"))]
impl StaticIdentityVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as the given user.
    #[must_use]
    pub fn with_user(mut self, token: &str, user_id: &str, email: Option<&str>) -> Self {
        self.identities.insert(
            token.to_string(),
            VerifiedIdentity {
                user_id: UserId::new(user_id),
                email: email.map(String::from),
            },
        );
        self
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        if token.trim().is_empty() {
            return Err(IdentityError::MissingToken);
        }
        self.identities
            .get(token)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidToken("unknown token".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn hs256_token(kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(String::from);
        encode(
            &header,
            &json!({"sub": "u1", "aud": "proj", "iss": "https://securetoken.google.com/proj", "exp": 4_102_444_800_u64}),
            &EncodingKey::from_secret(b"not-a-google-key"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rejects_blank_and_malformed_tokens() {
        let verifier = FirebaseVerifier::new("proj").unwrap();
        assert!(matches!(
            verifier.verify("  ").await,
            Err(IdentityError::MissingToken)
        ));
        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_symmetric_algorithms() {
        let verifier = FirebaseVerifier::new("proj").unwrap();
        let err = verifier.verify(&hs256_token(Some("k1"))).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken(msg) if msg.contains("algorithm")));
    }

    #[tokio::test]
    async fn test_unknown_key_after_refresh_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = FirebaseVerifier::with_jwks_url("proj", &server.uri()).unwrap();
        let err = verifier.key_for("missing").await.err().unwrap();
        assert!(matches!(err, IdentityError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_unknown_keys_do_not_refetch_each_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = FirebaseVerifier::with_jwks_url("proj", &server.uri()).unwrap();
        for kid in ["forged-1", "forged-2", "forged-3"] {
            let err = verifier.key_for(kid).await.err().unwrap();
            assert!(matches!(err, IdentityError::InvalidToken(msg) if msg.contains(kid)));
        }
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticIdentityVerifier::new().with_user("tok", "u1", Some("a@b.c"));
        let identity = verifier.verify("tok").await.unwrap();
        assert_eq!(identity.user_id.as_str(), "u1");
        assert!(verifier.verify("other").await.is_err());
    }
}
