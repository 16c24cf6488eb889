//! Checkout service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `FIREBASE_PROJECT_ID` - Identity project used to validate ID tokens
//!   (falls back to `GCLOUD_PROJECT` / `GCP_PROJECT`)
//!
//! ## Optional
//! - `CHECKOUT_HOST` - Bind address (default: 127.0.0.1)
//! - `CHECKOUT_PORT` - Listen port (default: 3000)
//! - `STORE_BASE_URL` - Public storefront URL, used for redirect/return URLs
//! - `ALLOWED_ORIGINS` - Comma-separated CORS origins (default: `STORE_BASE_URL`)
//! - `FUNCTIONS_BASE_URL` - Public base URL of this service, used for webhook callbacks
//! - `FUNCTIONS_REGION` - Deployment region used to derive the base URL (default: us-central1)
//! - `PAGBANK_ENV` - `sandbox` or `production` (default: sandbox)
//! - `PAGBANK_TOKEN` - PagBank API token, also the webhook shared secret
//! - `REDE_ENV` - `sandbox` or `production` (default: sandbox)
//! - `REDE_CLIENT_ID` / `REDE_CLIENT_SECRET` - Rede OAuth client credentials
//! - `REDE_SOFT_DESCRIPTOR` - Statement descriptor (truncated to 13 characters)
//! - `REDE_API_URL` / `REDE_TOKEN_URL` - Override the Rede endpoints
//! - `SENTRY_DSN` / `SENTRY_ENVIRONMENT` - Sentry error tracking
//! - `LOG_FORMAT` - `json` for structured logs (default: human-readable)
//!
//! Missing gateway credentials do not prevent startup. The affected checkout
//! endpoint answers with a configuration error instead.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;
use thiserror::Error;

use crate::gateway::GatewayEnvironment;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_REGION: &str = "us-central1";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Checkout service configuration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public storefront URL (no trailing slash)
    pub store_base_url: Option<String>,
    /// Origins allowed to call the checkout endpoints from a browser
    pub allowed_origins: Vec<String>,
    /// Public base URL of this service, if it could be resolved
    pub webhook_base_url: Option<String>,
    /// Project whose ID tokens are accepted
    pub firebase_project_id: String,
    /// PagBank configuration
    pub pagbank: PagBankConfig,
    /// Rede configuration
    pub rede: RedeConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
    /// Log output format
    pub log_format: LogFormat,
}

/// PagBank hosted checkout configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PagBankConfig {
    pub environment: GatewayEnvironment,
    /// API token. Doubles as the webhook authenticity secret.
    pub token: Option<SecretString>,
}

impl std::fmt::Debug for PagBankConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagBankConfig")
            .field("environment", &self.environment)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Rede direct-charge configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct RedeConfig {
    pub environment: GatewayEnvironment,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub soft_descriptor: Option<String>,
    /// Transactions API base URL
    pub api_url: String,
    /// OAuth token endpoint
    pub token_url: String,
}

impl std::fmt::Debug for RedeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedeConfig")
            .field("environment", &self.environment)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("soft_descriptor", &self.soft_descriptor)
            .field("api_url", &self.api_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl CheckoutConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CHECKOUT_DATABASE_URL")?;
        let host = get_env_or_default("CHECKOUT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("CHECKOUT_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("CHECKOUT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("CHECKOUT_PORT".to_string(), e.to_string()))?;

        let store_base_url = get_optional_env("STORE_BASE_URL")
            .map(|url| validate_base_url("STORE_BASE_URL", &url))
            .transpose()?;
        let allowed_origins = parse_allowed_origins(
            get_optional_env("ALLOWED_ORIGINS")
                .as_deref()
                .or(store_base_url.as_deref()),
        );

        let project = get_optional_env("GCLOUD_PROJECT").or_else(|| get_optional_env("GCP_PROJECT"));
        let webhook_base_url = resolve_webhook_base_url(
            get_optional_env("FUNCTIONS_BASE_URL"),
            &get_env_or_default("FUNCTIONS_REGION", DEFAULT_REGION),
            project.as_deref(),
        );
        let firebase_project_id = get_optional_env("FIREBASE_PROJECT_ID")
            .or(project)
            .ok_or_else(|| ConfigError::MissingEnvVar("FIREBASE_PROJECT_ID".to_string()))?;

        let log_format = match get_optional_env("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            database_url,
            host,
            port,
            store_base_url,
            allowed_origins,
            webhook_base_url,
            firebase_project_id,
            pagbank: PagBankConfig::from_env()?,
            rede: RedeConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            log_format,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl PagBankConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: GatewayEnvironment::parse(get_optional_env("PAGBANK_ENV").as_deref()),
            token: get_optional_validated_secret("PAGBANK_TOKEN")?,
        })
    }
}

impl RedeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let environment = GatewayEnvironment::parse(get_optional_env("REDE_ENV").as_deref());
        Ok(Self {
            environment,
            client_id: get_optional_env("REDE_CLIENT_ID"),
            client_secret: get_optional_validated_secret("REDE_CLIENT_SECRET")?,
            soft_descriptor: get_optional_env("REDE_SOFT_DESCRIPTOR"),
            api_url: get_optional_env("REDE_API_URL")
                .unwrap_or_else(|| environment.rede_api_url().to_string()),
            token_url: get_optional_env("REDE_TOKEN_URL")
                .unwrap_or_else(|| environment.rede_token_url().to_string()),
        })
    }
}

/// Split a comma-separated origin list, dropping blanks.
#[must_use]
pub fn parse_allowed_origins(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| origin.trim_end_matches('/').to_string())
        .collect()
}

/// Resolve the public base URL used to build webhook callback URLs.
///
/// An explicit base URL wins. Otherwise the Cloud Functions URL is derived
/// from region and project. Returns `None` when neither is available, in
/// which case checkouts are created without notification URLs.
#[must_use]
pub fn resolve_webhook_base_url(
    explicit: Option<String>,
    region: &str,
    project: Option<&str>,
) -> Option<String> {
    if let Some(url) = explicit.filter(|url| !url.trim().is_empty()) {
        return Some(url.trim().trim_end_matches('/').to_string());
    }
    project
        .filter(|p| !p.is_empty())
        .map(|project| format!("https://{region}-{project}.cloudfunctions.net"))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    get_required_env("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional, non-blank environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Validate that a URL parses and strip any trailing slash.
fn validate_base_url(var_name: &str, value: &str) -> Result<String, ConfigError> {
    url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;
    Ok(value.trim_end_matches('/').to_string())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the credential issued by the provider."
            ),
        ));
    }

    Ok(())
}

/// Load and validate an optional secret from environment.
fn get_optional_validated_secret(key: &str) -> Result<Option<SecretString>, ConfigError> {
    get_optional_env(key)
        .map(|value| {
            validate_secret_strength(&value, key)?;
            Ok(SecretString::from(value))
        })
        .transpose()
}
