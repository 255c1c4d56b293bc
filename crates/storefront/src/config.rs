//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SOLTAN_GATEWAY_URL` - Base URL of the remote data service
//! - `SOLTAN_GATEWAY_KEY` - Public API key for the remote data service (high entropy)
//!
//! ## Optional
//! - `SOLTAN_STORAGE_DIR` - Directory for durable local state (default: .soltan)
//! - `SOLTAN_POLL_INTERVAL_MS` - Change feed polling interval (default: 2000)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

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

/// Storefront configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Remote data service connection
    pub gateway: GatewayConfig,
    /// Directory holding durable local state
    pub storage_dir: PathBuf,
    /// Timeouts and intervals of the synchronizers
    pub timings: SyncTimings,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Remote data service connection settings.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Base URL (e.g., <https://abc.supabase.co/>)
    pub url: Url,
    /// Public API key sent with every request
    pub api_key: SecretString,
    /// Change feed polling interval
    pub poll_interval: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Timeouts and intervals used by the synchronizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    /// Upper bound on a full admin resolution
    pub watchdog: Duration,
    /// Bound on the session fetch
    pub session_timeout: Duration,
    /// Bound on the allow-list lookup
    pub allowlist_timeout: Duration,
    /// Quiet period before re-checking privilege after a sign-in
    pub signin_debounce: Duration,
    /// How long a toast stays visible
    pub toast_ttl: Duration,
    /// Refresh interval of the admin session marker
    pub marker_heartbeat: Duration,
    /// Maximum number of orders fetched into the feed
    pub order_limit: usize,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(5),
            session_timeout: Duration::from_secs(3),
            allowlist_timeout: Duration::from_secs(2),
            signin_debounce: Duration::from_millis(500),
            toast_ttl: Duration::from_secs(3),
            marker_heartbeat: Duration::from_secs(60),
            order_limit: 100,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let gateway = GatewayConfig::from_env()?;
        let storage_dir = PathBuf::from(get_env_or_default("SOLTAN_STORAGE_DIR", ".soltan"));
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            gateway,
            storage_dir,
            timings: SyncTimings::default(),
            sentry_dsn,
        })
    }
}

impl GatewayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = parse_base_url("SOLTAN_GATEWAY_URL", &get_required_env("SOLTAN_GATEWAY_URL")?)?;
        let api_key = get_validated_secret("SOLTAN_GATEWAY_KEY")?;
        let poll_ms = get_env_or_default(
            "SOLTAN_POLL_INTERVAL_MS",
            &DEFAULT_POLL_INTERVAL_MS.to_string(),
        )
        .parse::<u64>()
        .map_err(|e| {
            ConfigError::InvalidEnvVar("SOLTAN_POLL_INTERVAL_MS".to_string(), e.to_string())
        })?;
        if poll_ms == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "SOLTAN_POLL_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            url,
            api_key,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a base URL, making sure it ends in `/` so relative joins keep the path.
fn parse_base_url(var_name: &str, raw: &str) -> Result<Url, ConfigError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
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
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
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
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the service dashboard."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
