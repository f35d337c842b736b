//! Configuration management for the client.

use std::env;
use std::time::Duration;
use stockpile_engine::{RetryPolicy, MAX_RETRY_ATTEMPTS, RETRY_DELAY_MS};

/// Default per-fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control API host address
    pub host: String,
    /// Control API port
    pub port: u16,
    /// SQLite database URL
    pub database_url: String,
    /// Base URL of the remote warehouse API
    pub api_base_url: String,
    /// Bearer token forwarded to the remote API
    pub auth_token: Option<String>,
    /// Runtime settings for the orchestrator
    pub sync: SyncSettings,
}

/// Settings the orchestrator runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Timeout for a single fetch
    pub fetch_timeout: Duration,
    /// Retry limits and delay
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://stockpile.db".to_string());

        let api_base_url =
            env::var("STOCKPILE_API_BASE_URL").map_err(|_| ConfigError::MissingApiBaseUrl)?;

        let auth_token = env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let fetch_timeout_secs: u64 = parse_or("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?;
        let retry_delay_ms: u64 = parse_or("RETRY_DELAY_MS", RETRY_DELAY_MS)?;

        Ok(Self {
            host,
            port,
            database_url,
            api_base_url,
            auth_token,
            sync: SyncSettings {
                fetch_timeout: Duration::from_secs(fetch_timeout_secs),
                retry: RetryPolicy {
                    max_attempts: MAX_RETRY_ATTEMPTS,
                    delay_ms: retry_delay_ms,
                },
            },
        })
    }
}

fn parse_or(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STOCKPILE_API_BASE_URL environment variable is required")]
    MissingApiBaseUrl,

    #[error("Invalid {0} value")]
    Invalid(&'static str),
}
