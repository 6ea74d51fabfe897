//! Error types shared across the pool

use thiserror::Error;

/// Errors surfaced by the scored store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No proxy is available to hand out.
    #[error("proxy pool is empty")]
    PoolEmpty,

    /// The backing sorted-set service failed.
    #[error("store backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Reasons an address string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid ip address: {0}")]
    InvalidIp(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// The text holds a valid ip but no port.
    #[error("missing port for {0}")]
    MissingPort(String),
}

/// Errors produced while fetching a source page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("giving up on {url} after {attempts} attempts")]
    Exhausted { url: String, attempts: u32 },
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("score bounds must satisfy MIN < INIT <= MAX (got {min}, {init}, {max})")]
    ScoreBounds { min: i64, init: i64, max: i64 },

    #[error("failed to read sources file {path}: {reason}")]
    Sources { path: String, reason: String },
}
