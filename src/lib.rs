//! Proxy Pool - self-refreshing pool of scored proxies
//!
//! A getter crawls public proxy lists into a scored store, a tester keeps
//! re-probing the pooled proxies and rewrites their scores, and a small HTTP
//! server hands out the good ones. A scheduler runs all three side by side.

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod scheduler;
pub mod server;
pub mod store;

pub use config::Settings;
pub use error::{AddressError, ConfigError, FetchError, StoreError};
pub use proxy::*;
pub use store::{ProxyStore, ScoreBounds};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
