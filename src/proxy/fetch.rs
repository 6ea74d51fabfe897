//! Page fetching with a fixed-wait retry policy

use crate::error::FetchError;
use crate::proxy::headers::HeaderGenerator;
use crate::Result;
use reqwest::{Client, StatusCode};
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

/// Default attempt cap for a fetch
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default wait between attempts in seconds
pub const DEFAULT_RETRY_WAIT_SECS: u64 = 20;

/// Fixed attempt cap and fixed wait between attempts; no backoff, no jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            wait: Duration::from_secs(DEFAULT_RETRY_WAIT_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    /// Run `op` until it succeeds or the attempt cap is reached, returning the
    /// last error in the latter case.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    tracing::debug!(attempt, max_attempts = self.max_attempts, error = %e, "attempt failed, retrying");
                    tokio::time::sleep(self.wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// HTTP fetcher for source pages.
///
/// Every request carries fresh random headers and a fixed timeout, and TLS
/// certificates are not verified. Requests go out directly, never through an
/// environment proxy, and only `200 OK` counts as success.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    headers: HeaderGenerator,
    retry: RetryPolicy,
    debug_page: Option<PathBuf>,
}

impl Fetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            headers: HeaderGenerator,
            retry,
            debug_page: None,
        })
    }

    /// Write the last successfully fetched body to `path`
    pub fn with_debug_page(mut self, path: Option<PathBuf>) -> Self {
        self.debug_page = path;
        self
    }

    /// Fetch a page, retrying per the policy
    pub async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        self.retry
            .run(|| self.fetch_once(url))
            .await
            .map_err(|e| {
                tracing::warn!(%url, error = %e, "fetch failed");
                FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: self.retry.max_attempts,
                }
            })
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, FetchError> {
        tracing::info!(%url, "fetching");
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .headers(self.headers.generate())
            .send()
            .await
            .map_err(request_error)?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(request_error)?;

        if let Some(path) = &self.debug_page {
            if let Err(e) = tokio::fs::write(path, &body).await {
                tracing::debug!(path = %path.display(), error = %e, "could not write debug page");
            }
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_cap() {
        let policy = RetryPolicy::new(3, Duration::from_secs(20));
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), String> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("connection reset".to_string()) }
            })
            .await;

        assert_eq!(result, Err("connection reset".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_success() {
        let policy = RetryPolicy::new(3, Duration::from_secs(20));
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<u32, String> = policy
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err("timeout".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(20));
        let start = tokio::time::Instant::now();

        let _: std::result::Result<(), &str> = policy.run(|| async { Err("down") }).await;

        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(policy.wait, Duration::from_secs(DEFAULT_RETRY_WAIT_SECS));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
