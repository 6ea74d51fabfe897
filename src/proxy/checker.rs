//! Proxy checker module for re-validating pooled proxies

use crate::proxy::headers::HeaderGenerator;
use crate::proxy::models::{Proxy, ProxyCheckResult, ProxyCheckStatus};
use crate::store::ProxyStore;
use crate::Result;
use anyhow::Context;
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Client, Proxy as ReqwestProxy, Response};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of proxies checked per batch
const DEFAULT_BATCH_SIZE: usize = 20;

/// Default URL to test proxies against
const DEFAULT_TEST_URL: &str = "http://www.baidu.com";

/// Default IP echo endpoint for the anonymity check
const DEFAULT_ANONYMOUS_URL: &str = "https://httpbin.org/ip";

/// Statuses that count as a working proxy by default
pub const DEFAULT_VALID_STATUSES: [u16; 3] = [200, 206, 302];

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Number of proxies probed together before the next batch is fetched
    pub batch_size: usize,
    /// URL to test proxies against
    pub test_url: String,
    /// Statuses from the test URL that mark a proxy as working
    pub valid_statuses: Vec<u16>,
    /// Require that proxies hide the caller's address
    pub anonymous: bool,
    /// Endpoint echoing the caller's address as `{"origin": ".."}`
    pub anonymous_url: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            test_url: DEFAULT_TEST_URL.to_string(),
            valid_statuses: DEFAULT_VALID_STATUSES.to_vec(),
            anonymous: false,
            anonymous_url: DEFAULT_ANONYMOUS_URL.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_valid_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.valid_statuses = statuses;
        self
    }

    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn with_anonymous_url(mut self, url: String) -> Self {
        self.anonymous_url = url;
        self
    }
}

/// Totals for one tester pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub tested: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub indeterminate: usize,
}

/// Proxy checker probing pooled proxies and rewriting their scores
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    store: ProxyStore,
    headers: HeaderGenerator,
    span: tracing::Span,
}

impl ProxyChecker {
    pub fn new(config: CheckerConfig, store: ProxyStore) -> Self {
        Self {
            config,
            store,
            headers: HeaderGenerator,
            span: tracing::info_span!("tester"),
        }
    }

    /// Probe every pooled proxy once, batch by batch
    pub async fn test_pool(&self) -> Result<CheckSummary> {
        self.test_pool_inner().instrument(self.span.clone()).await
    }

    async fn test_pool_inner(&self) -> Result<CheckSummary> {
        tracing::info!("starting tester");
        let origin = if self.config.anonymous {
            Some(self.origin_ip().await?)
        } else {
            None
        };

        let count = self.store.count().await?;
        tracing::debug!(count, "{} proxies to test", count);

        let mut summary = CheckSummary::default();
        let mut cursor = 0;
        loop {
            let (next, proxies) = self.store.batch(cursor, self.config.batch_size).await?;
            tracing::debug!(cursor, next, size = proxies.len(), "testing batch");

            let results = join_all(
                proxies
                    .iter()
                    .map(|proxy| self.check_proxy(proxy, origin.as_deref())),
            )
            .await;
            for result in &results {
                self.apply(result, &mut summary).await;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        tracing::info!(?summary, "tester pass finished");

        Ok(summary)
    }

    /// This host's public address, as seen by the anonymity endpoint
    pub async fn origin_ip(&self) -> Result<String> {
        let client = Client::builder()
            .timeout(self.config.timeout)
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()?;
        let body: serde_json::Value = client
            .get(&self.config.anonymous_url)
            .headers(self.headers.generate())
            .send()
            .await?
            .json()
            .await?;
        let origin = body
            .get("origin")
            .and_then(|v| v.as_str())
            .context("anonymity endpoint returned no origin")?;
        tracing::debug!(origin, "resolved own address");
        Ok(origin.to_string())
    }

    /// Check a single proxy; `origin` enables the anonymity probe
    pub async fn check_proxy(&self, proxy: &Proxy, origin: Option<&str>) -> ProxyCheckResult {
        let client = match self.create_client(proxy) {
            Ok(client) => client,
            Err(e) => return ProxyCheckResult::failed(proxy.clone(), e.to_string()),
        };

        if let Some(origin) = origin {
            if let Some(result) = self.check_anonymity(&client, proxy, origin).await {
                return result;
            }
        }

        let start = Instant::now();
        match client
            .get(&self.config.test_url)
            .headers(self.headers.generate())
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status().as_u16();
                if self.config.valid_statuses.contains(&status) {
                    let elapsed = start.elapsed().as_millis() as u64;
                    ProxyCheckResult::working(proxy.clone(), elapsed)
                } else {
                    ProxyCheckResult::rejected(proxy.clone(), status)
                }
            }
            Err(e) => ProxyCheckResult::failed(proxy.clone(), e.to_string()),
        }
    }

    /// Returns a verdict only when the proxy did not pass
    async fn check_anonymity(
        &self,
        client: &Client,
        proxy: &Proxy,
        origin: &str,
    ) -> Option<ProxyCheckResult> {
        let response = match client
            .get(&self.config.anonymous_url)
            .headers(self.headers.generate())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Some(ProxyCheckResult::failed(proxy.clone(), e.to_string())),
        };

        let echoed = match echoed_origin(response).await {
            Echo::Origin(echoed) => echoed,
            Echo::Unreadable(reason) => {
                return Some(ProxyCheckResult::indeterminate(proxy.clone(), reason))
            }
            Echo::Malformed(error) => return Some(ProxyCheckResult::failed(proxy.clone(), error)),
        };

        if echoed == origin || echoed != proxy.address {
            return Some(ProxyCheckResult::failed(
                proxy.clone(),
                format!("proxy leaks or rewrites origin: {}", echoed),
            ));
        }
        None
    }

    async fn apply(&self, result: &ProxyCheckResult, summary: &mut CheckSummary) {
        summary.tested += 1;
        let proxy = &result.proxy;
        let outcome = if result.is_working() {
            tracing::debug!(%proxy, response_time_ms = result.response_time_ms, "proxy is valid");
            summary.promoted += 1;
            self.store.set_max(proxy).await
        } else if result.is_penalty() {
            match &result.status {
                ProxyCheckStatus::Rejected(status) => {
                    tracing::debug!(%proxy, status, "invalid status")
                }
                status => tracing::debug!(%proxy, ?status, "proxy is invalid"),
            }
            summary.demoted += 1;
            self.store.decrease(proxy).await.map(|_| ())
        } else {
            tracing::debug!(%proxy, status = ?result.status, "response not checkable, score kept");
            summary.indeterminate += 1;
            Ok(())
        };
        if let Err(e) = outcome {
            tracing::error!(%proxy, error = %e, "could not update score");
        }
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(&self, proxy: &Proxy) -> Result<Client> {
        let client = Client::builder()
            .proxy(ReqwestProxy::all(proxy.url())?)
            .timeout(self.config.timeout)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(client)
    }
}

enum Echo {
    Origin(String),
    /// Not JSON, or JSON without an `origin` field
    Unreadable(String),
    /// Claimed JSON but did not decode
    Malformed(String),
}

async fn echoed_origin(response: Response) -> Echo {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains("json") {
        return Echo::Unreadable(format!("unexpected content type {:?}", content_type));
    }

    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(e) => return Echo::Malformed(e.to_string()),
    };
    match body.get("origin").and_then(|v| v.as_str()) {
        Some(origin) => Echo::Origin(origin.trim().to_string()),
        None => Echo::Unreadable("anonymity response carried no origin".to_string()),
    }
}
