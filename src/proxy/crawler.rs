//! Proxy crawler module for harvesting candidates from source sites
//!
//! One crawl pass runs in two phases:
//! - every configured source is fetched and parsed concurrently on a bounded
//!   set of tasks, feeding the store and queueing follow-up pages
//! - a single consumer then drains the follow-up queue until it stays idle

use crate::proxy::fetch::{Fetcher, RetryPolicy};
use crate::proxy::models::{ParseType, Proxy, SourceDescriptor};
use crate::proxy::parser::ProxyParser;
use crate::store::ProxyStore;
use crate::Result;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of sources processed at once
const DEFAULT_WORKERS: usize = 6;

/// Default idle time after which the follow-up queue counts as drained
const DEFAULT_QUEUE_IDLE_SECS: u64 = 4;

/// What one source page yielded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Harvest {
    pub proxies: Vec<Proxy>,
    pub follow_ups: Vec<String>,
}

/// Turns a fetched page body into a harvest; arguments are the page URL and body
pub type Extractor = fn(&str, &str) -> Harvest;

fn extract_html_list(url: &str, body: &str) -> Harvest {
    Harvest {
        proxies: ProxyParser::extract_ip_ports(body),
        follow_ups: ProxyParser::extract_page_links(url, body),
    }
}

fn extract_html_one_page(_url: &str, body: &str) -> Harvest {
    Harvest {
        proxies: ProxyParser::extract_ip_ports(body),
        follow_ups: Vec::new(),
    }
}

fn extract_html_click_paginate(url: &str, body: &str) -> Harvest {
    Harvest {
        proxies: Vec::new(),
        follow_ups: ProxyParser::extract_day_links(url, body),
    }
}

fn extract_html_embedded_b64(_url: &str, body: &str) -> Harvest {
    Harvest {
        proxies: ProxyParser::extract_base64(body),
        follow_ups: Vec::new(),
    }
}

fn extract_json(_url: &str, body: &str) -> Harvest {
    Harvest {
        proxies: ProxyParser::parse_json(body),
        follow_ups: Vec::new(),
    }
}

fn extract_json_lines(_url: &str, body: &str) -> Harvest {
    Harvest {
        proxies: ProxyParser::parse_json_lines(body),
        follow_ups: Vec::new(),
    }
}

/// Strategy table: one extractor per parse type
pub fn extractor_for(parse_type: ParseType) -> Extractor {
    match parse_type {
        ParseType::HtmlList => extract_html_list,
        ParseType::HtmlOnePage => extract_html_one_page,
        ParseType::HtmlClickPaginate => extract_html_click_paginate,
        ParseType::HtmlEmbeddedB64 => extract_html_embedded_b64,
        ParseType::Json => extract_json,
        ParseType::JsonLines => extract_json_lines,
    }
}

/// FIFO of follow-up URLs discovered while processing sources.
///
/// Any number of producers hold a [`mpsc::UnboundedSender`]; the single
/// consumer pops with an idle timeout.
pub struct CandidateQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.tx.clone()
    }

    /// Pop the next URL, or `None` once the queue stayed empty for `idle`
    pub async fn pop(&mut self, idle: Duration) -> Option<String> {
        tokio::time::timeout(idle, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source URL that was crawled
    pub source: String,
    /// Valid candidates extracted from the source
    pub found: usize,
    /// Candidates that were new to the store
    pub added: usize,
    /// Follow-up pages queued
    pub queued: usize,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn success(source: String, found: usize, added: usize, queued: usize) -> Self {
        Self {
            source,
            found,
            added,
            queued,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            found: 0,
            added: 0,
            queued: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Totals for one crawl pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub follow_ups_crawled: usize,
    pub added: usize,
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// Retry policy applied to every fetch
    pub retry: RetryPolicy,
    /// Number of sources processed at once
    pub workers: usize,
    /// Idle time that ends the follow-up crawl
    pub queue_idle: Duration,
    /// Store `html-embedded-b64` candidates instead of only logging them
    pub persist_embedded_base64: bool,
    /// Where to dump the last fetched page, if anywhere
    pub debug_page: Option<PathBuf>,
    /// Sources to harvest
    pub sources: Vec<SourceDescriptor>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            workers: DEFAULT_WORKERS,
            queue_idle: Duration::from_secs(DEFAULT_QUEUE_IDLE_SECS),
            persist_embedded_base64: true,
            debug_page: None,
            sources: ProxyCrawler::default_sources(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_idle(mut self, idle: Duration) -> Self {
        self.queue_idle = idle;
        self
    }

    pub fn with_persist_embedded_base64(mut self, persist: bool) -> Self {
        self.persist_embedded_base64 = persist;
        self
    }

    pub fn with_debug_page(mut self, path: Option<PathBuf>) -> Self {
        self.debug_page = path;
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceDescriptor>) -> Self {
        self.sources = sources;
        self
    }
}

/// Proxy crawler feeding the store from the configured sources
#[derive(Clone)]
pub struct ProxyCrawler {
    config: Arc<CrawlerConfig>,
    fetcher: Fetcher,
    store: ProxyStore,
    span: tracing::Span,
}

impl ProxyCrawler {
    pub fn new(config: CrawlerConfig, store: ProxyStore) -> Result<Self> {
        let fetcher = Fetcher::new(config.timeout, config.retry)?
            .with_debug_page(config.debug_page.clone());

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            store,
            span: tracing::info_span!("getter"),
        })
    }

    /// Run one full crawl pass
    pub async fn crawl(&self) -> CrawlSummary {
        self.crawl_inner().instrument(self.span.clone()).await
    }

    async fn crawl_inner(&self) -> CrawlSummary {
        let mut summary = CrawlSummary::default();
        let mut queue = CandidateQueue::new();
        let producer = queue.sender();

        let results: Vec<_> = stream::iter(self.config.sources.clone())
            .map(|source| {
                let crawler = self.clone();
                let sender = producer.clone();
                tokio::spawn(
                    async move { crawler.crawl_source(&source, &sender).await }
                        .instrument(self.span.clone()),
                )
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        for joined in results {
            match joined {
                Ok(result) if result.is_success() => {
                    tracing::info!(
                        source = %result.source,
                        found = result.found,
                        added = result.added,
                        queued = result.queued,
                        "source processed"
                    );
                    summary.sources_ok += 1;
                    summary.added += result.added;
                }
                Ok(result) => {
                    tracing::error!(
                        source = %result.source,
                        error = result.error.as_deref().unwrap_or_default(),
                        "source failed"
                    );
                    summary.sources_failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "source task crashed");
                    summary.sources_failed += 1;
                }
            }
        }
        tracing::info!("all initial urls processed");

        while let Some(url) = queue.pop(self.config.queue_idle).await {
            summary.follow_ups_crawled += 1;
            match self.fetcher.fetch(&url).await {
                Ok(body) => {
                    let proxies = ProxyParser::extract_ip_ports(&body);
                    summary.added += self.feed(&proxies).await;
                }
                Err(e) => tracing::error!(%url, error = %e, "follow-up page abandoned"),
            }
        }
        tracing::info!(?summary, "queue is empty, crawl finished");

        summary
    }

    /// Fetch and parse one source, queueing whatever follow-up pages it links to
    pub async fn crawl_source(
        &self,
        source: &SourceDescriptor,
        queue: &mpsc::UnboundedSender<String>,
    ) -> CrawlResult {
        let body = match self.fetcher.fetch(&source.url).await {
            Ok(body) => body,
            Err(e) => return CrawlResult::failure(source.url.clone(), e.to_string()),
        };

        let harvest = extractor_for(source.parse_type)(&source.url, &body);

        let mut queued = 0;
        for url in harvest.follow_ups {
            if let Err(e) = url::Url::parse(&url) {
                tracing::debug!(%url, error = %e, "skipping malformed follow-up url");
                continue;
            }
            tracing::info!(%url, "put new url");
            if queue.send(url).is_ok() {
                queued += 1;
            }
        }

        let found = harvest.proxies.len();
        if source.parse_type == ParseType::HtmlEmbeddedB64 && !self.config.persist_embedded_base64 {
            for proxy in &harvest.proxies {
                tracing::info!(%proxy, "decoded proxy, not persisted");
            }
            return CrawlResult::success(source.url.clone(), found, 0, queued);
        }

        let added = self.feed(&harvest.proxies).await;
        CrawlResult::success(source.url.clone(), found, added, queued)
    }

    /// Add candidates to the store, returning how many were new
    async fn feed(&self, proxies: &[Proxy]) -> usize {
        let mut added = 0;
        for proxy in proxies {
            match self.store.add(proxy).await {
                Ok(true) => {
                    tracing::info!(%proxy, "put new proxy");
                    added += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(%proxy, error = %e, "could not store proxy"),
            }
        }
        added
    }

    /// The built-in list of public proxy sources
    pub fn default_sources() -> Vec<SourceDescriptor> {
        vec![
            SourceDescriptor::new("http://www.66ip.cn/", ParseType::HtmlList),
            SourceDescriptor::new("http://proxylist.fatezero.org/proxy.list", ParseType::JsonLines),
            SourceDescriptor::new(
                "https://proxylist.geonode.com/api/proxy-list?sort_by=lastChecked&sort_type=desc&protocols=http%2Chttps",
                ParseType::Json,
            ),
            SourceDescriptor::new("https://www.89ip.cn/", ParseType::HtmlList),
            SourceDescriptor::new("https://proxy.ip3366.net/free/", ParseType::HtmlList),
            SourceDescriptor::new("https://www.kuaidaili.com/free/", ParseType::HtmlList),
            SourceDescriptor::new("http://www.taiyanghttp.com/free/", ParseType::HtmlList),
            SourceDescriptor::new("https://www.xsdaili.cn/", ParseType::HtmlClickPaginate),
            SourceDescriptor::new("http://ip.yqie.com/proxygaoni/", ParseType::HtmlEmbeddedB64),
        ]
    }
}
