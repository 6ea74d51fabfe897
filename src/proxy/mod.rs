//! Proxy module for harvesting and validating proxies
//!
//! This module provides functionality for:
//! - Parsing `ip:port` candidates out of HTML, JSON and JSON-lines pages
//! - Crawling source sites into the store, including their follow-up pages
//! - Re-validating pooled proxies and rewriting their scores

pub mod checker;
pub mod crawler;
pub mod fetch;
pub mod headers;
pub mod models;
pub mod parser;

pub use checker::{CheckSummary, CheckerConfig, ProxyChecker};
pub use crawler::{CandidateQueue, CrawlSummary, CrawlerConfig, ProxyCrawler};
pub use fetch::{Fetcher, RetryPolicy};
pub use models::{ParseType, Proxy, ProxyCheckResult, ProxyCheckStatus, SourceDescriptor};
pub use parser::ProxyParser;
