//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Proxy model representing a single relay endpoint.
///
/// Identity is the canonical `address:port` string, which is also the member
/// name used by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub address: String,
    pub port: u32,
}

impl Proxy {
    pub fn new(address: impl Into<String>, port: u32) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Get the proxy URL used when routing requests through it
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// How a source page is turned into candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseType {
    /// Paginated HTML table; sibling pages are queued for the follow-up crawl.
    HtmlList,
    /// Single HTML page, no pagination.
    HtmlOnePage,
    /// Index page whose "day" sub-pages hold the actual lists.
    HtmlClickPaginate,
    /// Addresses hidden as base64 inside inline `window.atob(..)` calls.
    HtmlEmbeddedB64,
    /// JSON document whose first top-level list holds `{ip, port}` objects.
    Json,
    /// One `{host, port}` JSON object per line.
    JsonLines,
}

impl fmt::Display for ParseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ParseType::HtmlList => "html-list",
            ParseType::HtmlOnePage => "html-one-page",
            ParseType::HtmlClickPaginate => "html-click-paginate",
            ParseType::HtmlEmbeddedB64 => "html-embedded-b64",
            ParseType::Json => "json",
            ParseType::JsonLines => "json-lines",
        };
        write!(f, "{}", tag)
    }
}

/// Static description of where and how to harvest candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub url: String,
    pub parse_type: ParseType,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>, parse_type: ParseType) -> Self {
        Self {
            url: url.into(),
            parse_type,
        }
    }
}

/// Result of proxy check operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyCheckStatus {
    /// The test URL answered with a status from the valid set.
    Working,
    /// The test URL answered, but with a status outside the valid set.
    Rejected(u16),
    /// Network or protocol level failure, or a failed anonymity assertion.
    Failed(String),
    /// Response could not be validated; says nothing about the proxy.
    Indeterminate(String),
}

/// Detailed result of a proxy check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCheckResult {
    pub proxy: Proxy,
    pub status: ProxyCheckStatus,
    pub response_time_ms: Option<u64>,
}

impl ProxyCheckResult {
    pub fn working(proxy: Proxy, response_time_ms: u64) -> Self {
        Self {
            proxy,
            status: ProxyCheckStatus::Working,
            response_time_ms: Some(response_time_ms),
        }
    }

    pub fn rejected(proxy: Proxy, status: u16) -> Self {
        Self {
            proxy,
            status: ProxyCheckStatus::Rejected(status),
            response_time_ms: None,
        }
    }

    pub fn failed(proxy: Proxy, error: String) -> Self {
        Self {
            proxy,
            status: ProxyCheckStatus::Failed(error),
            response_time_ms: None,
        }
    }

    pub fn indeterminate(proxy: Proxy, reason: String) -> Self {
        Self {
            proxy,
            status: ProxyCheckStatus::Indeterminate(reason),
            response_time_ms: None,
        }
    }

    pub fn is_working(&self) -> bool {
        matches!(self.status, ProxyCheckStatus::Working)
    }

    /// Whether this result counts as a vote against the proxy.
    pub fn is_penalty(&self) -> bool {
        matches!(
            self.status,
            ProxyCheckStatus::Rejected(_) | ProxyCheckStatus::Failed(_)
        )
    }
}
