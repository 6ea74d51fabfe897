//! Proxy parser module for validating addresses and extracting them from source pages

use crate::error::AddressError;
use crate::proxy::models::Proxy;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Permissive `ip <non-digits> port` pattern; matches table cells as well as `ip:port`
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\D+(\d{1,5})")
        .expect("Invalid IP:PORT regex")
});

/// Pager links labelled "2" and "3", plus the link following them
static PAGE_LINKS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"href="([^"]+)".*?>.*?2.*?<[\D\s]*?href="([^"]+)".*?>.*?3.*?<[\D\s]*?href="([^"]+)""#,
    )
    .expect("Invalid page links regex")
});

static DAY_LINKS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href="(/dayProxy/ip/\d{4}\.html)"[\D\s]*?href="(/dayProxy/ip/\d{4}\.html)""#)
        .expect("Invalid day links regex")
});

static BASE64_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"window\.atob\("(\S+?)"\)[\D\s]*?(\d{1,5})"#).expect("Invalid base64 regex")
});

/// `{ip|host, port}` object as published by JSON sources
#[derive(Debug, Deserialize)]
struct RawEndpoint {
    #[serde(alias = "host")]
    ip: String,
    port: RawPort,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Text(String),
    Number(u64),
}

impl RawEndpoint {
    fn into_proxy(self) -> Option<Proxy> {
        let port = match self.port {
            RawPort::Text(text) => text,
            RawPort::Number(n) => n.to_string(),
        };
        ProxyParser::parse_address(&format!("{}:{}", self.ip.trim(), port.trim())).ok()
    }
}

/// Proxy parser for validating addresses and mining them out of fetched pages
pub struct ProxyParser;

impl ProxyParser {
    /// Check that a string is four dot-separated octets in `0..=255`
    pub fn is_ip_valid(ip: &str) -> bool {
        let octets: Vec<&str> = ip.split('.').collect();
        if octets.len() != 4 {
            return false;
        }
        octets.iter().all(|octet| {
            !octet.is_empty()
                && octet.bytes().all(|b| b.is_ascii_digit())
                && octet.parse::<u32>().map_or(false, |n| n <= 255)
        })
    }

    /// Ports are only checked for being at most five digits; `99999` passes.
    pub fn is_port_valid(port: &str) -> bool {
        !port.is_empty() && port.len() < 6 && port.bytes().all(|b| b.is_ascii_digit())
    }

    /// Whether the text is an acceptable `ip` or `ip:port`
    pub fn is_valid_proxy(text: &str) -> bool {
        matches!(
            Self::parse_address(text),
            Ok(_) | Err(AddressError::MissingPort(_))
        )
    }

    /// Parse `ip:port` into a [`Proxy`].
    ///
    /// A bare `ip` validates but cannot become a proxy; it is reported as
    /// [`AddressError::MissingPort`].
    pub fn parse_address(text: &str) -> Result<Proxy, AddressError> {
        let text = text.trim();
        match text.split_once(':') {
            None => {
                if Self::is_ip_valid(text) {
                    Err(AddressError::MissingPort(text.to_string()))
                } else {
                    Err(AddressError::InvalidIp(text.to_string()))
                }
            }
            Some((ip, port)) => {
                if !Self::is_ip_valid(ip) {
                    return Err(AddressError::InvalidIp(ip.to_string()));
                }
                if !Self::is_port_valid(port) {
                    return Err(AddressError::InvalidPort(port.to_string()));
                }
                let port = port
                    .parse::<u32>()
                    .map_err(|_| AddressError::InvalidPort(port.to_string()))?;
                Ok(Proxy::new(ip, port))
            }
        }
    }

    /// Parse a list of address strings, silently dropping invalid entries
    pub fn parse_many<S: AsRef<str>>(items: &[S]) -> Vec<Proxy> {
        items
            .iter()
            .filter_map(|item| Self::parse_address(item.as_ref()).ok())
            .collect()
    }

    /// Extract every `ip ... port` pair from page text
    pub fn extract_ip_ports(content: &str) -> Vec<Proxy> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let ip = cap.get(1)?.as_str();
                let port = cap.get(2)?.as_str();
                Self::parse_address(&format!("{}:{}", ip, port)).ok()
            })
            .collect()
    }

    /// Extract the pager links of a list page as absolute URLs
    pub fn extract_page_links(base_url: &str, html: &str) -> Vec<String> {
        PAGE_LINKS_REGEX
            .captures(html)
            .map(|cap| {
                cap.iter()
                    .skip(1)
                    .flatten()
                    .map(|m| Self::combine_url(base_url, m.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Extract the two "day" sub-page links of a click-paginated index
    pub fn extract_day_links(base_url: &str, html: &str) -> Vec<String> {
        DAY_LINKS_REGEX
            .captures(html)
            .map(|cap| {
                cap.iter()
                    .skip(1)
                    .flatten()
                    .map(|m| Self::combine_url(base_url, m.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decode `window.atob("<b64 ip>") ... port` pairs from inline scripts
    pub fn extract_base64(html: &str) -> Vec<Proxy> {
        BASE64_REGEX
            .captures_iter(html)
            .filter_map(|cap| {
                let decoded = STANDARD.decode(cap.get(1)?.as_str()).ok()?;
                let ip = String::from_utf8(decoded).ok()?;
                let port = cap.get(2)?.as_str();
                Self::parse_address(&format!("{}:{}", ip.trim(), port)).ok()
            })
            .collect()
    }

    /// Parse a JSON document whose first top-level list holds endpoint objects
    pub fn parse_json(body: &str) -> Vec<Proxy> {
        let document: serde_json::Map<String, Value> = match serde_json::from_str(body) {
            Ok(document) => document,
            Err(e) => {
                tracing::debug!(error = %e, "JSON source is not an object");
                return Vec::new();
            }
        };

        let Some(items) = document.into_iter().find_map(|(_, value)| match value {
            Value::Array(items) => Some(items),
            _ => None,
        }) else {
            return Vec::new();
        };

        items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawEndpoint>(item).ok())
            .filter_map(RawEndpoint::into_proxy)
            .collect()
    }

    /// Parse newline-delimited JSON, one endpoint object per line
    pub fn parse_json_lines(body: &str) -> Vec<Proxy> {
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_str::<RawEndpoint>(line) {
                Ok(endpoint) => endpoint.into_proxy(),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed JSON line");
                    None
                }
            })
            .collect()
    }

    /// Join a site-relative link onto the page it was found on.
    ///
    /// When the link's leading path segment repeats the base URL's trailing
    /// segment, the duplicate is dropped from the base first.
    pub fn combine_url(base_url: &str, link: &str) -> String {
        let link = link.trim_matches('/');
        let mut base = base_url.trim_matches('/');

        let leading = link.split('/').next().unwrap_or(link);
        if let Some(idx) = base.rfind('/') {
            if &base[idx + 1..] == leading {
                base = &base[..idx];
            }
        }

        format!("{}/{}", base, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_format() {
        let proxy = ProxyParser::parse_address("192.168.1.1:8080").unwrap();
        assert_eq!(proxy.address, "192.168.1.1");
        assert_eq!(proxy.port, 8080);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let proxy = ProxyParser::parse_address("  10.0.0.1:3128\n").unwrap();
        assert_eq!(proxy.to_string(), "10.0.0.1:3128");
    }

    #[test]
    fn test_octet_out_of_range() {
        assert_eq!(
            ProxyParser::parse_address("999.1.1.1:80"),
            Err(AddressError::InvalidIp("999.1.1.1".to_string()))
        );
    }

    #[test]
    fn test_port_too_long() {
        assert_eq!(
            ProxyParser::parse_address("8.8.8.8:123456"),
            Err(AddressError::InvalidPort("123456".to_string()))
        );
    }

    #[test]
    fn test_port_range_is_not_checked() {
        let proxy = ProxyParser::parse_address("8.8.8.8:99999").unwrap();
        assert_eq!(proxy.port, 99999);
    }

    #[test]
    fn test_address_without_port() {
        assert_eq!(
            ProxyParser::parse_address("8.8.8.8"),
            Err(AddressError::MissingPort("8.8.8.8".to_string()))
        );
        assert!(ProxyParser::is_valid_proxy("8.8.8.8"));
        assert!(!ProxyParser::is_valid_proxy("8.8.8"));
    }

    #[test]
    fn test_parse_invalid_format() {
        assert!(ProxyParser::parse_address("invalid").is_err());
        assert!(ProxyParser::parse_address("1.2.3.4:").is_err());
        assert!(ProxyParser::parse_address("1.2.3.4:abc").is_err());
        assert!(ProxyParser::parse_address("1.2..4:80").is_err());
        assert!(ProxyParser::parse_address("1.2.3.4:80:user").is_err());
    }

    #[test]
    fn test_parse_many_drops_invalid() {
        let input = vec![" 1.1.1.1:80 ", "300.1.1.1:80", "2.2.2.2:8080", "nonsense"];
        let proxies = ProxyParser::parse_many(&input);
        assert_eq!(
            proxies,
            vec![Proxy::new("1.1.1.1", 80), Proxy::new("2.2.2.2", 8080)]
        );
    }

    #[test]
    fn test_extract_from_table_cells() {
        let html = r#"
<table>
<tr><td>192.168.1.1</td><td>8080</td></tr>
<tr><td>10.0.0.1</td><td>3128</td></tr>
<tr><td>999.0.0.1</td><td>80</td></tr>
</table>
"#;
        let proxies = ProxyParser::extract_ip_ports(html);
        assert_eq!(
            proxies,
            vec![Proxy::new("192.168.1.1", 8080), Proxy::new("10.0.0.1", 3128)]
        );
    }

    #[test]
    fn test_extract_page_links() {
        let html = r#"<div id="pager"><a href="/free/inha/2/">2</a> <a href="/free/inha/3/">3</a> <a href="/free/inha/4/">4</a></div>"#;
        let links = ProxyParser::extract_page_links("https://www.example.cn/free/", html);
        assert_eq!(
            links,
            vec![
                "https://www.example.cn/free/inha/2",
                "https://www.example.cn/free/inha/3",
                "https://www.example.cn/free/inha/4",
            ]
        );
    }

    #[test]
    fn test_extract_page_links_without_pager() {
        assert!(ProxyParser::extract_page_links("https://a.example/", "<p>nothing</p>").is_empty());
    }

    #[test]
    fn test_extract_day_links() {
        let html = r#"<a href="/dayProxy/ip/3321.html">today</a><br/><a href="/dayProxy/ip/3320.html">yesterday</a>"#;
        let links = ProxyParser::extract_day_links("https://www.example.cn/", html);
        assert_eq!(
            links,
            vec![
                "https://www.example.cn/dayProxy/ip/3321.html",
                "https://www.example.cn/dayProxy/ip/3320.html",
            ]
        );
    }

    #[test]
    fn test_extract_base64() {
        // "MS4yLjMuNA==" is "1.2.3.4"
        let html = r#"<script>document.write(window.atob("MS4yLjMuNA=="))</script></td><td>8080</td>"#;
        let proxies = ProxyParser::extract_base64(html);
        assert_eq!(proxies, vec![Proxy::new("1.2.3.4", 8080)]);
    }

    #[test]
    fn test_parse_json_first_list() {
        let body = r#"{"data":[{"ip":"1.2.3.4","port":"8080"},{"ip":"5.6.7.8","port":3128},{"ip":"bad","port":"1"}],"total":3}"#;
        let proxies = ProxyParser::parse_json(body);
        assert_eq!(
            proxies,
            vec![Proxy::new("1.2.3.4", 8080), Proxy::new("5.6.7.8", 3128)]
        );
    }

    #[test]
    fn test_parse_json_not_an_object() {
        assert!(ProxyParser::parse_json("[1,2,3]").is_empty());
        assert!(ProxyParser::parse_json("<html>").is_empty());
    }

    #[test]
    fn test_parse_json_lines() {
        let body = "{\"host\":\"1.2.3.4\",\"port\":\"8080\"}\n\n{\"host\":\"5.6.7.8\",\"port\":3128}\nnot json\n";
        let proxies = ProxyParser::parse_json_lines(body);
        assert_eq!(
            proxies,
            vec![Proxy::new("1.2.3.4", 8080), Proxy::new("5.6.7.8", 3128)]
        );
    }

    #[test]
    fn test_combine_url_drops_duplicate_segment() {
        assert_eq!(
            ProxyParser::combine_url("https://proxy.example.net/free/", "/free/?page=2"),
            "https://proxy.example.net/free/?page=2"
        );
    }

    #[test]
    fn test_combine_url_plain_join() {
        assert_eq!(
            ProxyParser::combine_url("https://www.example.cn/", "index_2.html"),
            "https://www.example.cn/index_2.html"
        );
        assert_eq!(
            ProxyParser::combine_url("https://www.example.cn/free/", "/inha/2/"),
            "https://www.example.cn/free/inha/2"
        );
    }
}
