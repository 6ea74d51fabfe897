#![allow(dead_code)]

use axum::Router;
use proxypool::proxy::{CrawlerConfig, RetryPolicy, SourceDescriptor};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral local port
pub async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Crawler settings tuned for local servers: one source list, short waits
pub fn crawler_config(sources: Vec<SourceDescriptor>) -> CrawlerConfig {
    CrawlerConfig::new()
        .with_timeout(Duration::from_secs(2))
        .with_retry(RetryPolicy::new(1, Duration::ZERO))
        .with_queue_idle(Duration::from_millis(200))
        .with_sources(sources)
}
