mod common;

use axum::routing::get;
use axum::Router;
use common::{crawler_config, spawn_app};
use proxypool::proxy::{CheckerConfig, ParseType, ProxyChecker, ProxyCrawler, SourceDescriptor};
use proxypool::scheduler::{Scheduler, SchedulerConfig, UnitReport};
use proxypool::server::ServerConfig;
use proxypool::store::{ProxyStore, ScoreBounds};
use std::time::Duration;

#[tokio::test]
async fn test_getter_unit_fills_pool_until_shutdown() {
    let app = Router::new().route(
        "/proxy.list",
        get(|| async {
            "{\"host\":\"1.2.3.4\",\"port\":\"8080\"}\n{\"host\":\"5.6.7.8\",\"port\":\"3128\"}\n"
        }),
    );
    let addr = spawn_app(app).await;

    let store = ProxyStore::in_memory(ScoreBounds::default());
    let sources = vec![SourceDescriptor::new(
        format!("http://{}/proxy.list", addr),
        ParseType::JsonLines,
    )];
    let crawler = ProxyCrawler::new(
        crawler_config(sources).with_queue_idle(Duration::from_millis(10)),
        store.clone(),
    )
    .unwrap();
    let checker = ProxyChecker::new(CheckerConfig::new(), store.clone());
    let config = SchedulerConfig {
        enable_tester: false,
        enable_server: false,
        getter_cycle: Duration::from_secs(3600),
        ..Default::default()
    };

    let scheduler = Scheduler::standard(
        &config,
        crawler,
        checker,
        ServerConfig::default(),
        store.clone(),
    );
    assert_eq!(scheduler.units().len(), 1);

    let watched = store.clone();
    let shutdown = async move {
        while watched.count().await.unwrap() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let reports = tokio::time::timeout(Duration::from_secs(10), scheduler.run(shutdown))
        .await
        .unwrap();

    assert_eq!(
        reports,
        vec![UnitReport {
            name: "getter",
            alive: false
        }]
    );
    assert_eq!(store.count().await.unwrap(), 2);
}
