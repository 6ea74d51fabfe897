//! Supervisor for the getter, tester and server units
//!
//! Each unit runs on its own task with its own cancellation token. A panic
//! or a stalled pass in one unit never blocks the others; shutdown cancels
//! every token and joins every task before reporting which units survived.

use crate::proxy::{ProxyChecker, ProxyCrawler};
use crate::server::{self, ServerConfig};
use crate::store::ProxyStore;
use crate::Result;
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default pause between getter passes in seconds
pub const DEFAULT_GETTER_CYCLE_SECS: u64 = 100;

/// Default pause between tester passes in seconds
pub const DEFAULT_TESTER_CYCLE_SECS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub enable_getter: bool,
    pub enable_tester: bool,
    pub enable_server: bool,
    pub getter_cycle: Duration,
    pub tester_cycle: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enable_getter: true,
            enable_tester: true,
            enable_server: true,
            getter_cycle: Duration::from_secs(DEFAULT_GETTER_CYCLE_SECS),
            tester_cycle: Duration::from_secs(DEFAULT_TESTER_CYCLE_SECS),
        }
    }
}

/// One supervised task
pub struct ManagedUnit {
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    joined: bool,
}

impl ManagedUnit {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: CancellationToken::new(),
            handle: None,
            joined: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn the unit body; it receives the token it must watch
    pub fn start<F, Fut>(&mut self, body: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::info_span!("unit", name = self.name);
        self.handle = Some(tokio::spawn(body(self.token.clone()).instrument(span)));
    }

    /// Ask the unit to stop at its next suspension point
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Wait for the unit's task to end
    pub async fn join(&mut self) {
        if self.joined {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let outcome = handle.await;
        self.joined = true;
        if let Err(e) = outcome {
            if e.is_panic() {
                tracing::error!(unit = self.name, "unit crashed");
            } else {
                tracing::warn!(unit = self.name, error = %e, "unit aborted");
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.joined && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Liveness of a unit after shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub name: &'static str,
    pub alive: bool,
}

/// Repeat `pass` every `cycle` until `token` is cancelled.
///
/// A failed pass is logged and the loop carries on.
pub async fn run_every<F, Fut>(name: &str, cycle: Duration, token: CancellationToken, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut round: u64 = 0;
    loop {
        tracing::debug!("{} loop {} start", name, round);
        tokio::select! {
            _ = token.cancelled() => break,
            outcome = pass() => {
                if let Err(e) = outcome {
                    tracing::error!(error = %e, "{} pass failed", name);
                }
            }
        }
        round += 1;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(cycle) => {}
        }
    }
    tracing::info!("{} loop stopped after {} rounds", name, round);
}

pub struct Scheduler {
    units: Vec<ManagedUnit>,
    span: tracing::Span,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            units: Vec::new(),
            span: tracing::info_span!("scheduler"),
        }
    }

    /// The tester, getter and server units, each subject to its enable flag
    pub fn standard(
        config: &SchedulerConfig,
        crawler: ProxyCrawler,
        checker: ProxyChecker,
        server: ServerConfig,
        store: ProxyStore,
    ) -> Self {
        let mut scheduler = Self::new();
        tracing::info!(parent: &scheduler.span, "starting proxypool");

        let cycle = config.tester_cycle;
        scheduler.spawn("tester", config.enable_tester, move |token| async move {
            run_every("tester", cycle, token, || {
                let checker = checker.clone();
                async move { checker.test_pool().await.map(|_| ()) }
            })
            .await
        });

        let cycle = config.getter_cycle;
        scheduler.spawn("getter", config.enable_getter, move |token| async move {
            run_every("getter", cycle, token, || {
                let crawler = crawler.clone();
                async move {
                    crawler.crawl().await;
                    Ok(())
                }
            })
            .await
        });

        scheduler.spawn("server", config.enable_server, move |token| async move {
            if let Err(e) = server::serve(server, store, token).await {
                tracing::error!(error = %e, "server failed");
            }
        });

        scheduler
    }

    /// Start a unit unless it is disabled
    pub fn spawn<F, Fut>(&mut self, name: &'static str, enabled: bool, body: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !enabled {
            tracing::info!(parent: &self.span, "{} not enabled, exit", name);
            return;
        }
        let mut unit = ManagedUnit::new(name);
        unit.start(body);
        tracing::info!(parent: &self.span, "starting {}", name);
        self.units.push(unit);
    }

    pub fn units(&self) -> &[ManagedUnit] {
        &self.units
    }

    /// Run until every unit ends or `shutdown` resolves, then terminate and
    /// join all units and report their liveness.
    pub async fn run<S>(mut self, shutdown: S) -> Vec<UnitReport>
    where
        S: Future<Output = ()>,
    {
        let span = self.span.clone();
        async move {
            {
                let wait_all = join_all(self.units.iter_mut().map(|unit| unit.join()));
                tokio::select! {
                    _ = wait_all => {}
                    _ = shutdown => {
                        tracing::info!("received interrupt signal");
                    }
                }
            }

            for unit in &self.units {
                unit.terminate();
            }
            for unit in &mut self.units {
                unit.join().await;
            }

            let reports: Vec<_> = self
                .units
                .iter()
                .map(|unit| UnitReport {
                    name: unit.name(),
                    alive: unit.is_alive(),
                })
                .collect();
            for report in &reports {
                tracing::info!(
                    "{} is {}",
                    report.name,
                    if report.alive { "alive" } else { "dead" }
                );
            }
            tracing::info!("proxy terminated");
            reports
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert!(config.enable_getter && config.enable_tester && config.enable_server);
        assert_eq!(config.getter_cycle, Duration::from_secs(100));
        assert_eq!(config.tester_cycle, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_disabled_unit_is_not_started() {
        let mut scheduler = Scheduler::new();
        scheduler.spawn("getter", false, |_token| async {});
        assert!(scheduler.units().is_empty());
        assert!(scheduler.run(async {}).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_terminates_looping_units() {
        let mut scheduler = Scheduler::new();
        for name in ["tester", "getter"] {
            scheduler.spawn(name, true, move |token| async move {
                run_every(name, Duration::from_millis(5), token, || async { Ok(()) }).await
            });
        }
        assert!(scheduler.units().iter().all(ManagedUnit::is_alive));

        let reports = scheduler
            .run(tokio::time::sleep(Duration::from_millis(30)))
            .await;
        assert_eq!(
            reports,
            vec![
                UnitReport { name: "tester", alive: false },
                UnitReport { name: "getter", alive: false },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_unit_does_not_stop_others() {
        let passes = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.spawn("server", true, |_token| async { panic!("bind failed") });
        let counter = passes.clone();
        scheduler.spawn("tester", true, move |token| async move {
            run_every("tester", Duration::from_millis(1), token, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
        });

        // The paused clock only advances once both units are idle
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(passes.load(Ordering::SeqCst) > 1);
        assert!(!scheduler.units()[0].is_alive());
        assert!(scheduler.units()[1].is_alive());

        let reports = scheduler.run(async {}).await;
        assert!(reports.iter().all(|r| !r.alive));
        assert!(passes.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_run_returns_when_units_finish() {
        let mut scheduler = Scheduler::new();
        scheduler.spawn("getter", true, |_token| async {});
        let reports = scheduler.run(std::future::pending()).await;
        assert_eq!(reports, vec![UnitReport { name: "getter", alive: false }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_keeps_looping() {
        let passes = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let counter = passes.clone();
        let task = tokio::spawn(run_every(
            "tester",
            Duration::from_secs(20),
            token.clone(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("redis down")) }
            },
        ));

        tokio::time::sleep(Duration::from_secs(50)).await;
        token.cancel();
        task.await.unwrap();
        assert_eq!(passes.load(Ordering::SeqCst), 3);
    }
}
