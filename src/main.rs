use anyhow::Result;
use clap::{Parser, Subcommand};
use proxypool::{
    config::{Settings, StoreBackendKind, StoreSettings},
    logging,
    proxy::{ProxyChecker, ProxyCrawler},
    scheduler::Scheduler,
    server,
    store::{ProxyStore, RedisBackend},
    StoreError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A self-refreshing pool of scored proxies
#[derive(Parser)]
#[command(name = "proxypool")]
#[command(about = "Crawl public proxy lists, keep probing them, serve the good ones")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Use an in-process store instead of Redis
    #[arg(long, global = true)]
    memory: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the getter, tester and server until interrupted
    Run,
    /// Run one ingestion pass and exit
    Getter,
    /// Run one validation pass and exit
    Tester,
    /// Serve the read interface only
    Server,
    /// Print the number of pooled proxies
    Count,
    /// Print one proxy, preferring the best-scored ones
    Random,
    /// Print every pooled proxy
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if cli.memory {
        settings.store.backend = StoreBackendKind::Memory;
    }
    logging::init(&settings.log)?;

    let store = open_store(&settings.store).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let crawler = ProxyCrawler::new(settings.crawler, store.clone())?;
            let checker = ProxyChecker::new(settings.checker, store.clone());
            let scheduler =
                Scheduler::standard(&settings.scheduler, crawler, checker, settings.server, store);
            scheduler.run(shutdown_signal()).await;
        }
        Commands::Getter => {
            let crawler = ProxyCrawler::new(settings.crawler, store.clone())?;
            let summary = crawler.crawl().await;
            println!(
                "Sources: {} ok, {} failed; follow-up pages: {}; new proxies: {}",
                summary.sources_ok, summary.sources_failed, summary.follow_ups_crawled, summary.added
            );
            println!("Pool size: {}", store.count().await?);
        }
        Commands::Tester => {
            let checker = ProxyChecker::new(settings.checker, store.clone());
            let summary = checker.test_pool().await?;
            println!(
                "Tested {}: {} valid, {} demoted, {} indeterminate",
                summary.tested, summary.promoted, summary.demoted, summary.indeterminate
            );
        }
        Commands::Server => {
            let token = CancellationToken::new();
            let stop = token.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                stop.cancel();
            });
            server::serve(settings.server, store, token).await?;
        }
        Commands::Count => println!("{}", store.count().await?),
        Commands::Random => match store.random().await {
            Ok(proxy) => println!("{}", proxy),
            Err(StoreError::PoolEmpty) => eprintln!("No proxies in the pool."),
            Err(e) => return Err(e.into()),
        },
        Commands::All => {
            for proxy in store.all().await? {
                println!("{}", proxy);
            }
        }
    }

    Ok(())
}

async fn open_store(settings: &StoreSettings) -> Result<ProxyStore> {
    match settings.backend {
        StoreBackendKind::Memory => {
            tracing::warn!("using the in-memory store; the pool is lost on exit");
            Ok(ProxyStore::in_memory(settings.bounds))
        }
        StoreBackendKind::Redis => {
            let backend = RedisBackend::connect(&settings.redis).await?;
            Ok(ProxyStore::new(Arc::new(backend), settings.bounds))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
