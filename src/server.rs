//! HTTP read interface over the pool

use crate::error::StoreError;
use crate::store::ProxyStore;
use crate::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::fmt;
use std::str::FromStr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Production server variants this build can run
pub const SUPPORTED_PROD_METHODS: &[&str] = &["axum"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppEnv {
    #[default]
    Dev,
    Prod,
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" | "test" => Ok(AppEnv::Dev),
            "prod" | "production" => Ok(AppEnv::Prod),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppEnv::Dev => write!(f, "dev"),
            AppEnv::Prod => write!(f, "prod"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Serve requests concurrently; when off, one request at a time
    pub threaded: bool,
    pub env: AppEnv,
    pub prod_method: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5555,
            threaded: true,
            env: AppEnv::Dev,
            prod_method: "axum".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Maps store failures onto HTTP responses
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::PoolEmpty => StatusCode::NOT_FOUND,
            StoreError::Backend(e) => {
                tracing::error!(error = %e, "store unavailable");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Routes only, without the environment-dependent layers
pub fn router(store: ProxyStore) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/random", get(random))
        .route("/all", get(all))
        .route("/count", get(count))
        .with_state(store)
}

/// The router with the layers the config asks for
pub fn app(config: &ServerConfig, store: ProxyStore) -> Router {
    let mut app = router(store);
    if !config.threaded {
        app = app.layer(GlobalConcurrencyLimitLayer::new(1));
    }
    if config.env == AppEnv::Dev {
        app = app.layer(TraceLayer::new_for_http());
    }
    app
}

async fn index() -> &'static str {
    "Welcome to Proxy Pool System"
}

async fn random(State(store): State<ProxyStore>) -> std::result::Result<String, ApiError> {
    Ok(store.random().await?.to_string())
}

async fn all(State(store): State<ProxyStore>) -> std::result::Result<String, ApiError> {
    let proxies = store.all().await?;
    Ok(proxies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n"))
}

async fn count(State(store): State<ProxyStore>) -> std::result::Result<String, ApiError> {
    Ok(store.count().await?.to_string())
}

/// Serve until `shutdown` is cancelled.
///
/// An unsupported production method is logged and the server returns
/// without binding.
pub async fn serve(config: ServerConfig, store: ProxyStore, shutdown: CancellationToken) -> Result<()> {
    let span = tracing::info_span!("server");
    async move {
        if config.env == AppEnv::Prod
            && !SUPPORTED_PROD_METHODS.contains(&config.prod_method.as_str())
        {
            tracing::error!(method = %config.prod_method, "unsupported APP_PROD_METHOD");
            return Ok(());
        }

        let listener = TcpListener::bind(config.addr()).await?;
        tracing::info!(addr = %listener.local_addr()?, env = %config.env, "serving proxy pool");
        axum::serve(listener, app(&config, store))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        tracing::info!("server stopped");
        Ok(())
    }
    .instrument(span)
    .await
}
