//! Environment-driven settings

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::proxy::{CheckerConfig, CrawlerConfig, ProxyCrawler, RetryPolicy, SourceDescriptor};
use crate::scheduler::SchedulerConfig;
use crate::server::{AppEnv, ServerConfig};
use crate::store::{RedisSettings, ScoreBounds};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which sorted-set backend holds the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackendKind {
    #[default]
    Redis,
    Memory,
}

impl FromStr for StoreBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected 'redis' or 'memory', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreSettings {
    pub backend: StoreBackendKind,
    pub redis: RedisSettings,
    pub bounds: ScoreBounds,
}

/// Every setting the binary needs
#[derive(Debug, Clone)]
pub struct Settings {
    pub log: LogConfig,
    pub store: StoreSettings,
    pub scheduler: SchedulerConfig,
    pub crawler: CrawlerConfig,
    pub checker: CheckerConfig,
    pub server: ServerConfig,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; unset and blank values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let log_defaults = LogConfig::default();
        let log = LogConfig {
            enabled: env.flag("ENABLE_LOG", log_defaults.enabled)?,
            console: env.flag("ENABLE_LOG_CONSOLE", log_defaults.console)?,
            file: env.flag("ENABLE_LOG_FILE", log_defaults.file)?,
            runtime_file: env.flag("ENABLE_LOG_RUNTIME_FILE", log_defaults.runtime_file)?,
            error_file: env.flag("ENABLE_LOG_ERROR_FILE", log_defaults.error_file)?,
            level: env.string("LOG_LEVEL").unwrap_or(log_defaults.level),
            dir: env.string("LOG_DIR").map(PathBuf::from).unwrap_or(log_defaults.dir),
        };

        let redis_defaults = RedisSettings::default();
        let redis = RedisSettings {
            connection_string: env.string("REDIS_CONNECTION_STRING"),
            host: env.string("REDIS_HOST").unwrap_or(redis_defaults.host),
            port: env.parse("REDIS_PORT", redis_defaults.port)?,
            password: env.string("REDIS_PASSWORD"),
            db: env.parse("REDIS_DB", redis_defaults.db)?,
            key: env.string("REDIS_KEY").unwrap_or(redis_defaults.key),
        };

        let score_defaults = ScoreBounds::default();
        let bounds = ScoreBounds {
            min: env.parse("PROXY_SCORE_MIN", score_defaults.min)?,
            init: env.parse("PROXY_SCORE_INIT", score_defaults.init)?,
            max: env.parse("PROXY_SCORE_MAX", score_defaults.max)?,
        };
        if !(bounds.min < bounds.init && bounds.init <= bounds.max) {
            return Err(ConfigError::ScoreBounds {
                min: bounds.min,
                init: bounds.init,
                max: bounds.max,
            });
        }

        let store = StoreSettings {
            backend: env.parse("STORE_BACKEND", StoreBackendKind::default())?,
            redis,
            bounds,
        };

        let scheduler_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            enable_getter: env.flag("ENABLE_GETTER", scheduler_defaults.enable_getter)?,
            enable_tester: env.flag("ENABLE_TESTER", scheduler_defaults.enable_tester)?,
            enable_server: env.flag("ENABLE_SERVER", scheduler_defaults.enable_server)?,
            getter_cycle: env.secs("CYCLE_GETTER", scheduler_defaults.getter_cycle)?,
            tester_cycle: env.secs("CYCLE_TESTER", scheduler_defaults.tester_cycle)?,
        };

        let crawler_defaults = CrawlerConfig::default();
        let retry = RetryPolicy::new(
            env.parse("GETTER_RETRY_ATTEMPTS", crawler_defaults.retry.max_attempts)?,
            env.secs("GETTER_RETRY_WAIT", crawler_defaults.retry.wait)?,
        );
        let sources = match env.string("SOURCES_FILE") {
            Some(path) => load_sources(Path::new(&path))?,
            None => ProxyCrawler::default_sources(),
        };
        let crawler = CrawlerConfig::new()
            .with_timeout(env.secs("GET_TIMEOUT", crawler_defaults.timeout)?)
            .with_retry(retry)
            .with_workers(env.parse("GETTER_WORKERS", crawler_defaults.workers)?)
            .with_queue_idle(env.secs("GETTER_QUEUE_IDLE", crawler_defaults.queue_idle)?)
            .with_persist_embedded_base64(
                env.flag("PERSIST_EMBEDDED_BASE64", crawler_defaults.persist_embedded_base64)?,
            )
            .with_debug_page(env.string("DEBUG_PAGE_PATH").map(PathBuf::from))
            .with_sources(sources);

        let checker_defaults = CheckerConfig::default();
        let checker = CheckerConfig::new()
            .with_timeout(env.secs("TEST_TIMEOUT", checker_defaults.timeout)?)
            .with_batch_size(env.parse("TEST_BATCH", checker_defaults.batch_size)?)
            .with_test_url(env.string("TEST_URL").unwrap_or(checker_defaults.test_url))
            .with_valid_statuses(env.statuses("TEST_VALID_STATUS", checker_defaults.valid_statuses)?)
            .with_anonymous(env.flag("TEST_ANONYMOUS", checker_defaults.anonymous)?)
            .with_anonymous_url(
                env.string("TEST_ANONYMOUS_URL")
                    .unwrap_or(checker_defaults.anonymous_url),
            );

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env.string("API_HOST").unwrap_or(server_defaults.host),
            port: env.parse("API_PORT", server_defaults.port)?,
            threaded: env.flag("API_THREADED", server_defaults.threaded)?,
            env: env.parse("APP_ENV", AppEnv::default())?,
            prod_method: env
                .string("APP_PROD_METHOD")
                .unwrap_or(server_defaults.prod_method),
        };

        Ok(Self {
            log,
            store,
            scheduler,
            crawler,
            checker,
            server,
        })
    }
}

/// Load source descriptors from a JSON list of `{url, parse_type}` objects
pub fn load_sources(path: &Path) -> Result<Vec<SourceDescriptor>, ConfigError> {
    let sources_error = |reason: String| ConfigError::Sources {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| sources_error(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| sources_error(e.to_string()))
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key,
                    value: raw,
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn statuses(&self, key: &'static str, default: Vec<u16>) -> Result<Vec<u16>, ConfigError> {
        let Some(raw) = self.string(key) else {
            return Ok(default);
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>().map_err(|e| ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ParseType;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();

        assert_eq!(settings.store.backend, StoreBackendKind::Redis);
        assert_eq!(settings.store.redis, RedisSettings::default());
        assert_eq!(settings.store.bounds, ScoreBounds::default());
        assert_eq!(settings.scheduler, SchedulerConfig::default());
        assert_eq!(settings.server, ServerConfig::default());
        assert_eq!(settings.log, LogConfig::default());
        assert_eq!(settings.crawler.sources, ProxyCrawler::default_sources());
        assert_eq!(settings.crawler.workers, 6);
        assert_eq!(settings.checker.test_url, "http://www.baidu.com");
        assert_eq!(settings.checker.valid_statuses, vec![200, 206, 302]);
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("STORE_BACKEND", "memory"),
            ("REDIS_PORT", "6380"),
            ("PROXY_SCORE_MAX", "50"),
            ("ENABLE_GETTER", "false"),
            ("CYCLE_TESTER", "5"),
            ("GETTER_RETRY_ATTEMPTS", "1"),
            ("GETTER_QUEUE_IDLE", "1"),
            ("PERSIST_EMBEDDED_BASE64", "no"),
            ("TEST_VALID_STATUS", "200, 204"),
            ("TEST_ANONYMOUS", "1"),
            ("API_PORT", "8000"),
            ("API_THREADED", "False"),
            ("APP_ENV", "prod"),
            ("LOG_DIR", "/tmp/pool-logs"),
        ])
        .unwrap();

        assert_eq!(settings.store.backend, StoreBackendKind::Memory);
        assert_eq!(settings.store.redis.port, 6380);
        assert_eq!(settings.store.bounds.max, 50);
        assert!(!settings.scheduler.enable_getter);
        assert_eq!(settings.scheduler.tester_cycle, Duration::from_secs(5));
        assert_eq!(settings.crawler.retry.max_attempts, 1);
        assert_eq!(settings.crawler.queue_idle, Duration::from_secs(1));
        assert!(!settings.crawler.persist_embedded_base64);
        assert_eq!(settings.checker.valid_statuses, vec![200, 204]);
        assert!(settings.checker.anonymous);
        assert_eq!(settings.server.port, 8000);
        assert!(!settings.server.threaded);
        assert_eq!(settings.server.env, AppEnv::Prod);
        assert_eq!(settings.log.dir, PathBuf::from("/tmp/pool-logs"));
    }

    #[test]
    fn test_blank_value_uses_default() {
        let settings = settings(&[("API_PORT", "  "), ("REDIS_PASSWORD", "")]).unwrap();
        assert_eq!(settings.server.port, 5555);
        assert_eq!(settings.store.redis.password, None);
    }

    #[test]
    fn test_invalid_value_names_key() {
        let err = settings(&[("API_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "API_PORT", .. }));

        let err = settings(&[("ENABLE_TESTER", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("ENABLE_TESTER"));

        let err = settings(&[("TEST_VALID_STATUS", "200,ok")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TEST_VALID_STATUS", .. }));
    }

    #[test]
    fn test_score_bounds_validated() {
        let err = settings(&[("PROXY_SCORE_INIT", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ScoreBounds { min: 0, init: 0, max: 100 }));

        let err = settings(&[("PROXY_SCORE_INIT", "101")]).unwrap_err();
        assert!(matches!(err, ConfigError::ScoreBounds { .. }));

        assert!(settings(&[("PROXY_SCORE_INIT", "100")]).is_ok());
    }

    #[test]
    fn test_sources_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sources.json");
        std::fs::write(
            &path,
            r#"[{"url": "http://127.0.0.1:9/list", "parse_type": "json-lines"}]"#,
        )
        .unwrap();

        let loaded = settings(&[("SOURCES_FILE", path.to_str().unwrap())]).unwrap();
        assert_eq!(
            loaded.crawler.sources,
            vec![SourceDescriptor::new("http://127.0.0.1:9/list", ParseType::JsonLines)]
        );

        let missing = tmp.path().join("missing.json");
        let err = settings(&[("SOURCES_FILE", missing.to_str().unwrap())]).unwrap_err();
        assert!(matches!(err, ConfigError::Sources { .. }));
    }
}
