//! Tracing subscriber setup
//!
//! Up to three sinks: stdout, `runtime.log` (every level) and `error.log`
//! (errors only), all sharing one level filter.

use crate::Result;
use anyhow::Context;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const RUNTIME_LOG: &str = "runtime.log";
pub const ERROR_LOG: &str = "error.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub enabled: bool,
    pub console: bool,
    pub file: bool,
    pub runtime_file: bool,
    pub error_file: bool,
    pub level: String,
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            console: true,
            file: true,
            runtime_file: true,
            error_file: true,
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
        }
    }
}

/// Log files opened for appending
#[derive(Debug, Default)]
pub struct LogFiles {
    pub runtime: Option<File>,
    pub error: Option<File>,
}

impl LogFiles {
    /// Open the files the config asks for, creating the directory on demand
    pub fn open(config: &LogConfig) -> Result<Self> {
        if !(config.enabled && config.file) {
            return Ok(Self::default());
        }

        let runtime = config
            .runtime_file
            .then(|| append(&config.dir, RUNTIME_LOG))
            .transpose()?;
        let error = config
            .error_file
            .then(|| append(&config.dir, ERROR_LOG))
            .transpose()?;

        Ok(Self { runtime, error })
    }
}

fn append(dir: &Path, name: &str) -> Result<File> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let path = dir.join(name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Install the global subscriber
pub fn init(config: &LogConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid LOG_LEVEL '{}'", config.level))?;
    let files = LogFiles::open(config)?;

    let console = config.console.then(|| {
        fmt::layer()
            .with_thread_ids(true)
            .with_target(true)
    });
    let runtime = files.runtime.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_thread_ids(true)
            .with_writer(Mutex::new(file))
    });
    let error = files.error.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_thread_ids(true)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::ERROR)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(runtime)
        .with(error)
        .try_init()
        .context("a global logger is already installed")?;

    Ok(())
}
