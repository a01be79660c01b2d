use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Target for structured runtime events (plugin loads, rendered steps).
/// These end up as JSON lines in the event log.
pub const EVENT_TARGET: &str = "flowdeck::events";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub log_file: String,
    pub event_file: String,
}

impl LogConfig {
    pub fn new(log_dir: PathBuf, log_level: impl Into<String>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
            log_file: "flowdeck.log".to_string(),
            event_file: "events.json".to_string(),
        }
    }
}

/// Installs the global subscriber:
/// - stderr, filtered by `log_level` (or `RUST_LOG` when set)
/// - a daily rolling plain-text log
/// - a daily rolling JSON log with only [`EVENT_TARGET`] events
///
/// A second call is a no-op.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log dir {}", config.log_dir.display()))?;

    // per-layer filters: the event log ignores the console level
    let level_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(level_filter());

    let txt_appender = rolling(&config.log_dir, &config.log_file);
    let txt_layer = fmt::layer()
        .with_writer(txt_appender)
        .with_ansi(false)
        .with_filter(level_filter());

    let json_appender = rolling(&config.log_dir, &config.event_file);
    let json_layer = fmt::layer()
        .json()
        .with_writer(json_appender)
        .with_target(true)
        .with_filter(EnvFilter::new(format!("{EVENT_TARGET}=info")));

    let installed = Registry::default()
        .with(stderr_layer)
        .with(txt_layer)
        .with(json_layer)
        .try_init();

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

fn rolling(dir: &Path, file: &str) -> RollingFileAppender {
    RollingFileAppender::new(Rotation::DAILY, dir, file)
}
