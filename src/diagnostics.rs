//! Logging setup.
//!
//! Everything goes to stderr so stdout stays free for the host JSON
//! protocol. When enabled, a daily log file is also written under
//! [`crate::paper_dirs::logs_dir`].

pub mod log_rotation;

use crate::config::LoggingConfig;
use crate::error::{PaperError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Keeps the background log-file writer alive. Drop it last so buffered
/// lines are flushed on exit.
#[derive(Debug)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Build the event filter: `RUST_LOG` when set, else the configured level.
///
/// # Errors
///
/// Returns an error if the configured directive does not parse.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| PaperError::Logging(format!("invalid log level `{level}`: {e}"))),
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log directory cannot be
/// created, or a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig, logs_dir: &Path) -> Result<LogGuard> {
    let filter = build_filter(&config.level)?;

    let mut pruned = 0;
    let (file_layer, guard) = if config.file {
        std::fs::create_dir_all(logs_dir)?;
        pruned = log_rotation::prune_old_logs(logs_dir);
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(log_rotation::LOG_FILE_PREFIX)
            .filename_suffix(log_rotation::LOG_FILE_SUFFIX)
            .build(logs_dir)
            .map_err(|e| PaperError::Logging(format!("cannot open log file: {e}")))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| PaperError::Logging(e.to_string()))?;

    if pruned > 0 {
        tracing::debug!(pruned, "removed old log files");
    }
    Ok(LogGuard { _file: guard })
}
