//! Tracing subscriber setup.
//!
//! Diagnostics always go to stderr so stdout stays free for command output.
//! With `logging.file_logging` enabled, a daily-rolling copy is also written
//! to `{data_dir}/logs/freddie.log.<date>` through a non-blocking writer.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;
use crate::error::{FreddieError, Result};

/// Filter used when neither `RUST_LOG` nor `logging.filter` is set.
pub const DEFAULT_FILTER: &str = "freddie=info,reqwest=warn";

/// Build the filter: `RUST_LOG` wins, then the configured directive, then
/// [`DEFAULT_FILTER`].
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    })
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
///
/// # Errors
///
/// Returns [`FreddieError::Config`] if the log directory cannot be created or
/// a global subscriber is already installed.
pub fn init(config: &LoggingConfig, data_dir: &Path) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if !config.file_logging {
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(env_filter(config))
            .try_init()
            .map_err(|e| FreddieError::Config(format!("failed to install logger: {e}")))?;
        return Ok(None);
    }

    let logs_dir = crate::app_dirs::logs_dir_in(data_dir);
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        FreddieError::Config(format!(
            "failed to create log directory {}: {e}",
            logs_dir.display()
        ))
    })?;
    let appender = tracing_appender::rolling::daily(&logs_dir, "freddie.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(env_filter(config))
        .try_init()
        .map_err(|e| FreddieError::Config(format!("failed to install logger: {e}")))?;

    tracing::debug!(path = %logs_dir.display(), "file logging enabled");
    Ok(Some(guard))
}
