//! Tracing setup.
//!
//! Two layers:
//! - stdout, filtered by `RUST_LOG` (default `info`)
//! - a per-run error log at `warn` level, named
//!   `expiration_downloader_errors_<YYYY-mm-dd_HH-MM>.log`
//!
//! The error log is optional: commands that never touch the network pass no
//! directory and leave no file behind. When present, the returned guard
//! flushes the file writer on drop, so `run` holds it until the process is
//! done.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, EXIT_CONFIG};

pub fn error_log_name() -> String {
    format!("expiration_downloader_errors_{}.log", Local::now().format("%Y-%m-%d_%H-%M"))
}

/// Install the global subscriber.
///
/// With `error_log_dir`, also returns the file writer guard and the log path.
pub fn init_logging(error_log_dir: Option<&Path>) -> Result<Option<(WorkerGuard, PathBuf)>, AppError> {
    let stdout_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact().with_filter(stdout_filter);

    let (file_layer, error_log) = match error_log_dir {
        Some(dir) => {
            let (appender, path) = error_log_appender(dir)?;
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(LevelFilter::WARN);
            (Some(layer), Some((guard, path)))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to install logger: {e}")))?;

    Ok(error_log)
}

fn error_log_appender(log_dir: &Path) -> Result<(RollingFileAppender, PathBuf), AppError> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to create log dir '{}': {e}", log_dir.display())))?;

    let name = error_log_name();
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&name)
        .build(log_dir)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to open error log in '{}': {e}", log_dir.display())))?;
    Ok((appender, log_dir.join(name)))
}
