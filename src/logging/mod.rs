//! Structured logging for the processing tools
//!
//! Console output through `tracing-subscriber`'s fmt layer, optional JSON
//! files through `tracing-appender`, and correlation ids so every line of a
//! frame pair can be traced back to its run.

pub mod config;
pub mod spans;

use anyhow::{anyhow, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub use config::LoggingConfig;
pub use spans::PairSpan;

/// File name prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "so2cam.log";

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over the configured levels when set. The returned guard
/// flushes the file writer on drop and must be held until the program exits.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    config.validate().map_err(|e| anyhow!(e))?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    let mut layers = Vec::new();
    let mut guard = None;

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_line_number(config.include_file_location)
            .with_file(config.include_file_location);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_dir) = config.log_directory {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json();
        layers.push(file_layer.boxed());
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("failed to install logging subscriber: {}", e))?;

    tracing::debug!(?config, "logging initialized");
    Ok(guard)
}

/// Fresh id tying together the log lines of one run or one frame pair.
pub fn new_correlation_id() -> Uuid {
    Uuid::new_v4()
}
