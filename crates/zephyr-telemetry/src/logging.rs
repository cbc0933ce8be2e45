//! Structured logging.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a
//! single `fmt` layer. `RUST_LOG`, when set, takes precedence over the
//! configured level.
//!
//! ```rust,no_run
//! use zephyr_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(path = "/users/7", status = 200, "request handled");
//! # Ok::<(), zephyr_telemetry::TelemetryError>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

static LOGGING_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line, human oriented.
    Pretty,
    /// Single line, human oriented.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether to install a subscriber at all.
    pub enabled: bool,
    /// Default filter directives, e.g. `info` or `zephyr_dispatch=debug,info`.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Colored output for the human formats.
    pub ansi: bool,
    /// Include the module path of each event.
    pub include_target: bool,
    /// Include source file and line.
    pub file_line_info: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Verbose, human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            ansi: true,
            include_target: true,
            file_line_info: true,
        }
    }

    /// JSON lines at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            ansi: false,
            include_target: true,
            file_line_info: false,
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails with [`TelemetryError::AlreadyInitialized`] when called a second
/// time, and with [`TelemetryError::LoggingInit`] on an invalid filter.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }
    if LOGGING_INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(TelemetryError::AlreadyInitialized("logging"));
    }

    let filter = resolve_filter(&config.level)?;
    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(config.include_target)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(config.ansi)
            .with_target(config.include_target)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(config.ansi)
            .with_target(config.include_target)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Parses filter directives.
pub fn create_env_filter(directives: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid log filter `{directives}`: {e}")))
}

fn resolve_filter(default_directives: &str) -> TelemetryResult<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => create_env_filter(&directives),
        _ => create_env_filter(default_directives),
    }
}
