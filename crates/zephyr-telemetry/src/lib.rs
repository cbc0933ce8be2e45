//! # Zephyr Telemetry
//!
//! Logging and metrics for Zephyr services.
//!
//! - [`logging`] - `tracing-subscriber` setup with JSON, pretty or compact output
//! - [`metrics`] - Prometheus recorder and the recording helpers the dispatcher calls
//!
//! Both subsystems are installed at most once per process.

#![doc(html_root_url = "https://docs.rs/zephyr-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, render_metrics, MetricsConfig, WsConnectionGuard};

/// Result type for telemetry setup.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
