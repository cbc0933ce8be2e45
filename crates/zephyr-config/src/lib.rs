//! # Zephyr Config
//!
//! Typed configuration for a Zephyr service.
//!
//! - [`ServerConfig`] - route roots, ports, TCP switch
//! - [`CorsConfig`] - CORS negotiation
//! - [`CacheConfig`] - response cache and handler-resolution cache
//! - [`CoalesceConfig`] - request coalescing
//! - [`CompressionConfig`] - response compression
//! - [`TelemetryConfig`] - logging and metrics
//!
//! Unknown fields are rejected in every section.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! api_dir = "src/routes"
//! middleware_dir = "src/middleware"
//! port = 3000
//!
//! [cors]
//! origin = ["https://app.example.com"]
//! credentials = true
//!
//! [cache]
//! enabled = true
//! ttl = 60
//! vary = ["accept-language"]
//!
//! [cache.directives]
//! max_age = 60
//!
//! [cache.route_cache]
//! max_size = 1000
//!
//! [coalesce]
//! enabled = true
//! retention_ms = 100
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `ZEPHYR__SERVER__PORT=8080`
//! - `ZEPHYR__CACHE__ROUTE_CACHE__ENABLED=false`
//! - `ZEPHYR__CORS__ORIGIN='["https://a.test"]'`

#![doc(html_root_url = "https://docs.rs/zephyr-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::ZephyrConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::*;
pub use zephyr_telemetry::LogFormat;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
