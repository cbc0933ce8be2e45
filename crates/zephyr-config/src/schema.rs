//! Configuration schema types.
//!
//! Every section accepts a partial table: missing fields take their
//! defaults, unknown fields are rejected.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use zephyr_cache::{CacheDirectives, CachePolicy};
use zephyr_telemetry::{LogConfig, LogFormat, MetricsConfig};

/// Server section: route roots, ports, protocol switches.
///
/// # Example
///
/// ```
/// use zephyr_config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.api_dir.to_str(), Some("src/routes"));
/// assert_eq!(config.port, 3000);
/// assert!(!config.enable_tcp);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Root of HTTP, WebSocket and RPC route files.
    pub api_dir: PathBuf,
    /// Root of TCP handler files.
    pub tcp_dir: PathBuf,
    /// Directory of global middleware files.
    pub middleware_dir: Option<PathBuf>,
    /// Scan `tcp_dir` and accept TCP connections.
    pub enable_tcp: bool,
    /// HTTP and WebSocket port.
    pub port: u16,
    /// TCP port.
    pub tcp_port: u16,
    /// Verbose diagnostics.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_dir: PathBuf::from("src/routes"),
            tcp_dir: PathBuf::from("src/tcp"),
            middleware_dir: None,
            enable_tcp: false,
            port: 3000,
            tcp_port: 4000,
            debug: false,
        }
    }
}

/// Accepted origins, as written in configuration.
///
/// `true` reflects the request origin, `false` rejects every origin, a
/// string is sent verbatim (`"*"` for any), a list allows exactly those
/// origins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OriginSetting {
    /// Reflect or reject.
    Flag(bool),
    /// A single fixed value.
    One(String),
    /// An allow list.
    Many(Vec<String>),
}

impl Default for OriginSetting {
    fn default() -> Self {
        Self::One("*".to_string())
    }
}

impl OriginSetting {
    /// Returns `true` for the `*` wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::One(value) if value == "*")
    }
}

/// CORS section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Accepted origins.
    pub origin: OriginSetting,
    /// Methods announced to preflights.
    pub methods: Vec<String>,
    /// Request headers announced to preflights.
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to scripts.
    pub exposed_headers: Vec<String>,
    /// Send `Access-Control-Allow-Credentials: true`.
    pub credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: Option<u64>,
    /// Pass preflights on to the routes instead of answering them.
    pub preflight_continue: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: OriginSetting::default(),
            methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            exposed_headers: Vec::new(),
            credentials: false,
            max_age: Some(86_400),
            preflight_continue: false,
        }
    }
}

/// Where response bodies are stored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process map.
    #[default]
    Memory,
    /// One file per key under [`CacheConfig::dir`].
    File,
}

/// Handler-resolution cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RouteCacheConfig {
    /// Cache resolved routes by method and path.
    pub enabled: bool,
    /// Entry lifetime in seconds; `0` disables expiry.
    pub ttl: u64,
    /// Entry bound.
    pub max_size: usize,
}

impl Default for RouteCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: 300,
            max_size: 1000,
        }
    }
}

impl RouteCacheConfig {
    /// Entry lifetime, `None` when disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl > 0).then(|| Duration::from_secs(self.ttl))
    }
}

/// Response cache section.
///
/// ```
/// use zephyr_config::CacheConfig;
///
/// let toml = r#"
///     enabled = true
///     ttl = 30
///     vary = ["accept-language"]
///
///     [directives]
///     max_age = 30
/// "#;
/// let cache: CacheConfig = toml::from_str(toml).unwrap();
/// let policy = cache.policy();
/// assert!(policy.enabled);
/// assert_eq!(policy.cache_control(), "public, max-age=30");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache successful GET responses.
    pub enabled: bool,
    /// Storage for cached bodies.
    pub backend: CacheBackendKind,
    /// Directory of the file backend.
    pub dir: PathBuf,
    /// Entry lifetime in seconds; `0` disables expiry.
    pub ttl: u64,
    /// Entry bound of the memory backend.
    pub max_size: Option<usize>,
    /// Request headers that become part of the key.
    pub vary: Vec<String>,
    /// `Cache-Control` directives sent on hits.
    pub directives: CacheDirectives,
    /// Extra headers sent on hits.
    pub headers: IndexMap<String, String>,
    /// Handler-resolution cache.
    pub route_cache: RouteCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: CacheBackendKind::Memory,
            dir: PathBuf::from(".zephyr/cache"),
            ttl: 60,
            max_size: None,
            vary: Vec::new(),
            directives: CacheDirectives::default(),
            headers: IndexMap::new(),
            route_cache: RouteCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    /// The global response-cache policy routes start from.
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            enabled: self.enabled,
            ttl: (self.ttl > 0).then(|| Duration::from_secs(self.ttl)),
            vary: self.vary.clone(),
            directives: self.directives.clone(),
            default_headers: self.headers.clone(),
        }
    }
}

/// Request coalescing section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CoalesceConfig {
    /// Share in-flight work between identical requests.
    pub enabled: bool,
    /// How long a finished result stays joinable, in milliseconds.
    pub retention_ms: u64,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_ms: 100,
        }
    }
}

impl CoalesceConfig {
    /// Retention window.
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// Response compression section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    /// Compress eligible responses.
    pub enabled: bool,
    /// Compression level, 0-9.
    pub level: u32,
    /// Minimum body size in bytes.
    pub threshold: usize,
    /// Compressible content types; empty uses the built-in list.
    pub types: Vec<String>,
    /// Path prefixes never compressed.
    pub exclude: Vec<String>,
    /// Offer gzip.
    pub gzip: bool,
    /// Offer brotli.
    pub brotli: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 6,
            threshold: 1024,
            types: Vec::new(),
            exclude: Vec::new(),
            gzip: true,
            brotli: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Install a subscriber.
    pub enabled: bool,
    /// Default filter directives.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Colored output.
    pub ansi: bool,
    /// Include event targets.
    pub include_target: bool,
    /// Include source locations.
    pub file_line_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from(&LogConfig::production())
    }
}

impl From<&LogConfig> for LoggingConfig {
    fn from(config: &LogConfig) -> Self {
        Self {
            enabled: config.enabled,
            level: config.level.clone(),
            format: config.format,
            ansi: config.ansi,
            include_target: config.include_target,
            file_line_info: config.file_line_info,
        }
    }
}

impl LoggingConfig {
    /// Converts into the telemetry crate's settings.
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            format: self.format,
            ansi: self.ansi,
            include_target: self.include_target,
            file_line_info: self.file_line_info,
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder.
    pub enabled: bool,
    /// Request duration buckets in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        let defaults = MetricsConfig::default();
        Self {
            enabled: defaults.enabled,
            duration_buckets: defaults.duration_buckets,
        }
    }
}

impl MetricsSettings {
    /// Converts into the telemetry crate's settings.
    pub fn to_metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.enabled,
            duration_buckets: self.duration_buckets.clone(),
        }
    }
}

/// Telemetry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Name attached to log lines.
    pub service_name: String,
    /// Logging.
    pub logging: LoggingConfig,
    /// Metrics.
    pub metrics: MetricsSettings,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "zephyr".to_string(),
            logging: LoggingConfig::default(),
            metrics: MetricsSettings::default(),
        }
    }
}
