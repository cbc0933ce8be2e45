//! The root configuration type.

use serde::{Deserialize, Serialize};
use zephyr_telemetry::{LogConfig, LogFormat};

use crate::{
    CacheConfig, CoalesceConfig, CompressionConfig, ConfigError, CorsConfig, LoggingConfig,
    ServerConfig, TelemetryConfig,
};

/// Complete Zephyr configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and
/// environment variables over the defaults.
///
/// # Example
///
/// ```
/// use zephyr_config::ZephyrConfig;
///
/// let config = ZephyrConfig::default();
/// assert_eq!(config.server.port, 3000);
/// assert!(!config.coalesce.enabled);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ZephyrConfig {
    /// Route roots and ports.
    pub server: ServerConfig,
    /// CORS negotiation.
    pub cors: CorsConfig,
    /// Response and handler-resolution caches.
    pub cache: CacheConfig,
    /// Request coalescing.
    pub coalesce: CoalesceConfig,
    /// Response compression.
    pub compression: CompressionConfig,
    /// Logging and metrics.
    pub telemetry: TelemetryConfig,
}

impl ZephyrConfig {
    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression.level > 9 {
            return Err(ConfigError::invalid_value(
                "compression.level",
                format!("must be between 0 and 9, got {}", self.compression.level),
            ));
        }

        if self.coalesce.enabled && self.coalesce.retention_ms == 0 {
            return Err(ConfigError::invalid_value(
                "coalesce.retention_ms",
                "must be positive when coalescing is enabled",
            ));
        }

        if self.server.enable_tcp && self.server.port == self.server.tcp_port {
            return Err(ConfigError::invalid_value(
                "server.tcp_port",
                format!("conflicts with server.port {}", self.server.port),
            ));
        }

        if self.cors.credentials && self.cors.origin.is_wildcard() {
            return Err(ConfigError::invalid_value(
                "cors.origin",
                "`*` cannot be combined with credentials",
            ));
        }

        if self.cache.route_cache.enabled && self.cache.route_cache.max_size == 0 {
            return Err(ConfigError::invalid_value(
                "cache.route_cache.max_size",
                "must be positive when the route cache is enabled",
            ));
        }

        if self.telemetry.service_name.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "telemetry.service_name",
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Development preset: debug diagnostics, pretty logs, caches off.
    ///
    /// ```
    /// use zephyr_config::ZephyrConfig;
    ///
    /// let config = ZephyrConfig::development();
    /// assert!(config.server.debug);
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.debug = true;
        config.cache.enabled = false;
        config.telemetry.logging = LoggingConfig::from(&LogConfig::development());
        config
    }

    /// Production preset: JSON logs, metrics, response cache, compression
    /// and coalescing on.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.server.debug = false;
        config.cache.enabled = true;
        config.coalesce.enabled = true;
        config.compression.enabled = true;
        config.telemetry.logging = LoggingConfig::from(&LogConfig::production());
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.metrics.enabled = true;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OriginSetting;

    fn rejected_field(config: &ZephyrConfig) -> String {
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_presets_validate() {
        assert!(ZephyrConfig::default().validate().is_ok());
        assert!(ZephyrConfig::development().validate().is_ok());
        assert!(ZephyrConfig::production().validate().is_ok());
        assert!(ZephyrConfig::production().telemetry.metrics.enabled);
    }

    #[test]
    fn test_compression_level_bound() {
        let mut config = ZephyrConfig::default();
        config.compression.level = 9;
        assert!(config.validate().is_ok());
        config.compression.level = 10;
        assert_eq!(rejected_field(&config), "compression.level");
    }

    #[test]
    fn test_coalesce_needs_retention() {
        let mut config = ZephyrConfig::default();
        config.coalesce.retention_ms = 0;
        assert!(config.validate().is_ok());
        config.coalesce.enabled = true;
        assert_eq!(rejected_field(&config), "coalesce.retention_ms");
    }

    #[test]
    fn test_tcp_port_conflict() {
        let mut config = ZephyrConfig::default();
        config.server.tcp_port = config.server.port;
        assert!(config.validate().is_ok());
        config.server.enable_tcp = true;
        assert_eq!(rejected_field(&config), "server.tcp_port");
    }

    #[test]
    fn test_credentials_with_wildcard() {
        let mut config = ZephyrConfig::default();
        config.cors.credentials = true;
        assert_eq!(rejected_field(&config), "cors.origin");
        config.cors.origin = OriginSetting::Flag(true);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_route_cache_size() {
        let mut config = ZephyrConfig::default();
        config.cache.route_cache.max_size = 0;
        assert_eq!(rejected_field(&config), "cache.route_cache.max_size");
        config.cache.route_cache.enabled = false;
        assert!(config.validate().is_ok());
    }
}
