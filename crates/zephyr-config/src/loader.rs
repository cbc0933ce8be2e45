//! Layered configuration loading.
//!
//! Layers are merged as JSON documents, so a file only needs the fields it
//! changes. The merged document is deserialized once, at [`ConfigLoader::load`].

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::{ConfigError, ZephyrConfig};

/// Default environment prefix.
pub const ENV_PREFIX: &str = "ZEPHYR";

/// Configuration loader.
///
/// Later layers override earlier ones:
/// 1. Defaults or a preset
/// 2. Configuration files (TOML or JSON)
/// 3. Inline strings
/// 4. Environment variables `PREFIX__SECTION__KEY`
///
/// # Example
///
/// ```no_run
/// use zephyr_config::ConfigLoader;
///
/// # fn main() -> Result<(), zephyr_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_dotenv()?
///     .with_optional_file("zephyr.toml")?
///     .with_env_prefix("ZEPHYR")
///     .load()?;
/// # let _ = config;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    document: Value,
    env_prefix: Option<String>,
    env_vars: Option<Vec<(String, String)>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Starts from [`ZephyrConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&ZephyrConfig::default())
    }

    /// Starts from [`ZephyrConfig::development`].
    ///
    /// ```
    /// use zephyr_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert!(config.server.debug);
    /// ```
    #[must_use]
    pub fn with_development(self) -> Self {
        Self {
            document: to_document(&ZephyrConfig::development()),
            ..self
        }
    }

    /// Starts from [`ZephyrConfig::production`].
    #[must_use]
    pub fn with_production(self) -> Self {
        Self {
            document: to_document(&ZephyrConfig::production()),
            ..self
        }
    }

    fn from_config(config: &ZephyrConfig) -> Self {
        Self {
            document: to_document(config),
            env_prefix: None,
            env_vars: None,
        }
    }

    /// Merges a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, malformed or has an
    /// unsupported extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;
        let layer = parse_document(&content, &format)?;
        merge(&mut self.document, layer);
        Ok(self)
    }

    /// Merges a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merges inline content in `format` (`toml` or `json`).
    ///
    /// ```
    /// use zephyr_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nport = 8080", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.port, 8080);
    /// assert_eq!(config.server.tcp_port, 4000);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer = parse_document(content, &format.to_lowercase())?;
        merge(&mut self.document, layer);
        Ok(self)
    }

    /// Loads `.env` into the process environment. A missing file is not an
    /// error.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Enables environment overrides under `prefix`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Reads overrides from `vars` instead of the process environment.
    #[must_use]
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Applies environment overrides, deserializes and validates.
    ///
    /// # Errors
    ///
    /// Fails on malformed overrides, unknown or mistyped fields, and
    /// constraint violations.
    pub fn load(self) -> Result<ZephyrConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load) without the final validation.
    pub fn load_unvalidated(mut self) -> Result<ZephyrConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars = self
                .env_vars
                .take()
                .unwrap_or_else(|| std::env::vars().collect());
            for (key, value) in vars {
                apply_env_var(&mut self.document, &prefix, &key, &value)?;
            }
        }
        Ok(serde_json::from_value(self.document)?)
    }
}

fn to_document(config: &ZephyrConfig) -> Value {
    serde_json::to_value(config).unwrap_or_else(|_| Value::Object(Map::new()))
}

fn parse_document(content: &str, format: &str) -> Result<Value, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str::<Value>(content)?),
        "json" => Ok(serde_json::from_str::<Value>(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Deep-merges `layer` into `base`. Tables merge key by key, anything else
/// replaces.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Applies `PREFIX__SECTION__KEY=value`. Variables outside the prefix are
/// ignored. Values for string fields are taken verbatim; others are read
/// as JSON, falling back to a string.
fn apply_env_var(
    document: &mut Value,
    prefix: &str,
    key: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let Some(rest) = key
        .strip_prefix(prefix)
        .and_then(|k| k.strip_prefix("__"))
    else {
        return Ok(());
    };

    let path: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
    if path.len() < 2 || path.iter().any(String::is_empty) {
        return Err(ConfigError::env_parse_error(key, "expected PREFIX__SECTION__KEY"));
    }

    let mut node = document;
    for segment in &path {
        let Value::Object(map) = node else {
            return Err(ConfigError::env_parse_error(
                key,
                format!("`{segment}` is not inside a table"),
            ));
        };
        node = map.entry(segment.clone()).or_insert(Value::Null);
    }

    *node = if node.is_string() {
        Value::String(value.to_string())
    } else {
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheBackendKind, OriginSetting};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, ZephyrConfig::default());
    }

    #[test]
    fn test_toml_file_merges_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [server]
            api_dir = "app/routes"
            enable_tcp = true

            [cache]
            enabled = true
            backend = "file"

            [cache.route_cache]
            max_size = 50
            "#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.api_dir.to_str(), Some("app/routes"));
        assert!(config.server.enable_tcp);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cache.backend, CacheBackendKind::File);
        assert_eq!(config.cache.route_cache.max_size, 50);
        assert_eq!(config.cache.route_cache.ttl, 300);
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"cors": {{"origin": ["https://a.test"], "credentials": true}}}}"#)
            .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.cors.origin, OriginSetting::Many(vec!["https://a.test".into()]));
        assert!(config.cors.credentials);
    }

    #[test]
    fn test_missing_and_optional_files() {
        assert!(matches!(
            ConfigLoader::new().with_file("/nonexistent/zephyr.toml"),
            Err(ConfigError::FileNotFound { .. })
        ));
        assert!(ConfigLoader::new()
            .with_optional_file("/nonexistent/zephyr.toml")
            .is_ok());
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(
            ConfigLoader::new().with_string("port: 1", "yaml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unknown_field_fails_load() {
        let loader = ConfigLoader::new()
            .with_string("[server]\nhttp_addr = \"0.0.0.0:80\"", "toml")
            .unwrap();
        assert!(matches!(loader.load(), Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_later_string_wins() {
        let config = ConfigLoader::new()
            .with_string("[compression]\nlevel = 3\nenabled = true", "toml")
            .unwrap()
            .with_string(r#"{"compression": {"level": 7}}"#, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.compression.level, 7);
        assert!(config.compression.enabled);
    }

    #[test]
    fn test_env_overrides() {
        let config = ConfigLoader::new()
            .with_env_prefix("zephyr")
            .with_env_vars([
                ("ZEPHYR__SERVER__PORT", "8080"),
                ("ZEPHYR__SERVER__API_DIR", "routes"),
                ("ZEPHYR__SERVER__MIDDLEWARE_DIR", "src/middleware"),
                ("ZEPHYR__COALESCE__ENABLED", "true"),
                ("ZEPHYR__CACHE__ROUTE_CACHE__MAX_SIZE", "10"),
                ("ZEPHYR__CACHE__VARY", r#"["accept-language"]"#),
                ("ZEPHYR__TELEMETRY__SERVICE_NAME", "123"),
                ("OTHER__SERVER__PORT", "1"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.api_dir.to_str(), Some("routes"));
        assert_eq!(
            config.server.middleware_dir.as_deref().and_then(Path::to_str),
            Some("src/middleware")
        );
        assert!(config.coalesce.enabled);
        assert_eq!(config.cache.route_cache.max_size, 10);
        assert_eq!(config.cache.vary, vec!["accept-language"]);
        assert_eq!(config.telemetry.service_name, "123");
    }

    #[test]
    fn test_env_override_errors() {
        let malformed = ConfigLoader::new()
            .with_env_prefix("ZEPHYR")
            .with_env_vars([("ZEPHYR__PORT", "1")])
            .load();
        assert!(matches!(malformed, Err(ConfigError::EnvParseError { .. })));

        let mistyped = ConfigLoader::new()
            .with_env_prefix("ZEPHYR")
            .with_env_vars([("ZEPHYR__SERVER__PORT", "eighty")])
            .load();
        assert!(matches!(mistyped, Err(ConfigError::JsonError(_))));

        let nested_scalar = ConfigLoader::new()
            .with_env_prefix("ZEPHYR")
            .with_env_vars([("ZEPHYR__SERVER__PORT__VALUE", "1")])
            .load();
        assert!(matches!(nested_scalar, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_env_override_validated() {
        let result = ConfigLoader::new()
            .with_env_prefix("ZEPHYR")
            .with_env_vars([("ZEPHYR__COMPRESSION__LEVEL", "12")])
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
