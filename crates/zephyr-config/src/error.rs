//! Errors raised while loading or validating a [`ZephyrConfig`](crate::ZephyrConfig).

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("config file {path} does not exist")]
    FileNotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read config file {path}")]
    Read {
        /// The path that was read.
        path: PathBuf,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The TOML document is malformed.
    #[error("malformed TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// The merged document does not fit the config schema, or a JSON
    /// source is malformed.
    #[error("config does not match schema: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Neither `toml` nor `json`.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// A value parsed but failed validation.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted field path, e.g. `server.tcp_port`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A `ZEPHYR__*` variable could not be mapped onto the document.
    #[error("environment variable {var}: {reason}")]
    EnvParseError {
        /// Variable name as found in the environment.
        var: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A `.env` file was present but unreadable.
    #[error(".env: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

impl ConfigError {
    pub(crate) fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub(crate) fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Validation failure on `field`.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// The offending field for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_names_path() {
        let err = ConfigError::file_not_found("/etc/zephyr/zephyr.toml");
        assert_eq!(
            err.to_string(),
            "config file /etc/zephyr/zephyr.toml does not exist"
        );
    }

    #[test]
    fn test_validation_message_leads_with_field() {
        let err = ConfigError::invalid_value("compression.level", "must be at most 9");
        assert_eq!(err.to_string(), "compression.level: must be at most 9");
        assert_eq!(err.field(), Some("compression.level"));
    }

    #[test]
    fn test_env_error_carries_variable() {
        let err = ConfigError::env_parse_error("ZEPHYR__SERVER", "expected PREFIX__SECTION__KEY");
        assert_eq!(
            err.to_string(),
            "environment variable ZEPHYR__SERVER: expected PREFIX__SECTION__KEY"
        );
        assert_eq!(err.field(), None);
    }
}
