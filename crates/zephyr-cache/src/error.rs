//! Cache errors.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by cache backends and policy loading.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A backend storage operation failed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored entry could not be decoded.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),

    /// A `cache.toml` override could not be parsed.
    #[error("invalid cache override in {path}: {source}")]
    Override {
        /// Override file.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: toml::de::Error,
    },
}

impl CacheError {
    /// Creates an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupt-entry error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}
