//! Error types for WebSocket connections and the sync layer.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use zephyr_core::ValidationError;

/// Result type for connection operations.
pub type WsResult<T> = Result<T, WsError>;

/// Result type for sync layer operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while talking to a connection.
#[derive(Debug, Error)]
pub enum WsError {
    /// The outbound side of the connection is gone.
    #[error("connection {connection_id} is closed")]
    ConnectionClosed {
        /// The connection that could not be reached.
        connection_id: String,
    },

    /// An inbound payload could not be decoded.
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),

    /// An outbound payload could not be encoded.
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl WsError {
    /// Creates a connection closed error.
    pub fn connection_closed(connection_id: impl fmt::Display) -> Self {
        Self::ConnectionClosed {
            connection_id: connection_id.to_string(),
        }
    }

    /// Creates a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    /// Returns true if the connection cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::Transport(_))
    }
}

/// Errors raised by a [`SyncLayer`](crate::SyncLayer) or its store.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A proposed state was rejected by the schema. The shared state is
    /// unchanged.
    #[error("invalid state for `{key}`: {source}")]
    Validation {
        /// Sync key the update targeted.
        key: String,
        /// The schema's complaint.
        #[source]
        source: ValidationError,
    },

    /// Reading or writing a store file failed.
    #[error("sync store I/O failed for {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// State could not be converted to or from JSON.
    #[error("sync state codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A custom store failed.
    #[error("sync store failed: {0}")]
    Store(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an error for a custom [`SyncStore`](crate::SyncStore).
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Returns true for schema rejections.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Close codes sent in WebSocket close frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    Protocol = 1002,
    /// Unsupported data (1003).
    Unsupported = 1003,
    /// Invalid payload data (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Internal error (1011).
    InternalError = 1011,
}

impl CloseCode {
    /// Converts a wire code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::Protocol),
            1003 => Some(Self::Unsupported),
            1007 => Some(Self::InvalidPayload),
            1008 => Some(Self::PolicyViolation),
            1011 => Some(Self::InternalError),
            _ => None,
        }
    }

    /// Returns the wire code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::GoingAway => "GoingAway",
            Self::Protocol => "Protocol",
            Self::Unsupported => "Unsupported",
            Self::InvalidPayload => "InvalidPayload",
            Self::PolicyViolation => "PolicyViolation",
            Self::InternalError => "InternalError",
        };
        write!(f, "{name} ({})", self.as_u16())
    }
}
