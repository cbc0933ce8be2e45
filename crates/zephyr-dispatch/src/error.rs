//! Dispatch errors for connection-oriented protocols.
//!
//! HTTP failures never surface here: they are rendered into responses by
//! [`ZephyrError::into_response`](zephyr_core::ZephyrError::into_response).

use std::io;

use thiserror::Error;
use zephyr_router::ProtocolType;

/// Result type for connection dispatch.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors raised while binding or driving a connection.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No route of the protocol matches the path.
    #[error("no {protocol} route for `{path}`")]
    NoRoute {
        /// Protocol of the attempted connection.
        protocol: ProtocolType,
        /// Requested path.
        path: String,
    },

    /// The connection's outbound side is gone.
    #[error("connection {connection_id} is closed")]
    ConnectionClosed {
        /// Connection identifier.
        connection_id: String,
    },

    /// Transport failure reported by the host runtime.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl DispatchError {
    pub(crate) fn no_route(protocol: ProtocolType, path: impl Into<String>) -> Self {
        Self::NoRoute {
            protocol,
            path: path.into(),
        }
    }

    pub(crate) fn connection_closed(connection_id: impl std::fmt::Display) -> Self {
        Self::ConnectionClosed {
            connection_id: connection_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = DispatchError::no_route(ProtocolType::WebSocket, "/chat");
        assert_eq!(err.to_string(), "no websocket route for `/chat`");

        let err = DispatchError::from(io::Error::new(io::ErrorKind::BrokenPipe, "peer reset"));
        assert_eq!(err.to_string(), "transport error: peer reset");
    }
}
