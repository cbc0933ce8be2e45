//! Lifecycle of connection-oriented routes (WebSocket and TCP).

use std::fmt;

/// State of a long-lived connection.
///
/// ```text
/// Unbound ──open──▶ Open ──event──▶ Active ──close/error──▶ Closed
///                     └────────────close/error────────────────▲
/// ```
///
/// `Closed` is terminal. There is no reconnection or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Accepted but no route bound yet.
    #[default]
    Unbound,
    /// Bound to a route; the open callback ran.
    Open,
    /// At least one event (message, data) was delivered.
    Active,
    /// Closed or failed.
    Closed,
}

/// Something that happened on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// The route was bound and opened.
    Open,
    /// A message or data chunk arrived.
    Data,
    /// The peer or the server closed the connection.
    Close,
    /// A transport error occurred.
    Error,
}

impl ConnectionState {
    /// Returns the next state, or `None` when the event is not valid here
    /// and must be ignored.
    #[must_use]
    pub fn transition(self, event: ConnectionEvent) -> Option<Self> {
        match (self, event) {
            (Self::Unbound, ConnectionEvent::Open) => Some(Self::Open),
            (Self::Open | Self::Active, ConnectionEvent::Data) => Some(Self::Active),
            (Self::Closed, _) => None,
            (_, ConnectionEvent::Close | ConnectionEvent::Error) => Some(Self::Closed),
            _ => None,
        }
    }

    /// Returns true once the connection can no longer receive events.
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unbound => "unbound",
            Self::Open => "open",
            Self::Active => "active",
            Self::Closed => "closed",
        })
    }
}
