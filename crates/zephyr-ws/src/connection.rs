//! Connection handles.
//!
//! A [`Connection`] is the outbound half of a socket: a cheap, cloneable
//! sender feeding a channel that the host transport drains and writes to
//! the wire. Topic subscriptions and sync layers keep clones of it.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{CloseCode, WsError, WsResult};
use crate::message::Message;

/// A unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new time-ordered ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Receiving end of a connection's outbound channel, owned by the transport.
pub type Outbound = mpsc::UnboundedReceiver<Message>;

/// Outbound handle to a connection.
///
/// Two handles are equal when they refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
}

impl Connection {
    /// Creates a handle with a fresh ID and the receiver the transport
    /// must drain.
    pub fn channel() -> (Self, Outbound) {
        Self::with_id(ConnectionId::new())
    }

    /// Creates a handle with a given ID.
    pub fn with_id(id: ConnectionId) -> (Self, Outbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// Returns the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame for the peer.
    pub fn send(&self, message: impl Into<Message>) -> WsResult<()> {
        self.tx
            .send(message.into())
            .map_err(|_| WsError::connection_closed(self.id))
    }

    /// Queues a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.send(Message::Text(text.into()))
    }

    /// Queues `value` serialized as a JSON text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> WsResult<()> {
        self.send(Message::json(value)?)
    }

    /// Queues a close frame.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> WsResult<()> {
        self.send(Message::close(code, reason))
    }

    /// Returns true once the transport dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[tokio::test]
    async fn test_send_reaches_outbound() {
        let (conn, mut rx) = Connection::channel();
        conn.send_text("hello").unwrap();
        conn.send_json(&serde_json::json!({"n": 1})).unwrap();

        assert_eq!(rx.recv().await, Some(Message::text("hello")));
        assert_eq!(rx.recv().await, Some(Message::text(r#"{"n":1}"#)));
    }

    #[test]
    fn test_send_after_transport_dropped() {
        let (conn, rx) = Connection::channel();
        drop(rx);
        assert!(conn.is_closed());
        let err = conn.send_text("late").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_clones_compare_equal() {
        let (conn, _rx) = Connection::channel();
        let (other, _other_rx) = Connection::channel();
        assert_eq!(conn, conn.clone());
        assert_ne!(conn, other);
    }
}
