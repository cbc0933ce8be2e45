//! Per-connection context handed to WebSocket route callbacks.

use std::collections::HashMap;

use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use zephyr_core::Params;

use crate::connection::{Connection, ConnectionId};
use crate::error::{CloseCode, WsResult};
use crate::message::Message;
use crate::topics::TopicRegistry;

/// Everything a WebSocket route knows about its connection.
///
/// Created once per upgrade and kept for the whole session, so values put
/// in the state bag during `on_open` are visible to later callbacks.
#[derive(Debug, Clone)]
pub struct WsContext {
    connection: Connection,
    path: String,
    params: Params,
    query: Params,
    headers: HeaderMap,
    topics: TopicRegistry,
    state: HashMap<String, Value>,
}

impl WsContext {
    /// Creates a context for `connection`, upgraded at `path`.
    pub fn new(
        connection: Connection,
        path: impl Into<String>,
        params: Params,
        topics: TopicRegistry,
    ) -> Self {
        Self {
            connection,
            path: path.into(),
            params,
            query: Params::new(),
            headers: HeaderMap::new(),
            topics,
            state: HashMap::new(),
        }
    }

    /// Sets the query string of the upgrade request.
    #[must_use]
    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query = query.map(Params::from_query).unwrap_or_default();
        self
    }

    /// Sets the headers of the upgrade request.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Returns the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Returns the outbound handle.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the upgrade path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a dynamic segment captured from the route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Returns all captured segments.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns a query parameter of the upgrade request.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }

    /// Returns an upgrade request header as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sends a frame to this connection.
    pub fn send(&self, message: impl Into<Message>) -> WsResult<()> {
        self.connection.send(message)
    }

    /// Sends `value` as a JSON text frame to this connection.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> WsResult<()> {
        self.connection.send_json(value)
    }

    /// Asks the transport to close the connection.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> WsResult<()> {
        self.connection.close(code, reason)
    }

    /// Subscribes this connection to `topic`.
    pub fn subscribe(&self, topic: &str) -> bool {
        self.topics.subscribe(topic, &self.connection)
    }

    /// Unsubscribes this connection from `topic`.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.topics.unsubscribe(topic, self.connection.id())
    }

    /// Sends `message` to every subscriber of `topic`, this connection
    /// included if subscribed.
    pub fn publish(&self, topic: &str, message: impl Into<Message>) -> usize {
        self.topics.publish(topic, &message.into())
    }

    /// Returns the registry this context publishes to.
    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    /// Returns a value from the state bag.
    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Stores a value in the state bag.
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }
}
