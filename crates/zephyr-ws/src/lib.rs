//! # Zephyr WS
//!
//! WebSocket support for the Zephyr dispatcher, independent of any
//! particular transport.
//!
//! The host runtime performs the upgrade and owns the socket. For each
//! connection it creates a [`Connection`] (an outbound channel it drains to
//! the wire), binds a [`WsSession`] to the matched [`WebSocketRoute`] and
//! feeds inbound frames into the session.
//!
//! - [`WsContext`] - Per-connection context: params, headers, state bag, topics
//! - [`TopicRegistry`] - Topic pub/sub between connections of one dispatcher
//! - [`SyncLayer`] - Keyed shared state with validated updates and broadcast
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use zephyr_core::Params;
//! use zephyr_ws::{ws_fn, Connection, Message, TopicRegistry, WsContext, WsSession};
//!
//! # tokio_test::block_on(async {
//! let route = Arc::new(ws_fn(|ctx: WsContext, message: Message| async move {
//!     let _ = ctx.send(message);
//! }));
//!
//! let (connection, mut outbound) = Connection::channel();
//! let ctx = WsContext::new(connection, "/echo", Params::new(), TopicRegistry::new());
//! let mut session = WsSession::open(route, ctx).await;
//!
//! session.handle(Message::text("ping")).await;
//! assert_eq!(outbound.recv().await, Some(Message::text("ping")));
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/zephyr-ws/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod connection;
mod context;
mod error;
mod message;
mod route;
mod session;
pub mod sync;
mod topics;

pub use connection::{Connection, ConnectionId, Outbound};
pub use context::WsContext;
pub use error::{CloseCode, SyncError, SyncResult, WsError, WsResult};
pub use message::{CloseFrame, Message};
pub use route::{ws_fn, FnWsRoute, SharedWsRoute, WebSocketRoute};
pub use session::WsSession;
pub use sync::{
    FileStore, MemoryStore, SharedSyncStore, SyncFrame, SyncLayer, SyncLayerBuilder, SyncState,
    SyncStats, SyncStore,
};
pub use topics::{TopicRegistry, TopicStats};
