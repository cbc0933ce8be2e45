//! WebSocket sessions opened through the dispatcher.

use zephyr_core::ConnectionState;
use zephyr_telemetry::WsConnectionGuard;
use zephyr_ws::{CloseFrame, Message, WsContext, WsError, WsSession};

/// A routed WebSocket session.
///
/// The host transport forwards inbound frames to [`handle`](Self::handle)
/// and drains the connection's outbound channel. The session counts toward
/// `zephyr_ws_connections_active` until dropped.
pub struct WsHandle {
    session: WsSession,
    _active: WsConnectionGuard,
}

impl WsHandle {
    pub(crate) fn new(session: WsSession) -> Self {
        Self {
            session,
            _active: WsConnectionGuard::new(),
        }
    }

    /// Delivers an inbound frame.
    pub async fn handle(&mut self, message: Message) {
        self.session.handle(message).await;
    }

    /// Closes the session.
    pub async fn close(&mut self, frame: Option<CloseFrame>) {
        self.session.close(frame).await;
    }

    /// Reports a transport failure.
    pub async fn fail(&mut self, error: WsError) {
        self.session.fail(error).await;
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Returns the connection context.
    pub fn context(&self) -> &WsContext {
        self.session.context()
    }
}

impl std::fmt::Debug for WsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsHandle")
            .field("connection", &self.session.context().id())
            .field("path", &self.session.context().path())
            .field("state", &self.session.state())
            .finish()
    }
}
