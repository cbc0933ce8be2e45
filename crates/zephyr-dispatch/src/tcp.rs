//! Raw TCP connections.
//!
//! The host runtime owns the socket. It opens a [`TcpSession`] through the
//! dispatcher, feeds it inbound chunks, and drains the [`TcpOutbound`]
//! channel to write to the wire.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zephyr_core::{BoxFuture, ConnectionEvent, ConnectionState};
use zephyr_ws::ConnectionId;

use crate::error::{DispatchError, DispatchResult};

/// An instruction for the host transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpCommand {
    /// Write the bytes to the socket.
    Write(Bytes),
    /// Optionally write a final chunk, then shut the socket down.
    End(Option<Bytes>),
}

/// Receiving end of a TCP connection's command channel.
pub type TcpOutbound = mpsc::UnboundedReceiver<TcpCommand>;

/// Per-connection context handed to [`TcpHandler`] callbacks.
pub struct TcpContext {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<TcpCommand>,
    ended: bool,
    state: HashMap<String, Value>,
}

impl TcpContext {
    /// Creates a context and the channel the transport drains.
    pub fn channel(peer: Option<SocketAddr>) -> (Self, TcpOutbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Self {
            id: ConnectionId::new(),
            peer,
            tx,
            ended: false,
            state: HashMap::new(),
        };
        (ctx, rx)
    }

    /// Returns the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address, when the transport knows it.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queues `data` for writing and returns its length.
    ///
    /// # Errors
    ///
    /// Fails once the connection was ended or the transport dropped its
    /// receiver.
    pub fn write(&self, data: impl Into<Bytes>) -> DispatchResult<usize> {
        if self.ended {
            return Err(DispatchError::connection_closed(self.id));
        }
        let data = data.into();
        let len = data.len();
        self.tx
            .send(TcpCommand::Write(data))
            .map_err(|_| DispatchError::connection_closed(self.id))?;
        Ok(len)
    }

    /// Writes an optional final chunk and asks the transport to close.
    /// Later writes fail.
    ///
    /// # Errors
    ///
    /// Fails if the connection was already ended or the receiver is gone.
    pub fn end(&mut self, data: Option<Bytes>) -> DispatchResult<()> {
        if self.ended {
            return Err(DispatchError::connection_closed(self.id));
        }
        self.ended = true;
        self.tx
            .send(TcpCommand::End(data))
            .map_err(|_| DispatchError::connection_closed(self.id))
    }

    /// Returns true after [`end`](Self::end).
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Reads a value from the connection's state bag.
    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Stores a value in the connection's state bag.
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }
}

impl fmt::Debug for TcpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpContext")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

/// Callbacks of a TCP handler. Every callback is optional.
pub trait TcpHandler: Send + Sync + 'static {
    /// Called once when the connection is accepted.
    fn on_open<'a>(&'a self, ctx: &'a mut TcpContext) -> BoxFuture<'a, ()> {
        let _ = ctx;
        Box::pin(async {})
    }

    /// Called for every inbound chunk.
    fn on_data<'a>(&'a self, ctx: &'a mut TcpContext, data: Bytes) -> BoxFuture<'a, ()> {
        let _ = (ctx, data);
        Box::pin(async {})
    }

    /// Called once when the peer closes.
    fn on_close<'a>(&'a self, ctx: &'a mut TcpContext) -> BoxFuture<'a, ()> {
        let _ = ctx;
        Box::pin(async {})
    }

    /// Called once when the transport fails. No close callback follows.
    fn on_error<'a>(
        &'a self,
        ctx: &'a mut TcpContext,
        error: &'a DispatchError,
    ) -> BoxFuture<'a, ()> {
        let _ = (ctx, error);
        Box::pin(async {})
    }
}

/// A shareable TCP handler.
pub type SharedTcpHandler = Arc<dyn TcpHandler>;

/// A TCP connection bound to its handler.
pub struct TcpSession {
    handler: SharedTcpHandler,
    ctx: TcpContext,
    state: ConnectionState,
}

impl TcpSession {
    /// Binds `ctx` to `handler` and runs the open callback.
    pub async fn open(handler: SharedTcpHandler, ctx: TcpContext) -> Self {
        let mut session = Self {
            handler,
            ctx,
            state: ConnectionState::Unbound,
        };
        if session.advance(ConnectionEvent::Open) {
            debug!(connection = %session.ctx.id(), peer = ?session.ctx.peer(), "tcp connection opened");
            session.handler.on_open(&mut session.ctx).await;
        }
        session
    }

    /// Delivers an inbound chunk.
    pub async fn data(&mut self, data: Bytes) {
        if self.advance(ConnectionEvent::Data) {
            self.handler.on_data(&mut self.ctx, data).await;
        }
    }

    /// Reports that the peer closed the connection.
    pub async fn close(&mut self) {
        if self.advance(ConnectionEvent::Close) {
            debug!(connection = %self.ctx.id(), "tcp connection closed");
            self.handler.on_close(&mut self.ctx).await;
        }
    }

    /// Reports a transport failure.
    pub async fn fail(&mut self, error: DispatchError) {
        if self.advance(ConnectionEvent::Error) {
            warn!(connection = %self.ctx.id(), %error, "tcp connection failed");
            self.handler.on_error(&mut self.ctx, &error).await;
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the context.
    pub fn context(&self) -> &TcpContext {
        &self.ctx
    }

    fn advance(&mut self, event: ConnectionEvent) -> bool {
        match self.state.transition(event) {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for TcpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSession")
            .field("ctx", &self.ctx)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TcpHandler for Recorder {
        fn on_open<'a>(&'a self, ctx: &'a mut TcpContext) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.events.lock().push("open".into());
                let _ = ctx.write(Bytes::from_static(b"hello\n"));
            })
        }

        fn on_data<'a>(&'a self, ctx: &'a mut TcpContext, data: Bytes) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.events
                    .lock()
                    .push(format!("data:{}", String::from_utf8_lossy(&data)));
                if &data[..] == b"quit" {
                    let _ = ctx.end(Some(Bytes::from_static(b"bye\n")));
                } else {
                    let _ = ctx.write(data);
                }
            })
        }

        fn on_close<'a>(&'a self, _ctx: &'a mut TcpContext) -> BoxFuture<'a, ()> {
            Box::pin(async move { self.events.lock().push("close".into()) })
        }

        fn on_error<'a>(
            &'a self,
            _ctx: &'a mut TcpContext,
            error: &'a DispatchError,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move { self.events.lock().push(format!("error:{error}")) })
        }
    }

    #[tokio::test]
    async fn test_echo_then_end() {
        let handler = Arc::new(Recorder::default());
        let (ctx, mut outbound) = TcpContext::channel(None);
        let mut session = TcpSession::open(handler.clone(), ctx).await;
        assert_eq!(session.state(), ConnectionState::Open);

        session.data(Bytes::from_static(b"ping")).await;
        session.data(Bytes::from_static(b"quit")).await;
        assert_eq!(session.state(), ConnectionState::Active);
        assert!(session.context().is_ended());
        assert!(session.context().write(Bytes::from_static(b"late")).is_err());

        assert_eq!(outbound.recv().await, Some(TcpCommand::Write(Bytes::from_static(b"hello\n"))));
        assert_eq!(outbound.recv().await, Some(TcpCommand::Write(Bytes::from_static(b"ping"))));
        assert_eq!(
            outbound.recv().await,
            Some(TcpCommand::End(Some(Bytes::from_static(b"bye\n"))))
        );
    }

    #[tokio::test]
    async fn test_events_after_close_are_ignored() {
        let handler = Arc::new(Recorder::default());
        let (ctx, _outbound) = TcpContext::channel(None);
        let mut session = TcpSession::open(handler.clone(), ctx).await;

        session.close().await;
        session.data(Bytes::from_static(b"late")).await;
        session.close().await;
        session
            .fail(DispatchError::from(std::io::Error::other("reset")))
            .await;

        assert!(session.state().is_closed());
        assert_eq!(*handler.events.lock(), vec!["open", "close"]);
    }

    #[tokio::test]
    async fn test_error_skips_close() {
        let handler = Arc::new(Recorder::default());
        let (ctx, _outbound) = TcpContext::channel(None);
        let mut session = TcpSession::open(handler.clone(), ctx).await;

        session
            .fail(DispatchError::from(std::io::Error::other("reset")))
            .await;
        session.close().await;

        assert_eq!(
            *handler.events.lock(),
            vec!["open", "error:transport error: reset"]
        );
    }

    #[test]
    fn test_write_after_transport_dropped() {
        let (ctx, outbound) = TcpContext::channel(None);
        drop(outbound);
        assert!(matches!(
            ctx.write(Bytes::from_static(b"x")),
            Err(DispatchError::ConnectionClosed { .. })
        ));
    }
}
