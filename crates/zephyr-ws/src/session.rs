//! Drives one WebSocket connection through its lifecycle.

use tracing::{debug, warn};
use zephyr_core::{ConnectionEvent, ConnectionState};

use crate::context::WsContext;
use crate::error::WsError;
use crate::message::{CloseFrame, Message};
use crate::route::SharedWsRoute;

/// A connection bound to a route.
///
/// The host transport feeds inbound frames into [`handle`](Self::handle)
/// and reports failures through [`fail`](Self::fail). Events arriving after
/// the session closed are ignored. Closing removes the connection from
/// every topic.
pub struct WsSession {
    route: SharedWsRoute,
    ctx: WsContext,
    state: ConnectionState,
}

impl WsSession {
    /// Binds `ctx` to `route` and runs the open callback.
    pub async fn open(route: SharedWsRoute, ctx: WsContext) -> Self {
        let mut session = Self {
            route,
            ctx,
            state: ConnectionState::Unbound,
        };
        if session.advance(ConnectionEvent::Open) {
            debug!(connection = %session.ctx.id(), path = session.ctx.path(), "websocket opened");
            session.route.on_open(&mut session.ctx).await;
        }
        session
    }

    /// Delivers an inbound frame. A close frame closes the session.
    pub async fn handle(&mut self, message: Message) {
        match message {
            Message::Close(frame) => self.close(frame).await,
            data => {
                if self.advance(ConnectionEvent::Data) {
                    self.route.on_message(&mut self.ctx, data).await;
                }
            }
        }
    }

    /// Closes the session, running the close callback once.
    pub async fn close(&mut self, frame: Option<CloseFrame>) {
        if self.advance(ConnectionEvent::Close) {
            self.route.on_close(&mut self.ctx, frame).await;
            self.release();
        }
    }

    /// Reports a transport failure, running the error callback once.
    pub async fn fail(&mut self, error: WsError) {
        if self.advance(ConnectionEvent::Error) {
            warn!(connection = %self.ctx.id(), %error, "websocket failed");
            self.route.on_error(&mut self.ctx, &error).await;
            self.release();
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the context.
    pub fn context(&self) -> &WsContext {
        &self.ctx
    }

    fn advance(&mut self, event: ConnectionEvent) -> bool {
        match self.state.transition(event) {
            Some(next) => {
                self.state = next;
                true
            }
            None => {
                debug!(connection = %self.ctx.id(), state = %self.state, ?event, "ignoring event");
                false
            }
        }
    }

    fn release(&self) {
        let removed = self.ctx.topics().remove_connection(self.ctx.id());
        debug!(connection = %self.ctx.id(), subscriptions = removed, "websocket closed");
    }
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession")
            .field("connection", &self.ctx.id())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use zephyr_core::{BoxFuture, Params};

    use super::*;
    use crate::connection::Connection;
    use crate::route::WebSocketRoute;
    use crate::topics::TopicRegistry;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl WebSocketRoute for Recorder {
        fn on_open<'a>(&'a self, ctx: &'a mut WsContext) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                ctx.subscribe("room");
                self.events.lock().push("open".into());
            })
        }

        fn on_message<'a>(&'a self, _ctx: &'a mut WsContext, message: Message) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let text = message.as_text().unwrap_or("<binary>").to_string();
                self.events.lock().push(format!("message:{text}"));
            })
        }

        fn on_close<'a>(
            &'a self,
            _ctx: &'a mut WsContext,
            frame: Option<CloseFrame>,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let code = frame.map_or(0, |f| f.code);
                self.events.lock().push(format!("close:{code}"));
            })
        }

        fn on_error<'a>(&'a self, _ctx: &'a mut WsContext, _error: &'a WsError) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.events.lock().push("error".into());
            })
        }
    }

    fn context(topics: &TopicRegistry) -> WsContext {
        let (conn, _rx) = Connection::channel();
        WsContext::new(conn, "/ws", Params::new(), topics.clone())
    }

    #[tokio::test]
    async fn test_lifecycle_callbacks_in_order() {
        let recorder = Arc::new(Recorder::default());
        let topics = TopicRegistry::new();
        let mut session = WsSession::open(recorder.clone(), context(&topics)).await;
        assert_eq!(session.state(), ConnectionState::Open);
        assert_eq!(topics.subscriber_count("room"), 1);

        session.handle(Message::text("one")).await;
        assert_eq!(session.state(), ConnectionState::Active);
        session.handle(Message::close(crate::CloseCode::Normal, "")).await;
        assert!(session.state().is_closed());
        assert_eq!(topics.subscriber_count("room"), 0);

        session.handle(Message::text("late")).await;
        session.fail(WsError::transport("reset")).await;

        assert_eq!(
            *recorder.events.lock(),
            vec!["open", "message:one", "close:1000"]
        );
    }

    #[tokio::test]
    async fn test_error_skips_close_callback() {
        let recorder = Arc::new(Recorder::default());
        let topics = TopicRegistry::new();
        let mut session = WsSession::open(recorder.clone(), context(&topics)).await;

        session.fail(WsError::transport("reset")).await;
        session.close(None).await;

        assert_eq!(*recorder.events.lock(), vec!["open", "error"]);
        assert_eq!(topics.stats().subscriptions, 0);
    }
}
