//! The WebSocket route contract.

use std::future::Future;
use std::sync::Arc;

use zephyr_core::BoxFuture;

use crate::context::WsContext;
use crate::error::WsError;
use crate::message::{CloseFrame, Message};

/// Callbacks of a WebSocket route. Every callback is optional.
///
/// ```rust
/// use zephyr_core::BoxFuture;
/// use zephyr_ws::{Message, WebSocketRoute, WsContext};
///
/// struct Echo;
///
/// impl WebSocketRoute for Echo {
///     fn on_message<'a>(&'a self, ctx: &'a mut WsContext, message: Message) -> BoxFuture<'a, ()> {
///         Box::pin(async move {
///             let _ = ctx.send(message);
///         })
///     }
/// }
/// ```
pub trait WebSocketRoute: Send + Sync + 'static {
    /// Called once after the upgrade is bound to this route.
    fn on_open<'a>(&'a self, ctx: &'a mut WsContext) -> BoxFuture<'a, ()> {
        let _ = ctx;
        Box::pin(async {})
    }

    /// Called for every data frame.
    fn on_message<'a>(&'a self, ctx: &'a mut WsContext, message: Message) -> BoxFuture<'a, ()> {
        let _ = (ctx, message);
        Box::pin(async {})
    }

    /// Called once when the connection closes.
    fn on_close<'a>(
        &'a self,
        ctx: &'a mut WsContext,
        frame: Option<CloseFrame>,
    ) -> BoxFuture<'a, ()> {
        let _ = (ctx, frame);
        Box::pin(async {})
    }

    /// Called once when the transport fails. No close callback follows.
    fn on_error<'a>(&'a self, ctx: &'a mut WsContext, error: &'a WsError) -> BoxFuture<'a, ()> {
        let _ = (ctx, error);
        Box::pin(async {})
    }
}

/// A shareable WebSocket route.
pub type SharedWsRoute = Arc<dyn WebSocketRoute>;

/// A route that only handles messages, built from a closure.
pub struct FnWsRoute<F> {
    on_message: F,
}

/// Wraps an async message callback as a [`WebSocketRoute`].
///
/// The callback receives a snapshot of the context.
pub fn ws_fn<F, Fut>(on_message: F) -> FnWsRoute<F>
where
    F: Fn(WsContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnWsRoute { on_message }
}

impl<F, Fut> WebSocketRoute for FnWsRoute<F>
where
    F: Fn(WsContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_message<'a>(&'a self, ctx: &'a mut WsContext, message: Message) -> BoxFuture<'a, ()> {
        Box::pin((self.on_message)(ctx.clone(), message))
    }
}
