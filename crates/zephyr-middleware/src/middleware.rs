//! Core middleware trait and the `next` continuation.
//!
//! A middleware receives the mutable [`RequestContext`] and a [`Next`]
//! handle. Calling [`Next::run`] passes control to the rest of the chain and
//! yields its response; returning without calling it ends the chain with the
//! middleware's own response.
//!
//! # Example
//!
//! ```
//! use zephyr_core::{BoxFuture, RequestContext, Response};
//! use zephyr_middleware::{Middleware, Next};
//!
//! struct PoweredBy;
//!
//! impl Middleware for PoweredBy {
//!     fn name(&self) -> &str {
//!         "powered-by"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let mut response = next.run(ctx).await;
//!             response
//!                 .headers_mut()
//!                 .insert("x-powered-by", http::HeaderValue::from_static("zephyr"));
//!             response
//!         })
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use tracing::error;
use zephyr_core::{BoxFuture, HttpHandler, RequestContext, Response, ResponseExt};

/// A shareable middleware handle.
pub type SharedMiddleware = Arc<dyn Middleware>;

/// The core middleware trait.
///
/// # Invariants
///
/// - `next.run()` may be called at most once per invocation. A second call
///   fails the whole chain with a protocol error and never re-runs the
///   downstream stages.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this middleware, used in logs and errors.
    fn name(&self) -> &str;

    /// Processes the request.
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>)
        -> BoxFuture<'a, Response>;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        (**self).process(ctx, next)
    }
}

/// One execution of a composed chain.
pub(crate) struct Chain<'a> {
    middleware: &'a [SharedMiddleware],
    terminal: &'a dyn HttpHandler,
    // Highest position dispatched so far, plus one. Zero means none.
    cursor: AtomicUsize,
    violation: Mutex<Option<String>>,
}

impl<'a> Chain<'a> {
    pub(crate) fn new(middleware: &'a [SharedMiddleware], terminal: &'a dyn HttpHandler) -> Self {
        Self {
            middleware,
            terminal,
            cursor: AtomicUsize::new(0),
            violation: Mutex::new(None),
        }
    }

    pub(crate) fn dispatch<'c>(
        &'c self,
        index: usize,
        ctx: &'c mut RequestContext,
    ) -> BoxFuture<'c, Response>
    where
        'a: 'c,
    {
        let previous = self.cursor.fetch_max(index + 1, Ordering::SeqCst);
        if previous > index {
            let culprit = index
                .checked_sub(1)
                .and_then(|i| self.middleware.get(i))
                .map_or_else(|| "<pipeline>".to_string(), |m| m.name().to_string());
            error!(middleware = %culprit, "next() called multiple times");
            self.violation.lock().get_or_insert(culprit);
            return Box::pin(async {
                Response::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            });
        }

        match self.middleware.get(index) {
            Some(middleware) => {
                let next = Next {
                    chain: self,
                    index: index + 1,
                };
                middleware.process(ctx, next)
            }
            None => self.terminal.call(ctx),
        }
    }

    pub(crate) fn take_violation(&self) -> Option<String> {
        self.violation.lock().take()
    }
}

/// Continuation to the rest of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a Chain<'a>,
    index: usize,
}

impl<'a> Next<'a> {
    /// Runs the remaining middleware and the terminal handler.
    pub fn run<'c>(self, ctx: &'c mut RequestContext) -> BoxFuture<'c, Response>
    where
        'a: 'c,
    {
        self.chain.dispatch(self.index, ctx)
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}

/// A middleware built from a closure.
///
/// # Example
///
/// ```
/// use zephyr_middleware::from_fn;
///
/// let timing = from_fn("timing", |ctx, next| {
///     Box::pin(async move {
///         let response = next.run(ctx).await;
///         tracing::debug!(elapsed = ?ctx.elapsed(), "handled");
///         response
///     })
/// });
/// # let _ = timing;
/// ```
pub struct FnMiddleware<F> {
    name: String,
    func: F,
}

/// Creates a middleware from a closure.
pub fn from_fn<F>(name: impl Into<String>, func: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware {
        name: name.into(),
        func,
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        (self.func)(ctx, next)
    }
}

impl<F> std::fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
