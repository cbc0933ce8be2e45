//! Composition of middleware into runnable chains.
//!
//! Every route gets two chains:
//!
//! 1. **Request phase** - wraps the handler; may short-circuit and skip it.
//! 2. **Response phase** - wraps the finished response; may rewrite it
//!    (compression, header injection).
//!
//! Both are [`Pipeline`]s. The response phase simply uses the handler's
//! response as its terminal.

use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use zephyr_core::{
    BoxFuture, HttpHandler, RequestContext, Response, ResponseExt, ZephyrError, ZephyrResult,
};

use crate::middleware::{Chain, SharedMiddleware};

/// Middleware phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Runs before the handler.
    Request,
    /// Runs after the handler.
    Response,
}

/// An ordered, immutable middleware chain.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use zephyr_core::{handler_fn, RequestContext};
/// use zephyr_middleware::{compose, from_fn, SharedMiddleware};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let noop: SharedMiddleware = Arc::new(from_fn("noop", |ctx, next| next.run(ctx)));
/// let pipeline = compose([noop]);
/// let handler = handler_fn(|_ctx: RequestContext| async { "done" });
///
/// let mut ctx = RequestContext::builder(http::Method::GET, "/").build();
/// let response = pipeline.run(&mut ctx, &handler).await.unwrap();
/// assert_eq!(response.status(), 200);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Arc<[SharedMiddleware]>,
}

/// Composes middleware into a [`Pipeline`], outermost first.
pub fn compose(middleware: impl IntoIterator<Item = SharedMiddleware>) -> Pipeline {
    Pipeline {
        stages: middleware.into_iter().collect(),
    }
}

impl Pipeline {
    /// Runs the chain around `terminal`.
    ///
    /// An empty pipeline behaves exactly like calling `terminal`. If any
    /// middleware calls `next` twice the result is
    /// [`ZephyrError::MiddlewareProtocol`], whatever response the chain
    /// produced.
    pub async fn run(
        &self,
        ctx: &mut RequestContext,
        terminal: &dyn HttpHandler,
    ) -> ZephyrResult<Response> {
        let chain = Chain::new(&self.stages, terminal);
        let response = chain.dispatch(0, ctx).await;
        match chain.take_violation() {
            Some(middleware) => Err(ZephyrError::middleware_protocol(middleware)),
            None => Ok(response),
        }
    }

    /// Runs the chain with an already produced response as the terminal.
    pub async fn run_response(
        &self,
        ctx: &mut RequestContext,
        response: Response,
    ) -> ZephyrResult<Response> {
        if self.is_empty() {
            return Ok(response);
        }
        let endpoint = ResponseEndpoint::new(response);
        self.run(ctx, &endpoint).await
    }

    /// Returns the stage names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.names())
            .finish()
    }
}

/// Terminal that hands back a response produced earlier.
struct ResponseEndpoint {
    response: Mutex<Option<Response>>,
}

impl ResponseEndpoint {
    fn new(response: Response) -> Self {
        Self {
            response: Mutex::new(Some(response)),
        }
    }
}

impl HttpHandler for ResponseEndpoint {
    fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Response> {
        // The chain guarantees a single dispatch of the terminal.
        let response = self.response.lock().take().unwrap_or_else(|| {
            Response::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        });
        Box::pin(async move { response })
    }
}

/// The request- and response-phase chains resolved for one route.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareStack {
    on_request: Pipeline,
    on_response: Pipeline,
}

impl MiddlewareStack {
    /// Creates a stack from per-phase lists, outermost first.
    pub fn new(
        on_request: impl IntoIterator<Item = SharedMiddleware>,
        on_response: impl IntoIterator<Item = SharedMiddleware>,
    ) -> Self {
        Self {
            on_request: compose(on_request),
            on_response: compose(on_response),
        }
    }

    /// Returns the chain for one phase.
    pub fn phase(&self, phase: Phase) -> &Pipeline {
        match phase {
            Phase::Request => &self.on_request,
            Phase::Response => &self.on_response,
        }
    }

    /// Runs the request phase around `handler`, then the response phase.
    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        handler: &dyn HttpHandler,
    ) -> ZephyrResult<Response> {
        let response = self.on_request.run(ctx, handler).await?;
        self.on_response.run_response(ctx, response).await
    }
}
