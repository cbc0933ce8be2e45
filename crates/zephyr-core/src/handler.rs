//! Handler trait for request processing.
//!
//! An [`HttpHandler`] receives the mutable [`RequestContext`] that middleware
//! already worked on and produces a [`Response`]. Plain async functions can
//! be used through [`handler_fn`]; anything returning an [`IntoResponse`]
//! value qualifies.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::ZephyrError;
use crate::types::{BoxFuture, Response, ResponseExt};

/// Handles a request whose route and middleware have been resolved.
pub trait HttpHandler: Send + Sync + 'static {
    /// Produces the response for `ctx`.
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Response>;
}

impl<H: HttpHandler + ?Sized> HttpHandler for Arc<H> {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Response> {
        (**self).call(ctx)
    }
}

/// A function-based handler wrapper.
///
/// The function receives a snapshot of the context. Handlers that need to
/// queue response headers or cookies through the context should implement
/// [`HttpHandler`] directly.
///
/// # Example
///
/// ```rust
/// use zephyr_core::{handler_fn, Json, RequestContext};
///
/// let handler = handler_fn(|ctx: RequestContext| async move {
///     Json(serde_json::json!({ "id": ctx.param("id") }))
/// });
/// # let _ = handler;
/// ```
#[derive(Debug, Clone)]
pub struct FnHandler<F> {
    func: F,
}

/// Wraps an async function as an [`HttpHandler`].
pub fn handler_fn<F>(func: F) -> FnHandler<F> {
    FnHandler { func }
}

impl<F, Fut, R> HttpHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Response> {
        let fut = (self.func)(ctx.clone());
        Box::pin(async move { fut.await.into_response() })
    }
}

/// Conversion into a [`Response`].
pub trait IntoResponse {
    /// Performs the conversion.
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        Response::empty(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::text(StatusCode::OK, self)
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::text(StatusCode::OK, self)
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response {
        Response::new(Full::new(self))
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> Response {
        Response::json(StatusCode::OK, &self)
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self) -> Response {
        let mut response = self.1.into_response();
        *response.status_mut() = self.0;
        response
    }
}

impl IntoResponse for ZephyrError {
    fn into_response(self) -> Response {
        Self::into_response(self)
    }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> Response {
        match self {
            Ok(value) => value.into_response(),
            Err(err) => err.into_response(),
        }
    }
}

/// Serializes the wrapped value as a JSON response body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        Response::json(StatusCode::OK, &self.0)
    }
}
