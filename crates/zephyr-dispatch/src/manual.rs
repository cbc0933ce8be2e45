//! Routes registered in code with a wildcard pattern.
//!
//! Manual routes are checked in registration order before the scanned
//! table. They bypass middleware. A failing or panicking handler becomes a
//! generic 500.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::{Method, StatusCode};
use tracing::error;
use zephyr_core::{BoxFuture, IntoResponse, RequestContext, Response, ResponseExt};
use zephyr_router::match_wildcard;

type ManualFn = dyn Fn(RequestContext) -> BoxFuture<'static, anyhow::Result<Response>> + Send + Sync;

/// A handler bound to a wildcard pattern and an optional method.
#[derive(Clone)]
pub(crate) struct ManualRoute {
    method: Option<Method>,
    pattern: String,
    handler: Arc<ManualFn>,
}

impl ManualRoute {
    pub(crate) fn new<F, Fut, R>(method: Option<Method>, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoResponse,
    {
        let handler: Arc<ManualFn> = Arc::new(
            move |ctx: RequestContext| -> BoxFuture<'static, anyhow::Result<Response>> {
                let fut = handler(ctx);
                Box::pin(async move { fut.await.map(IntoResponse::into_response) })
            },
        );
        Self {
            method,
            pattern: pattern.into(),
            handler,
        }
    }

    pub(crate) fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && match_wildcard(&self.pattern, path)
    }

    /// Runs the handler, turning errors and panics into a plain 500.
    pub(crate) async fn invoke(&self, ctx: RequestContext) -> Response {
        let handler = Arc::clone(&self.handler);
        let outcome = AssertUnwindSafe(async move { handler(ctx).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                error!(pattern = %self.pattern, error = %err, "manual route failed");
                internal_error()
            }
            Err(_) => {
                error!(pattern = %self.pattern, "manual route panicked");
                internal_error()
            }
        }
    }
}

fn internal_error() -> Response {
    Response::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

impl fmt::Debug for ManualRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualRoute")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zephyr_core::into_parts;

    fn ctx(method: Method, uri: &str) -> RequestContext {
        RequestContext::builder(method, uri).build()
    }

    #[test]
    fn test_method_filter() {
        let route = ManualRoute::new(Some(Method::POST), "/hooks/*", |_ctx| async {
            Ok::<_, anyhow::Error>("ok")
        });
        assert!(route.matches(&Method::POST, "/hooks/github"));
        assert!(!route.matches(&Method::GET, "/hooks/github"));
        assert!(!route.matches(&Method::POST, "/other"));

        let any = ManualRoute::new(None, "/health", |_ctx| async { Ok::<_, anyhow::Error>("ok") });
        assert!(any.matches(&Method::DELETE, "/health"));
    }

    #[tokio::test]
    async fn test_error_becomes_generic_500() {
        let route = ManualRoute::new(None, "/*", |_ctx| async {
            Err::<&str, _>(anyhow::anyhow!("database password is hunter2"))
        });
        let response = route.invoke(ctx(Method::GET, "/x")).await;
        let (parts, body) = into_parts(response).await;
        assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body[..], b"Internal Server Error");
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let route = ManualRoute::new(None, "/*", |ctx: RequestContext| async move {
            if ctx.path() == "/boom" {
                panic!("handler bug");
            }
            Ok::<_, anyhow::Error>("fine")
        });
        let response = route.invoke(ctx(Method::GET, "/boom")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = route.invoke(ctx(Method::GET, "/calm")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
