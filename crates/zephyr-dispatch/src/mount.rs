//! Sub-applications mounted under a path prefix.

use std::fmt;
use std::sync::Arc;

use zephyr_core::{BoxFuture, HttpHandler, RequestContext, Response};
use zephyr_router::normalize_path;

/// Anything that can answer a forwarded request.
///
/// Every [`HttpHandler`] is a mounted app, and so is a
/// [`Dispatcher`](crate::Dispatcher), which lets dispatchers nest.
pub trait MountedApp: Send + Sync + 'static {
    /// Answers `ctx`, whose path no longer carries the mount prefix.
    fn fetch(&self, ctx: RequestContext) -> BoxFuture<'_, Response>;
}

impl<H: HttpHandler> MountedApp for H {
    fn fetch(&self, mut ctx: RequestContext) -> BoxFuture<'_, Response> {
        Box::pin(async move { self.call(&mut ctx).await })
    }
}

/// A shareable mounted app.
pub type SharedMountedApp = Arc<dyn MountedApp>;

#[derive(Clone)]
pub(crate) struct Mount {
    prefix: String,
    app: SharedMountedApp,
}

impl Mount {
    pub(crate) fn new(prefix: &str, app: SharedMountedApp) -> Self {
        Self {
            prefix: normalize_path(prefix),
            app,
        }
    }

    pub(crate) fn app(&self) -> &SharedMountedApp {
        &self.app
    }

    /// Returns the path left after the prefix, if the prefix owns `path`.
    pub(crate) fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.prefix == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Rebuilds `ctx` for the mounted app: prefix stripped, query kept.
    pub(crate) fn forward(&self, ctx: &RequestContext) -> Option<RequestContext> {
        let rest = self.strip(ctx.path())?;
        let uri = match ctx.query_string() {
            Some(query) => format!("{rest}?{query}"),
            None => rest.to_string(),
        };
        let request = http::Request::builder()
            .method(ctx.method().clone())
            .uri(uri)
            .body(())
            .ok()?;
        let (mut parts, ()) = request.into_parts();
        parts.headers = ctx.headers().clone();
        Some(RequestContext::from_parts(parts, ctx.body().clone()))
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mount").field(&self.prefix).finish()
    }
}
