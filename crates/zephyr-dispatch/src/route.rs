//! Handler bindings for scanned routes.
//!
//! Route files only declare that a route exists. The code behind a route is
//! registered on the [`DispatcherBuilder`](crate::DispatcherBuilder) under
//! the same URL pattern, and the two are joined on every reload.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use zephyr_cache::{CacheOverride, CachePolicy};
use zephyr_core::{HttpHandler, Schema, SharedSchema};
use zephyr_router::RouteDescriptor;
use zephyr_ws::SharedWsRoute;

use crate::tcp::SharedTcpHandler;

/// A shareable HTTP handler.
pub type SharedHandler = Arc<dyn HttpHandler>;

/// Schemas and cache settings declared next to a route's handlers.
///
/// ```
/// use zephyr_core::ValidationError;
/// use zephyr_dispatch::RouteConfig;
///
/// let config = RouteConfig::new().params(|value: &serde_json::Value| {
///     match value["id"].as_str().map(str::parse::<u64>) {
///         Some(Ok(id)) => Ok(serde_json::json!({ "id": id })),
///         _ => Err(ValidationError::new("must be a number").at("id")),
///     }
/// });
/// # let _ = config;
/// ```
#[derive(Clone, Default)]
pub struct RouteConfig {
    pub(crate) params: Option<SharedSchema>,
    pub(crate) query: Option<SharedSchema>,
    pub(crate) response: Option<SharedSchema>,
    pub(crate) cache: Option<CacheOverride>,
}

impl RouteConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates path parameters, given as a JSON object of strings.
    #[must_use]
    pub fn params(mut self, schema: impl Schema) -> Self {
        self.params = Some(Arc::new(schema));
        self
    }

    /// Validates the query string, given as a JSON object of strings.
    #[must_use]
    pub fn query(mut self, schema: impl Schema) -> Self {
        self.query = Some(Arc::new(schema));
        self
    }

    /// Validates JSON bodies of successful responses.
    #[must_use]
    pub fn response(mut self, schema: impl Schema) -> Self {
        self.response = Some(Arc::new(schema));
        self
    }

    /// Overrides the response cache settings. Applied after `cache.toml`.
    #[must_use]
    pub fn cache(mut self, overrides: CacheOverride) -> Self {
        self.cache = Some(overrides);
        self
    }
}

impl fmt::Debug for RouteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteConfig")
            .field("params", &self.params.is_some())
            .field("query", &self.query.is_some())
            .field("response", &self.response.is_some())
            .field("cache", &self.cache)
            .finish()
    }
}

/// The handlers of one HTTP route, by method.
///
/// ```
/// use zephyr_core::{handler_fn, RequestContext};
/// use zephyr_dispatch::HttpRoute;
///
/// let route = HttpRoute::new()
///     .get(handler_fn(|_ctx: RequestContext| async { "list" }))
///     .post(handler_fn(|_ctx: RequestContext| async { "create" }));
///
/// assert!(route.handler(&http::Method::GET).is_some());
/// assert!(route.handler(&http::Method::DELETE).is_none());
/// ```
#[derive(Clone, Default)]
pub struct HttpRoute {
    handlers: HashMap<Method, SharedHandler>,
    config: RouteConfig,
}

impl HttpRoute {
    /// Creates a route with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `method`.
    #[must_use]
    pub fn on(mut self, method: Method, handler: impl HttpHandler) -> Self {
        self.handlers.insert(method, Arc::new(handler));
        self
    }

    /// Registers a `GET` handler.
    #[must_use]
    pub fn get(self, handler: impl HttpHandler) -> Self {
        self.on(Method::GET, handler)
    }

    /// Registers a `POST` handler.
    #[must_use]
    pub fn post(self, handler: impl HttpHandler) -> Self {
        self.on(Method::POST, handler)
    }

    /// Registers a `PUT` handler.
    #[must_use]
    pub fn put(self, handler: impl HttpHandler) -> Self {
        self.on(Method::PUT, handler)
    }

    /// Registers a `PATCH` handler.
    #[must_use]
    pub fn patch(self, handler: impl HttpHandler) -> Self {
        self.on(Method::PATCH, handler)
    }

    /// Registers a `DELETE` handler.
    #[must_use]
    pub fn delete(self, handler: impl HttpHandler) -> Self {
        self.on(Method::DELETE, handler)
    }

    /// Attaches schemas and cache settings.
    #[must_use]
    pub fn config(mut self, config: RouteConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the handler for `method`.
    pub fn handler(&self, method: &Method) -> Option<&SharedHandler> {
        self.handlers.get(method)
    }

    /// Returns the route configuration.
    pub fn route_config(&self) -> &RouteConfig {
        &self.config
    }

    /// Returns the registered methods, sorted.
    pub fn methods(&self) -> Vec<&Method> {
        let mut methods: Vec<&Method> = self.handlers.keys().collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }
}

impl fmt::Debug for HttpRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRoute")
            .field("methods", &self.methods())
            .field("config", &self.config)
            .finish()
    }
}

/// What a descriptor was bound to.
#[derive(Clone)]
pub(crate) enum RouteTarget {
    Http {
        route: Arc<HttpRoute>,
        cache: CachePolicy,
    },
    WebSocket(SharedWsRoute),
    Tcp(SharedTcpHandler),
    Rpc(SharedHandler),
}

/// A scanned descriptor joined with its handler.
#[derive(Clone)]
pub struct BoundRoute {
    descriptor: RouteDescriptor,
    pub(crate) target: RouteTarget,
}

impl BoundRoute {
    pub(crate) fn new(descriptor: RouteDescriptor, target: RouteTarget) -> Self {
        Self { descriptor, target }
    }

    /// Returns the descriptor.
    pub fn descriptor(&self) -> &RouteDescriptor {
        &self.descriptor
    }
}

impl AsRef<RouteDescriptor> for BoundRoute {
    fn as_ref(&self) -> &RouteDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoundRoute").field(&self.descriptor).finish()
    }
}
