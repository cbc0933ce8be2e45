//! Assembles a [`Dispatcher`] from code or from a [`ZephyrConfig`].

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;
use zephyr_cache::{
    CacheBackend, CachePolicy, FileBackend, MemoryBackend, ResponseCache, RouteCache, SharedBackend,
};
use zephyr_config::{CacheBackendKind, CompressionConfig, CorsConfig, OriginSetting, ZephyrConfig};
use zephyr_core::{HttpHandler, IntoResponse, RequestContext};
use zephyr_middleware::stages::{Algorithm, Compression, CorsPolicy, OriginPolicy};
use zephyr_middleware::{Middleware, MiddlewareDiscovery, MiddlewareModule, MiddlewareRegistry};
use zephyr_router::{normalize_path, SharedRouteTable};
use zephyr_ws::{TopicRegistry, WebSocketRoute};

use crate::coalesce::Coalescer;
use crate::dispatcher::{Bindings, Dispatcher, Inner};
use crate::manual::ManualRoute;
use crate::mount::{Mount, MountedApp};
use crate::route::HttpRoute;
use crate::tcp::TcpHandler;

const DEFAULT_ROUTE_CACHE_SIZE: usize = 1000;
const DEFAULT_ROUTE_CACHE_TTL: Duration = Duration::from_secs(300);

/// Builder for [`Dispatcher`].
///
/// Handlers are bound by URL pattern; a scanned route file without a
/// matching binding is skipped with a warning.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use zephyr_core::{handler_fn, RequestContext};
/// use zephyr_dispatch::{Dispatcher, HttpRoute};
/// use zephyr_middleware::stages::CorsPolicy;
///
/// let dispatcher = Dispatcher::builder("src/routes")
///     .http("/health", HttpRoute::new().get(handler_fn(|_: RequestContext| async { "ok" })))
///     .cors(CorsPolicy::default())
///     .coalesce(Duration::from_millis(100))
///     .get("/legacy/*", |_ctx| async { Ok::<_, anyhow::Error>("moved") })
///     .build();
/// # let _ = dispatcher;
/// ```
pub struct DispatcherBuilder {
    api_dir: PathBuf,
    tcp_dir: Option<PathBuf>,
    src_root: Option<PathBuf>,
    middleware_dir: Option<PathBuf>,
    bindings: Bindings,
    registry: MiddlewareRegistry,
    global: Vec<MiddlewareModule>,
    compression: Option<Compression>,
    cors: Option<CorsPolicy>,
    cache_policy: CachePolicy,
    backend: Option<SharedBackend>,
    route_cache: Option<(usize, Option<Duration>)>,
    coalesce: Option<Duration>,
    mounts: Vec<Mount>,
    manual: Vec<ManualRoute>,
    topics: TopicRegistry,
}

impl DispatcherBuilder {
    /// Creates a builder for route files under `api_dir`.
    ///
    /// Defaults: no CORS, response cache disabled, handler-resolution cache
    /// of 1000 entries expiring after five minutes, no coalescing, no
    /// compression, TCP disabled.
    pub fn new(api_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_dir: api_dir.into(),
            tcp_dir: None,
            src_root: None,
            middleware_dir: None,
            bindings: Bindings::default(),
            registry: MiddlewareRegistry::new(),
            global: Vec::new(),
            compression: None,
            cors: None,
            cache_policy: CachePolicy::disabled(),
            backend: None,
            route_cache: Some((DEFAULT_ROUTE_CACHE_SIZE, Some(DEFAULT_ROUTE_CACHE_TTL))),
            coalesce: None,
            mounts: Vec::new(),
            manual: Vec::new(),
            topics: TopicRegistry::new(),
        }
    }

    /// Creates a builder with every configurable concern taken from
    /// `config`. Handlers are still registered in code.
    pub fn from_config(config: &ZephyrConfig) -> Self {
        let server = &config.server;
        let mut builder = Self::new(&server.api_dir).cors(cors_policy(&config.cors));

        if server.enable_tcp {
            builder = builder.tcp_dir(&server.tcp_dir);
        }
        if let Some(dir) = &server.middleware_dir {
            builder = builder.middleware_dir(dir);
        }

        let cache = &config.cache;
        builder.cache_policy = cache.policy();
        builder.backend = Some(match cache.backend {
            CacheBackendKind::Memory => match cache.max_size {
                Some(max_size) => Arc::new(MemoryBackend::with_max_size(max_size)) as SharedBackend,
                None => Arc::new(MemoryBackend::new()),
            },
            CacheBackendKind::File => Arc::new(FileBackend::new(&cache.dir)),
        });
        builder.route_cache = cache
            .route_cache
            .enabled
            .then(|| (cache.route_cache.max_size, cache.route_cache.ttl()));

        if config.coalesce.enabled {
            builder = builder.coalesce(config.coalesce.retention());
        }
        if let Some(compression) = compression(&config.compression) {
            builder = builder.compression(compression);
        }
        builder
    }

    /// Scans TCP handler files from `dir`. Without it TCP is off.
    #[must_use]
    pub fn tcp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tcp_dir = Some(dir.into());
        self
    }

    /// Sets the directory middleware keys are relative to.
    #[must_use]
    pub fn src_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.src_root = Some(dir.into());
        self
    }

    /// Sets the global middleware directory.
    #[must_use]
    pub fn middleware_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.middleware_dir = Some(dir.into());
        self
    }

    /// Binds an HTTP route file (`route.*`) at `pattern`.
    #[must_use]
    pub fn http(mut self, pattern: &str, route: HttpRoute) -> Self {
        self.bindings.http.insert(normalize_path(pattern), Arc::new(route));
        self
    }

    /// Binds a WebSocket route file (`socket.*`) at `pattern`.
    #[must_use]
    pub fn websocket(mut self, pattern: &str, route: impl WebSocketRoute) -> Self {
        self.bindings
            .websocket
            .insert(normalize_path(pattern), Arc::new(route));
        self
    }

    /// Binds a TCP handler file (`handler.*`) at `pattern`, relative to the
    /// TCP directory.
    #[must_use]
    pub fn tcp(mut self, pattern: &str, handler: impl TcpHandler) -> Self {
        self.bindings.tcp.insert(normalize_path(pattern), Arc::new(handler));
        self
    }

    /// Binds an RPC adapter file (`rpc.*`) at `pattern`.
    #[must_use]
    pub fn rpc(mut self, pattern: &str, endpoint: impl HttpHandler) -> Self {
        self.bindings.rpc.insert(normalize_path(pattern), Arc::new(endpoint));
        self
    }

    /// Registers the middleware module activated by the file with `key`.
    #[must_use]
    pub fn middleware_module(mut self, key: &str, module: MiddlewareModule) -> Self {
        self.registry.register(key, module);
        self
    }

    /// Adds a request-phase middleware that runs for every table route,
    /// before discovered middleware.
    #[must_use]
    pub fn global_middleware(self, middleware: impl Middleware) -> Self {
        self.global_module(MiddlewareModule::middleware(middleware))
    }

    /// Adds a module that runs for every table route, before discovered
    /// middleware.
    #[must_use]
    pub fn global_module(mut self, module: MiddlewareModule) -> Self {
        self.global.push(module);
        self
    }

    /// Compresses responses as the outermost response-phase stage.
    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Negotiates CORS for every HTTP request.
    #[must_use]
    pub fn cors(mut self, policy: CorsPolicy) -> Self {
        self.cors = Some(policy);
        self
    }

    /// Turns CORS handling off.
    #[must_use]
    pub fn without_cors(mut self) -> Self {
        self.cors = None;
        self
    }

    /// Sets the global response cache policy. Routes refine it with
    /// `cache.toml` and [`RouteConfig::cache`](crate::RouteConfig::cache).
    #[must_use]
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Stores cached responses in `backend`. Defaults to memory.
    #[must_use]
    pub fn cache_backend(mut self, backend: impl CacheBackend) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Sizes the handler-resolution cache.
    #[must_use]
    pub fn route_cache(mut self, max_size: usize, ttl: Option<Duration>) -> Self {
        self.route_cache = Some((max_size, ttl));
        self
    }

    /// Resolves the handler on every request.
    #[must_use]
    pub fn without_route_cache(mut self) -> Self {
        self.route_cache = None;
        self
    }

    /// Coalesces anonymous GET requests, keeping results joinable for
    /// `retention` after completion.
    #[must_use]
    pub fn coalesce(mut self, retention: Duration) -> Self {
        self.coalesce = Some(retention);
        self
    }

    /// Forwards requests under `prefix` to `app`, prefix stripped.
    #[must_use]
    pub fn mount(mut self, prefix: &str, app: impl MountedApp) -> Self {
        self.mounts.push(Mount::new(prefix, Arc::new(app)));
        self
    }

    /// Handles every method on `pattern` (`/exact` or `/prefix/*`).
    #[must_use]
    pub fn all<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoResponse,
    {
        self.push_manual(None, pattern, handler)
    }

    /// Handles `GET` on `pattern`.
    #[must_use]
    pub fn get<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoResponse,
    {
        self.push_manual(Some(Method::GET), pattern, handler)
    }

    /// Handles `POST` on `pattern`.
    #[must_use]
    pub fn post<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoResponse,
    {
        self.push_manual(Some(Method::POST), pattern, handler)
    }

    /// Handles `method` on `pattern`.
    #[must_use]
    pub fn route<F, Fut, R>(self, method: Method, pattern: &str, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoResponse,
    {
        self.push_manual(Some(method), pattern, handler)
    }

    /// Shares `topics` with other dispatchers or background tasks.
    #[must_use]
    pub fn topics(mut self, topics: TopicRegistry) -> Self {
        self.topics = topics;
        self
    }

    /// Builds the dispatcher. Routes are scanned on first use.
    pub fn build(self) -> Dispatcher {
        let mut discovery = MiddlewareDiscovery::new(&self.api_dir, self.registry);
        if let Some(src_root) = self.src_root {
            discovery = discovery.with_src_root(src_root);
        }
        if let Some(dir) = self.middleware_dir {
            discovery = discovery.with_global_dir(dir);
        }
        if let Some(compression) = &self.compression {
            discovery =
                discovery.with_prelude(MiddlewareModule::new().on_response(compression.clone()));
        }
        for module in self.global {
            discovery = discovery.with_prelude(module);
        }

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let route_cache = self
            .route_cache
            .map(|(max_size, ttl)| RouteCache::new(max_size).with_ttl(ttl));

        Dispatcher::from_inner(Inner {
            api_dir: self.api_dir,
            tcp_dir: self.tcp_dir,
            bindings: self.bindings,
            cache_policy: self.cache_policy,
            response_cache: ResponseCache::from_shared(backend),
            route_cache,
            discovery,
            cors: self.cors,
            coalescer: self.coalesce.map(Coalescer::new),
            compression: self.compression,
            mounts: self.mounts,
            manual: self.manual,
            topics: self.topics,
            table: SharedRouteTable::default(),
            loaded: OnceCell::new(),
            reload_lock: Mutex::new(()),
        })
    }

    fn push_manual<F, Fut, R>(mut self, method: Option<Method>, pattern: &str, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoResponse,
    {
        self.manual.push(ManualRoute::new(method, pattern, handler));
        self
    }
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("api_dir", &self.api_dir)
            .field("tcp_dir", &self.tcp_dir)
            .field("cors", &self.cors)
            .field("cache_policy", &self.cache_policy)
            .field("coalesce", &self.coalesce)
            .finish_non_exhaustive()
    }
}

/// Translates the `[cors]` section.
///
/// `true` reflects the request origin, `false` rejects every origin, `"*"`
/// allows any, another string is sent as-is, and a list allows its members.
pub(crate) fn cors_policy(config: &CorsConfig) -> CorsPolicy {
    let origin = match &config.origin {
        OriginSetting::Flag(true) => OriginPolicy::Reflect,
        OriginSetting::Flag(false) => OriginPolicy::List(Vec::new()),
        OriginSetting::One(origin) => OriginPolicy::from(origin.as_str()),
        OriginSetting::Many(origins) => OriginPolicy::from(origins.clone()),
    };
    let methods = config.methods.iter().filter_map(|name| {
        let method = Method::from_bytes(name.to_ascii_uppercase().as_bytes()).ok();
        if method.is_none() {
            warn!(method = %name, "ignoring invalid CORS method");
        }
        method
    });

    CorsPolicy::builder()
        .origin(origin)
        .methods(methods)
        .allowed_headers(config.allowed_headers.iter().cloned())
        .exposed_headers(config.exposed_headers.iter().cloned())
        .credentials(config.credentials)
        .max_age(config.max_age.map(Duration::from_secs))
        .preflight_continue(config.preflight_continue)
        .build()
}

/// Translates the `[compression]` section. `None` when disabled or when
/// no algorithm is offered.
pub(crate) fn compression(config: &CompressionConfig) -> Option<Compression> {
    if !config.enabled {
        return None;
    }
    let algorithms: Vec<Algorithm> = [
        (config.brotli, Algorithm::Brotli),
        (config.gzip, Algorithm::Gzip),
    ]
    .into_iter()
    .filter_map(|(offered, algorithm)| offered.then_some(algorithm))
    .collect();
    if algorithms.is_empty() {
        return None;
    }

    let mut builder = Compression::builder()
        .algorithms(algorithms)
        .level(config.level)
        .threshold(config.threshold);
    if !config.types.is_empty() {
        builder = builder.content_types(config.types.iter().cloned());
    }
    for prefix in &config.exclude {
        builder = builder.exclude_path(prefix.clone());
    }
    Some(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_from_config() {
        let mut config = CorsConfig::default();
        config.origin = OriginSetting::Many(vec!["https://a.com".into()]);
        let policy = cors_policy(&config);

        let allowed = policy.evaluate(Some("https://a.com"), &Method::GET);
        assert!(allowed.allow);
        let denied = policy.evaluate(Some("https://b.com"), &Method::GET);
        assert!(!denied.allow);
        assert_eq!(denied.headers["access-control-allow-origin"], "");
    }

    #[test]
    fn test_cors_flags() {
        let mut config = CorsConfig::default();
        config.origin = OriginSetting::Flag(false);
        assert!(!cors_policy(&config).evaluate(Some("https://a.com"), &Method::GET).allow);

        config.origin = OriginSetting::Flag(true);
        let reflected = cors_policy(&config).evaluate(Some("https://a.com"), &Method::GET);
        assert_eq!(reflected.headers["access-control-allow-origin"], "https://a.com");
    }

    #[test]
    fn test_compression_needs_an_algorithm() {
        let mut config = CompressionConfig::default();
        assert!(compression(&config).is_none());
        config.enabled = true;
        assert!(compression(&config).is_some());
        config.gzip = false;
        config.brotli = false;
        assert!(compression(&config).is_none());
    }

    #[test]
    fn test_from_config_toggles() {
        let mut config = ZephyrConfig::production();
        config.cache.route_cache.enabled = false;
        let builder = DispatcherBuilder::from_config(&config);
        assert!(builder.route_cache.is_none());
        assert!(builder.coalesce.is_some());
        assert!(builder.compression.is_some());
        assert!(builder.cors.is_some());
        assert!(builder.tcp_dir.is_none());
        assert!(builder.cache_policy.enabled);
    }
}
