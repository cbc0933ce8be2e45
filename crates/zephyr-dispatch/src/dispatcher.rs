//! The multi-protocol dispatcher.
//!
//! # HTTP request flow
//!
//! 1. CORS evaluation; preflights are answered with `204` right away
//! 2. Mounted apps, by path prefix
//! 3. Manual routes, in registration order
//! 4. Coalescing of anonymous GET requests
//! 5. Handler resolution through the handler-resolution cache, with params
//!    validated on a miss
//! 6. Query validation and response cache lookup
//! 7. Request-phase middleware around the handler; the handler's output is
//!    checked against the response schema and stored in the response cache
//! 8. Response-phase middleware, queued response headers, CORS headers
//!
//! Route files are scanned once, lazily, and again on every
//! [`reload`](Dispatcher::reload). Readers keep the table snapshot they
//! started with.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use http::header::{ACCEPT_ENCODING, CONTENT_TYPE};
use http::HeaderMap;
use futures_util::FutureExt;
use http_body_util::Full;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, info_span, warn, Instrument};
use zephyr_cache::{
    CacheOverride, CachePolicy, CacheStats, Lookup, ResponseCache, ResponseCacheKey, RouteCache,
    RouteCacheKey,
};
use zephyr_core::{
    into_parts, BoxFuture, HttpHandler, Params, Request, RequestContext, Response, Schema,
    SharedSchema, ValidationError, ValidationTarget, ZephyrError, ZephyrResult,
};
use zephyr_middleware::stages::{Algorithm, Compression, CorsPolicy};
use zephyr_middleware::{MiddlewareDiscovery, MiddlewareStack};
use zephyr_router::{
    scan, scan_protocol, ProtocolType, RouteDescriptor, RouteTable, SharedRouteTable,
};
use zephyr_telemetry::metrics::{record_cache_lookup, record_coalesced, record_request};
use zephyr_ws::{CloseCode, Connection, SharedWsRoute, TopicRegistry, WsContext, WsSession};

use crate::builder::DispatcherBuilder;
use crate::coalesce::{Coalescer, Flight};
use crate::error::{DispatchError, DispatchResult};
use crate::manual::ManualRoute;
use crate::mount::Mount;
use crate::route::{BoundRoute, HttpRoute, RouteTarget, SharedHandler};
use crate::tcp::{SharedTcpHandler, TcpContext, TcpSession};
use crate::ws::WsHandle;

/// Handlers registered in code, keyed by normalized URL pattern.
#[derive(Default)]
pub(crate) struct Bindings {
    pub(crate) http: HashMap<String, Arc<HttpRoute>>,
    pub(crate) websocket: HashMap<String, SharedWsRoute>,
    pub(crate) tcp: HashMap<String, SharedTcpHandler>,
    pub(crate) rpc: HashMap<String, SharedHandler>,
}

/// What the handler-resolution cache stores for `(method, path)`.
#[derive(Clone)]
pub(crate) struct Resolved {
    handler: SharedHandler,
    route: Arc<HttpRoute>,
    cache: CachePolicy,
    params: Params,
    validated_params: Option<Value>,
    stack: Arc<MiddlewareStack>,
}

pub(crate) struct Inner {
    pub(crate) api_dir: PathBuf,
    pub(crate) tcp_dir: Option<PathBuf>,
    pub(crate) bindings: Bindings,
    pub(crate) cache_policy: CachePolicy,
    pub(crate) response_cache: ResponseCache,
    pub(crate) route_cache: Option<RouteCache<Resolved>>,
    pub(crate) discovery: MiddlewareDiscovery,
    pub(crate) cors: Option<CorsPolicy>,
    pub(crate) coalescer: Option<Coalescer>,
    pub(crate) compression: Option<Compression>,
    pub(crate) mounts: Vec<Mount>,
    pub(crate) manual: Vec<ManualRoute>,
    pub(crate) topics: TopicRegistry,
    pub(crate) table: SharedRouteTable<BoundRoute>,
    pub(crate) loaded: OnceCell<()>,
    pub(crate) reload_lock: Mutex<()>,
}

/// Routes HTTP requests, WebSocket upgrades, TCP connections and RPC calls
/// to the handlers bound to scanned route files.
///
/// Cloning is cheap; clones share routes, caches and topics.
///
/// # Example
///
/// ```no_run
/// use zephyr_core::{handler_fn, RequestContext};
/// use zephyr_dispatch::{Dispatcher, HttpRoute};
///
/// # async fn run() {
/// let dispatcher = Dispatcher::builder("src/routes")
///     .http("/users/[id]", HttpRoute::new().get(handler_fn(|ctx: RequestContext| async move {
///         format!("user {}", ctx.param("id").unwrap_or_default())
///     })))
///     .build();
///
/// let ctx = RequestContext::builder(http::Method::GET, "/users/7").build();
/// let response = dispatcher.handle_http(ctx).await;
/// # let _ = response;
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Starts building a dispatcher serving route files under `api_dir`.
    pub fn builder(api_dir: impl Into<PathBuf>) -> DispatcherBuilder {
        DispatcherBuilder::new(api_dir)
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Re-scans the route directories, re-binds handlers and swaps the
    /// table. Clears the handler-resolution cache and the middleware cache.
    /// Returns the number of bound routes.
    pub async fn reload(&self) -> usize {
        let count = self.rebuild().await;
        let _ = self.inner.loaded.set(());
        count
    }

    /// Returns the current route table, scanning first if needed.
    pub async fn routes(&self) -> Arc<RouteTable<BoundRoute>> {
        self.ensure_loaded().await
    }

    /// Returns the topic registry shared by this dispatcher's WebSocket
    /// sessions.
    pub fn topics(&self) -> &TopicRegistry {
        &self.inner.topics
    }

    /// Returns the handler-resolution cache counters, if that cache is on.
    pub fn route_cache_stats(&self) -> Option<CacheStats> {
        self.inner.route_cache.as_ref().map(RouteCache::stats)
    }

    /// Drops every cached response.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn clear_response_cache(&self) -> zephyr_cache::CacheResult<()> {
        self.inner.response_cache.clear().await
    }

    /// Dispatches a full HTTP request.
    pub async fn handle_request(&self, request: Request) -> Response {
        let ctx = RequestContext::from_request(request).await;
        self.handle_http(ctx).await
    }

    /// Dispatches an HTTP request context.
    pub async fn handle_http(&self, ctx: RequestContext) -> Response {
        let span = info_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = %ctx.path(),
        );
        let started = Instant::now();

        async move {
            let cors = self
                .inner
                .cors
                .as_ref()
                .map(|policy| policy.evaluate_request(&ctx));

            let mut response = match &cors {
                Some(outcome) if outcome.short_circuit => {
                    debug!(allowed = outcome.allow, "answered preflight");
                    outcome.preflight_response()
                }
                _ => self.route_http(ctx).await,
            };
            if let Some(outcome) = cors.as_ref().filter(|o| !o.short_circuit) {
                outcome.apply(&mut response);
            }

            let status = response.status().as_u16();
            record_request(ProtocolType::Http.as_str(), status, started.elapsed());
            debug!(status, elapsed_ms = started.elapsed().as_millis() as u64, "request completed");
            response
        }
        .instrument(span)
        .await
    }

    /// Binds a WebSocket upgrade at `path` to its route and runs the open
    /// callback.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoRoute`] after closing `connection` with
    /// a policy-violation frame when no WebSocket route matches.
    pub async fn handle_websocket(
        &self,
        path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        connection: Connection,
    ) -> DispatchResult<WsHandle> {
        let table = self.ensure_loaded().await;
        let bound = table
            .find(path, None, ProtocolType::WebSocket)
            .and_then(|found| match &found.route.target {
                RouteTarget::WebSocket(route) => Some((Arc::clone(route), found.params)),
                _ => None,
            });

        let Some((route, params)) = bound else {
            debug!(path, "no websocket route");
            let _ = connection.close(CloseCode::PolicyViolation, "no route");
            return Err(DispatchError::no_route(ProtocolType::WebSocket, path));
        };

        let ctx = WsContext::new(connection, path, params, self.inner.topics.clone())
            .with_query(query)
            .with_headers(headers);
        Ok(WsHandle::new(WsSession::open(route, ctx).await))
    }

    /// Binds a TCP connection to the first TCP handler in the table and
    /// runs the open callback.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoRoute`] after ending the connection when
    /// no TCP handler is bound.
    pub async fn handle_tcp(&self, mut ctx: TcpContext) -> DispatchResult<TcpSession> {
        let table = self.ensure_loaded().await;
        let handler = table
            .protocol(ProtocolType::Tcp)
            .find_map(|bound| match &bound.target {
                RouteTarget::Tcp(handler) => Some(Arc::clone(handler)),
                _ => None,
            });

        match handler {
            Some(handler) => Ok(TcpSession::open(handler, ctx).await),
            None => {
                let _ = ctx.end(None);
                Err(DispatchError::no_route(ProtocolType::Tcp, "/"))
            }
        }
    }

    /// Invokes the RPC endpoint bound at the request path. The method is
    /// ignored; the endpoint sees the captured params.
    pub async fn handle_rpc(&self, mut ctx: RequestContext) -> Response {
        let started = Instant::now();
        let table = self.ensure_loaded().await;
        let bound = table
            .find(ctx.path(), None, ProtocolType::Rpc)
            .and_then(|found| match &found.route.target {
                RouteTarget::Rpc(endpoint) => Some((Arc::clone(endpoint), found.params)),
                _ => None,
            });

        let mut response = match bound {
            Some((endpoint, params)) => {
                ctx.set_params(params);
                let mut response = endpoint.call(&mut ctx).await;
                ctx.apply_response_headers(&mut response);
                response
            }
            None => reject(ZephyrError::not_found(ctx.path())),
        };
        if let Some(outcome) = self.inner.cors.as_ref().map(|p| p.evaluate_request(&ctx)) {
            outcome.apply(&mut response);
        }
        record_request(ProtocolType::Rpc.as_str(), response.status().as_u16(), started.elapsed());
        response
    }

    async fn ensure_loaded(&self) -> Arc<RouteTable<BoundRoute>> {
        self.inner
            .loaded
            .get_or_init(|| async {
                self.rebuild().await;
            })
            .await;
        self.inner.table.snapshot()
    }

    async fn rebuild(&self) -> usize {
        let _guard = self.inner.reload_lock.lock().await;
        let table = self.build_table().await;
        let count = table.len();
        self.inner.table.replace(table);
        if let Some(cache) = &self.inner.route_cache {
            cache.clear();
        }
        self.inner.discovery.invalidate();
        info!(routes = count, api_dir = %self.inner.api_dir.display(), "route table loaded");
        count
    }

    async fn build_table(&self) -> RouteTable<BoundRoute> {
        let mut descriptors: Vec<RouteDescriptor> = scan(&self.inner.api_dir)
            .await
            .into_iter()
            .filter(|d| d.protocol() != ProtocolType::Tcp)
            .collect();
        if let Some(tcp_dir) = &self.inner.tcp_dir {
            descriptors.extend(scan_protocol(tcp_dir, ProtocolType::Tcp).await);
        }

        let mut routes = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match self.bind(&descriptor).await {
                Some(target) => routes.push(BoundRoute::new(descriptor, target)),
                None => warn!(
                    protocol = %descriptor.protocol(),
                    pattern = descriptor.url_pattern(),
                    file = %descriptor.file_path().display(),
                    "route file has no registered handler"
                ),
            }
        }
        RouteTable::new(routes)
    }

    async fn bind(&self, descriptor: &RouteDescriptor) -> Option<RouteTarget> {
        let pattern = descriptor.url_pattern();
        let bindings = &self.inner.bindings;
        match descriptor.protocol() {
            ProtocolType::Http => {
                let route = Arc::clone(bindings.http.get(pattern)?);
                let cache = self.cache_policy_for(descriptor, &route).await;
                Some(RouteTarget::Http { route, cache })
            }
            ProtocolType::WebSocket => bindings
                .websocket
                .get(pattern)
                .cloned()
                .map(RouteTarget::WebSocket),
            ProtocolType::Tcp => bindings.tcp.get(pattern).cloned().map(RouteTarget::Tcp),
            ProtocolType::Rpc => bindings.rpc.get(pattern).cloned().map(RouteTarget::Rpc),
        }
    }

    /// Global policy, then `cache.toml`, then the programmatic override.
    async fn cache_policy_for(&self, descriptor: &RouteDescriptor, route: &HttpRoute) -> CachePolicy {
        let from_file = match descriptor.directory() {
            Some(dir) => CacheOverride::load(dir).await.unwrap_or_else(|error| {
                warn!(dir = %dir.display(), %error, "ignoring unreadable cache override");
                None
            }),
            None => None,
        };
        let from_code = route.route_config().cache.as_ref();

        let merged = match (from_file, from_code) {
            (Some(file), Some(code)) => Some(file.merge(code)),
            (Some(file), None) => Some(file),
            (None, code) => code.cloned(),
        };
        match merged {
            Some(overrides) => self.inner.cache_policy.with_override(&overrides),
            None => self.inner.cache_policy.clone(),
        }
    }

    async fn route_http(&self, ctx: RequestContext) -> Response {
        for mount in &self.inner.mounts {
            if let Some(forwarded) = mount.forward(&ctx) {
                debug!(?mount, "forwarding to mounted app");
                return mount.app().fetch(forwarded).await;
            }
        }

        if let Some(route) = self
            .inner
            .manual
            .iter()
            .find(|route| route.matches(ctx.method(), ctx.path()))
        {
            return route.invoke(ctx).await;
        }

        if let Some(coalescer) = &self.inner.coalescer {
            if Coalescer::is_eligible(&ctx) {
                let key = self.coalesce_key(&ctx);
                let this = self.clone();
                let (response, flight) = coalescer
                    .run(key, move || {
                        async move { this.resolve_and_run(ctx).await }.in_current_span()
                    })
                    .await;
                if flight == Flight::Joined {
                    record_coalesced();
                }
                return response;
            }
        }

        let path = ctx.path().to_string();
        match AssertUnwindSafe(self.resolve_and_run(ctx))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                error!(%path, "request panicked");
                ZephyrError::internal("request panicked").into_response()
            }
        }
    }

    /// Coalescing key. Callers that would get a differently encoded body
    /// must not share a flight.
    fn coalesce_key(&self, ctx: &RequestContext) -> String {
        let key = Coalescer::key(ctx);
        let Some(compression) = &self.inner.compression else {
            return key;
        };
        let accepted = ctx
            .headers()
            .get(ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let encoding = compression
            .select_algorithm(accepted)
            .map_or("identity", Algorithm::encoding_name);
        format!("{key} {encoding}")
    }

    async fn resolve_and_run(&self, mut ctx: RequestContext) -> Response {
        let resolved = match self.resolve(&ctx).await {
            Ok(resolved) => resolved,
            Err(err) => return reject(err),
        };

        ctx.set_params(resolved.params.clone());
        if let Some(value) = &resolved.validated_params {
            ctx.set_validated_params(value.clone());
        }
        if let Some(schema) = &resolved.route.route_config().query {
            match schema.validate(&ctx.query().to_json()) {
                Ok(value) => ctx.set_validated_query(value),
                Err(source) => {
                    return reject(ZephyrError::validation(ValidationTarget::Query, source))
                }
            }
        }

        let key = ResponseCacheKey::new(
            ctx.path(),
            ctx.query_string(),
            ctx.headers(),
            &resolved.cache.vary,
        );
        match self
            .inner
            .response_cache
            .lookup(&resolved.cache, ctx.method(), &key)
            .await
        {
            Lookup::Hit(mut response) => {
                record_cache_lookup("response", "hit");
                ctx.apply_response_headers(&mut response);
                return response;
            }
            Lookup::Miss => record_cache_lookup("response", "miss"),
            Lookup::Bypass => {}
        }

        let endpoint = Endpoint {
            handler: Arc::clone(&resolved.handler),
            contract: resolved.route.route_config().response.clone(),
            cache: self.inner.response_cache.clone(),
            policy: resolved.cache.clone(),
            key,
        };
        let mut response = match resolved.stack.execute(&mut ctx, &endpoint).await {
            Ok(response) => response,
            Err(err) => reject(err),
        };
        ctx.apply_response_headers(&mut response);
        response
    }

    async fn resolve(&self, ctx: &RequestContext) -> ZephyrResult<Resolved> {
        let key = RouteCacheKey::new(ctx.method(), ctx.path());
        if let Some(cache) = &self.inner.route_cache {
            if let Some(hit) = cache.get(key) {
                record_cache_lookup("route", "hit");
                return Ok(hit);
            }
            record_cache_lookup("route", "miss");
        }

        let table = self.ensure_loaded().await;
        let found = table
            .find(ctx.path(), Some(ctx.method()), ProtocolType::Http)
            .ok_or_else(|| ZephyrError::not_found(ctx.path()))?;
        let RouteTarget::Http { route, cache } = &found.route.target else {
            return Err(ZephyrError::not_found(ctx.path()));
        };
        let directory = found
            .descriptor()
            .directory()
            .map_or_else(|| self.inner.api_dir.clone(), Path::to_path_buf);
        let route = Arc::clone(route);
        let cache = cache.clone();
        let params = found.params;

        let handler = route
            .handler(ctx.method())
            .cloned()
            .ok_or_else(|| ZephyrError::method_not_allowed(ctx.method().clone(), ctx.path()))?;
        let validated_params = match &route.route_config().params {
            Some(schema) => Some(
                schema
                    .validate(&params.to_json())
                    .map_err(|source| ZephyrError::validation(ValidationTarget::Params, source))?,
            ),
            None => None,
        };
        let stack = self.inner.discovery.stack_for(&directory).await;

        let resolved = Resolved {
            handler,
            route,
            cache,
            params,
            validated_params,
            stack,
        };
        if let Some(route_cache) = &self.inner.route_cache {
            route_cache.insert(key, resolved.clone());
        }
        Ok(resolved)
    }
}

impl HttpHandler for Dispatcher {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Response> {
        Box::pin(self.handle_http(ctx.clone()))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("api_dir", &self.inner.api_dir)
            .field("tcp_dir", &self.inner.tcp_dir)
            .field("routes", &self.inner.table.snapshot().len())
            .field("mounts", &self.inner.mounts)
            .field("manual", &self.inner.manual)
            .field("coalescer", &self.inner.coalescer)
            .finish_non_exhaustive()
    }
}

/// The innermost stage of the request-phase chain.
struct Endpoint {
    handler: SharedHandler,
    contract: Option<SharedSchema>,
    cache: ResponseCache,
    policy: CachePolicy,
    key: ResponseCacheKey,
}

impl HttpHandler for Endpoint {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(self.handler.call(ctx))
                .catch_unwind()
                .await;
            let Ok(response) = outcome else {
                return reject(ZephyrError::internal(format!(
                    "handler for {} {} panicked",
                    ctx.method(),
                    ctx.path()
                )));
            };
            let response = match &self.contract {
                Some(schema) => match check_contract(schema.as_ref(), response).await {
                    Ok(response) => response,
                    Err(err) => return reject(err),
                },
                None => response,
            };
            self.cache
                .store(&self.policy, ctx.method(), &self.key, response)
                .await
        })
    }
}

/// Validates successful JSON bodies against the declared response schema.
async fn check_contract(schema: &dyn Schema, response: Response) -> ZephyrResult<Response> {
    if !response.status().is_success() || !is_json(response.headers()) {
        return Ok(response);
    }
    let (parts, body) = into_parts(response).await;
    let value: Value = serde_json::from_slice(&body).map_err(|err| {
        ZephyrError::response_contract(ValidationError::new(format!("body is not JSON: {err}")))
    })?;
    schema.validate(&value).map_err(ZephyrError::response_contract)?;
    Ok(Response::from_parts(parts, Full::new(body)))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.contains("+json"))
}

fn reject(err: ZephyrError) -> Response {
    if err.is_client_error() {
        debug!(error = %err, "request rejected");
    } else {
        error!(error = %err, "request failed");
    }
    err.into_response()
}
