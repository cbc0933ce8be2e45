//! CORS (Cross-Origin Resource Sharing) negotiation.
//!
//! [`CorsPolicy::evaluate`] computes the CORS headers for a request origin.
//! The dispatcher calls it before anything else, answering `OPTIONS`
//! preflights directly, and merges the headers into the final response.
//! The policy also implements [`Middleware`] so it can be attached to a
//! single route directory.
//!
//! ## Example
//!
//! ```
//! use http::Method;
//! use zephyr_middleware::stages::{CorsPolicy, OriginPolicy};
//!
//! let cors = CorsPolicy::builder()
//!     .origin(OriginPolicy::list(["https://app.example.com"]))
//!     .credentials(true)
//!     .build();
//!
//! let outcome = cors.evaluate(Some("https://app.example.com"), &Method::GET);
//! assert!(outcome.allow);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use zephyr_core::{BoxFuture, RequestContext, Response, ResponseExt};

use crate::middleware::{Middleware, Next};

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

/// Result of a predicate origin check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// Allow, echoing the request origin.
    Allow,
    /// Reject; the allow-origin header is emitted empty.
    Deny,
    /// Allow with this literal value instead of the request origin.
    Replace(String),
}

impl From<bool> for OriginDecision {
    fn from(allow: bool) -> Self {
        if allow {
            Self::Allow
        } else {
            Self::Deny
        }
    }
}

type OriginPredicate = Arc<dyn Fn(&str) -> OriginDecision + Send + Sync>;

/// Which origins a policy accepts.
#[derive(Clone, Default)]
pub enum OriginPolicy {
    /// Wildcard `*`.
    Any,
    /// A fixed value sent for every request.
    Exact(String),
    /// Only the listed origins; others are rejected.
    List(Vec<String>),
    /// A function deciding per origin.
    Predicate(OriginPredicate),
    /// Echo whatever origin the request carries.
    #[default]
    Reflect,
}

impl OriginPolicy {
    /// Creates a list policy.
    pub fn list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(origins.into_iter().map(Into::into).collect())
    }

    /// Creates a predicate policy. The function receives the request
    /// origin, or `""` when none was sent.
    pub fn predicate<F, D>(f: F) -> Self
    where
        F: Fn(&str) -> D + Send + Sync + 'static,
        D: Into<OriginDecision>,
    {
        Self::Predicate(Arc::new(move |origin| f(origin).into()))
    }

    /// Decides the allow-origin value and whether the origin is accepted.
    fn resolve(&self, origin: Option<&str>) -> (bool, String) {
        match self {
            Self::Any => (true, "*".to_string()),
            Self::Exact(value) => (true, value.clone()),
            Self::List(allowed) => match origin {
                Some(origin) if allowed.iter().any(|o| o == origin) => (true, origin.to_string()),
                _ => (false, String::new()),
            },
            Self::Predicate(decide) => match decide(origin.unwrap_or_default()) {
                OriginDecision::Allow => (true, origin.unwrap_or_default().to_string()),
                OriginDecision::Deny => (false, String::new()),
                OriginDecision::Replace(value) => (true, value),
            },
            Self::Reflect => (true, origin.unwrap_or("*").to_string()),
        }
    }

    fn varies_by_origin(&self) -> bool {
        !matches!(self, Self::Any | Self::Exact(_))
    }
}

impl fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Exact(value) => f.debug_tuple("Exact").field(value).finish(),
            Self::List(list) => f.debug_tuple("List").field(list).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Reflect => f.write_str("Reflect"),
        }
    }
}

impl From<&str> for OriginPolicy {
    fn from(origin: &str) -> Self {
        if origin == "*" {
            Self::Any
        } else {
            Self::Exact(origin.to_string())
        }
    }
}

impl From<Vec<String>> for OriginPolicy {
    fn from(origins: Vec<String>) -> Self {
        Self::List(origins)
    }
}

/// The outcome of evaluating a request against a policy.
#[derive(Debug, Clone)]
pub struct CorsOutcome {
    /// Whether the origin is accepted.
    pub allow: bool,
    /// Headers to merge into the response.
    pub headers: HeaderMap,
    /// True when the request is a preflight that must be answered now.
    pub short_circuit: bool,
}

impl CorsOutcome {
    /// Builds the `204 No Content` answer to a preflight.
    pub fn preflight_response(&self) -> Response {
        let mut response = Response::empty(StatusCode::NO_CONTENT);
        *response.headers_mut() = self.headers.clone();
        response
    }

    /// Merges the computed headers into `response`.
    ///
    /// `access-control-*` headers overwrite whatever the handler set. `Vary`
    /// tokens are appended next to any the response already carries.
    pub fn apply(&self, response: &mut Response) {
        let target = response.headers_mut();
        for (name, value) in &self.headers {
            if name.as_str() == headers::VARY {
                append_vary(target, value);
            } else if name.as_str().starts_with("access-control-") || !target.contains_key(name) {
                target.insert(name.clone(), value.clone());
            }
        }
    }
}

fn append_vary(target: &mut HeaderMap, value: &HeaderValue) {
    let Ok(token) = value.to_str() else {
        return;
    };
    let present = target
        .get_all(headers::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim() == "*" || v.trim().eq_ignore_ascii_case(token));
    if !present {
        target.append(HeaderName::from_static(headers::VARY), value.clone());
    }
}

/// A CORS policy.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origin: OriginPolicy,
    methods: Vec<Method>,
    allowed_headers: Vec<String>,
    exposed_headers: Vec<String>,
    credentials: bool,
    max_age: Option<Duration>,
    preflight_continue: bool,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            origin: OriginPolicy::Any,
            methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            exposed_headers: Vec::new(),
            credentials: false,
            max_age: Some(Duration::from_secs(86400)),
            preflight_continue: false,
        }
    }
}

impl CorsPolicy {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::default()
    }

    /// The policy used for `cors: true`: reflect the origin, allow credentials.
    #[must_use]
    pub fn permissive() -> Self {
        Self::builder()
            .origin(OriginPolicy::Reflect)
            .credentials(true)
            .build()
    }

    /// Returns the origin policy.
    pub fn origin(&self) -> &OriginPolicy {
        &self.origin
    }

    /// Evaluates a request with the given `Origin` header and method.
    pub fn evaluate(&self, origin: Option<&str>, method: &Method) -> CorsOutcome {
        let (allow, allow_origin) = self.origin.resolve(origin);
        let mut map = HeaderMap::new();

        insert(&mut map, headers::ALLOW_ORIGIN, &allow_origin);
        if self.origin.varies_by_origin() {
            insert(&mut map, headers::VARY, "Origin");
        }
        if self.credentials {
            insert(&mut map, headers::ALLOW_CREDENTIALS, "true");
        }
        if !self.exposed_headers.is_empty() {
            insert(&mut map, headers::EXPOSE_HEADERS, &self.exposed_headers.join(","));
        }

        let is_options = method == Method::OPTIONS;
        if is_options {
            let methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
            insert(&mut map, headers::ALLOW_METHODS, &methods.join(","));
            if !self.allowed_headers.is_empty() {
                insert(&mut map, headers::ALLOW_HEADERS, &self.allowed_headers.join(","));
            }
            if let Some(max_age) = self.max_age {
                insert(&mut map, headers::MAX_AGE, &max_age.as_secs().to_string());
            }
        }

        CorsOutcome {
            allow,
            headers: map,
            short_circuit: is_options && !self.preflight_continue,
        }
    }

    /// Evaluates a request context.
    pub fn evaluate_request(&self, ctx: &RequestContext) -> CorsOutcome {
        self.evaluate(ctx.header(headers::ORIGIN), ctx.method())
    }
}

fn insert(map: &mut HeaderMap, name: &'static str, value: &str) {
    // Values that are not valid header text (e.g. a predicate replacement
    // with control characters) are dropped.
    if let Ok(value) = HeaderValue::from_str(value) {
        map.insert(HeaderName::from_static(name), value);
    }
}

impl Middleware for CorsPolicy {
    fn name(&self) -> &str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let outcome = self.evaluate_request(ctx);
            if outcome.short_circuit {
                return outcome.preflight_response();
            }
            let mut response = next.run(ctx).await;
            outcome.apply(&mut response);
            response
        })
    }
}

/// Builder for [`CorsPolicy`].
#[derive(Debug, Clone, Default)]
pub struct CorsBuilder {
    policy: CorsPolicy,
}

impl CorsBuilder {
    /// Sets the origin policy.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<OriginPolicy>) -> Self {
        self.policy.origin = origin.into();
        self
    }

    /// Sets the allowed methods.
    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.policy.methods = methods.into_iter().collect();
        self
    }

    /// Sets the allowed request headers.
    #[must_use]
    pub fn allowed_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.allowed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets headers exposed to browser scripts.
    #[must_use]
    pub fn exposed_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.exposed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether credentials are allowed.
    #[must_use]
    pub fn credentials(mut self, allow: bool) -> Self {
        self.policy.credentials = allow;
        self
    }

    /// Sets the preflight cache duration.
    #[must_use]
    pub fn max_age(mut self, max_age: Option<Duration>) -> Self {
        self.policy.max_age = max_age;
        self
    }

    /// Lets `OPTIONS` requests continue to the handler after the headers
    /// are computed.
    #[must_use]
    pub fn preflight_continue(mut self, enabled: bool) -> Self {
        self.policy.preflight_continue = enabled;
        self
    }

    /// Builds the policy.
    #[must_use]
    pub fn build(self) -> CorsPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compose, SharedMiddleware};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zephyr_core::HttpHandler;

    fn list_policy() -> CorsPolicy {
        CorsPolicy::builder()
            .origin(OriginPolicy::list(["https://a.com"]))
            .build()
    }

    #[test]
    fn test_list_echoes_listed_origin() {
        let outcome = list_policy().evaluate(Some("https://a.com"), &Method::GET);
        assert!(outcome.allow);
        assert_eq!(outcome.headers.get(headers::ALLOW_ORIGIN).unwrap(), "https://a.com");
        assert_eq!(outcome.headers.get(headers::VARY).unwrap(), "Origin");
        assert!(!outcome.short_circuit);
    }

    #[test]
    fn test_list_rejects_unlisted_origin() {
        let outcome = list_policy().evaluate(Some("https://b.com"), &Method::GET);
        assert!(!outcome.allow);
        assert_eq!(outcome.headers.get(headers::ALLOW_ORIGIN).unwrap(), "");
    }

    #[test]
    fn test_wildcard_and_exact() {
        let any = CorsPolicy::default().evaluate(Some("https://x.com"), &Method::GET);
        assert_eq!(any.headers.get(headers::ALLOW_ORIGIN).unwrap(), "*");
        assert!(any.headers.get(headers::VARY).is_none());

        let exact = CorsPolicy::builder()
            .origin("https://fixed.com")
            .build()
            .evaluate(Some("https://x.com"), &Method::GET);
        assert_eq!(exact.headers.get(headers::ALLOW_ORIGIN).unwrap(), "https://fixed.com");
    }

    #[test]
    fn test_reflect_without_origin_is_wildcard() {
        let policy = CorsPolicy::permissive();
        let outcome = policy.evaluate(None, &Method::GET);
        assert_eq!(outcome.headers.get(headers::ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(outcome.headers.get(headers::ALLOW_CREDENTIALS).unwrap(), "true");

        let outcome = policy.evaluate(Some("https://me.dev"), &Method::GET);
        assert_eq!(outcome.headers.get(headers::ALLOW_ORIGIN).unwrap(), "https://me.dev");
    }

    #[test]
    fn test_predicate_bool_and_replacement() {
        let policy = CorsPolicy::builder()
            .origin(OriginPolicy::predicate(|origin: &str| origin.ends_with(".trusted.io")))
            .build();
        assert!(policy.evaluate(Some("https://api.trusted.io"), &Method::GET).allow);
        assert!(!policy.evaluate(Some("https://evil.io"), &Method::GET).allow);

        let policy = CorsPolicy::builder()
            .origin(OriginPolicy::predicate(|_: &str| {
                OriginDecision::Replace("https://canonical.io".to_string())
            }))
            .build();
        let outcome = policy.evaluate(Some("https://other.io"), &Method::GET);
        assert_eq!(outcome.headers.get(headers::ALLOW_ORIGIN).unwrap(), "https://canonical.io");
    }

    #[test]
    fn test_preflight_headers() {
        let outcome = CorsPolicy::default().evaluate(Some("https://x.com"), &Method::OPTIONS);
        assert!(outcome.short_circuit);
        assert_eq!(
            outcome.headers.get(headers::ALLOW_METHODS).unwrap(),
            "GET,POST,PUT,DELETE,PATCH,OPTIONS"
        );
        assert_eq!(
            outcome.headers.get(headers::ALLOW_HEADERS).unwrap(),
            "Content-Type,Authorization"
        );
        assert_eq!(outcome.headers.get(headers::MAX_AGE).unwrap(), "86400");

        let response = outcome.preflight_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_preflight_continue() {
        let policy = CorsPolicy::builder().preflight_continue(true).build();
        let outcome = policy.evaluate(Some("https://x.com"), &Method::OPTIONS);
        assert!(!outcome.short_circuit);
        assert!(outcome.headers.contains_key(headers::ALLOW_METHODS));
    }

    #[test]
    fn test_apply_merges_vary_and_overwrites_cors_headers() {
        let outcome = list_policy().evaluate(Some("https://a.com"), &Method::GET);
        let mut response = Response::empty(StatusCode::OK);
        response
            .headers_mut()
            .insert(headers::VARY, HeaderValue::from_static("Accept-Encoding"));
        response
            .headers_mut()
            .insert(headers::ALLOW_ORIGIN, HeaderValue::from_static("https://stale"));

        outcome.apply(&mut response);

        let vary: Vec<&str> = response
            .headers()
            .get_all(headers::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(vary, vec!["Accept-Encoding", "Origin"]);
        assert_eq!(response.headers().get(headers::ALLOW_ORIGIN).unwrap(), "https://a.com");
    }

    #[test]
    fn test_apply_does_not_repeat_vary_origin() {
        let outcome = list_policy().evaluate(Some("https://a.com"), &Method::GET);
        let mut response = Response::empty(StatusCode::OK);
        response
            .headers_mut()
            .insert(headers::VARY, HeaderValue::from_static("accept-encoding, origin"));

        outcome.apply(&mut response);
        outcome.apply(&mut response);

        assert_eq!(response.headers().get_all(headers::VARY).iter().count(), 1);
    }

    struct Counter(AtomicUsize);

    impl HttpHandler for Counter {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Response> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Response::text(StatusCode::OK, "ok") })
        }
    }

    #[tokio::test]
    async fn test_as_middleware() {
        let cors: SharedMiddleware = Arc::new(list_policy());
        let pipeline = compose([cors]);
        let handler = Counter(AtomicUsize::new(0));

        let mut ctx = RequestContext::builder(Method::OPTIONS, "/items")
            .header("origin", "https://a.com")
            .build();
        let response = pipeline.run(&mut ctx, &handler).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(handler.0.load(Ordering::SeqCst), 0);

        let mut ctx = RequestContext::builder(Method::GET, "/items")
            .header("origin", "https://a.com")
            .build();
        let response = pipeline.run(&mut ctx, &handler).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(headers::ALLOW_ORIGIN).unwrap(), "https://a.com");
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }
}
