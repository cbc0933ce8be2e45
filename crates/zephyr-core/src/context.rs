//! Request context types.
//!
//! The [`RequestContext`] carries all per-request state through the
//! middleware pipeline and into handlers. Middleware may enrich it (state
//! bag, extensions, response headers) and every later stage sees the change.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use zephyr_router::Params;

use crate::error::{ValidationTarget, ZephyrError, ZephyrResult};
use crate::schema::ValidationError;
use crate::types::{body_bytes, Request, Response};

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for one request sortable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=None`
    None,
}

/// Attributes for [`RequestContext::set_cookie`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// `Path` attribute.
    pub path: Option<String>,
    /// `Domain` attribute.
    pub domain: Option<String>,
    /// `Max-Age` attribute.
    pub max_age: Option<Duration>,
    /// Adds `HttpOnly`.
    pub http_only: bool,
    /// Adds `Secure`.
    pub secure: bool,
    /// `SameSite` attribute.
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    fn render(&self, name: &str, value: &str) -> String {
        let mut cookie = format!("{name}={value}");
        if let Some(path) = &self.path {
            let _ = write!(cookie, "; Path={path}");
        }
        if let Some(domain) = &self.domain {
            let _ = write!(cookie, "; Domain={domain}");
        }
        if let Some(max_age) = self.max_age {
            let _ = write!(cookie, "; Max-Age={}", max_age.as_secs());
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        match self.same_site {
            Some(SameSite::Strict) => cookie.push_str("; SameSite=Strict"),
            Some(SameSite::Lax) => cookie.push_str("; SameSite=Lax"),
            Some(SameSite::None) => cookie.push_str("; SameSite=None"),
            None => {}
        }
        cookie
    }
}

/// Per-request context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use zephyr_core::RequestContext;
/// use http::Method;
///
/// let mut ctx = RequestContext::builder(Method::GET, "/search?q=rust").build();
/// ctx.set_state("user", serde_json::json!("alice"));
///
/// assert_eq!(ctx.path(), "/search");
/// assert_eq!(ctx.query_param("q"), Some("rust"));
/// assert_eq!(ctx.state("user"), Some(&serde_json::json!("alice")));
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: Params,
    query: Params,
    validated_params: Option<Value>,
    validated_query: Option<Value>,
    cookies: HashMap<String, String>,
    state: HashMap<String, Value>,
    response_headers: HeaderMap,
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context from request parts and a collected body.
    ///
    /// The query string and cookies are decoded eagerly; path params are
    /// filled in by the dispatcher once a route has matched.
    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let query = parts.uri.query().map(Params::from_query).unwrap_or_default();
        let cookies = parse_cookies(&parts.headers);
        Self {
            request_id: RequestId::new(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: Params::new(),
            query,
            validated_params: None,
            validated_query: None,
            cookies,
            state: HashMap::new(),
            response_headers: HeaderMap::new(),
            extensions: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Creates a context from a full request.
    pub async fn from_request(request: Request) -> Self {
        let (parts, body) = request.into_parts();
        Self::from_parts(parts, body_bytes(body).await)
    }

    /// Starts building a context by hand, mostly for tests and adapters.
    pub fn builder(method: Method, uri: &str) -> RequestContextBuilder {
        RequestContextBuilder {
            request: http::Request::builder().method(method).uri(uri),
            body: Bytes::new(),
            params: Params::new(),
        }
    }

    /// Returns the request ID.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the request path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the raw query string without the `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the request headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns a request header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as UTF-8 text.
    pub fn text(&self) -> ZephyrResult<&str> {
        std::str::from_utf8(&self.body).map_err(|e| {
            ZephyrError::validation(ValidationTarget::Body, ValidationError::new(e.to_string()))
        })
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ZephyrResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ZephyrError::validation(ValidationTarget::Body, ValidationError::new(e.to_string()))
        })
    }

    /// Returns the captured path parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns one path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Replaces the captured path parameters.
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Returns the decoded query parameters.
    pub fn query(&self) -> &Params {
        &self.query
    }

    /// Returns one query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }

    /// Returns the params as accepted by the route's schema, if one ran.
    pub fn validated_params(&self) -> Option<&Value> {
        self.validated_params.as_ref()
    }

    /// Records the schema-accepted params.
    pub fn set_validated_params(&mut self, value: Value) {
        self.validated_params = Some(value);
    }

    /// Returns the query as accepted by the route's schema, if one ran.
    pub fn validated_query(&self) -> Option<&Value> {
        self.validated_query.as_ref()
    }

    /// Records the schema-accepted query.
    pub fn set_validated_query(&mut self, value: Value) {
        self.validated_query = Some(value);
    }

    /// Deserializes the path params, preferring the validated form.
    pub fn params_as<T: DeserializeOwned>(&self) -> ZephyrResult<T> {
        let value = self
            .validated_params
            .clone()
            .unwrap_or_else(|| self.params.to_json());
        serde_json::from_value(value).map_err(|e| {
            ZephyrError::validation(ValidationTarget::Params, ValidationError::new(e.to_string()))
        })
    }

    /// Deserializes the query, preferring the validated form.
    pub fn query_as<T: DeserializeOwned>(&self) -> ZephyrResult<T> {
        let value = self
            .validated_query
            .clone()
            .unwrap_or_else(|| self.query.to_json());
        serde_json::from_value(value).map_err(|e| {
            ZephyrError::validation(ValidationTarget::Query, ValidationError::new(e.to_string()))
        })
    }

    /// Returns a request cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns all request cookies.
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Queues a `Set-Cookie` header on the response.
    pub fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions) -> ZephyrResult<()> {
        let rendered = options.render(name, value);
        let header = HeaderValue::from_str(&rendered)
            .map_err(|e| ZephyrError::internal_with_source("invalid cookie", e))?;
        self.response_headers.append(SET_COOKIE, header);
        Ok(())
    }

    /// Returns a value from the state bag.
    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Stores a value in the state bag.
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    /// Removes a value from the state bag.
    pub fn remove_state(&mut self, key: &str) -> Option<Value> {
        self.state.remove(key)
    }

    /// Stores typed extension data, replacing any value of the same type.
    pub fn insert_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Returns typed extension data.
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Sets a header to be merged into the final response.
    pub fn set_response_header(&mut self, name: &str, value: &str) -> ZephyrResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ZephyrError::internal_with_source("invalid header name", e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ZephyrError::internal_with_source("invalid header value", e))?;
        self.response_headers.insert(name, value);
        Ok(())
    }

    /// Returns the headers queued for the response.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Returns the queued response headers for modification.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Merges queued headers into `response`.
    ///
    /// A queued header replaces every value of that name on the response;
    /// multi-valued queued headers (cookies) are all kept.
    pub fn apply_response_headers(&self, response: &mut Response) {
        let target = response.headers_mut();
        for name in self.response_headers.keys() {
            target.remove(name);
            for value in self.response_headers.get_all(name) {
                target.append(name.clone(), value.clone());
            }
        }
    }

    /// Returns the time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Builder for hand-made contexts.
#[derive(Debug)]
pub struct RequestContextBuilder {
    request: http::request::Builder,
    body: Bytes,
    params: Params,
}

impl RequestContextBuilder {
    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request = self.request.header(name, value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a path parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push(name, value);
        self
    }

    /// Builds the context. Malformed parts fall back to `GET /`.
    pub fn build(self) -> RequestContext {
        let (parts, ()) = self
            .request
            .body(())
            .unwrap_or_else(|_| http::Request::new(()))
            .into_parts();
        let mut ctx = RequestContext::from_parts(parts, self.body);
        ctx.params = self.params;
        ctx
    }
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use http::StatusCode;

    #[test]
    fn test_cookies_parsed() {
        let ctx = RequestContext::builder(Method::GET, "/")
            .header("cookie", "session=abc; theme=dark")
            .build();

        assert_eq!(ctx.cookie("session"), Some("abc"));
        assert_eq!(ctx.cookie("theme"), Some("dark"));
        assert_eq!(ctx.cookie("missing"), None);
    }

    #[test]
    fn test_set_cookie_renders_attributes() {
        let mut ctx = RequestContext::builder(Method::GET, "/").build();
        let options = CookieOptions {
            path: Some("/".into()),
            max_age: Some(Duration::from_secs(60)),
            http_only: true,
            same_site: Some(SameSite::Lax),
            ..CookieOptions::default()
        };
        ctx.set_cookie("sid", "xyz", &options).unwrap();
        ctx.set_cookie("other", "1", &CookieOptions::default()).unwrap();

        let cookies: Vec<_> = ctx.response_headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0], "sid=xyz; Path=/; Max-Age=60; HttpOnly; SameSite=Lax");
    }

    #[test]
    fn test_apply_response_headers_overwrites() {
        let mut ctx = RequestContext::builder(Method::GET, "/").build();
        ctx.set_response_header("x-powered-by", "zephyr").unwrap();

        let mut response = Response::text(StatusCode::OK, "hi");
        response
            .headers_mut()
            .insert("x-powered-by", HeaderValue::from_static("other"));
        ctx.apply_response_headers(&mut response);

        assert_eq!(response.headers().get("x-powered-by").unwrap(), "zephyr");
        assert_eq!(response.headers().get_all("x-powered-by").iter().count(), 1);
    }

    #[test]
    fn test_extensions_are_typed() {
        #[derive(Debug, PartialEq)]
        struct UserId(u64);

        let mut ctx = RequestContext::builder(Method::GET, "/").build();
        ctx.insert_extension(UserId(7));

        assert_eq!(ctx.extension::<UserId>(), Some(&UserId(7)));
        assert!(ctx.extension::<String>().is_none());
    }

    #[test]
    fn test_params_as_prefers_validated() {
        #[derive(Deserialize)]
        struct Id {
            id: u32,
        }

        let mut ctx = RequestContext::builder(Method::GET, "/users/5")
            .param("id", "5")
            .build();
        // Raw params are strings.
        assert!(ctx.params_as::<Id>().is_err());

        ctx.set_validated_params(serde_json::json!({"id": 5}));
        assert_eq!(ctx.params_as::<Id>().unwrap().id, 5);
    }

    #[test]
    fn test_json_body() {
        let ctx = RequestContext::builder(Method::POST, "/")
            .body(r#"{"name":"zed"}"#)
            .build();
        let value: Value = ctx.json().unwrap();
        assert_eq!(value["name"], "zed");

        let bad = RequestContext::builder(Method::POST, "/").body("{").build();
        let err = bad.json::<Value>().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
