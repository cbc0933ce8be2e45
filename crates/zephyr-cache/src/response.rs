//! The response-body cache.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::Full;
use tracing::{debug, warn};
use zephyr_core::{into_parts, Response};

use crate::backend::{CacheBackend, SharedBackend};
use crate::error::{CacheError, CacheResult};
use crate::key::ResponseCacheKey;
use crate::policy::CachePolicy;

/// A stored response: its content type and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// `Content-Type` of the original response, empty if it had none.
    pub content_type: String,
    /// Raw body.
    pub body: Bytes,
}

impl CachedResponse {
    /// Encodes as `content-type`, newline, body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.content_type.len() + 1 + self.body.len());
        buf.put_slice(self.content_type.as_bytes());
        buf.put_u8(b'\n');
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decodes an encoded entry.
    pub fn decode(raw: &Bytes) -> CacheResult<Self> {
        let newline = raw
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| CacheError::corrupt("missing content-type line"))?;
        let content_type = std::str::from_utf8(&raw[..newline])
            .map_err(|_| CacheError::corrupt("content-type is not UTF-8"))?
            .to_string();
        Ok(Self {
            content_type,
            body: raw.slice(newline + 1..),
        })
    }
}

/// Outcome of a response-cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// A fresh response rebuilt from the stored entry.
    Hit(Response),
    /// Nothing usable was stored.
    Miss,
    /// The request is not eligible for caching.
    Bypass,
}

/// Caches successful GET response bodies in a [`CacheBackend`].
#[derive(Clone)]
pub struct ResponseCache {
    backend: SharedBackend,
}

impl ResponseCache {
    /// Creates a cache over `backend`.
    pub fn new(backend: impl CacheBackend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Creates a cache over an already shared backend.
    pub fn from_shared(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Returns the backend.
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Returns true if requests with `method` may be served from or stored
    /// in the cache under `policy`.
    pub fn is_eligible(policy: &CachePolicy, method: &Method) -> bool {
        policy.enabled && method == Method::GET
    }

    /// Looks up a stored response.
    ///
    /// Backend failures are logged and reported as a miss.
    pub async fn lookup(
        &self,
        policy: &CachePolicy,
        method: &Method,
        key: &ResponseCacheKey,
    ) -> Lookup {
        if !Self::is_eligible(policy, method) {
            return Lookup::Bypass;
        }
        let storage_key = key.storage_key();
        let raw = match self.backend.get(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(error) => {
                warn!(backend = self.backend.name(), key = %storage_key, %error, "cache read failed");
                return Lookup::Miss;
            }
        };
        match CachedResponse::decode(&raw) {
            Ok(entry) => {
                debug!(key = %storage_key, "response cache hit");
                Lookup::Hit(build_hit(policy, entry))
            }
            Err(error) => {
                warn!(key = %storage_key, %error, "dropping undecodable cache entry");
                let _ = self.backend.delete(&storage_key).await;
                Lookup::Miss
            }
        }
    }

    /// Stores `response` when it is a 200 to an eligible request and
    /// returns it unchanged.
    pub async fn store(
        &self,
        policy: &CachePolicy,
        method: &Method,
        key: &ResponseCacheKey,
        response: Response,
    ) -> Response {
        if !Self::is_eligible(policy, method) || response.status() != StatusCode::OK {
            return response;
        }

        let (parts, body) = into_parts(response).await;
        let entry = CachedResponse {
            content_type: parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            body: body.clone(),
        };
        let storage_key = key.storage_key();
        if let Err(error) = self
            .backend
            .set(&storage_key, entry.encode(), policy.ttl)
            .await
        {
            warn!(backend = self.backend.name(), key = %storage_key, %error, "cache write failed");
        }
        Response::from_parts(parts, Full::new(body))
    }

    /// Drops every stored response.
    pub async fn clear(&self) -> CacheResult<()> {
        self.backend.clear().await
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("backend", &self.backend.name())
            .finish()
    }
}

fn build_hit(policy: &CachePolicy, entry: CachedResponse) -> Response {
    let mut response = Response::new(Full::new(entry.body));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&entry.content_type) {
        if !value.is_empty() {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&policy.cache_control()) {
        headers.insert(CACHE_CONTROL, value);
    }
    apply_default_headers(headers, policy);
    response
}

fn apply_default_headers(headers: &mut HeaderMap, policy: &CachePolicy) {
    for (name, value) in &policy.default_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid default cache header"),
        }
    }
}
