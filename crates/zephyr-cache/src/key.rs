//! Cache key derivation.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use http::{HeaderMap, Method};

/// Key of the handler-resolution cache: a hash of method and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteCacheKey(u64);

impl RouteCacheKey {
    /// Derives the key for a request.
    pub fn new(method: &Method, path: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        method.as_str().hash(&mut hasher);
        path.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Returns the raw hash.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Key of the response cache.
///
/// Made of the path, the raw query string and the values of the configured
/// vary headers that the request actually carries, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseCacheKey {
    path: String,
    query: Option<String>,
    vary_values: Vec<String>,
}

impl ResponseCacheKey {
    /// Derives the key from request parts.
    pub fn new(path: &str, query: Option<&str>, headers: &HeaderMap, vary: &[String]) -> Self {
        let vary_values = vary
            .iter()
            .filter_map(|name| headers.get(name.as_str()))
            .filter_map(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(String::from)
            .collect();
        Self {
            path: path.to_string(),
            query: query.filter(|q| !q.is_empty()).map(String::from),
            vary_values,
        }
    }

    /// Returns the string used by storage backends.
    ///
    /// `/items?page=2:en-US:gzip` for path `/items`, query `page=2` and two
    /// vary values.
    pub fn storage_key(&self) -> String {
        let mut key = self.path.clone();
        if let Some(query) = &self.query {
            key.push('?');
            key.push_str(query);
        }
        if !self.vary_values.is_empty() {
            key.push(':');
            key.push_str(&self.vary_values.join(":"));
        }
        key
    }
}

impl fmt::Display for ResponseCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
