//! Cache policy: TTL, vary headers and `Cache-Control` directives.
//!
//! A route's effective policy is the global cache settings with its
//! overrides applied: first the `cache.toml` next to the route file, then
//! any override given programmatically on the route binding.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Name of the per-route override file.
pub const OVERRIDE_FILE: &str = "cache.toml";

/// Standard `Cache-Control` directive flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheDirectives {
    /// `no-store`; suppresses every other directive.
    pub no_store: bool,
    /// `no-cache`.
    pub no_cache: bool,
    /// `private` instead of `public`.
    pub private: bool,
    /// `max-age=N` in seconds.
    pub max_age: Option<u64>,
    /// `s-maxage=N` in seconds.
    pub s_maxage: Option<u64>,
    /// `must-revalidate`.
    pub must_revalidate: bool,
    /// `proxy-revalidate`.
    pub proxy_revalidate: bool,
    /// `no-transform`.
    pub no_transform: bool,
    /// `immutable`.
    pub immutable: bool,
    /// `stale-while-revalidate=N` in seconds.
    pub stale_while_revalidate: Option<u64>,
    /// `stale-if-error=N` in seconds.
    pub stale_if_error: Option<u64>,
}

impl CacheDirectives {
    /// Renders the `Cache-Control` header value.
    ///
    /// ```
    /// use zephyr_cache::CacheDirectives;
    ///
    /// let directives = CacheDirectives {
    ///     max_age: Some(60),
    ///     must_revalidate: true,
    ///     ..Default::default()
    /// };
    /// assert_eq!(directives.header_value(), "public, max-age=60, must-revalidate");
    /// ```
    pub fn header_value(&self) -> String {
        if self.no_store {
            return "no-store".to_string();
        }

        let mut parts: Vec<String> = Vec::new();
        if self.no_cache {
            parts.push("no-cache".into());
        }
        parts.push(if self.private { "private" } else { "public" }.into());
        if let Some(secs) = self.max_age {
            parts.push(format!("max-age={secs}"));
        }
        if let Some(secs) = self.s_maxage {
            parts.push(format!("s-maxage={secs}"));
        }
        if self.must_revalidate {
            parts.push("must-revalidate".into());
        }
        if self.proxy_revalidate {
            parts.push("proxy-revalidate".into());
        }
        if self.no_transform {
            parts.push("no-transform".into());
        }
        if self.immutable {
            parts.push("immutable".into());
        }
        if let Some(secs) = self.stale_while_revalidate {
            parts.push(format!("stale-while-revalidate={secs}"));
        }
        if let Some(secs) = self.stale_if_error {
            parts.push(format!("stale-if-error={secs}"));
        }
        parts.join(", ")
    }
}

/// The effective response-cache policy of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Whether GET responses of the route are cached.
    pub enabled: bool,
    /// Entry lifetime; `None` keeps entries until evicted.
    pub ttl: Option<Duration>,
    /// Request headers whose values become part of the key.
    pub vary: Vec<String>,
    /// Directives sent on cache hits.
    pub directives: CacheDirectives,
    /// Extra headers set on cache hits.
    pub default_headers: IndexMap<String, String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Some(Duration::from_secs(60)),
            vary: Vec::new(),
            directives: CacheDirectives::default(),
            default_headers: IndexMap::new(),
        }
    }
}

impl CachePolicy {
    /// A disabled policy.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns the `Cache-Control` header value.
    pub fn cache_control(&self) -> String {
        self.directives.header_value()
    }

    /// Returns the policy with `overrides` applied.
    #[must_use]
    pub fn with_override(&self, overrides: &CacheOverride) -> Self {
        let mut policy = self.clone();
        if let Some(enabled) = overrides.enabled {
            policy.enabled = enabled;
        }
        if let Some(ttl) = overrides.ttl {
            policy.ttl = (ttl > 0).then(|| Duration::from_secs(ttl));
        }
        if let Some(vary) = &overrides.vary {
            policy.vary.clone_from(vary);
        }
        if let Some(directives) = &overrides.directives {
            policy.directives = directives.clone();
        }
        for (name, value) in &overrides.headers {
            policy.default_headers.insert(name.clone(), value.clone());
        }
        policy
    }
}

/// Per-route overrides of the global cache settings.
///
/// Parsed from `cache.toml`:
///
/// ```toml
/// enabled = true
/// ttl = 300
/// vary = ["accept-language"]
///
/// [directives]
/// max_age = 300
/// immutable = true
///
/// [headers]
/// x-cache-scope = "catalog"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheOverride {
    /// Enables or disables caching for the route.
    pub enabled: Option<bool>,
    /// TTL in seconds; `0` means no expiry.
    pub ttl: Option<u64>,
    /// Replaces the vary header list.
    pub vary: Option<Vec<String>>,
    /// Replaces the directive set.
    pub directives: Option<CacheDirectives>,
    /// Added to the default headers.
    pub headers: IndexMap<String, String>,
}

impl CacheOverride {
    /// Parses an override document.
    pub fn from_toml(source: &str, path: &Path) -> CacheResult<Self> {
        toml::from_str(source).map_err(|source| CacheError::Override {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `cache.toml` from `route_dir`, if present.
    pub async fn load(route_dir: &Path) -> CacheResult<Option<Self>> {
        let path = route_dir.join(OVERRIDE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(source) => Self::from_toml(&source, &path).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Layers `other` on top of `self`; fields set in `other` win.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.ttl.is_some() {
            self.ttl = other.ttl;
        }
        if other.vary.is_some() {
            self.vary.clone_from(&other.vary);
        }
        if other.directives.is_some() {
            self.directives.clone_from(&other.directives);
        }
        for (name, value) in &other.headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}
