//! Prefix wildcard patterns for manually registered routes.

/// Matches `path` against a manual route pattern.
///
/// A pattern ending in `/*` matches its base path and everything below it.
/// Any other pattern must equal the path exactly.
///
/// ```rust
/// use zephyr_router::match_wildcard;
///
/// assert!(match_wildcard("/api/auth/*", "/api/auth"));
/// assert!(match_wildcard("/api/auth/*", "/api/auth/session/refresh"));
/// assert!(!match_wildcard("/api/auth/*", "/api/authors"));
/// assert!(match_wildcard("/status", "/status"));
/// ```
#[must_use]
pub fn match_wildcard(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(base) => {
            path == base
                || (path.len() > base.len()
                    && path.starts_with(base)
                    && path.as_bytes()[base.len()] == b'/')
        }
        None => pattern == path,
    }
}
