//! Route descriptors produced by the registry.

use std::fmt;
use std::path::{Path, PathBuf};

use http::Method;
use serde::{Deserialize, Serialize};

/// Protocol served by a route file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Request/response HTTP handlers (`route.*`).
    Http,
    /// WebSocket handlers (`socket.*`).
    #[serde(rename = "websocket")]
    WebSocket,
    /// Raw TCP handlers (`handler.*`).
    Tcp,
    /// RPC adapters (`rpc.*` or `trpc.*`).
    Rpc,
}

impl ProtocolType {
    /// Recognizes the role of a file from its stem.
    ///
    /// ```rust
    /// use zephyr_router::ProtocolType;
    ///
    /// assert_eq!(ProtocolType::from_file_stem("route"), Some(ProtocolType::Http));
    /// assert_eq!(ProtocolType::from_file_stem("socket"), Some(ProtocolType::WebSocket));
    /// assert_eq!(ProtocolType::from_file_stem("utils"), None);
    /// ```
    #[must_use]
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        match stem {
            "route" => Some(Self::Http),
            "socket" => Some(Self::WebSocket),
            "handler" => Some(Self::Tcp),
            "rpc" | "trpc" => Some(Self::Rpc),
            _ => None,
        }
    }

    /// Returns the lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::Tcp => "tcp",
            Self::Rpc => "rpc",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One component of a URL pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Must equal the path segment exactly.
    Literal(String),
    /// `[name]`: matches any single segment and captures it as `name`.
    Dynamic(String),
}

impl Segment {
    /// Parses a single pattern segment.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.len() > 2 && raw.starts_with('[') && raw.ends_with(']') {
            Self::Dynamic(raw[1..raw.len() - 1].to_string())
        } else {
            Self::Literal(raw.to_string())
        }
    }

    /// Returns true for a bracketed segment.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

/// Splits a path into its non-empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Normalizes a URL pattern or path: one leading slash, no empty segments,
/// no trailing slash. The root is `/`.
///
/// ```rust
/// use zephyr_router::normalize_path;
///
/// assert_eq!(normalize_path("users//[id]/"), "/users/[id]");
/// assert_eq!(normalize_path(""), "/");
/// ```
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in split_path(path) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// An immutable record tying a URL pattern and protocol to the file that
/// declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    protocol: ProtocolType,
    file_path: PathBuf,
    url_pattern: String,
    method: Option<Method>,
    segments: Vec<Segment>,
}

impl RouteDescriptor {
    /// Creates a descriptor, normalizing the pattern.
    pub fn new(protocol: ProtocolType, file_path: impl Into<PathBuf>, url_pattern: &str) -> Self {
        let url_pattern = normalize_path(url_pattern);
        let segments = split_path(&url_pattern).map(Segment::parse).collect();
        Self {
            protocol,
            file_path: file_path.into(),
            url_pattern,
            method: None,
            segments,
        }
    }

    /// Restricts the descriptor to a single HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Returns the protocol.
    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    /// Returns the declaring file.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Returns the directory holding the declaring file.
    pub fn directory(&self) -> Option<&Path> {
        self.file_path.parent()
    }

    /// Returns the normalized URL pattern, e.g. `/users/[id]`.
    pub fn url_pattern(&self) -> &str {
        &self.url_pattern
    }

    /// Returns the declared method filter, if any.
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// Returns the parsed pattern segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true if any segment is dynamic.
    pub fn is_dynamic(&self) -> bool {
        self.segments.iter().any(Segment::is_dynamic)
    }
}

impl AsRef<RouteDescriptor> for RouteDescriptor {
    fn as_ref(&self) -> &RouteDescriptor {
        self
    }
}

impl fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.protocol, self.url_pattern)?;
        if let Some(method) = &self.method {
            write!(f, " {method}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_parse() {
        assert_eq!(Segment::parse("users"), Segment::Literal("users".into()));
        assert_eq!(Segment::parse("[id]"), Segment::Dynamic("id".into()));
        // Empty brackets are not a parameter name.
        assert_eq!(Segment::parse("[]"), Segment::Literal("[]".into()));
        assert_eq!(Segment::parse("(admin)"), Segment::Literal("(admin)".into()));
    }

    #[test]
    fn test_descriptor_segments() {
        let d = RouteDescriptor::new(ProtocolType::Http, "/srv/users/[id]/route.rs", "users/[id]/");

        assert_eq!(d.url_pattern(), "/users/[id]");
        assert_eq!(d.segments().len(), 2);
        assert!(d.is_dynamic());
        assert_eq!(d.directory(), Some(Path::new("/srv/users/[id]")));
    }

    #[test]
    fn test_root_descriptor_has_no_segments() {
        let d = RouteDescriptor::new(ProtocolType::WebSocket, "socket.rs", "/");
        assert!(d.segments().is_empty());
        assert_eq!(d.to_string(), "[websocket] /");
    }

    #[test]
    fn test_display_includes_method() {
        let d = RouteDescriptor::new(ProtocolType::Http, "route.rs", "/a").with_method(Method::POST);
        assert_eq!(d.to_string(), "[http] /a POST");
    }
}
