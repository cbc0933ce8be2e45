//! Positional route matching.
//!
//! Matching walks the table in order and returns the first descriptor whose
//! segments line up with the path. There is no specificity scoring: the
//! table order produced by [`scan`](crate::scan) is what puts static routes
//! ahead of dynamic ones.

use http::Method;
use smallvec::SmallVec;

use crate::descriptor::{split_path, ProtocolType, RouteDescriptor, Segment};
use crate::params::Params;

/// A successful match: the table entry and the captured parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult<'t, R> {
    /// The matched table entry.
    pub route: &'t R,
    /// Values captured by dynamic segments.
    pub params: Params,
}

impl<'t, R: AsRef<RouteDescriptor>> MatchResult<'t, R> {
    /// Returns the descriptor of the matched entry.
    pub fn descriptor(&self) -> &'t RouteDescriptor {
        self.route.as_ref()
    }
}

/// Finds the first entry in `table` matching `path` for `protocol`.
///
/// For HTTP, a descriptor that declares a method only matches when `method`
/// is given and equal. Descriptors without a method accept any.
///
/// ```rust
/// use zephyr_router::{match_route, ProtocolType, RouteDescriptor};
///
/// let table = vec![
///     RouteDescriptor::new(ProtocolType::Http, "route.rs", "/users/me"),
///     RouteDescriptor::new(ProtocolType::Http, "route.rs", "/users/[id]"),
/// ];
///
/// let found = match_route(&table, "/users/42", None, ProtocolType::Http).unwrap();
/// assert_eq!(found.descriptor().url_pattern(), "/users/[id]");
/// assert_eq!(found.params.get("id"), Some("42"));
/// ```
pub fn match_route<'t, R: AsRef<RouteDescriptor>>(
    table: &'t [R],
    path: &str,
    method: Option<&Method>,
    protocol: ProtocolType,
) -> Option<MatchResult<'t, R>> {
    let parts: SmallVec<[&str; 8]> = split_path(path).collect();

    table.iter().find_map(|route| {
        let descriptor = route.as_ref();
        if descriptor.protocol() != protocol {
            return None;
        }
        if protocol == ProtocolType::Http {
            if let Some(required) = descriptor.method() {
                if method != Some(required) {
                    return None;
                }
            }
        }
        match_segments(descriptor.segments(), &parts).map(|params| MatchResult { route, params })
    })
}

/// Matches pattern segments against path segments of the same length.
pub fn match_segments(segments: &[Segment], parts: &[&str]) -> Option<Params> {
    if segments.len() != parts.len() {
        return None;
    }

    let mut params = Params::new();
    for (segment, part) in segments.iter().zip(parts) {
        match segment {
            Segment::Literal(literal) if literal == part => {}
            Segment::Literal(_) => return None,
            Segment::Dynamic(name) => params.push(name.as_str(), *part),
        }
    }
    Some(params)
}
