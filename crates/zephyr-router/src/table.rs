//! Route table snapshots with atomic replacement.

use std::sync::Arc;

use arc_swap::ArcSwap;
use http::Method;

use crate::descriptor::{ProtocolType, RouteDescriptor};
use crate::matcher::{match_route, MatchResult};

/// An ordered, immutable set of routes.
///
/// `R` is anything that exposes a [`RouteDescriptor`]: plain descriptors, or
/// descriptors bound to handlers.
#[derive(Debug, Clone)]
pub struct RouteTable<R> {
    routes: Vec<R>,
}

impl<R> Default for RouteTable<R> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<R: AsRef<RouteDescriptor>> RouteTable<R> {
    /// Creates a table preserving the given order.
    #[must_use]
    pub fn new(routes: Vec<R>) -> Self {
        Self { routes }
    }

    /// Finds the first matching route.
    pub fn find(
        &self,
        path: &str,
        method: Option<&Method>,
        protocol: ProtocolType,
    ) -> Option<MatchResult<'_, R>> {
        match_route(&self.routes, path, method, protocol)
    }

    /// Returns routes of one protocol, in table order.
    pub fn protocol(&self, protocol: ProtocolType) -> impl Iterator<Item = &R> {
        self.routes
            .iter()
            .filter(move |r| r.as_ref().protocol() == protocol)
    }

    /// Returns all routes in table order.
    pub fn routes(&self) -> &[R] {
        &self.routes
    }

    /// Returns the number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// A route table that can be replaced wholesale while readers hold older
/// snapshots.
///
/// ```rust
/// use zephyr_router::{ProtocolType, RouteDescriptor, RouteTable, SharedRouteTable};
///
/// let shared = SharedRouteTable::<RouteDescriptor>::default();
/// let before = shared.snapshot();
///
/// shared.replace(RouteTable::new(vec![
///     RouteDescriptor::new(ProtocolType::Http, "route.rs", "/ping"),
/// ]));
///
/// assert!(before.is_empty());
/// assert_eq!(shared.snapshot().len(), 1);
/// ```
#[derive(Debug)]
pub struct SharedRouteTable<R> {
    current: ArcSwap<RouteTable<R>>,
}

impl<R> Default for SharedRouteTable<R> {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteTable::default()),
        }
    }
}

impl<R> SharedRouteTable<R> {
    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<RouteTable<R>> {
        self.current.load_full()
    }

    /// Installs a new table. In-flight readers keep their snapshot.
    pub fn replace(&self, table: RouteTable<R>) {
        self.current.store(Arc::new(table));
    }
}
