//! File-convention routing for Zephyr.
//!
//! Routes are declared by the shape of a directory tree rather than by code:
//! every directory holding a role file (`route.*`, `socket.*`, `handler.*`,
//! `rpc.*`) becomes a route whose URL is the directory path. Bracketed
//! directory names (`[id]`) are dynamic segments.
//!
//! ```text
//! routes/
//! ├── route.rs            GET /            (http)
//! ├── users/
//! │   ├── route.rs        /users           (http)
//! │   └── [id]/
//! │       └── route.rs    /users/[id]      (http)
//! └── chat/
//!     └── socket.rs       /chat            (websocket)
//! ```
//!
//! # Example
//!
//! ```rust
//! use zephyr_router::{match_route, ProtocolType, RouteDescriptor};
//! use http::Method;
//!
//! let table = vec![
//!     RouteDescriptor::new(ProtocolType::Http, "routes/users/route.rs", "/users"),
//!     RouteDescriptor::new(ProtocolType::Http, "routes/users/[id]/route.rs", "/users/[id]"),
//! ];
//!
//! let found = match_route(&table, "/users/7", Some(&Method::GET), ProtocolType::Http).unwrap();
//! assert_eq!(found.params.get("id"), Some("7"));
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod descriptor;
mod matcher;
mod params;
mod registry;
mod table;
mod wildcard;

pub use descriptor::{normalize_path, split_path, ProtocolType, RouteDescriptor, Segment};
pub use matcher::{match_route, match_segments, MatchResult};
pub use params::Params;
pub use registry::{scan, scan_protocol};
pub use table::{RouteTable, SharedRouteTable};
pub use wildcard::match_wildcard;
