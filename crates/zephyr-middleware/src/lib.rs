//! # Zephyr Middleware
//!
//! The two-phase middleware pipeline of the Zephyr dispatch framework.
//!
//! ## Overview
//!
//! Middleware wraps route handlers in an onion: each stage sees the request
//! on the way in and the response on the way out, and may answer early
//! instead of calling `next`. Every route resolves two chains:
//!
//! - the **request phase**, wrapping the handler
//! - the **response phase**, wrapping the produced response
//!
//! Which middleware apply to a route is decided by the source layout (see
//! [`MiddlewareDiscovery`]): global middleware first, then per-directory
//! `middleware.*` files from the outermost directory inwards.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use zephyr_middleware::{from_fn, MiddlewareStack, SharedMiddleware};
//!
//! let auth: SharedMiddleware = Arc::new(from_fn("auth", |ctx, next| next.run(ctx)));
//! let stack = MiddlewareStack::new([auth], Vec::new());
//! assert_eq!(stack.phase(zephyr_middleware::Phase::Request).len(), 1);
//! ```

#![doc(html_root_url = "https://docs.rs/zephyr-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod discovery;
mod middleware;
mod pipeline;
pub mod stages;

pub use discovery::{MiddlewareDiscovery, MiddlewareModule, MiddlewareRegistry};
pub use middleware::{from_fn, FnMiddleware, Middleware, Next, SharedMiddleware};
pub use pipeline::{compose, MiddlewareStack, Phase, Pipeline};
