//! # Zephyr Core
//!
//! Core types and traits for the Zephyr dispatch framework.
//!
//! This crate provides the foundational types used throughout Zephyr:
//!
//! - [`RequestContext`] - Per-request context: request data, params, state bag, extensions
//! - [`HttpHandler`] - The handler trait, with [`handler_fn`] for async functions
//! - [`Schema`] - The validation interface for params, query and response bodies
//! - [`ZephyrError`] - The dispatch error taxonomy and its status codes
//! - [`ConnectionState`] - Lifecycle of WebSocket and TCP connections

#![doc(html_root_url = "https://docs.rs/zephyr-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod handler;
mod lifecycle;
mod schema;
mod types;

pub use context::{CookieOptions, RequestContext, RequestContextBuilder, RequestId, SameSite};
pub use error::{ValidationTarget, ZephyrError, ZephyrResult};
pub use handler::{handler_fn, FnHandler, HttpHandler, IntoResponse, Json};
pub use lifecycle::{ConnectionEvent, ConnectionState};
pub use schema::{Schema, SharedSchema, TypedSchema, ValidationError};
pub use types::{body_bytes, into_parts, BoxFuture, Request, Response, ResponseExt};
pub use zephyr_router::Params;
