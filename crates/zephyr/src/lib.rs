//! # Zephyr
//!
//! **File-routed, multi-protocol server framework**
//!
//! Routes are declared by the directory tree, handlers are registered in
//! code under the same URL patterns, and one dispatcher serves:
//!
//! - **HTTP** with CORS, request coalescing, a response cache, a
//!   handler-resolution cache, schema validation and directory-scoped
//!   middleware
//! - **WebSocket** routes with topic publish/subscribe and a synchronized
//!   state layer
//! - **TCP** connection handlers
//! - **RPC** adapter endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zephyr::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("zephyr.toml")?
//!     .load()?;
//! zephyr::init_telemetry(&config)?;
//!
//! // src/routes/hello/route.rs
//! let dispatcher = DispatcherBuilder::from_config(&config)
//!     .http("/hello", HttpRoute::new().get(handler_fn(|_: RequestContext| async { "hi" })))
//!     .build();
//!
//! let response = dispatcher
//!     .handle_http(RequestContext::builder(http::Method::GET, "/hello").build())
//!     .await;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Request → CORS → Mounts → Manual routes → Coalescer → Route cache → Validation
//!                                                                        ↓
//! Response ← CORS ← Response middleware ← Response cache ← Request middleware ← Handler
//! ```

#![doc(html_root_url = "https://docs.rs/zephyr/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bootstrap;

pub use bootstrap::init_telemetry;

// Re-export core types
pub use zephyr_core as core;

// Re-export routing
pub use zephyr_router as router;

// Re-export middleware, CORS and compression
pub use zephyr_middleware as middleware;

// Re-export caching
pub use zephyr_cache as cache;

// Re-export WebSocket types and the sync layer
pub use zephyr_ws as ws;

// Re-export configuration
pub use zephyr_config as config;

// Re-export logging and metrics
pub use zephyr_telemetry as telemetry;

// Re-export the dispatcher
pub use zephyr_dispatch as dispatch;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use zephyr::prelude::*;
/// ```
pub mod prelude {
    pub use zephyr_core::{
        handler_fn, BoxFuture, HttpHandler, IntoResponse, Json, RequestContext, Response,
        ResponseExt, Schema, ValidationError, ZephyrError, ZephyrResult,
    };

    pub use zephyr_router::{Params, ProtocolType};

    pub use zephyr_middleware::stages::{Compression, CorsPolicy, OriginPolicy};
    pub use zephyr_middleware::{from_fn, Middleware, MiddlewareModule, Next};

    pub use zephyr_cache::{CacheOverride, CachePolicy, FileBackend, MemoryBackend};

    pub use zephyr_ws::{
        ws_fn, CloseCode, CloseFrame, Connection, Message, SyncLayer, TopicRegistry,
        WebSocketRoute, WsContext,
    };

    pub use zephyr_config::{ConfigLoader, ZephyrConfig};

    pub use zephyr_dispatch::{
        DispatchError, Dispatcher, DispatcherBuilder, HttpRoute, RouteConfig, TcpContext,
        TcpHandler, TcpSession, WsHandle,
    };
}
