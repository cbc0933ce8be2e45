//! # Zephyr Dispatch
//!
//! Joins scanned route files to the handlers registered in code and
//! dispatches traffic to them:
//!
//! - HTTP through [`Dispatcher::handle_http`], with CORS, mounts, manual
//!   routes, coalescing, both caches and the middleware pipeline
//! - WebSocket upgrades through [`Dispatcher::handle_websocket`]
//! - TCP connections through [`Dispatcher::handle_tcp`]
//! - RPC calls through [`Dispatcher::handle_rpc`]
//!
//! The host runtime owns the sockets. It turns wire traffic into
//! [`RequestContext`](zephyr_core::RequestContext)s, WebSocket
//! [`Message`](zephyr_ws::Message)s and TCP chunks, and drains the outbound
//! channels.
//!
//! ## Example
//!
//! ```no_run
//! use zephyr_core::{handler_fn, Json, RequestContext};
//! use zephyr_dispatch::{Dispatcher, HttpRoute};
//!
//! # async fn run() {
//! // src/routes/widgets/route.rs exists on disk
//! let dispatcher = Dispatcher::builder("src/routes")
//!     .http(
//!         "/widgets",
//!         HttpRoute::new().get(handler_fn(|_: RequestContext| async {
//!             Json(serde_json::json!(["sprocket"]))
//!         })),
//!     )
//!     .build();
//!
//! let response = dispatcher
//!     .handle_http(RequestContext::builder(http::Method::GET, "/widgets").build())
//!     .await;
//! assert_eq!(response.status(), http::StatusCode::OK);
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/zephyr-dispatch/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod builder;
mod coalesce;
mod dispatcher;
mod error;
mod manual;
mod mount;
mod route;
mod tcp;
mod ws;

pub use builder::DispatcherBuilder;
pub use coalesce::{Coalescer, Flight};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult};
pub use mount::{MountedApp, SharedMountedApp};
pub use route::{BoundRoute, HttpRoute, RouteConfig, SharedHandler};
pub use tcp::{SharedTcpHandler, TcpCommand, TcpContext, TcpHandler, TcpOutbound, TcpSession};
pub use ws::WsHandle;
