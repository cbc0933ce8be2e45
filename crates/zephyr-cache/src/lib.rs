//! # Zephyr Cache
//!
//! The two caches of the Zephyr dispatcher. They never share state:
//!
//! - [`RouteCache`] maps a hash of method and path to the resolved route,
//!   letting repeated requests skip route matching.
//! - [`ResponseCache`] stores bodies of successful GET responses keyed by
//!   path, query and selected vary headers, with a TTL.
//!
//! Response bodies live in a [`CacheBackend`]: [`MemoryBackend`] in
//! process, or [`FileBackend`] on disk.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use zephyr_cache::{CachePolicy, MemoryBackend, ResponseCache};
//!
//! let cache = ResponseCache::new(MemoryBackend::with_max_size(1_000));
//! let policy = CachePolicy {
//!     enabled: true,
//!     ttl: Some(Duration::from_secs(60)),
//!     ..CachePolicy::default()
//! };
//! # let _ = (cache, policy);
//! ```

#![doc(html_root_url = "https://docs.rs/zephyr-cache/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod backend;
mod error;
mod key;
mod policy;
mod response;
mod route;

pub use backend::{CacheBackend, CacheStats, FileBackend, MemoryBackend, SharedBackend};
pub use error::{CacheError, CacheResult};
pub use key::{ResponseCacheKey, RouteCacheKey};
pub use policy::{CacheDirectives, CacheOverride, CachePolicy, OVERRIDE_FILE};
pub use response::{CachedResponse, Lookup, ResponseCache};
pub use route::RouteCache;
