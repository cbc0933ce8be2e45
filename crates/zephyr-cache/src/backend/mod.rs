//! Storage backends for the response cache.
//!
//! Every backend implements [`CacheBackend`]. The in-process
//! [`MemoryBackend`] is the default; [`FileBackend`] keeps entries on disk
//! and stands in for external key-value stores.

mod file;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use zephyr_core::BoxFuture;

use crate::error::CacheResult;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// A shareable backend handle.
pub type SharedBackend = Arc<dyn CacheBackend>;

/// Key-value storage with optional per-entry TTL.
pub trait CacheBackend: Send + Sync + 'static {
    /// Returns a short backend name for logs.
    fn name(&self) -> &str;

    /// Returns the live value stored under `key`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<Option<Bytes>>>;

    /// Stores `value`, replacing any previous entry.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, CacheResult<()>>;

    /// Removes `key`.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<()>>;

    /// Removes every entry.
    fn clear(&self) -> BoxFuture<'_, CacheResult<()>>;
}

/// Counters kept by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries dropped to respect the size bound.
    pub evictions: u64,
    /// Entries currently stored, including expired ones not yet read.
    pub size: usize,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`, or 0 before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
