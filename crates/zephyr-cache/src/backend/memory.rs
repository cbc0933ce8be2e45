//! In-process backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use zephyr_core::BoxFuture;

use super::{CacheBackend, CacheStats};
use crate::error::CacheResult;

#[derive(Debug)]
struct StoredEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// An in-memory backend.
///
/// Entries are kept in insertion order; rewriting a key moves it to the
/// newest position. Expired entries are dropped when read. With a size
/// bound, the oldest insertions are evicted first.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<IndexMap<String, StoredEntry>>,
    max_size: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryBackend {
    /// Creates an unbounded backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding at most `max_size` entries.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size: Some(max_size),
            ..Self::default()
        }
    }

    /// Returns the current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.lock().len(),
        }
    }

    /// Returns the stored keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.shift_remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn store(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let mut entries = self.entries.lock();
        entries.shift_remove(key);
        entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        if let Some(max) = self.max_size {
            while entries.len() > max {
                if entries.shift_remove_index(0).is_none() {
                    break;
                }
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<Option<Bytes>>> {
        let value = self.lookup(key);
        Box::pin(async move { Ok(value) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, CacheResult<()>> {
        self.store(key, value, ttl);
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<()>> {
        self.entries.lock().shift_remove(key);
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> BoxFuture<'_, CacheResult<()>> {
        self.entries.lock().clear();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_is_lazy() {
        let backend = MemoryBackend::new();
        backend
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(backend.get("k").await.unwrap().unwrap(), "v");
        assert_eq!(backend.stats().size, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert_eq!(backend.stats().size, 0);

        let stats = backend.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_eviction_is_oldest_insertion_first() {
        let backend = MemoryBackend::with_max_size(2);
        backend.set("a", Bytes::from_static(b"1"), None).await.unwrap();
        backend.set("b", Bytes::from_static(b"2"), None).await.unwrap();
        // Rewriting "a" makes it the newest insertion.
        backend.set("a", Bytes::from_static(b"3"), None).await.unwrap();
        backend.set("c", Bytes::from_static(b"4"), None).await.unwrap();

        assert_eq!(backend.keys(), vec!["a", "c"]);
        assert_eq!(backend.stats().evictions, 1);
        assert_eq!(backend.get("a").await.unwrap().unwrap(), "3");
    }

    #[test]
    fn test_delete_and_clear() {
        let backend = MemoryBackend::new();
        tokio_test::block_on(async {
            backend.set("a", Bytes::from_static(b"1"), None).await.unwrap();
            backend.set("b", Bytes::from_static(b"2"), None).await.unwrap();
            backend.delete("a").await.unwrap();
            assert!(backend.get("a").await.unwrap().is_none());
            backend.clear().await.unwrap();
        });
        assert_eq!(backend.stats().size, 0);
    }
}
