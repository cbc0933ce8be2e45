//! The handler-resolution cache.
//!
//! Maps `(method, path)` to whatever the dispatcher resolved for it (the
//! route and its validated params) so repeated requests skip matching.
//! Kept in memory only; it is cleared whenever the route table changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::backend::CacheStats;
use crate::key::RouteCacheKey;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    sequence: u64,
}

/// A bounded map from [`RouteCacheKey`] to resolved routes.
#[derive(Debug)]
pub struct RouteCache<V> {
    entries: RwLock<HashMap<RouteCacheKey, Entry<V>>>,
    max_size: usize,
    ttl: Option<Duration>,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> RouteCache<V> {
    /// Creates a cache holding at most `max_size` entries. A size of zero
    /// disables caching.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            ttl: None,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Expires entries `ttl` after insertion.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the cached value for `key`.
    pub fn get(&self, key: RouteCacheKey) -> Option<V> {
        let entries = self.entries.read();
        let live = entries.get(&key).filter(|entry| {
            self.ttl
                .map_or(true, |ttl| entry.inserted_at.elapsed() < ttl)
        });
        if let Some(entry) = live {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Caches `value` under `key`, evicting the oldest insertion when full.
    pub fn insert(&self, key: RouteCacheKey, value: V) {
        if self.max_size == 0 {
            return;
        }
        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(key, _)| *key);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}
