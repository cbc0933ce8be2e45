//! Directory-backed backend, one file per key.
//!
//! Each entry file starts with a header line holding the expiry as Unix
//! milliseconds (`0` for none), followed by the raw value. Entries survive
//! restarts, which is what separates this backend from [`MemoryBackend`].
//!
//! [`MemoryBackend`]: super::MemoryBackend

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::debug;
use zephyr_core::BoxFuture;

use super::CacheBackend;
use crate::error::{CacheError, CacheResult};

const ENTRY_EXTENSION: &str = "entry";

/// Stores entries as files under a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `dir`. The directory is created on the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.dir
            .join(format!("{:016x}.{ENTRY_EXTENSION}", hasher.finish()))
    }

    async fn read(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let path = self.entry_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        let (expires_at, value) = decode_entry(&raw)?;
        if expires_at != 0 && expires_at <= now_millis() {
            debug!(key, "file cache entry expired");
            self.remove(&path).await?;
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(value)))
    }

    async fn write(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?;

        let expires_at = ttl.map_or(0, |ttl| {
            now_millis().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
        });
        let mut raw = format!("{expires_at}\n").into_bytes();
        raw.extend_from_slice(&value);

        let path = self.entry_path(key);
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| CacheError::io(path, e))
    }

    async fn remove(&self, path: &Path) -> CacheResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    async fn remove_all(&self) -> CacheResult<()> {
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                self.remove(&path).await?;
            }
        }
        Ok(())
    }
}

fn decode_entry(raw: &[u8]) -> CacheResult<(u64, &[u8])> {
    let newline = raw
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| CacheError::corrupt("missing header line"))?;
    let header = std::str::from_utf8(&raw[..newline])
        .map_err(|_| CacheError::corrupt("header is not UTF-8"))?;
    let expires_at = header
        .trim()
        .parse::<u64>()
        .map_err(|_| CacheError::corrupt(format!("invalid expiry `{header}`")))?;
    Ok((expires_at, &raw[newline + 1..]))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl CacheBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<Option<Bytes>>> {
        Box::pin(self.read(key))
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, CacheResult<()>> {
        Box::pin(self.write(key, value, ttl))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<()>> {
        Box::pin(async move { self.remove(&self.entry_path(key)).await })
    }

    fn clear(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(self.remove_all())
    }
}
