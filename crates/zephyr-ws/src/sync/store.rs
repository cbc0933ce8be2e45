//! Persistence for sync state.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zephyr_core::BoxFuture;

use crate::error::{SyncError, SyncResult};

/// Loads and persists the state of sync keys.
pub trait SyncStore<T>: Send + Sync + 'static {
    /// Returns the persisted state of `key`, if any.
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, SyncResult<Option<T>>>;

    /// Persists `state` under `key`.
    fn persist<'a>(&'a self, key: &'a str, state: &'a T) -> BoxFuture<'a, SyncResult<()>>;
}

/// A shareable store.
pub type SharedSyncStore<T> = Arc<dyn SyncStore<T>>;

/// Keeps persisted state in process memory.
#[derive(Debug)]
pub struct MemoryStore<T> {
    entries: Mutex<HashMap<String, T>>,
}

impl<T: Clone> MemoryStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds `key` with a state, as if it had been persisted earlier.
    pub fn insert(&self, key: impl Into<String>, state: T) {
        self.entries.lock().insert(key.into(), state);
    }

    /// Returns the persisted state of `key`.
    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.lock().get(key).cloned()
    }
}

impl<T: Clone> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, SyncResult<Option<T>>> {
        let state = self.get(key);
        Box::pin(async move { Ok(state) })
    }

    fn persist<'a>(&'a self, key: &'a str, state: &'a T) -> BoxFuture<'a, SyncResult<()>> {
        self.insert(key, state.clone());
        Box::pin(async { Ok(()) })
    }
}

/// Stores each key as a JSON file under a directory.
///
/// Key characters outside `[A-Za-z0-9._-]` are escaped as `%XX`, so
/// distinct keys never share a file.
#[derive(Debug)]
pub struct FileStore<T> {
    dir: PathBuf,
    _state: PhantomData<fn() -> T>,
}

impl<T> FileStore<T> {
    /// Creates a store rooted at `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _state: PhantomData,
        }
    }

    /// Returns the file that holds `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_key(key)))
    }

    /// Returns the storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<T> FileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    async fn read(&self, key: &str) -> SyncResult<Option<T>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }

    async fn write(&self, key: &str, state: &T) -> SyncResult<()> {
        let raw = serde_json::to_vec_pretty(state)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SyncError::io(&self.dir, e))?;

        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, raw)
            .await
            .map_err(|e| SyncError::io(&staging, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| SyncError::io(&path, e))
    }
}

impl<T> SyncStore<T> for FileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, SyncResult<Option<T>>> {
        Box::pin(self.read(key))
    }

    fn persist<'a>(&'a self, key: &'a str, state: &'a T) -> BoxFuture<'a, SyncResult<()>> {
        Box::pin(self.write(key, state))
    }
}

fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Board {
        cells: Vec<u8>,
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("room-1"), "room-1");
        assert_eq!(escape_key("rooms/1"), "rooms%2F1");
        assert_ne!(escape_key("a/b"), escape_key("a_b"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load("k").await.unwrap().is_none());
        store.persist("k", &Board { cells: vec![1] }).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(Board { cells: vec![1] }));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::<Board>::new(dir.path().join("sync"));
        assert!(store.load("rooms/1").await.unwrap().is_none());

        store
            .persist("rooms/1", &Board { cells: vec![0, 2] })
            .await
            .unwrap();
        assert!(store.path_for("rooms/1").ends_with("rooms%2F1.json"));

        let reopened = FileStore::<Board>::new(dir.path().join("sync"));
        assert_eq!(
            reopened.load("rooms/1").await.unwrap(),
            Some(Board { cells: vec![0, 2] })
        );
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::<Board>::new(dir.path());
        std::fs::write(store.path_for("k"), b"{not json").unwrap();
        assert!(matches!(
            store.load("k").await.unwrap_err(),
            SyncError::Codec(_)
        ));
    }
}
