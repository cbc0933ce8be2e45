//! Keyed shared state synchronised across WebSocket connections.
//!
//! A [`SyncLayer`] holds one entry per key (by default the connection's
//! path). Connections [`join`](SyncLayer::join) an entry to receive its
//! state, push changes through [`update`](SyncLayer::update) and
//! [`leave`](SyncLayer::leave) when done. Every committed update is
//! broadcast to all joined connections as
//! `{"type":"update","data":<state>}`; a rejected one only reaches the
//! caller as `{"type":"error","error":"<message>"}`.
//!
//! Updates on one key are serialised by the entry's lock. Once the last
//! connection leaves, the entry is torn down (`on_close`, then persisted,
//! then dropped), either immediately or after the configured TTL if no one
//! joins in the meantime.

mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use zephyr_core::{Schema, SharedSchema, TypedSchema};

pub use store::{FileStore, MemoryStore, SharedSyncStore, SyncStore};

use crate::connection::{Connection, ConnectionId};
use crate::context::WsContext;
use crate::error::{SyncError, SyncResult};
use crate::message::Message;

/// Bounds every sync state type satisfies.
pub trait SyncState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> SyncState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Frames sent by a sync layer.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncFrame<'a, T> {
    /// The committed state, sent to every joined connection.
    Update {
        /// Full state after the update.
        data: &'a T,
    },
    /// A rejected update, sent to its caller only.
    Error {
        /// Why the update was rejected.
        error: String,
    },
}

type KeyFn = Arc<dyn Fn(&WsContext) -> String + Send + Sync>;
type InitialFn<T> = Arc<dyn Fn() -> T + Send + Sync>;
type UpdateHook<T> = Arc<dyn Fn(&str, &T, &WsContext) + Send + Sync>;
type CloseHook<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

struct Entry<T> {
    state: T,
    subscribers: HashMap<ConnectionId, Connection>,
    loaded: bool,
    closed: bool,
    last_active: Instant,
    teardown: Option<JoinHandle<()>>,
    generation: u64,
}

impl<T> Entry<T> {
    fn new(state: T) -> Self {
        Self {
            state,
            subscribers: HashMap::new(),
            loaded: false,
            closed: false,
            last_active: Instant::now(),
            teardown: None,
            generation: 0,
        }
    }

    fn cancel_teardown(&mut self) {
        if let Some(timer) = self.teardown.take() {
            timer.abort();
        }
        self.generation += 1;
    }
}

type Slot<T> = Arc<Mutex<Entry<T>>>;

struct Inner<T> {
    key: KeyFn,
    schema: SharedSchema,
    initial: InitialFn<T>,
    ttl: Option<Duration>,
    on_update: Option<UpdateHook<T>>,
    on_close: Option<CloseHook<T>>,
    store: Option<SharedSyncStore<T>>,
    entries: DashMap<String, Slot<T>>,
}

impl<T: SyncState> Inner<T> {
    /// Locks the live entry of `key`, creating and loading it on first use.
    async fn acquire(&self, key: &str) -> SyncResult<(Slot<T>, OwnedMutexGuard<Entry<T>>)> {
        loop {
            let slot = Arc::clone(
                self.entries
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(Entry::new((self.initial)()))))
                    .value(),
            );
            let mut entry = Arc::clone(&slot).lock_owned().await;
            if entry.closed {
                // Torn down while we waited; a fresh entry replaces it.
                continue;
            }
            if !entry.loaded {
                if let Some(store) = &self.store {
                    match store.load(key).await {
                        Ok(Some(state)) => entry.state = state,
                        Ok(None) => {}
                        Err(error) => {
                            warn!(key, %error, "failed to load sync state");
                            if entry.subscribers.is_empty() {
                                entry.closed = true;
                                self.entries
                                    .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
                            }
                            return Err(error);
                        }
                    }
                }
                entry.loaded = true;
            }
            return Ok((slot, entry));
        }
    }

    fn slot(&self, key: &str) -> Option<Slot<T>> {
        self.entries.get(key).map(|slot| Arc::clone(slot.value()))
    }

    fn validate(&self, key: &str, proposed: &T) -> SyncResult<T> {
        let value = serde_json::to_value(proposed)?;
        let accepted = self
            .schema
            .validate(&value)
            .map_err(|source| SyncError::Validation {
                key: key.to_string(),
                source,
            })?;
        Ok(serde_json::from_value(accepted)?)
    }

    async fn persist(&self, key: &str, state: &T) {
        if let Some(store) = &self.store {
            if let Err(error) = store.persist(key, state).await {
                warn!(key, %error, "failed to persist sync state");
            }
        }
    }

    /// Runs once the entry has no subscribers left.
    async fn release(self: &Arc<Self>, key: &str, slot: &Slot<T>, entry: &mut Entry<T>) {
        entry.cancel_teardown();
        let Some(ttl) = self.ttl else {
            self.teardown(key, slot, entry).await;
            return;
        };

        debug!(key, ?ttl, "sync entry idle, teardown scheduled");
        let inner = Arc::clone(self);
        let slot = Arc::clone(slot);
        let key = key.to_string();
        let generation = entry.generation;
        let deadline = Instant::now() + ttl;
        entry.teardown = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut entry = slot.lock().await;
            if entry.closed || entry.generation != generation || !entry.subscribers.is_empty() {
                return;
            }
            inner.teardown(&key, &slot, &mut entry).await;
        }));
    }

    async fn teardown(&self, key: &str, slot: &Slot<T>, entry: &mut Entry<T>) {
        entry.closed = true;
        entry.teardown = None;
        if let Some(on_close) = &self.on_close {
            on_close(key, &entry.state);
        }
        self.persist(key, &entry.state).await;
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
        debug!(key, "sync entry torn down");
    }
}

/// Per-key figures reported by [`SyncLayer::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncKeyStats {
    /// The sync key.
    pub key: String,
    /// Joined connections.
    pub subscribers: usize,
    /// Last join or committed update.
    pub last_active: Instant,
}

/// Snapshot of a sync layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Live keys, sorted.
    pub keys: Vec<SyncKeyStats>,
}

impl SyncStats {
    /// Returns the number of live keys.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Returns joined connections across all keys.
    pub fn subscriber_count(&self) -> usize {
        self.keys.iter().map(|k| k.subscribers).sum()
    }
}

/// Keyed shared state with schema-checked updates and broadcast.
///
/// ```rust
/// use std::time::Duration;
/// use zephyr_ws::SyncLayer;
///
/// #[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
/// struct Counter {
///     value: i64,
/// }
///
/// let layer = SyncLayer::builder(Counter::default)
///     .key(|ctx| format!("counter:{}", ctx.param("id").unwrap_or("global")))
///     .ttl(Duration::from_secs(30))
///     .build();
/// # let _ = layer;
/// ```
pub struct SyncLayer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncLayer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncState> SyncLayer<T> {
    /// Starts a layer whose entries begin as `initial()`.
    pub fn builder<F>(initial: F) -> SyncLayerBuilder<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        SyncLayerBuilder {
            key: Arc::new(|ctx: &WsContext| ctx.path().to_string()),
            schema: None,
            initial: Arc::new(initial),
            ttl: None,
            on_update: None,
            on_close: None,
            store: None,
        }
    }

    /// Returns the key `ctx` maps to.
    pub fn key_for(&self, ctx: &WsContext) -> String {
        (self.inner.key)(ctx)
    }

    /// Adds the connection to its key's entry and returns the current state.
    ///
    /// The first join of a key loads its state from the store. A pending
    /// idle teardown of the entry is cancelled.
    pub async fn join(&self, ctx: &WsContext) -> SyncResult<T> {
        let key = self.key_for(ctx);
        let (_, mut entry) = self.inner.acquire(&key).await?;
        entry.cancel_teardown();
        entry
            .subscribers
            .insert(ctx.id(), ctx.connection().clone());
        entry.last_active = Instant::now();
        debug!(key, connection = %ctx.id(), subscribers = entry.subscribers.len(), "joined sync key");
        Ok(entry.state.clone())
    }

    /// Removes the connection from its key's entry. Returns false if it
    /// had not joined.
    pub async fn leave(&self, ctx: &WsContext) -> bool {
        let key = self.key_for(ctx);
        let Some(slot) = self.inner.slot(&key) else {
            return false;
        };
        let mut entry = slot.lock().await;
        if entry.closed || entry.subscribers.remove(&ctx.id()).is_none() {
            return false;
        }
        debug!(key, connection = %ctx.id(), subscribers = entry.subscribers.len(), "left sync key");
        if entry.subscribers.is_empty() {
            self.inner.release(&key, &slot, &mut entry).await;
        }
        true
    }

    /// Applies `mutator` to the state of the connection's key.
    ///
    /// The proposed state is validated as a whole. On rejection only the
    /// calling connection receives an error frame and the state is left
    /// unchanged. On success the state is replaced, broadcast to every
    /// joined connection, reported to `on_update` and persisted.
    pub async fn update<F>(&self, ctx: &WsContext, mutator: F) -> SyncResult<T>
    where
        F: FnOnce(&T) -> T,
    {
        let key = self.key_for(ctx);
        let (slot, mut entry) = self.inner.acquire(&key).await?;
        let proposed = mutator(&entry.state);

        let state = match self.inner.validate(&key, &proposed) {
            Ok(state) => state,
            Err(error) => {
                let message = match &error {
                    SyncError::Validation { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                let frame = SyncFrame::Error { error: message };
                if let Err(send_error) = ctx.send_json::<SyncFrame<'_, T>>(&frame) {
                    debug!(key, %send_error, "could not deliver sync error frame");
                }
                metrics::counter!("zephyr_sync_updates_total", "outcome" => "rejected").increment(1);
                if entry.subscribers.is_empty() && entry.teardown.is_none() {
                    self.inner.release(&key, &slot, &mut entry).await;
                }
                return Err(error);
            }
        };

        entry.state = state;
        entry.last_active = Instant::now();
        let frame = Message::json(&SyncFrame::Update { data: &entry.state })
            .map_err(|e| SyncError::store(e.to_string()))?;
        let before = entry.subscribers.len();
        entry
            .subscribers
            .retain(|_, connection| connection.send(frame.clone()).is_ok());
        if entry.subscribers.len() < before {
            debug!(key, dropped = before - entry.subscribers.len(), "pruned closed sync subscribers");
        }
        metrics::counter!("zephyr_sync_updates_total", "outcome" => "committed").increment(1);

        if let Some(on_update) = &self.inner.on_update {
            on_update(&key, &entry.state, ctx);
        }
        self.inner.persist(&key, &entry.state).await;

        let committed = entry.state.clone();
        if entry.subscribers.is_empty() {
            self.inner.release(&key, &slot, &mut entry).await;
        }
        Ok(committed)
    }

    /// Returns the live state of `key` without loading it.
    pub async fn get_state(&self, key: &str) -> Option<T> {
        let slot = self.inner.slot(key)?;
        let entry = slot.lock().await;
        (!entry.closed).then(|| entry.state.clone())
    }

    /// Returns the number of connections joined to `key`.
    pub async fn subscriber_count(&self, key: &str) -> usize {
        match self.inner.slot(key) {
            Some(slot) => slot.lock().await.subscribers.len(),
            None => 0,
        }
    }

    /// Reports live keys and their subscribers.
    pub async fn stats(&self) -> SyncStats {
        let slots: Vec<(String, Slot<T>)> = self
            .inner
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut keys = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let entry = slot.lock().await;
            if !entry.closed {
                keys.push(SyncKeyStats {
                    key,
                    subscribers: entry.subscribers.len(),
                    last_active: entry.last_active,
                });
            }
        }
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        SyncStats { keys }
    }
}

impl<T> fmt::Debug for SyncLayer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncLayer")
            .field("keys", &self.inner.entries.len())
            .field("ttl", &self.inner.ttl)
            .field("store", &self.inner.store.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SyncLayer`].
pub struct SyncLayerBuilder<T> {
    key: KeyFn,
    schema: Option<SharedSchema>,
    initial: InitialFn<T>,
    ttl: Option<Duration>,
    on_update: Option<UpdateHook<T>>,
    on_close: Option<CloseHook<T>>,
    store: Option<SharedSyncStore<T>>,
}

impl<T: SyncState> SyncLayerBuilder<T> {
    /// Derives the sync key from a connection. Defaults to its path.
    pub fn key<F>(mut self, key: F) -> Self
    where
        F: Fn(&WsContext) -> String + Send + Sync + 'static,
    {
        self.key = Arc::new(key);
        self
    }

    /// Validates every proposed state. Defaults to what `T` deserializes.
    pub fn schema(mut self, schema: impl Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Delays teardown of idle entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// Called after each committed update.
    pub fn on_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &T, &WsContext) + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(hook));
        self
    }

    /// Called when an entry is torn down, before it is persisted.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Loads and persists state through `store`.
    pub fn store(self, store: impl SyncStore<T>) -> Self {
        self.shared_store(Arc::new(store))
    }

    /// Like [`store`](Self::store) for an already shared store.
    pub fn shared_store(mut self, store: SharedSyncStore<T>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the layer.
    pub fn build(self) -> SyncLayer<T> {
        SyncLayer {
            inner: Arc::new(Inner {
                key: self.key,
                schema: self
                    .schema
                    .unwrap_or_else(|| Arc::new(TypedSchema::<T>::new())),
                initial: self.initial,
                ttl: self.ttl,
                on_update: self.on_update,
                on_close: self.on_close,
                store: self.store,
                entries: DashMap::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::TopicRegistry;
    use serde::Deserialize;
    use serde_json::{json, Value};
    use zephyr_core::{Params, ValidationError};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    fn non_negative(value: &Value) -> Result<Value, ValidationError> {
        match value.get("value").and_then(Value::as_i64) {
            Some(n) if n >= 0 => Ok(value.clone()),
            _ => Err(ValidationError::new("must not be negative").at("value")),
        }
    }

    fn connect(path: &str) -> (WsContext, crate::connection::Outbound) {
        let (conn, rx) = Connection::channel();
        (WsContext::new(conn, path, Params::new(), TopicRegistry::new()), rx)
    }

    fn frames(rx: &mut crate::connection::Outbound) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message.parse_json().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_join_returns_shared_initial_state() {
        let layer = SyncLayer::builder(|| Counter { value: 7 }).build();
        let (a, _a_rx) = connect("/counter");
        let (b, _b_rx) = connect("/counter");

        assert_eq!(layer.join(&a).await.unwrap(), Counter { value: 7 });
        assert_eq!(layer.join(&b).await.unwrap(), Counter { value: 7 });
        assert_eq!(layer.subscriber_count("/counter").await, 2);
    }

    #[tokio::test]
    async fn test_update_broadcasts_to_all() {
        let layer = SyncLayer::builder(Counter::default).build();
        let (a, mut a_rx) = connect("/counter");
        let (b, mut b_rx) = connect("/counter");
        layer.join(&a).await.unwrap();
        layer.join(&b).await.unwrap();

        let state = layer
            .update(&a, |c| Counter { value: c.value + 1 })
            .await
            .unwrap();
        assert_eq!(state.value, 1);

        let expected = json!({"type": "update", "data": {"value": 1}});
        assert_eq!(frames(&mut a_rx), vec![expected.clone()]);
        assert_eq!(frames(&mut b_rx), vec![expected]);
    }

    #[tokio::test]
    async fn test_rejected_update_only_reaches_caller() {
        let layer = SyncLayer::builder(Counter::default)
            .schema(non_negative)
            .build();
        let (a, mut a_rx) = connect("/counter");
        let (b, mut b_rx) = connect("/counter");
        layer.join(&a).await.unwrap();
        layer.join(&b).await.unwrap();

        let err = layer
            .update(&a, |_| Counter { value: -1 })
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert_eq!(
            frames(&mut a_rx),
            vec![json!({"type": "error", "error": "value: must not be negative"})]
        );
        assert!(frames(&mut b_rx).is_empty());
        assert_eq!(layer.get_state("/counter").await, Some(Counter { value: 0 }));
    }

    #[tokio::test]
    async fn test_leave_without_ttl_tears_down_immediately() {
        let store = Arc::new(MemoryStore::<Counter>::new());
        let closed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let closed_hook = Arc::clone(&closed);
        let layer = SyncLayer::builder(Counter::default)
            .shared_store(store.clone())
            .on_close(move |key, state: &Counter| closed_hook.lock().push((key.to_string(), state.value)))
            .build();

        let (a, _rx) = connect("/counter");
        layer.join(&a).await.unwrap();
        layer.update(&a, |_| Counter { value: 3 }).await.unwrap();
        assert!(layer.leave(&a).await);
        assert!(!layer.leave(&a).await);

        assert!(layer.get_state("/counter").await.is_none());
        assert_eq!(*closed.lock(), vec![("/counter".to_string(), 3)]);
        assert_eq!(store.get("/counter"), Some(Counter { value: 3 }));
    }

    #[tokio::test]
    async fn test_first_join_loads_from_store() {
        let store = MemoryStore::new();
        store.insert("/counter", Counter { value: 42 });
        let layer = SyncLayer::builder(Counter::default).store(store).build();
        let (a, _rx) = connect("/counter");

        assert!(layer.get_state("/counter").await.is_none());
        assert_eq!(layer.join(&a).await.unwrap().value, 42);
    }

    #[tokio::test]
    async fn test_custom_key_and_on_update() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let hook = Arc::clone(&seen);
        let layer = SyncLayer::builder(Counter::default)
            .key(|ctx| format!("room:{}", ctx.query_param("room").unwrap_or("none")))
            .on_update(move |key, state: &Counter, _ctx| hook.lock().push((key.to_string(), state.value)))
            .build();

        let (conn, _rx) = Connection::channel();
        let ctx = WsContext::new(conn, "/ws", Params::new(), TopicRegistry::new())
            .with_query(Some("room=red"));
        layer.join(&ctx).await.unwrap();
        layer.update(&ctx, |_| Counter { value: 5 }).await.unwrap();

        assert_eq!(*seen.lock(), vec![("room:red".to_string(), 5)]);
        let stats = layer.stats().await;
        assert_eq!(stats.key_count(), 1);
        assert_eq!(stats.keys[0].key, "room:red");
        assert_eq!(stats.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_update_without_subscribers_is_torn_down() {
        let store = Arc::new(MemoryStore::<Counter>::new());
        let layer = SyncLayer::builder(Counter::default)
            .shared_store(store.clone())
            .build();
        let (a, _rx) = connect("/counter");

        layer.update(&a, |_| Counter { value: 9 }).await.unwrap();
        assert!(layer.get_state("/counter").await.is_none());
        assert_eq!(store.get("/counter"), Some(Counter { value: 9 }));
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned_on_broadcast() {
        let layer = SyncLayer::builder(Counter::default).build();
        let (a, _a_rx) = connect("/counter");
        let (b, b_rx) = connect("/counter");
        layer.join(&a).await.unwrap();
        layer.join(&b).await.unwrap();
        drop(b_rx);

        layer.update(&a, |_| Counter { value: 1 }).await.unwrap();
        assert_eq!(layer.subscriber_count("/counter").await, 1);
    }
}
