//! Live in-memory mirror of a remote document collection.
//!
//! On start the cache subscribes to the store's change stream, bulk-loads the
//! collection, and then applies stream events in order. Subscribing first
//! means nothing written during the bulk load is lost: those events sit in
//! the stream buffer and are replayed over the snapshot, which is safe
//! because delivery is at-least-once per document.
//!
//! Reads are synchronous and return clones. Every change, whatever its
//! source, is reported to the registered `on_set` / `on_delete` listeners
//! and on the [`CacheEvent`] broadcast channel.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use guildkeep_core::{
    ChangeEvent, Document, DocumentId, DocumentStore, LiveCacheConfig, ObservableState,
    StoreError,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Error type listeners may return. It is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener<T> = Arc<dyn Fn(&DocumentId, &T) -> Result<(), ListenerError> + Send + Sync>;

/// Handle returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Lifecycle of a live cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Created but not started.
    Uninitialized,
    /// A bulk load is in flight.
    Loading,
    /// The snapshot is applied and stream events are flowing.
    Ready,
}

/// Change notification for async consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent<T> {
    Set { id: DocumentId, document: T },
    Deleted { id: DocumentId, document: T },
    Reloaded { documents: usize },
}

#[derive(Debug, Clone, Copy)]
enum ListenerKind {
    Set,
    Delete,
}

impl ListenerKind {
    fn as_str(self) -> &'static str {
        match self {
            ListenerKind::Set => "set",
            ListenerKind::Delete => "delete",
        }
    }
}

struct Listeners<T> {
    next_id: u64,
    on_set: Vec<(ListenerId, Listener<T>)>,
    on_delete: Vec<(ListenerId, Listener<T>)>,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            on_set: Vec::new(),
            on_delete: Vec::new(),
        }
    }

    fn add(&mut self, kind: ListenerKind, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        match kind {
            ListenerKind::Set => self.on_set.push((id, listener)),
            ListenerKind::Delete => self.on_delete.push((id, listener)),
        }
        id
    }

    fn snapshot(&self, kind: ListenerKind) -> Vec<Listener<T>> {
        let list = match kind {
            ListenerKind::Set => &self.on_set,
            ListenerKind::Delete => &self.on_delete,
        };
        list.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Keyed, event-emitting mirror of a remote collection.
pub struct LiveDocumentCache<T: Document> {
    collection: String,
    store: Arc<dyn DocumentStore<T>>,
    config: LiveCacheConfig,
    documents: RwLock<HashMap<DocumentId, T>>,
    listeners: RwLock<Listeners<T>>,
    state: RwLock<CacheState>,
    ready: ObservableState<bool>,
    started: AtomicBool,
    /// Set while the update task holds a live change subscription.
    subscribed: AtomicBool,
    loaded_once: AtomicBool,
    /// Serializes snapshot application with stream and local writes.
    apply_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<CacheEvent<T>>,
    shutdown_tx: watch::Sender<bool>,
    update_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Document> std::fmt::Debug for LiveDocumentCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDocumentCache")
            .field("collection", &self.collection)
            .field("state", &self.state())
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Document> LiveDocumentCache<T> {
    /// Create a cache without starting it. Register listeners, then call
    /// [`start`](Self::start).
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn DocumentStore<T>>,
        config: LiveCacheConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            collection: collection.into(),
            store,
            config,
            documents: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Listeners::new()),
            state: RwLock::new(CacheState::Uninitialized),
            ready: ObservableState::new(),
            started: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            loaded_once: AtomicBool::new(false),
            apply_lock: tokio::sync::Mutex::new(()),
            events,
            shutdown_tx,
            update_task: Mutex::new(None),
        }
    }

    /// Create and start a cache.
    pub fn open(
        collection: impl Into<String>,
        store: Arc<dyn DocumentStore<T>>,
        config: LiveCacheConfig,
    ) -> Arc<Self> {
        let cache = Arc::new(Self::new(collection, store, config));
        cache.start();
        cache
    }

    /// Spawn the update task. Calling this more than once, or after
    /// [`shutdown`](Self::shutdown), has no effect.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if *self.shutdown_tx.borrow() {
            tracing::debug!(collection = %self.collection, "Live cache already shut down, not starting");
            return;
        }
        self.set_state(CacheState::Loading);

        tracing::debug!(collection = %self.collection, "Starting live cache");
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(update_loop(Arc::downgrade(self), shutdown_rx));
        *self
            .update_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop applying stream events. The cache stays readable.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self
            .update_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(collection = %self.collection, error = %e, "Live cache update task failed");
            }
        }
        tracing::debug!(collection = %self.collection, "Live cache stopped");
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn state(&self) -> CacheState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == CacheState::Ready
    }

    /// Wait until a pending load or reload has completed.
    ///
    /// Returns `false` if `timeout` elapsed first; the cache can still be
    /// read, it just may not reflect the store yet.
    pub async fn wait_for_reload(&self, timeout: Duration) -> bool {
        self.ready.wait_for(&true, timeout).await
    }

    /// [`wait_for_reload`](Self::wait_for_reload) with the configured
    /// `ready_timeout`.
    pub async fn wait_until_ready(&self) -> bool {
        self.wait_for_reload(self.config.ready_timeout).await
    }

    /// Receive every change as a [`CacheEvent`].
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<T>> {
        self.events.subscribe()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn read_documents(&self) -> RwLockReadGuard<'_, HashMap<DocumentId, T>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_documents(&self) -> RwLockWriteGuard<'_, HashMap<DocumentId, T>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &DocumentId) -> Option<T> {
        self.read_documents().get(id).cloned()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.read_documents().contains_key(id)
    }

    /// First document matching `predicate`. Iteration order is unspecified.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.read_documents()
            .values()
            .find(|doc| predicate(doc))
            .cloned()
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.read_documents()
            .values()
            .filter(|doc| predicate(doc))
            .cloned()
            .collect()
    }

    pub fn map<R>(&self, f: impl FnMut(&T) -> R) -> Vec<R> {
        self.read_documents().values().map(f).collect()
    }

    pub fn len(&self) -> usize {
        self.read_documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_documents().is_empty()
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        self.read_documents().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> HashMap<DocumentId, T> {
        self.read_documents().clone()
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Call `listener` whenever a document is created or replaced.
    pub fn on_set<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DocumentId, &T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(ListenerKind::Set, Arc::new(listener))
    }

    /// Call `listener` with the last known value whenever a document is removed.
    pub fn on_delete<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DocumentId, &T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(ListenerKind::Delete, Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.on_set.len() + listeners.on_delete.len();
        listeners.on_set.retain(|(lid, _)| *lid != id);
        listeners.on_delete.retain(|(lid, _)| *lid != id);
        before != listeners.on_set.len() + listeners.on_delete.len()
    }

    fn notify(&self, kind: ListenerKind, id: &DocumentId, document: &T) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(kind);

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(id, document))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    collection = %self.collection,
                    id = %id,
                    event = kind.as_str(),
                    error = %e,
                    "Cache listener failed"
                ),
                Err(_) => tracing::error!(
                    collection = %self.collection,
                    id = %id,
                    event = kind.as_str(),
                    "Cache listener panicked"
                ),
            }
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write `document` to the store, then apply it locally.
    ///
    /// Stream events wait until the local apply is done, so the store's echo
    /// and any later remote write land on top of it.
    pub async fn upsert(&self, document: T) -> Result<(), StoreError> {
        let _apply = self.apply_lock.lock().await;
        self.store.upsert(&document).await?;
        self.apply_set(document.document_id(), document);
        Ok(())
    }

    /// Delete `id` from the store, then locally. Returns the removed value.
    pub async fn remove(&self, id: &DocumentId) -> Result<Option<T>, StoreError> {
        let _apply = self.apply_lock.lock().await;
        self.store.delete(id).await?;
        Ok(self.apply_delete(id))
    }

    /// Re-fetch the whole collection and replace the local snapshot.
    ///
    /// Documents missing from the new snapshot are reported as deleted. On
    /// failure the previous snapshot stays in place. Fails with
    /// [`StoreError::NotSubscribed`] unless the cache has been started and
    /// holds a change subscription.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        if !self.subscribed.load(Ordering::SeqCst) {
            return Err(StoreError::NotSubscribed {
                collection: self.collection.clone(),
            });
        }
        self.load_snapshot().await
    }

    async fn load_snapshot(&self) -> Result<usize, StoreError> {
        let _apply = self.apply_lock.lock().await;
        self.set_state(CacheState::Loading);
        self.ready.reset();

        let documents = match self.store.fetch_all().await {
            Ok(documents) => documents,
            Err(e) => {
                if self.loaded_once.load(Ordering::SeqCst) {
                    self.mark_ready();
                }
                return Err(e);
            }
        };

        let fresh: HashMap<DocumentId, T> = documents
            .into_iter()
            .map(|doc| (doc.document_id(), doc))
            .collect();
        let removed: Vec<(DocumentId, T)> = {
            let mut map = self.write_documents();
            let previous = std::mem::replace(&mut *map, fresh.clone());
            previous
                .into_iter()
                .filter(|(id, _)| !map.contains_key(id))
                .collect()
        };

        for (id, document) in removed {
            self.notify(ListenerKind::Delete, &id, &document);
            let _ = self.events.send(CacheEvent::Deleted { id, document });
        }
        let count = fresh.len();
        for (id, document) in fresh {
            self.notify(ListenerKind::Set, &id, &document);
            let _ = self.events.send(CacheEvent::Set { id, document });
        }

        self.loaded_once.store(true, Ordering::SeqCst);
        self.mark_ready();
        let _ = self.events.send(CacheEvent::Reloaded { documents: count });
        tracing::info!(collection = %self.collection, documents = count, "Live cache loaded");
        Ok(count)
    }

    async fn apply_event(&self, event: ChangeEvent<T>) {
        tracing::trace!(collection = %self.collection, id = %event.id(), op = event.op(), "Applying change");
        let _apply = self.apply_lock.lock().await;
        match event {
            ChangeEvent::Insert { id, document } | ChangeEvent::Update { id, document } => {
                self.apply_set(id, document)
            }
            ChangeEvent::Delete { id } => {
                self.apply_delete(&id);
            }
        }
    }

    fn apply_set(&self, id: DocumentId, document: T) {
        self.write_documents().insert(id.clone(), document.clone());
        self.notify(ListenerKind::Set, &id, &document);
        let _ = self.events.send(CacheEvent::Set { id, document });
    }

    fn apply_delete(&self, id: &DocumentId) -> Option<T> {
        // Redelivered deletes find nothing and are dropped here.
        let document = self.write_documents().remove(id)?;
        self.notify(ListenerKind::Delete, id, &document);
        let _ = self.events.send(CacheEvent::Deleted {
            id: id.clone(),
            document: document.clone(),
        });
        Some(document)
    }

    fn set_state(&self, state: CacheState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn mark_ready(&self) {
        self.set_state(CacheState::Ready);
        self.ready.set(true);
    }
}

// ============================================================================
// Update loop
// ============================================================================

/// Sleep for `delay`. Returns `true` if shutdown was requested meanwhile.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

async fn update_loop<T: Document>(cache: Weak<LiveDocumentCache<T>>, mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return;
    }
    let Some(mut stream) = subscribe_with_retry(&cache, &mut shutdown).await else {
        return;
    };
    if let Some(cache) = cache.upgrade() {
        cache.subscribed.store(true, Ordering::SeqCst);
    }
    let _subscription = SubscriptionGuard(cache.clone());
    if !load_with_retry(&cache, &mut shutdown).await {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = stream.recv() => {
                let Some(cache) = cache.upgrade() else { break };
                match event {
                    Some(event) => cache.apply_event(event).await,
                    None => {
                        tracing::warn!(
                            collection = %cache.collection,
                            "Change stream closed, serving last known state"
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Clears the subscription flag when the update loop exits.
struct SubscriptionGuard<T: Document>(Weak<LiveDocumentCache<T>>);

impl<T: Document> Drop for SubscriptionGuard<T> {
    fn drop(&mut self) {
        if let Some(cache) = self.0.upgrade() {
            cache.subscribed.store(false, Ordering::SeqCst);
        }
    }
}

async fn subscribe_with_retry<T: Document>(
    cache: &Weak<LiveDocumentCache<T>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<mpsc::Receiver<ChangeEvent<T>>> {
    loop {
        let cache = cache.upgrade()?;
        let result = tokio::select! {
            result = cache.store.watch() => result,
            _ = shutdown.changed() => return None,
        };
        match result {
            Ok(stream) => return Some(stream),
            Err(e) => {
                tracing::warn!(
                    collection = %cache.collection,
                    error = %e,
                    retry_in_ms = cache.config.load_retry_delay.as_millis() as u64,
                    "Change subscription failed"
                );
                let delay = cache.config.load_retry_delay;
                drop(cache);
                if pause(delay, shutdown).await {
                    return None;
                }
            }
        }
    }
}

async fn load_with_retry<T: Document>(
    cache: &Weak<LiveDocumentCache<T>>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let Some(cache) = cache.upgrade() else {
            return false;
        };
        let result = tokio::select! {
            result = cache.load_snapshot() => result,
            _ = shutdown.changed() => return false,
        };
        match result {
            Ok(_) => return true,
            Err(e) => {
                tracing::warn!(
                    collection = %cache.collection,
                    error = %e,
                    retry_in_ms = cache.config.load_retry_delay.as_millis() as u64,
                    "Bulk load failed"
                );
                let delay = cache.config.load_retry_delay;
                drop(cache);
                if pause(delay, shutdown).await {
                    return false;
                }
            }
        }
    }
}
