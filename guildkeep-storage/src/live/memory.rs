//! In-memory document store.
//!
//! Implements [`DocumentStore`] for tests and local runs. Writes through the
//! trait (or the `*_remote` helpers, which simulate another process writing
//! to the same collection) are broadcast to every open change stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use guildkeep_core::{ChangeEvent, Document, DocumentId, DocumentStore, StoreError};
use tokio::sync::{mpsc, watch};

/// Buffer size of each change stream.
pub const STREAM_CAPACITY: usize = 1024;

/// Document store that keeps everything in a `BTreeMap`.
#[derive(Debug)]
pub struct InMemoryDocumentStore<T> {
    documents: Mutex<BTreeMap<DocumentId, T>>,
    watchers: Mutex<Vec<mpsc::Sender<ChangeEvent<T>>>>,
    /// `true` while bulk loads are allowed to complete.
    fetch_gate: watch::Sender<bool>,
    failures_remaining: AtomicUsize,
    fetch_count: AtomicUsize,
}

impl<T: Document> Default for InMemoryDocumentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Document> InMemoryDocumentStore<T> {
    pub fn new() -> Self {
        let (fetch_gate, _rx) = watch::channel(true);
        Self {
            documents: Mutex::new(BTreeMap::new()),
            watchers: Mutex::new(Vec::new()),
            fetch_gate,
            failures_remaining: AtomicUsize::new(0),
            fetch_count: AtomicUsize::new(0),
        }
    }

    /// Create a store pre-populated with `documents`. No events are emitted.
    pub fn with_documents(documents: impl IntoIterator<Item = T>) -> Self {
        let store = Self::new();
        store.seed(documents);
        store
    }

    fn docs(&self) -> MutexGuard<'_, BTreeMap<DocumentId, T>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watchers(&self) -> MutexGuard<'_, Vec<mpsc::Sender<ChangeEvent<T>>>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert documents without emitting events.
    pub fn seed(&self, documents: impl IntoIterator<Item = T>) {
        let mut docs = self.docs();
        for document in documents {
            docs.insert(document.document_id(), document);
        }
    }

    /// Remove a document without emitting an event.
    pub fn remove_silently(&self, id: &DocumentId) -> Option<T> {
        self.docs().remove(id)
    }

    /// Simulate another writer upserting a document.
    pub fn upsert_remote(&self, document: T) {
        let id = document.document_id();
        let existed = self.docs().insert(id.clone(), document.clone()).is_some();
        let event = if existed {
            ChangeEvent::Update { id, document }
        } else {
            ChangeEvent::Insert { id, document }
        };
        self.emit(event);
    }

    /// Simulate another writer deleting a document.
    pub fn delete_remote(&self, id: &DocumentId) {
        self.docs().remove(id);
        self.emit(ChangeEvent::Delete { id: id.clone() });
    }

    /// Push a raw event to every open stream without touching the documents.
    pub fn emit(&self, event: ChangeEvent<T>) {
        let mut watchers = self.watchers();
        watchers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(id = %event.id(), "Change stream full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Block bulk loads until [`resume_fetches`](Self::resume_fetches).
    pub fn pause_fetches(&self) {
        self.fetch_gate.send_replace(false);
    }

    pub fn resume_fetches(&self) {
        self.fetch_gate.send_replace(true);
    }

    /// Make the next `n` bulk loads fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Close every open change stream.
    pub fn disconnect(&self) {
        self.watchers().clear();
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers().iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Number of bulk loads that returned successfully.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.docs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs().is_empty()
    }

    pub fn get(&self, id: &DocumentId) -> Option<T> {
        self.docs().get(id).cloned()
    }
}

#[async_trait]
impl<T: Document> DocumentStore<T> for InMemoryDocumentStore<T> {
    async fn fetch_all(&self) -> Result<Vec<T>, StoreError> {
        let mut gate = self.fetch_gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(StoreError::Unavailable {
                reason: "store dropped".to_string(),
            });
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Unavailable {
                reason: "injected fetch failure".to_string(),
            });
        }

        let documents = self.docs().values().cloned().collect();
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(documents)
    }

    async fn watch(&self) -> Result<mpsc::Receiver<ChangeEvent<T>>, StoreError> {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        self.watchers().push(tx);
        Ok(rx)
    }

    async fn upsert(&self, document: &T) -> Result<(), StoreError> {
        self.upsert_remote(document.clone());
        Ok(())
    }

    async fn delete(&self, id: &DocumentId) -> Result<(), StoreError> {
        let existed = self.docs().remove(id).is_some();
        if existed {
            self.emit(ChangeEvent::Delete { id: id.clone() });
        }
        Ok(())
    }
}
