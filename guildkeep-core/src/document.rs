//! Remote document store contract.
//!
//! The store itself lives outside guildkeep; this module only defines what
//! the live cache consumes from it: a bulk load, a change subscription and
//! single-document writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::DocumentId;

/// A document that can be mirrored by a live cache.
///
/// `document_id()` must be stable for the lifetime of the document.
pub trait Document: Clone + Send + Sync + 'static {
    /// Stable identifier of this document.
    fn document_id(&self) -> DocumentId;
}

/// A change notification emitted by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ChangeEvent<T> {
    Insert { id: DocumentId, document: T },
    Update { id: DocumentId, document: T },
    Delete { id: DocumentId },
}

impl<T> ChangeEvent<T> {
    /// Identifier of the document this event touches.
    pub fn id(&self) -> &DocumentId {
        match self {
            ChangeEvent::Insert { id, .. }
            | ChangeEvent::Update { id, .. }
            | ChangeEvent::Delete { id } => id,
        }
    }

    /// Operation name for logging.
    pub fn op(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}

/// Remote collection of documents of type `T`.
///
/// Change events are delivered at least once and in order per document id.
/// Reconnecting a dropped stream is the implementation's concern.
#[async_trait]
pub trait DocumentStore<T: Document>: Send + Sync {
    /// Load every document in the collection.
    async fn fetch_all(&self) -> Result<Vec<T>, StoreError>;

    /// Open a change subscription. Events emitted after this call returns
    /// are delivered to the receiver.
    async fn watch(&self) -> Result<mpsc::Receiver<ChangeEvent<T>>, StoreError>;

    /// Insert or replace a document.
    async fn upsert(&self, document: &T) -> Result<(), StoreError>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, id: &DocumentId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_event_accessors() {
        let event: ChangeEvent<u32> = ChangeEvent::Update {
            id: DocumentId::new("a"),
            document: 1,
        };
        assert_eq!(event.id().as_str(), "a");
        assert_eq!(event.op(), "update");

        let event: ChangeEvent<u32> = ChangeEvent::Delete { id: DocumentId::new("b") };
        assert_eq!(event.op(), "delete");
    }

    #[test]
    fn test_change_event_wire_shape() {
        let event: ChangeEvent<u32> = ChangeEvent::Insert {
            id: DocumentId::new("a"),
            document: 5,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["op"], "insert");
        assert_eq!(json["id"], "a");
        assert_eq!(json["document"], 5);
    }
}
