//! Live mirrors of remote document collections.

pub mod document_cache;
pub mod memory;

pub use document_cache::{CacheEvent, CacheState, ListenerError, ListenerId, LiveDocumentCache};
pub use memory::InMemoryDocumentStore;
