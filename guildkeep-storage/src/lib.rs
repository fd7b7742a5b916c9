//! Guildkeep Storage - Caching Layer
//!
//! Two kinds of in-memory state live here:
//!
//! - [`cache`]: a TTL and capacity bounded map, optionally populated
//!   read-through from an external HTTP API.
//! - [`live`]: a live mirror of a remote document collection, kept current
//!   by the store's change stream.

pub mod cache;
pub mod live;

pub use cache::{
    ApiFetcher, BoundedCache, CacheRead, CacheStats, HttpJsonFetcher, ReadThroughCache,
    SweeperHandle,
};
pub use live::{
    CacheEvent, CacheState, InMemoryDocumentStore, ListenerError, ListenerId, LiveDocumentCache,
};
