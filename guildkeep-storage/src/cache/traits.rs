//! Fetcher trait and cache statistics.

use async_trait::async_trait;
use guildkeep_core::FetchError;

/// Source of values for a read-through cache.
///
/// Implementations typically wrap an external HTTP API. Failures are passed
/// back to the caller and are never cached.
#[async_trait]
pub trait ApiFetcher<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send,
{
    /// Fetch the value for `key` from the external source.
    async fn fetch(&self, key: &K) -> Result<V, FetchError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a live entry.
    pub hits: u64,
    /// Number of reads that found nothing (or an expired entry).
    pub misses: u64,
    /// Number of live entries currently in the cache.
    pub entry_count: u64,
    /// Entries removed to make room for new keys.
    pub evictions: u64,
    /// Entries removed because their lease lapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
