//! Read-through population of a bounded cache.
//!
//! Hits are served from the [`BoundedCache`]; misses call the
//! [`ApiFetcher`] and store the result. Fetch failures go back to the caller
//! untouched so it can tell a timeout from an HTTP error.

use std::hash::Hash;
use std::sync::Arc;

use guildkeep_core::{CacheError, FetchError};

use super::bounded::BoundedCache;
use super::traits::ApiFetcher;

/// Result of a read-through lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<V> {
    value: V,
    was_cache_hit: bool,
}

impl<V> CacheRead<V> {
    pub fn from_cache(value: V) -> Self {
        Self {
            value,
            was_cache_hit: true,
        }
    }

    pub fn from_source(value: V) -> Self {
        Self {
            value,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }
}

impl<V> AsRef<V> for CacheRead<V> {
    fn as_ref(&self) -> &V {
        &self.value
    }
}

/// Bounded cache in front of an external API.
pub struct ReadThroughCache<K, V, F> {
    cache: Arc<BoundedCache<K, V>>,
    fetcher: Arc<F>,
}

impl<K, V, F> ReadThroughCache<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
    F: ApiFetcher<K, V>,
{
    pub fn new(cache: Arc<BoundedCache<K, V>>, fetcher: Arc<F>) -> Self {
        Self { cache, fetcher }
    }

    /// The underlying cache, e.g. for `filter` scans or sweeper control.
    pub fn cache(&self) -> &Arc<BoundedCache<K, V>> {
        &self.cache
    }

    /// Return the cached value for `key`, fetching it on a miss.
    pub async fn get_or_fetch(&self, key: &K) -> Result<CacheRead<V>, FetchError> {
        if let Some(value) = self.cache.get(key) {
            return Ok(CacheRead::from_cache(value));
        }
        self.refresh(key).await
    }

    /// Fetch `key` from the source regardless of what is cached, and cache
    /// the result.
    pub async fn refresh(&self, key: &K) -> Result<CacheRead<V>, FetchError> {
        let value = match self.fetcher.fetch(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(key = ?key, error = %e, "Fetch failed, nothing cached");
                return Err(e);
            }
        };
        self.store(key, &value);
        Ok(CacheRead::from_source(value))
    }

    /// Cache a value obtained elsewhere.
    pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
        self.cache.set(key, value)
    }

    /// Drop the cached value for `key`.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.cache.remove(key)
    }

    fn store(&self, key: &K, value: &V) {
        if let Err(e) = self.cache.set(key.clone(), value.clone()) {
            // Caching is best-effort; the caller still gets the value.
            tracing::debug!(key = ?key, error = %e, "Fetched value not cached");
        }
    }
}

impl<K, V, F> Clone for ReadThroughCache<K, V, F> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockFetcher {
        values: HashMap<String, u32>,
        calls: AtomicUsize,
    }

    impl MockFetcher {
        fn new(values: &[(&str, u32)]) -> Self {
            Self {
                values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ApiFetcher<String, u32> for MockFetcher {
        async fn fetch(&self, key: &String) -> Result<u32, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.values.get(key).copied().ok_or_else(|| FetchError::Http {
                url: format!("mock://{}", key),
                status: 404,
            })
        }
    }

    fn read_through(
        fetcher: Arc<MockFetcher>,
        max_entries: Option<usize>,
    ) -> ReadThroughCache<String, u32, MockFetcher> {
        let cache = Arc::new(BoundedCache::new(Some(Duration::from_secs(60)), max_entries));
        ReadThroughCache::new(cache, fetcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_fetches_then_hit_serves_cache() {
        let fetcher = Arc::new(MockFetcher::new(&[("alice", 1200)]));
        let cache = read_through(Arc::clone(&fetcher), None);

        let first = cache.get_or_fetch(&"alice".to_string()).await.unwrap();
        assert!(first.was_cache_miss());
        assert_eq!(*first.value(), 1200);

        let second = cache.get_or_fetch(&"alice".to_string()).await.unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.into_value(), 1200);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let fetcher = Arc::new(MockFetcher::new(&[]));
        let cache = read_through(Arc::clone(&fetcher), None);
        let key = "ghost".to_string();

        for _ in 0..2 {
            let err = cache.get_or_fetch(&key).await.unwrap_err();
            assert!(matches!(err, FetchError::Http { status: 404, .. }));
        }
        assert_eq!(fetcher.calls(), 2);
        assert!(cache.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_still_returns_value() {
        let fetcher = Arc::new(MockFetcher::new(&[("bob", 7)]));
        let cache = read_through(Arc::clone(&fetcher), Some(0));

        let read = cache.get_or_fetch(&"bob".to_string()).await.unwrap();
        assert_eq!(read.into_value(), 7);
        assert!(cache.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_bypasses_cache() {
        let fetcher = Arc::new(MockFetcher::new(&[("carol", 3)]));
        let cache = read_through(Arc::clone(&fetcher), None);
        cache.put("carol".to_string(), 1).unwrap();

        let refreshed = cache.refresh(&"carol".to_string()).await.unwrap();
        assert_eq!(refreshed.into_value(), 3);
        assert_eq!(cache.cache().get("carol"), Some(3));
        assert_eq!(cache.invalidate(&"carol".to_string()), Some(3));
    }
}
