//! TTL- and capacity-bounded in-memory cache.
//!
//! Entries carry an optional lease. Reads extend the lease to
//! `max(current, now + ttl)` and never shorten it. When the cache is full a
//! new key first triggers a purge of expired entries, then evicts the
//! oldest-inserted entries (FIFO, not LRU) until a slot is free.
//!
//! Expiration is checked on every read: an entry whose lease has lapsed is
//! invisible even if the background sweep has not yet removed it.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use guildkeep_core::{ApiCacheConfig, CacheError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::traits::CacheStats;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
    /// Insertion sequence; determines eviction order.
    seq: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Move the lease forward to `candidate` if that is later.
    fn extend_to(&mut self, candidate: Instant) {
        if let Some(current) = self.expires_at {
            if candidate > current {
                self.expires_at = Some(candidate);
            }
        }
    }
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    order: BTreeMap<u64, K>,
    next_seq: u64,
    stats: CacheStats,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn remove<Q>(&mut self, key: &Q) -> Option<Entry<V>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_oldest(&mut self) -> bool {
        match self.order.pop_first() {
            Some((_, key)) => {
                self.entries.remove(&key);
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// Generic TTL + capacity bounded key/value store.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Option<Duration>,
    max_entries: Option<usize>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache. A `None` or zero `ttl` disables expiration; a `None`
    /// `max_entries` disables the capacity bound.
    pub fn new(ttl: Option<Duration>, max_entries: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
            max_entries,
        }
    }

    /// Create a cache from API cache settings.
    pub fn from_config(config: &ApiCacheConfig) -> Self {
        Self::new(config.effective_ttl(), config.max_entries)
    }

    /// Default lease applied to new entries and read refreshes.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Capacity bound, if any.
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, extending its lease on hit.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(expired) => expired,
            None => {
                inner.stats.misses += 1;
                return None;
            }
        };
        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            return None;
        }

        inner.stats.hits += 1;
        let ttl = self.ttl;
        let entry = inner.entries.get_mut(key)?;
        if let Some(ttl) = ttl {
            entry.extend_to(now + ttl);
        }
        Some(entry.value.clone())
    }

    /// Remaining lease of a live entry. `Some(None)` means it never expires.
    pub fn expires_in<Q>(&self, key: &Q) -> Option<Option<Duration>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let inner = self.lock();
        let entry = inner.entries.get(key).filter(|entry| !entry.is_expired(now))?;
        Some(entry.expires_at.map(|at| at.saturating_duration_since(now)))
    }

    /// Returns true if a live entry exists. Does not extend its lease.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.expires_in(key).is_some()
    }

    /// Insert with the default lease.
    pub fn set(&self, key: K, value: V) -> Result<(), CacheError> {
        self.insert(key, value, self.ttl)
    }

    /// Insert with an explicit lease. A zero `ttl` means no expiration.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key, value, Some(ttl).filter(|ttl| !ttl.is_zero()))
    }

    fn insert(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        if self.max_entries == Some(0) {
            return Err(CacheError::CapacityRejection);
        }

        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut inner = self.lock();

        let live_existing = match inner.entries.get(&key).map(|entry| entry.is_expired(now)) {
            Some(true) => {
                inner.remove(&key);
                inner.stats.expirations += 1;
                false
            }
            Some(false) => true,
            None => false,
        };

        if live_existing {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.value = value;
                // A lease is never shortened; `None` (no expiry) dominates.
                entry.expires_at = match (entry.expires_at, expires_at) {
                    (Some(current), Some(candidate)) => Some(current.max(candidate)),
                    _ => None,
                };
            }
            return Ok(());
        }

        if let Some(max) = self.max_entries {
            if inner.entries.len() >= max {
                let purged = inner.purge_expired(now);
                let mut evicted = 0usize;
                while inner.entries.len() >= max && inner.evict_oldest() {
                    evicted += 1;
                }
                if purged > 0 || evicted > 0 {
                    tracing::debug!(purged, evicted, max_entries = max, "Made room in bounded cache");
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );
        Ok(())
    }

    /// Remove an entry, returning its value if it was live.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let entry = self.lock().remove(key)?;
        (!entry.is_expired(now)).then_some(entry.value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        let now = Instant::now();
        let inner = self.lock();
        inner
            .order
            .values()
            .filter(|key| {
                inner
                    .entries
                    .get(*key)
                    .is_some_and(|entry| !entry.is_expired(now))
            })
            .cloned()
            .collect()
    }

    /// Scan live entries in insertion order. Matches count as reads and have
    /// their lease extended.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut guard = self.lock();
        let inner = &mut *guard;

        let mut matches = Vec::new();
        for key in inner.order.values() {
            let Some(entry) = inner.entries.get_mut(key) else {
                continue;
            };
            if entry.is_expired(now) || !predicate(key, &entry.value) {
                continue;
            }
            if let Some(ttl) = ttl {
                entry.extend_to(now + ttl);
            }
            matches.push((key.clone(), entry.value.clone()));
        }
        inner.stats.hits += matches.len() as u64;
        matches
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired(Instant::now())
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Usage counters plus the current live entry count.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.entry_count = inner
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count() as u64;
        stats
    }

    /// Spawn the background sweep.
    ///
    /// The task holds only a weak reference: it ends when the cache is
    /// dropped, when [`SweeperHandle::shutdown`] is called, or when the
    /// handle is dropped.
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle
    where
        K: Sync,
        V: Sync,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache = Arc::downgrade(self);
        let handle = tokio::spawn(sweep_loop(cache, period, shutdown_rx));
        SweeperHandle {
            shutdown_tx,
            handle,
        }
    }
}

async fn sweep_loop<K, V>(
    cache: Weak<BoundedCache<K, V>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    tracing::debug!(period_ms = period.as_millis() as u64, "Cache sweeper started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Swept expired cache entries");
                } else {
                    tracing::trace!("Cache sweep found nothing to purge");
                }
            }
        }
    }

    tracing::debug!("Cache sweeper stopped");
}

/// Handle to a running cache sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Cache sweeper exited abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_set_value() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(Some(secs(10)), None);
        cache.set("a".to_string(), 1).unwrap();
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_inserted() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(None, Some(2));
        cache.set("a".to_string(), 1).unwrap();
        cache.set("b".to_string(), 2).unwrap();
        // Reading "a" extends its lease but does not change its position.
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c".to_string(), 3).unwrap();

        assert_eq!(cache.keys(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_keeps_insertion_position() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(None, Some(2));
        cache.set("a".to_string(), 1).unwrap();
        cache.set("b".to_string(), 2).unwrap();
        cache.set("a".to_string(), 10).unwrap();
        cache.set("c".to_string(), 3).unwrap();

        assert_eq!(cache.keys(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_purged_before_eviction() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(None, Some(2));
        cache.set("a".to_string(), 1).unwrap();
        cache.set_with_ttl("b".to_string(), 2, secs(1)).unwrap();
        tokio::time::advance(secs(2)).await;
        cache.set("c".to_string(), 3).unwrap();

        // "b" was expired, so "a" survives.
        assert_eq!(cache.keys(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_rejects() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(None, Some(0));
        assert_eq!(
            cache.set("a".to_string(), 1),
            Err(CacheError::CapacityRejection)
        );
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_invisible_before_sweep() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(Some(secs(5)), None);
        cache.set("a".to_string(), 1).unwrap();
        tokio::time::advance(secs(6)).await;

        assert_eq!(cache.len(), 0);
        assert!(cache.keys().is_empty());
        assert!(cache.filter(|_, _| true).is_empty());
        assert_eq!(cache.get("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_extends_but_never_shortens_lease() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(Some(secs(5)), None);
        cache.set_with_ttl("long".to_string(), 1, secs(60)).unwrap();
        assert_eq!(cache.get("long"), Some(1));
        assert_eq!(cache.expires_in("long"), Some(Some(secs(60))));

        cache.set("short".to_string(), 2).unwrap();
        tokio::time::advance(secs(4)).await;
        assert_eq!(cache.get("short"), Some(2));
        assert_eq!(cache.expires_in("short"), Some(Some(secs(5))));
        tokio::time::advance(secs(4)).await;
        assert_eq!(cache.get("short"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_then_get_keeps_lease() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(Some(secs(1)), None);
        cache.set_with_ttl("k".to_string(), 9, secs(5)).unwrap();
        assert_eq!(cache.get("k"), Some(9));
        let remaining = cache.expires_in("k").flatten().expect("has lease");
        assert!(remaining >= secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_never_shortens_lease() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(None, None);
        cache.set_with_ttl("k".to_string(), 1, secs(60)).unwrap();
        cache.set_with_ttl("k".to_string(), 2, secs(5)).unwrap();
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.expires_in("k"), Some(Some(secs(60))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_without_ttl_never_expires() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(None, None);
        cache.set("k".to_string(), 1).unwrap();
        tokio::time::advance(secs(86_400)).await;
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.expires_in("k"), Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_extends_matching_leases() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(Some(secs(5)), None);
        cache.set("even".to_string(), 2).unwrap();
        cache.set("odd".to_string(), 3).unwrap();
        tokio::time::advance(secs(4)).await;

        let evens = cache.filter(|_, v| v % 2 == 0);
        assert_eq!(evens, vec![("even".to_string(), 2)]);

        tokio::time::advance(secs(3)).await;
        assert_eq!(cache.get("even"), Some(2));
        assert_eq!(cache.get("odd"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_clear() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(None, None);
        cache.set("a".to_string(), 1).unwrap();
        cache.set("b".to_string(), 2).unwrap();
        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_unread_keys() {
        let cache: Arc<BoundedCache<String, u32>> =
            Arc::new(BoundedCache::new(Some(secs(1)), None));
        let sweeper = cache.start_sweeper(secs(10));
        cache.set("a".to_string(), 1).unwrap();

        tokio::time::sleep(secs(11)).await;
        assert_eq!(cache.stats().expirations, 1);

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_cache_dropped() {
        let cache: Arc<BoundedCache<String, u32>> = Arc::new(BoundedCache::new(None, None));
        let sweeper = cache.start_sweeper(secs(1));
        drop(cache);
        tokio::time::sleep(secs(3)).await;
        assert!(sweeper.is_finished());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16).prop_map(Op::Set),
            (0u8..16).prop_map(Op::Remove),
        ]
    }

    proptest! {
        /// Property: without expiry or eviction, `len()` equals the set of
        /// keys that were set and not subsequently removed.
        #[test]
        fn prop_len_tracks_live_keys(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let cache: BoundedCache<u8, u8> = BoundedCache::new(None, None);
            let mut model = HashSet::new();
            for op in ops {
                match op {
                    Op::Set(k) => {
                        cache.set(k, k).unwrap();
                        model.insert(k);
                    }
                    Op::Remove(k) => {
                        cache.remove(&k);
                        model.remove(&k);
                    }
                }
            }
            prop_assert_eq!(cache.len(), model.len());
        }

        /// Property: the cache never holds more than `max_entries` live keys
        /// and always keeps the most recently inserted key.
        #[test]
        fn prop_capacity_is_respected(
            max in 1usize..8,
            keys in prop::collection::vec(0u8..32, 1..64),
        ) {
            let cache: BoundedCache<u8, u8> = BoundedCache::new(None, Some(max));
            for k in &keys {
                cache.set(*k, *k).unwrap();
            }
            prop_assert!(cache.len() <= max);
            let last = *keys.last().unwrap();
            prop_assert_eq!(cache.get(&last), Some(last));
        }
    }
}
