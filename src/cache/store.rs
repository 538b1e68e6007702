//! Bounded in-process store with size accounting, priorities and expiry.
//!
//! The store knows nothing about tables. It tracks nominal entry sizes,
//! evicts by priority class and score once usage crosses the high
//! watermark, and reports every departing entry to a single listener.
//! The listener runs synchronously on the calling thread after the store's
//! lock has been released, so it may call back into the store.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::evictor::{CachePriority, EntryUsage, Evictor};
use crate::cache::key::CacheKey;
use crate::config::{EvictionConfig, StoreConfig};

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionCause {
    /// Sliding or absolute expiration elapsed.
    Expired,
    /// Chosen as a victim under size pressure.
    Capacity,
    /// Explicitly removed.
    Removed,
    /// Overwritten by an insert for the same key.
    Replaced,
}

impl EvictionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionCause::Expired => "expired",
            EvictionCause::Capacity => "capacity",
            EvictionCause::Removed => "removed",
            EvictionCause::Replaced => "replaced",
        }
    }
}

/// Callback invoked for every entry that leaves the store.
pub type EvictionListener<V> = Box<dyn Fn(CacheKey, V, EvictionCause) + Send + Sync>;

/// Per-entry cost, priority and expiration.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub size: usize,
    pub priority: CachePriority,
    /// Expire after this long without a `get`.
    pub sliding_expiration: Option<Duration>,
    /// Expire this long after insertion regardless of use.
    pub absolute_expiration: Option<Duration>,
}

impl EntryOptions {
    pub fn new(size: usize, priority: CachePriority) -> Self {
        Self {
            size,
            priority,
            sliding_expiration: None,
            absolute_expiration: None,
        }
    }

    pub fn with_sliding_expiration(mut self, ttl: Option<Duration>) -> Self {
        self.sliding_expiration = ttl;
        self
    }

    pub fn with_absolute_expiration(mut self, ttl: Option<Duration>) -> Self {
        self.absolute_expiration = ttl;
        self
    }
}

struct StoreEntry<V> {
    value: V,
    size: usize,
    priority: CachePriority,
    last_access: Instant,
    sliding_expiration: Option<Duration>,
    expires_at: Option<Instant>,
}

impl<V> StoreEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        if self.expires_at.is_some_and(|at| now >= at) {
            return true;
        }
        self.sliding_expiration
            .is_some_and(|ttl| now.saturating_duration_since(self.last_access) >= ttl)
    }
}

/// Store usage statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub entry_count: usize,
    pub bytes_used: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub capacity_evictions: u64,
    pub expirations: u64,
}

impl StoreStats {
    /// Usage as a fraction of capacity (0.0 - 1.0).
    pub fn usage_fraction(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.bytes_used as f64 / self.capacity as f64
    }
}

struct StoreState<V> {
    entries: HashMap<CacheKey, StoreEntry<V>>,
    bytes_used: usize,
    hits: u64,
    misses: u64,
    capacity_evictions: u64,
    expirations: u64,
}

type Departed<V> = Vec<(CacheKey, V, EvictionCause)>;

/// Thread-safe bounded key/value store.
pub struct MemoryStore<V> {
    state: Mutex<StoreState<V>>,
    config: StoreConfig,
    evictor: Evictor,
    listener: Option<EvictionListener<V>>,
}

impl<V: Clone> MemoryStore<V> {
    /// Create a store. A `capacity_bytes` of zero disables size eviction.
    pub fn new(config: StoreConfig, eviction: EvictionConfig) -> Self {
        Self {
            state: Mutex::new(StoreState {
                entries: HashMap::new(),
                bytes_used: 0,
                hits: 0,
                misses: 0,
                capacity_evictions: 0,
                expirations: 0,
            }),
            config,
            evictor: Evictor::new(eviction),
            listener: None,
        }
    }

    /// Register the listener notified for every departing entry.
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(CacheKey, V, EvictionCause) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Insert or replace an entry, then evict if over the high watermark.
    pub fn insert(&self, key: CacheKey, value: V, options: EntryOptions) {
        let mut departed = Vec::new();
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            let entry = StoreEntry {
                value,
                size: options.size,
                priority: options.priority,
                last_access: now,
                sliding_expiration: options.sliding_expiration,
                // A lifetime past the clock's range never expires.
                expires_at: options.absolute_expiration.and_then(|ttl| now.checked_add(ttl)),
            };

            state.bytes_used += entry.size;
            if let Some(old) = state.entries.insert(key, entry) {
                state.bytes_used = state.bytes_used.saturating_sub(old.size);
                departed.push((key, old.value, EvictionCause::Replaced));
            }

            self.enforce_capacity(&mut state, key, now, &mut departed);
        }
        self.notify(departed);
    }

    /// Look up an entry, refreshing its sliding expiration.
    ///
    /// An expired entry is removed on the spot and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut departed = Vec::new();
        let found = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let now = Instant::now();
            let expired = match state.entries.get_mut(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.last_access = now;
                    let value = entry.value.clone();
                    state.hits += 1;
                    return Some(value);
                }
                Some(_) => true,
                None => false,
            };
            state.misses += 1;
            if expired {
                if let Some(entry) = Self::take(state, key) {
                    state.expirations += 1;
                    departed.push((*key, entry.value, EvictionCause::Expired));
                }
            }
            None
        };
        self.notify(departed);
        found
    }

    /// Look up an entry without refreshing it or touching the hit counters.
    /// Expired entries read as absent but stay for the next purge.
    pub fn peek(&self, key: &CacheKey) -> Option<V> {
        let state = self.state.lock();
        let now = Instant::now();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        self.remove_if(key, |_| true)
    }

    /// Remove the entry only if `predicate` accepts its current value.
    pub fn remove_if(&self, key: &CacheKey, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let removed = {
            let mut state = self.state.lock();
            if state.entries.get(key).is_some_and(|e| predicate(&e.value)) {
                Self::take(&mut state, key)
            } else {
                None
            }
        }?;
        let value = removed.value.clone();
        self.notify(vec![(*key, removed.value, EvictionCause::Removed)]);
        Some(value)
    }

    /// Remove every entry matching `predicate`; returns how many left.
    pub fn remove_where(&self, predicate: impl Fn(&CacheKey, &V) -> bool) -> usize {
        let departed: Departed<V> = {
            let mut state = self.state.lock();
            let keys: Vec<CacheKey> = state
                .entries
                .iter()
                .filter(|(k, e)| predicate(k, &e.value))
                .map(|(k, _)| *k)
                .collect();
            keys.into_iter()
                .filter_map(|k| Self::take(&mut state, &k).map(|e| (k, e.value, EvictionCause::Removed)))
                .collect()
        };
        let count = departed.len();
        self.notify(departed);
        count
    }

    /// Drop all expired entries; returns how many were purged.
    pub fn purge_expired(&self) -> usize {
        let mut departed = Vec::new();
        {
            let mut state = self.state.lock();
            Self::purge_expired_locked(&mut state, Instant::now(), &mut departed);
        }
        let count = departed.len();
        self.notify(departed);
        count
    }

    /// Count entries matching `predicate`.
    pub fn count_where(&self, predicate: impl Fn(&V) -> bool) -> usize {
        let state = self.state.lock();
        state.entries.values().filter(|e| predicate(&e.value)).count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            entry_count: state.entries.len(),
            bytes_used: state.bytes_used,
            capacity: self.config.capacity_bytes,
            hits: state.hits,
            misses: state.misses,
            capacity_evictions: state.capacity_evictions,
            expirations: state.expirations,
        }
    }

    fn take(state: &mut StoreState<V>, key: &CacheKey) -> Option<StoreEntry<V>> {
        let entry = state.entries.remove(key)?;
        state.bytes_used = state.bytes_used.saturating_sub(entry.size);
        Some(entry)
    }

    fn purge_expired_locked(state: &mut StoreState<V>, now: Instant, departed: &mut Departed<V>) {
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            if let Some(entry) = Self::take(state, &key) {
                state.expirations += 1;
                departed.push((key, entry.value, EvictionCause::Expired));
            }
        }
    }

    /// Bring usage back under the low watermark once it crosses the high one.
    fn enforce_capacity(
        &self,
        state: &mut StoreState<V>,
        inserted: CacheKey,
        now: Instant,
        departed: &mut Departed<V>,
    ) {
        let capacity = self.config.capacity_bytes;
        if capacity == 0 {
            return;
        }
        let high = (self.config.high_watermark * capacity as f64) as usize;
        if state.bytes_used <= high {
            return;
        }

        // Expired entries are free victims.
        Self::purge_expired_locked(state, now, departed);

        let target = (self.config.low_watermark * capacity as f64) as usize;
        let excess = state.bytes_used.saturating_sub(target);
        if state.bytes_used <= high || excess == 0 {
            return;
        }

        let usage = state.entries.iter().map(|(k, e)| EntryUsage {
            key: *k,
            priority: e.priority,
            size: e.size,
            last_access: e.last_access,
        });
        let victims = self
            .evictor
            .select_victims(usage, capacity, excess, &[inserted]);

        let mut freed = 0usize;
        for victim in &victims {
            if let Some(entry) = Self::take(state, &victim.key) {
                freed += entry.size;
                state.capacity_evictions += 1;
                departed.push((victim.key, entry.value, EvictionCause::Capacity));
            }
        }

        debug!(
            evicted = victims.len(),
            freed,
            bytes_used = state.bytes_used,
            capacity,
            "Capacity eviction round complete"
        );
    }

    fn notify(&self, departed: Departed<V>) {
        let Some(listener) = &self.listener else {
            return;
        };
        for (key, value, cause) in departed {
            listener(key, value, cause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::table::ids::DatabaseId;

    fn key(n: u32) -> CacheKey {
        CacheKey::file_list(&DatabaseId::new(format!("k{n}")).unwrap())
    }

    fn store(capacity: usize) -> MemoryStore<u32> {
        let config = StoreConfig {
            capacity_bytes: capacity,
            high_watermark: 0.8,
            low_watermark: 0.5,
            expiration_scan_interval_secs: 0,
        };
        MemoryStore::new(config, EvictionConfig::default())
    }

    #[test]
    fn test_insert_get_and_accounting() {
        let store = store(1000);
        store.insert(key(1), 10, EntryOptions::new(100, CachePriority::Normal));
        store.insert(key(2), 20, EntryOptions::new(200, CachePriority::Normal));

        assert_eq!(store.get(&key(1)), Some(10));
        assert_eq!(store.get(&key(3)), None);

        let stats = store.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.bytes_used, 300);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_replace_adjusts_size_and_notifies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let store = store(1000).with_listener(move |_, v, cause| sink.lock().push((v, cause)));

        store.insert(key(1), 1, EntryOptions::new(100, CachePriority::Normal));
        store.insert(key(1), 2, EntryOptions::new(50, CachePriority::Normal));

        assert_eq!(store.stats().bytes_used, 50);
        assert_eq!(*seen.lock(), vec![(1, EvictionCause::Replaced)]);
    }

    #[test]
    fn test_remove_notifies_synchronously() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let store = store(1000).with_listener(move |k, _, cause| sink.lock().push((k, cause)));

        store.insert(key(1), 1, EntryOptions::new(10, CachePriority::Normal));
        assert_eq!(store.remove(&key(1)), Some(1));
        assert_eq!(*seen.lock(), vec![(key(1), EvictionCause::Removed)]);
        assert_eq!(store.remove(&key(1)), None);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_peek_leaves_stats_alone() {
        let store = store(1000);
        store.insert(key(1), 5, EntryOptions::new(10, CachePriority::Normal));
        assert_eq!(store.peek(&key(1)), Some(5));
        assert_eq!(store.peek(&key(2)), None);
        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[test]
    fn test_remove_if_checks_value() {
        let store = store(1000);
        store.insert(key(1), 7, EntryOptions::new(10, CachePriority::Normal));
        assert_eq!(store.remove_if(&key(1), |v| *v == 8), None);
        assert_eq!(store.remove_if(&key(1), |v| *v == 7), Some(7));
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_evicts_low_priority_first() {
        let store = store(1000);
        store.insert(key(1), 1, EntryOptions::new(300, CachePriority::Normal));
        store.insert(key(2), 2, EntryOptions::new(300, CachePriority::Low));
        // 900 > 800 high watermark: must drop to <= 500.
        store.insert(key(3), 3, EntryOptions::new(300, CachePriority::Normal));

        assert_eq!(store.get(&key(2)), None);
        assert!(store.stats().bytes_used <= 600);
        assert_eq!(store.get(&key(3)), Some(3));
    }

    #[test]
    fn test_never_remove_survives_pressure() {
        let store = store(100);
        store.insert(key(1), 1, EntryOptions::new(90, CachePriority::NeverRemove));
        store.insert(key(2), 2, EntryOptions::new(50, CachePriority::Normal));

        assert_eq!(store.get(&key(1)), Some(1));
        // The just-inserted entry is protected too.
        assert_eq!(store.get(&key(2)), Some(2));
    }

    #[test]
    fn test_remove_where() {
        let store = store(0);
        for n in 0..6 {
            store.insert(key(n), n, EntryOptions::new(1, CachePriority::Normal));
        }
        assert_eq!(store.remove_where(|_, v| v % 2 == 0), 3);
        assert_eq!(store.len(), 3);
        assert_eq!(store.count_where(|v| v % 2 == 1), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_expiration() {
        let store = store(0);
        let options = EntryOptions::new(1, CachePriority::Normal)
            .with_absolute_expiration(Some(Duration::from_secs(10)));
        store.insert(key(1), 1, options);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get(&key(1)), Some(1));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get(&key(1)), None);
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_absolute_expiration_never_expires() {
        let store = store(0);
        let options = EntryOptions::new(1, CachePriority::Normal)
            .with_absolute_expiration(Some(Duration::from_secs(u64::MAX)));
        store.insert(key(1), 1, options);

        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(store.get(&key(1)), Some(1));
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_expiration_refreshed_by_get() {
        let store = store(0);
        let options = EntryOptions::new(1, CachePriority::Normal)
            .with_sliding_expiration(Some(Duration::from_secs(10)));
        store.insert(key(1), 1, options);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(8)).await;
            assert_eq!(store.get(&key(1)), Some(1));
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }
}
