//! Integration tests for the eviction policy and the bounded store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use table_cache_tier::cache::evictor::{CachePriority, EntryUsage, Evictor};
use table_cache_tier::cache::key::CacheKey;
use table_cache_tier::cache::store::{EntryOptions, EvictionCause, MemoryStore};
use table_cache_tier::config::{EvictionConfig, StoreConfig};
use table_cache_tier::table::ids::DatabaseId;

fn key(n: usize) -> CacheKey {
    CacheKey::file_list(&DatabaseId::new(format!("db{n}")).unwrap())
}

fn usage(n: usize, priority: CachePriority, size: usize, last_access: Instant) -> EntryUsage {
    EntryUsage {
        key: key(n),
        priority,
        size,
        last_access,
    }
}

fn store_config(capacity: usize) -> StoreConfig {
    StoreConfig {
        capacity_bytes: capacity,
        high_watermark: 0.9,
        low_watermark: 0.5,
        expiration_scan_interval_secs: 0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_eviction_order_by_age() {
    let config = EvictionConfig {
        age_weight: 1.0, // only age matters
        size_weight: 0.0,
    };
    let evictor = Evictor::new(config);

    let oldest = Instant::now();
    tokio::time::advance(Duration::from_secs(60)).await;
    let older = Instant::now();
    tokio::time::advance(Duration::from_secs(60)).await;
    let recent = Instant::now();

    let entries = vec![
        usage(0, CachePriority::Normal, 10, recent),
        usage(1, CachePriority::Normal, 10, older),
        usage(2, CachePriority::Normal, 10, recent),
        usage(3, CachePriority::Normal, 10, oldest), // evict first
    ];

    let victims = evictor.select_victims(entries.into_iter(), 1000, 20, &[]);
    assert_eq!(victims.len(), 2);
    assert_eq!(victims[0].key, key(3));
    assert_eq!(victims[1].key, key(1));
}

#[tokio::test(start_paused = true)]
async fn test_priority_class_beats_score() {
    let evictor = Evictor::new(EvictionConfig::default());

    let old = Instant::now();
    tokio::time::advance(Duration::from_secs(3600)).await;
    let fresh = Instant::now();

    let entries = vec![
        usage(0, CachePriority::High, 500, old),
        usage(1, CachePriority::Low, 1, fresh),
        usage(2, CachePriority::Normal, 500, old),
    ];

    let victims = evictor.select_victims(entries.into_iter(), 1000, 2000, &[]);
    let order: Vec<CacheKey> = victims.iter().map(|v| v.key).collect();
    assert_eq!(order, vec![key(1), key(2), key(0)]);
}

#[tokio::test]
async fn test_eviction_empty_returns_nothing() {
    let evictor = Evictor::new(EvictionConfig::default());
    let victims = evictor.select_victims(std::iter::empty(), 1000, 5, &[]);
    assert!(victims.is_empty());
}

#[tokio::test]
async fn test_protected_and_never_remove_are_skipped() {
    let evictor = Evictor::new(EvictionConfig::default());
    let now = Instant::now();
    let entries = vec![
        usage(0, CachePriority::NeverRemove, 100, now),
        usage(1, CachePriority::Low, 100, now),
        usage(2, CachePriority::Low, 100, now),
    ];

    let victims = evictor.select_victims(entries.into_iter(), 1000, 1000, &[key(2)]);
    assert_eq!(victims.len(), 1);
    assert_eq!(victims[0].key, key(1));
}

#[test]
fn test_store_evicts_to_low_watermark() {
    let departed = Arc::new(Mutex::new(Vec::new()));
    let sink = departed.clone();
    let store = MemoryStore::new(store_config(1000), EvictionConfig::default())
        .with_listener(move |k, _: usize, cause| sink.lock().unwrap().push((k, cause)));

    for n in 0..9 {
        store.insert(key(n), n, EntryOptions::new(100, CachePriority::Normal));
    }
    assert_eq!(store.stats().bytes_used, 900);
    assert!(departed.lock().unwrap().is_empty());

    // 1000 > 900 high watermark: drop to 500 or below.
    store.insert(key(9), 9, EntryOptions::new(100, CachePriority::Normal));

    let stats = store.stats();
    assert!(stats.bytes_used <= 500);
    assert_eq!(stats.capacity_evictions, 5);
    assert_eq!(store.get(&key(9)), Some(9));

    let departed = departed.lock().unwrap();
    assert_eq!(departed.len(), 5);
    assert!(departed.iter().all(|(_, cause)| *cause == EvictionCause::Capacity));
}

#[test]
fn test_store_unbounded_when_capacity_zero() {
    let store = MemoryStore::new(store_config(0), EvictionConfig::default());
    for n in 0..100 {
        store.insert(key(n), n, EntryOptions::new(1_000_000, CachePriority::Low));
    }
    assert_eq!(store.len(), 100);
    assert_eq!(store.stats().capacity_evictions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entries_are_freed_before_live_ones() {
    let store = MemoryStore::new(store_config(1000), EvictionConfig::default());
    let short = EntryOptions::new(400, CachePriority::High)
        .with_absolute_expiration(Some(Duration::from_secs(5)));
    store.insert(key(0), 0, short);
    store.insert(key(1), 1, EntryOptions::new(400, CachePriority::Low));

    tokio::time::advance(Duration::from_secs(6)).await;

    // Over the high watermark; the expired entry alone brings usage down.
    store.insert(key(2), 2, EntryOptions::new(200, CachePriority::Low));
    let stats = store.stats();
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.capacity_evictions, 0);
    assert_eq!(store.get(&key(1)), Some(1));
    assert_eq!(store.get(&key(0)), None);
}

#[test]
fn test_listener_may_reenter_store() {
    // The listener runs after the store lock is released.
    let store: Arc<MemoryStore<usize>> = Arc::new_cyclic(|weak: &std::sync::Weak<MemoryStore<usize>>| {
        let weak = weak.clone();
        MemoryStore::new(store_config(0), EvictionConfig::default()).with_listener(move |k, _: usize, _| {
            if k == key(0) {
                if let Some(store) = weak.upgrade() {
                    store.remove(&key(1));
                }
            }
        })
    });

    store.insert(key(0), 0, EntryOptions::new(1, CachePriority::Normal));
    store.insert(key(1), 1, EntryOptions::new(1, CachePriority::Normal));
    store.insert(key(2), 2, EntryOptions::new(1, CachePriority::Normal));

    store.remove(&key(0));
    assert_eq!(store.get(&key(1)), None);
    assert_eq!(store.get(&key(2)), Some(2));
}
