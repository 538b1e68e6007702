//! Cache facade: the single entry point to the four cache tiers.
//!
//! The facade translates table-level operations into store operations,
//! applies the per-database policy (cost, priority, expiration) and reacts
//! to every entry leaving the store:
//! - a metadata entry leaving removes the data entries registered with it
//! - a data entry leaving unregisters its map from its metadata entry

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::async_value::CachedAsyncValue;
use crate::cache::data_container::DataCacheContainer;
use crate::cache::evictor::CachePriority;
use crate::cache::key::{CacheKey, CacheTier};
use crate::cache::meta_container::MetaCacheContainer;
use crate::cache::store::{EntryOptions, EvictionCause, MemoryStore, StoreStats};
use crate::config::{CachePolicy, Config, DatabaseConfig, EvictionConfig, StoreConfig, TierPolicy};
use crate::error::{CacheError, CacheResult};
use crate::metrics::{CacheMetrics, LookupOutcome};
use crate::table::ids::{DatabaseId, FileId, FileRef};
use crate::table::map::TableMap;
use crate::table::metadata::DataValue;

/// A value held by the store.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    FileList {
        database: DatabaseId,
        value: CachedAsyncValue<Vec<FileId>>,
    },
    LastModified {
        file: FileRef,
        value: CachedAsyncValue<DateTime<Utc>>,
    },
    Metadata(Arc<MetaCacheContainer>),
    Data(Arc<DataCacheContainer>),
}

impl CacheEntry {
    pub fn tier(&self) -> CacheTier {
        match self {
            CacheEntry::FileList { .. } => CacheTier::FileList,
            CacheEntry::LastModified { .. } => CacheTier::LastModified,
            CacheEntry::Metadata(_) => CacheTier::Metadata,
            CacheEntry::Data(_) => CacheTier::Data,
        }
    }

    pub fn database(&self) -> &DatabaseId {
        match self {
            CacheEntry::FileList { database, .. } => database,
            CacheEntry::LastModified { file, .. } => &file.database,
            CacheEntry::Metadata(meta) => &meta.file().database,
            CacheEntry::Data(data) => &data.file().database,
        }
    }

    pub fn file(&self) -> Option<&FileRef> {
        match self {
            CacheEntry::FileList { .. } => None,
            CacheEntry::LastModified { file, .. } => Some(file),
            CacheEntry::Metadata(meta) => Some(meta.file()),
            CacheEntry::Data(data) => Some(data.file()),
        }
    }
}

/// Target of an administrative invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    File(FileRef),
    Database(DatabaseId),
}

impl ClearScope {
    fn matches(&self, entry: &CacheEntry) -> bool {
        match self {
            ClearScope::File(file) => entry.file() == Some(file),
            ClearScope::Database(db) => entry.database() == db,
        }
    }
}

impl From<FileRef> for ClearScope {
    fn from(file: FileRef) -> Self {
        ClearScope::File(file)
    }
}

impl From<DatabaseId> for ClearScope {
    fn from(db: DatabaseId) -> Self {
        ClearScope::Database(db)
    }
}

/// Cache policy of one database.
#[derive(Debug, Clone, Default)]
pub struct DatabasePolicy {
    pub cache: CachePolicy,
    /// `None` trusts cached entries until they leave the store.
    pub revalidation_interval: Option<Duration>,
}

impl From<&DatabaseConfig> for DatabasePolicy {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            cache: config.cache.clone(),
            revalidation_interval: config.revalidation_interval(),
        }
    }
}

/// Per-database policies, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct CachePolicies {
    databases: HashMap<DatabaseId, DatabasePolicy>,
    fallback: DatabasePolicy,
}

impl CachePolicies {
    pub fn from_config(databases: &[DatabaseConfig]) -> Self {
        Self {
            databases: databases
                .iter()
                .map(|db| (db.id.clone(), DatabasePolicy::from(db)))
                .collect(),
            fallback: DatabasePolicy::default(),
        }
    }

    pub fn with_database(mut self, db: DatabaseId, policy: DatabasePolicy) -> Self {
        self.databases.insert(db, policy);
        self
    }

    /// The policy for `db`, or the default policy for unconfigured databases.
    pub fn get(&self, db: &DatabaseId) -> &DatabasePolicy {
        self.databases.get(db).unwrap_or(&self.fallback)
    }
}

/// Entry count of one tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierCount {
    pub tier: CacheTier,
    pub entries: usize,
}

/// Snapshot of cache usage.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub store: StoreStats,
    pub tiers: Vec<TierCount>,
}

struct CacheInner {
    store: MemoryStore<CacheEntry>,
    policies: CachePolicies,
    metrics: CacheMetrics,
}

/// The cache facade. Cheap to clone; clones share one store.
#[derive(Clone)]
pub struct DatabaseCache {
    inner: Arc<CacheInner>,
}

impl DatabaseCache {
    pub fn new(
        store: StoreConfig,
        eviction: EvictionConfig,
        policies: CachePolicies,
        metrics: CacheMetrics,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<CacheInner>| {
            let weak = weak.clone();
            let store = MemoryStore::new(store, eviction).with_listener(move |key, entry, cause| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_evicted(key, entry, cause);
                }
            });
            CacheInner {
                store,
                policies,
                metrics,
            }
        });
        Self { inner }
    }

    pub fn from_config(config: &Config, metrics: CacheMetrics) -> Self {
        Self::new(
            config.store.clone(),
            config.eviction.clone(),
            CachePolicies::from_config(&config.databases),
            metrics,
        )
    }

    pub fn policy(&self, db: &DatabaseId) -> &DatabasePolicy {
        self.inner.policies.get(db)
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    // ─── File list ────────────────────────────────────────────────────────

    pub fn try_get_file_list(&self, db: &DatabaseId) -> Option<CachedAsyncValue<Vec<FileId>>> {
        let found = match self.inner.store.get(&CacheKey::file_list(db)) {
            Some(CacheEntry::FileList { value, .. }) => Some(value),
            _ => None,
        };
        self.record(CacheTier::FileList, found.is_some());
        found
    }

    pub fn set_file_list(&self, db: &DatabaseId, value: CachedAsyncValue<Vec<FileId>>) {
        let options = self.fixed_options(&self.policy(db).cache.file_list, CachePriority::High);
        let entry = CacheEntry::FileList {
            database: db.clone(),
            value,
        };
        self.inner.store.insert(CacheKey::file_list(db), entry, options);
    }

    pub fn clear_file_list(&self, db: &DatabaseId) {
        self.inner.store.remove(&CacheKey::file_list(db));
    }

    // ─── Last modified ────────────────────────────────────────────────────

    pub fn try_get_last_modified(&self, file: &FileRef) -> Option<CachedAsyncValue<DateTime<Utc>>> {
        let found = match self.inner.store.get(&CacheKey::last_modified(file)) {
            Some(CacheEntry::LastModified { value, .. }) => Some(value),
            _ => None,
        };
        self.record(CacheTier::LastModified, found.is_some());
        found
    }

    /// Cache a modification time.
    ///
    /// Without an explicit absolute expiration the entry lives for one
    /// revalidation interval, which bounds how long a change goes unseen.
    pub fn set_last_modified(&self, file: &FileRef, value: CachedAsyncValue<DateTime<Utc>>) {
        let policy = self.policy(&file.database);
        let tier = &policy.cache.last_modified;
        let options = EntryOptions::new(tier.size, CachePriority::High)
            .with_sliding_expiration(tier.sliding_expiration())
            .with_absolute_expiration(tier.absolute_expiration().or(policy.revalidation_interval));
        let entry = CacheEntry::LastModified {
            file: file.clone(),
            value,
        };
        self.inner.store.insert(CacheKey::last_modified(file), entry, options);
    }

    pub fn clear_last_modified(&self, scope: impl Into<ClearScope>) -> usize {
        self.clear_tier(CacheTier::LastModified, scope.into())
    }

    // ─── Metadata ─────────────────────────────────────────────────────────

    pub fn try_get_metadata(&self, file: &FileRef) -> Option<Arc<MetaCacheContainer>> {
        let found = self.lookup_metadata(file);
        self.record(CacheTier::Metadata, found.is_some());
        found
    }

    /// Store the metadata entry for `file`, replacing (and cascading) any
    /// previous one.
    pub fn set_metadata(
        &self,
        file: &FileRef,
        container: MetaCacheContainer,
    ) -> CacheResult<Arc<MetaCacheContainer>> {
        if container.file() != file {
            return Err(CacheError::InvalidState(format!(
                "metadata container for {} stored under {}",
                container.file(),
                file
            )));
        }
        let container = Arc::new(container);
        let options = self.fixed_options(&self.policy(&file.database).cache.metadata, CachePriority::Normal);
        self.inner.store.insert(
            CacheKey::metadata(file),
            CacheEntry::Metadata(container.clone()),
            options,
        );
        Ok(container)
    }

    /// Remove `container` if it is still the cached entry for its table.
    pub fn remove_metadata_container(&self, container: &Arc<MetaCacheContainer>) -> bool {
        self.inner
            .store
            .remove_if(&CacheKey::metadata(container.file()), |entry| {
                matches!(entry, CacheEntry::Metadata(meta) if Arc::ptr_eq(meta, container))
            })
            .is_some()
    }

    /// Remove metadata entries; their data entries follow.
    pub fn clear_metadata(&self, scope: impl Into<ClearScope>) -> usize {
        self.clear_tier(CacheTier::Metadata, scope.into())
    }

    // ─── Data ─────────────────────────────────────────────────────────────

    /// The cached data entry for exactly `map`.
    ///
    /// The container carries the value handle and its creation time; hand it
    /// back to [`remove_data_container`](Self::remove_data_container) to drop
    /// this entry without touching a newer one.
    pub fn try_get_data(&self, file: &FileRef, map: &TableMap) -> Option<Arc<DataCacheContainer>> {
        let found = self.lookup_data(file, map);
        self.record(CacheTier::Data, found.is_some());
        found
    }

    /// Find cached data for a map containing `map`.
    ///
    /// The returned container's map is the superset. A registered superset
    /// whose data entry has just left the store is a plain miss.
    pub fn try_get_data_superset(&self, file: &FileRef, map: &TableMap) -> Option<Arc<DataCacheContainer>> {
        let meta = self.lookup_metadata(file)?;
        let superset = meta.try_get_superset(map)?;
        let data = self.lookup_data(file, &superset)?;
        trace!(file = %file, superset_cells = superset.size(), "Found cached superset");
        Some(data)
    }

    /// Cache data for `map`, registering it with the table's metadata entry.
    ///
    /// Cached data for strict submaps of `map` is removed first; the new
    /// entry can serve those requests.
    pub fn set_data(
        &self,
        file: &FileRef,
        map: TableMap,
        value: CachedAsyncValue<Vec<DataValue>>,
    ) -> CacheResult<Arc<DataCacheContainer>> {
        let meta = self.lookup_metadata(file).ok_or_else(|| {
            CacheError::InvalidState(format!("no cached metadata for {file}; data cannot be cached"))
        })?;

        let submaps = meta.get_submaps(&map);
        let mut pruned = 0usize;
        for submap in &submaps {
            if self.remove_owned_data(&meta, submap) {
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(file = %file, pruned, "Pruned cached submaps of new data entry");
        }

        let policy = &self.policy(&file.database).cache.data;
        let options = EntryOptions::new(policy.size.saturating_mul(map.size()).max(1), CachePriority::Low)
            .with_sliding_expiration(policy.sliding_expiration())
            .with_absolute_expiration(policy.absolute_expiration());

        // Registered before the insert: if the insert pushes the metadata
        // out, its cascade must already see this map.
        let key = CacheKey::data(file, &map);
        let container = Arc::new(DataCacheContainer::new(&meta, map, value));
        meta.add_data_container(&container);
        self.inner
            .store
            .insert(key, CacheEntry::Data(container.clone()), options);

        let still_owned = self
            .inner
            .peek_metadata(file)
            .is_some_and(|live| Arc::ptr_eq(&live, &meta));
        if !still_owned {
            self.remove_data_container(&container);
            meta.remove_data_container(&container);
            return Err(CacheError::InvalidState(format!(
                "metadata for {file} left the cache while its data was stored"
            )));
        }
        Ok(container)
    }

    /// Remove one data entry; returns whether it was cached.
    pub fn remove_data(&self, file: &FileRef, map: &TableMap) -> bool {
        self.inner.store.remove(&CacheKey::data(file, map)).is_some()
    }

    /// Remove `container` if it is still the cached entry for its map.
    pub fn remove_data_container(&self, container: &Arc<DataCacheContainer>) -> bool {
        self.inner
            .store
            .remove_if(&CacheKey::data(container.file(), container.map()), |entry| {
                matches!(entry, CacheEntry::Data(data) if Arc::ptr_eq(data, container))
            })
            .is_some()
    }

    pub fn clear_data(&self, scope: impl Into<ClearScope>) -> usize {
        self.clear_tier(CacheTier::Data, scope.into())
    }

    /// Remove everything cached for a database, all tiers.
    pub fn clear_database(&self, db: &DatabaseId) -> usize {
        let scope = ClearScope::Database(db.clone());
        let removed = self.inner.store.remove_where(|_, entry| scope.matches(entry));
        info!(database = %db, removed, "Cleared database cache");
        removed
    }

    // ─── Maintenance ──────────────────────────────────────────────────────

    pub fn purge_expired(&self) -> usize {
        self.inner.store.purge_expired()
    }

    /// Periodically purge expired entries so their cascades run even when
    /// nobody reads them. Stops once the cache is dropped.
    pub fn spawn_expiration_scanner(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let purged = inner.store.purge_expired();
                if purged > 0 {
                    debug!(purged, "Expiration scan complete");
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let tiers = CacheTier::ALL
            .iter()
            .map(|tier| TierCount {
                tier: *tier,
                entries: self.inner.store.count_where(|entry| entry.tier() == *tier),
            })
            .collect();
        CacheStats {
            store: self.inner.store.stats(),
            tiers,
        }
    }

    // ─── Internals ────────────────────────────────────────────────────────

    fn lookup_metadata(&self, file: &FileRef) -> Option<Arc<MetaCacheContainer>> {
        match self.inner.store.get(&CacheKey::metadata(file)) {
            Some(CacheEntry::Metadata(meta)) => Some(meta),
            _ => None,
        }
    }

    /// Data is only served while it belongs to the table's live metadata.
    fn lookup_data(&self, file: &FileRef, map: &TableMap) -> Option<Arc<DataCacheContainer>> {
        let data = match self.inner.store.get(&CacheKey::data(file, map)) {
            Some(CacheEntry::Data(data)) => data,
            _ => return None,
        };
        if data.file() != file || !data.map().is_identical(map) {
            warn!(file = %file, cached = %data.file(), "Data key collision; treating as a miss");
            return None;
        }
        let live = self.inner.peek_metadata(file)?;
        data.is_owned_by(&live).then_some(data)
    }

    fn remove_owned_data(&self, meta: &Arc<MetaCacheContainer>, map: &TableMap) -> bool {
        self.inner.remove_owned_data(meta, map)
    }

    fn clear_tier(&self, tier: CacheTier, scope: ClearScope) -> usize {
        let removed = self
            .inner
            .store
            .remove_where(|_, entry| entry.tier() == tier && scope.matches(entry));
        debug!(tier = %tier, scope = ?scope, removed, "Cleared cache tier");
        removed
    }

    fn fixed_options(&self, tier: &TierPolicy, priority: CachePriority) -> EntryOptions {
        EntryOptions::new(tier.size, priority)
            .with_sliding_expiration(tier.sliding_expiration())
            .with_absolute_expiration(tier.absolute_expiration())
    }

    fn record(&self, tier: CacheTier, hit: bool) {
        let outcome = if hit {
            LookupOutcome::Hit
        } else {
            LookupOutcome::Miss
        };
        self.inner.metrics.record_lookup(tier, outcome);
    }
}

impl CacheInner {
    /// The live metadata entry, without refreshing it or counting a lookup.
    fn peek_metadata(&self, file: &FileRef) -> Option<Arc<MetaCacheContainer>> {
        match self.store.peek(&CacheKey::metadata(file)) {
            Some(CacheEntry::Metadata(meta)) => Some(meta),
            _ => None,
        }
    }

    fn remove_owned_data(&self, meta: &Arc<MetaCacheContainer>, map: &TableMap) -> bool {
        self.store
            .remove_if(&CacheKey::data(meta.file(), map), |entry| {
                matches!(entry, CacheEntry::Data(data) if data.is_owned_by(meta))
            })
            .is_some()
    }

    fn on_evicted(&self, key: CacheKey, entry: CacheEntry, cause: EvictionCause) {
        self.metrics.record_eviction(entry.tier(), cause);
        match entry {
            CacheEntry::Metadata(meta) => {
                let maps = meta.get_related_maps();
                let cascaded = maps
                    .iter()
                    .filter(|map| self.remove_owned_data(&meta, map))
                    .count();
                debug!(
                    file = %meta.file(),
                    cause = cause.as_str(),
                    cascaded,
                    "Metadata entry left cache"
                );
            }
            CacheEntry::Data(data) => {
                if let Some(owner) = data.owner() {
                    // A same-owner replacement keeps the map registered.
                    let superseded = cause == EvictionCause::Replaced
                        && matches!(
                            self.store.peek(&key),
                            Some(CacheEntry::Data(newer)) if newer.is_owned_by(&owner)
                        );
                    if !superseded {
                        owner.remove_data_container(&data);
                    }
                }
                trace!(file = %data.file(), cause = cause.as_str(), "Data entry left cache");
            }
            CacheEntry::FileList { database, .. } => {
                trace!(database = %database, cause = cause.as_str(), "File list left cache");
            }
            CacheEntry::LastModified { file, .. } => {
                trace!(file = %file, cause = cause.as_str(), "Last-modified entry left cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> DatabaseCache {
        DatabaseCache::new(
            StoreConfig::default(),
            EvictionConfig::default(),
            CachePolicies::default(),
            CacheMetrics::new().unwrap(),
        )
    }

    fn file() -> FileRef {
        FileRef::parse("db", "tab").unwrap()
    }

    fn meta_container(file: &FileRef) -> MetaCacheContainer {
        MetaCacheContainer::new(
            file.clone(),
            CachedAsyncValue::failed(CacheError::InvalidState("not loaded".to_string())),
        )
    }

    #[test]
    fn test_set_data_requires_metadata() {
        let cache = cache();
        let map = TableMap::default().with_dimension("year", ["2020"]);
        let err = cache
            .set_data(&file(), map, CachedAsyncValue::ready(vec![]))
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidState(_)));
    }

    #[test]
    fn test_set_metadata_rejects_mismatched_file() {
        let cache = cache();
        let other = FileRef::parse("db", "other").unwrap();
        assert!(cache.set_metadata(&file(), meta_container(&other)).is_err());
    }

    #[test]
    fn test_clear_scope_matching() {
        let f = file();
        let entry = CacheEntry::LastModified {
            file: f.clone(),
            value: CachedAsyncValue::ready(Utc::now()),
        };
        assert!(ClearScope::from(f.clone()).matches(&entry));
        assert!(ClearScope::from(f.database.clone()).matches(&entry));
        assert!(!ClearScope::from(FileRef::parse("db", "x").unwrap()).matches(&entry));
    }

    #[test]
    fn test_lookups_are_counted() {
        let cache = cache();
        let f = file();
        assert!(cache.try_get_metadata(&f).is_none());
        cache.set_metadata(&f, meta_container(&f)).unwrap();
        assert!(cache.try_get_metadata(&f).is_some());

        let metrics = cache.metrics();
        assert_eq!(metrics.lookup_count(CacheTier::Metadata, LookupOutcome::Miss), 1);
        assert_eq!(metrics.lookup_count(CacheTier::Metadata, LookupOutcome::Hit), 1);
    }

    #[test]
    fn test_stats_counts_tiers() {
        let cache = cache();
        let f = file();
        cache.set_file_list(&f.database, CachedAsyncValue::ready(vec![f.file.clone()]));
        cache.set_last_modified(&f, CachedAsyncValue::ready(Utc::now()));
        cache.set_metadata(&f, meta_container(&f)).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.store.entry_count, 3);
        let count = |tier| stats.tiers.iter().find(|t| t.tier == tier).unwrap().entries;
        assert_eq!(count(CacheTier::FileList), 1);
        assert_eq!(count(CacheTier::Data), 0);
    }
}
