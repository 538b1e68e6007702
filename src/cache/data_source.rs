//! Cache orchestrator: answers table queries from the cache, falling back
//! to the storage connector and reader on a miss.
//!
//! A data request for `(file, map)` is served by, in order:
//! 1. an exact cached entry for `map`
//! 2. a cached entry for a superset of `map`, sliced down to `map`
//! 3. a source read, which is cached before it is returned
//!
//! Cached entries are only served while fresh. A stale entry invalidates
//! the table's metadata, which takes all of its cached data with it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::async_value::CachedAsyncValue;
use crate::cache::database_cache::DatabaseCache;
use crate::cache::freshness::{Freshness, FreshnessPolicy};
use crate::cache::key::CacheTier;
use crate::cache::meta_container::MetaCacheContainer;
use crate::error::{CacheError, CacheResult, SourceError};
use crate::metrics::LookupOutcome;
use crate::source::connector::StorageConnector;
use crate::source::reader::TableReader;
use crate::table::ids::{DatabaseId, FileId, FileRef};
use crate::table::map::{build_index_mapping, TableMap};
use crate::table::metadata::{DataValue, Metadata};

/// How a data request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOutcome {
    ExactHit,
    SupersetHit,
    Fetched,
}

/// Cached access to the tables of every registered database.
pub struct CachedDataSource {
    cache: DatabaseCache,
    reader: Arc<dyn TableReader>,
    connectors: RwLock<HashMap<DatabaseId, Arc<dyn StorageConnector>>>,
}

impl CachedDataSource {
    pub fn new(cache: DatabaseCache, reader: Arc<dyn TableReader>) -> Self {
        Self {
            cache,
            reader,
            connectors: RwLock::new(HashMap::new()),
        }
    }

    /// Serve `db` from `connector`, replacing any earlier registration.
    pub fn register_database(&self, db: DatabaseId, connector: Arc<dyn StorageConnector>) {
        info!(database = %db, "Registered database");
        self.connectors.write().insert(db, connector);
    }

    pub fn databases(&self) -> Vec<DatabaseId> {
        let mut dbs: Vec<DatabaseId> = self.connectors.read().keys().cloned().collect();
        dbs.sort();
        dbs
    }

    pub fn cache(&self) -> &DatabaseCache {
        &self.cache
    }

    // ─── File list ────────────────────────────────────────────────────────

    pub async fn get_file_list(&self, db: &DatabaseId) -> CacheResult<Arc<Vec<FileId>>> {
        if let Some(cached) = self.cache.try_get_file_list(db) {
            match cached.get().await {
                Ok(files) => return Ok(files),
                Err(err) => {
                    debug!(database = %db, error = %err, "Discarding failed cached file list");
                    self.cache.clear_file_list(db);
                }
            }
        }

        let connector = self.connector(db)?;
        let value =
            CachedAsyncValue::spawn(async move { Ok::<_, CacheError>(connector.list_files().await?) });
        self.cache.set_file_list(db, value.clone());

        let result = value.get().await;
        if result.is_err() {
            self.cache.clear_file_list(db);
        }
        result
    }

    // ─── Last modified ────────────────────────────────────────────────────

    pub async fn get_last_modified(&self, file: &FileRef) -> CacheResult<DateTime<Utc>> {
        if let Some(cached) = self.cache.try_get_last_modified(file) {
            match cached.get().await {
                Ok(time) => return Ok(*time),
                Err(err) => {
                    debug!(file = %file, error = %err, "Discarding failed cached modification time");
                    self.cache.clear_last_modified(file.clone());
                }
            }
        }

        let connector = self.connector(&file.database)?;
        let id = file.file.clone();
        let value = CachedAsyncValue::spawn(async move {
            Ok::<_, CacheError>(connector.last_write_time(&id).await?)
        });
        self.cache.set_last_modified(file, value.clone());

        match value.get().await {
            Ok(time) => Ok(*time),
            Err(err) => {
                self.cache.clear_last_modified(file.clone());
                Err(err)
            }
        }
    }

    // ─── Metadata ─────────────────────────────────────────────────────────

    pub async fn get_metadata(&self, file: &FileRef) -> CacheResult<Arc<Metadata>> {
        let (_, metadata) = self.metadata_entry(file).await?;
        Ok(metadata)
    }

    // ─── Data ─────────────────────────────────────────────────────────────

    pub async fn get_data(&self, file: &FileRef, map: &TableMap) -> CacheResult<Arc<Vec<DataValue>>> {
        let (data, _) = self.get_data_traced(file, map).await?;
        Ok(data)
    }

    /// Like [`get_data`](Self::get_data), also reporting which path served it.
    pub async fn get_data_traced(
        &self,
        file: &FileRef,
        map: &TableMap,
    ) -> CacheResult<(Arc<Vec<DataValue>>, DataOutcome)> {
        if let Some(cached) = self.cache.try_get_data(file, map) {
            if self.check_freshness(file, cached.created_at()).await?.is_fresh() {
                match cached.data().get().await {
                    Ok(data) => {
                        debug!(file = %file, cells = data.len(), "Served data from exact cache entry");
                        return Ok((data, DataOutcome::ExactHit));
                    }
                    Err(err) => {
                        debug!(file = %file, error = %err, "Discarding failed cached data");
                        self.cache.remove_data_container(&cached);
                    }
                }
            } else {
                self.invalidate_stale(file, CacheTier::Data);
            }
        } else if let Some(cached) = self.cache.try_get_data_superset(file, map) {
            if self.check_freshness(file, cached.created_at()).await?.is_fresh() {
                match cached.data().get().await {
                    Ok(data) => {
                        let sliced = slice(&data, cached.map(), map)?;
                        self.cache
                            .metrics()
                            .record_lookup(CacheTier::Data, LookupOutcome::Superset);
                        debug!(
                            file = %file,
                            superset_cells = data.len(),
                            cells = sliced.len(),
                            "Served data from cached superset"
                        );
                        return Ok((Arc::new(sliced), DataOutcome::SupersetHit));
                    }
                    Err(err) => {
                        debug!(file = %file, error = %err, "Discarding failed cached superset");
                        self.cache.remove_data_container(&cached);
                    }
                }
            } else {
                self.invalidate_stale(file, CacheTier::Data);
            }
        }

        let data = self.fetch_data(file, map).await?;
        Ok((data, DataOutcome::Fetched))
    }

    /// Read a non-table file of a database. Never cached.
    pub async fn read_auxiliary_file(&self, db: &DatabaseId, relative_path: &str) -> CacheResult<Bytes> {
        let connector = self.connector(db)?;
        Ok(connector.read_auxiliary_file(relative_path).await?)
    }

    // ─── Internals ────────────────────────────────────────────────────────

    fn connector(&self, db: &DatabaseId) -> CacheResult<Arc<dyn StorageConnector>> {
        self.connectors
            .read()
            .get(db)
            .cloned()
            .ok_or_else(|| SourceError::UnknownDatabase(db.clone()).into())
    }

    async fn check_freshness(&self, file: &FileRef, created_at: DateTime<Utc>) -> CacheResult<Freshness> {
        let policy = FreshnessPolicy::new(self.cache.policy(&file.database).revalidation_interval);
        if !policy.requires_revalidation() {
            return Ok(Freshness::Fresh);
        }
        let last_modified = self.get_last_modified(file).await?;
        Ok(policy.evaluate(created_at, last_modified))
    }

    fn invalidate_stale(&self, file: &FileRef, tier: CacheTier) {
        self.cache.metrics().record_lookup(tier, LookupOutcome::Stale);
        let removed = self.cache.clear_metadata(file.clone());
        info!(file = %file, tier = %tier, removed, "Table changed since it was cached; invalidated");
    }

    /// The table's metadata entry and resolved metadata, fetching if needed.
    async fn metadata_entry(&self, file: &FileRef) -> CacheResult<(Arc<MetaCacheContainer>, Arc<Metadata>)> {
        if let Some(meta) = self.cache.try_get_metadata(file) {
            if self.check_freshness(file, meta.created_at()).await?.is_fresh() {
                match meta.metadata().get().await {
                    Ok(metadata) => return Ok((meta, metadata)),
                    Err(err) => {
                        debug!(file = %file, error = %err, "Discarding failed cached metadata");
                        self.cache.remove_metadata_container(&meta);
                    }
                }
            } else {
                self.invalidate_stale(file, CacheTier::Metadata);
            }
        }

        let connector = self.connector(&file.database)?;
        let reader = self.reader.clone();
        let id = file.file.clone();
        let value = CachedAsyncValue::spawn(async move {
            let bytes = connector.read_file(&id).await?;
            Ok::<_, CacheError>(reader.read_metadata(&bytes)?)
        });
        let meta = self
            .cache
            .set_metadata(file, MetaCacheContainer::new(file.clone(), value))?;

        match meta.metadata().get().await {
            Ok(metadata) => {
                debug!(file = %file, dimensions = metadata.dimensions.len(), "Fetched table metadata");
                Ok((meta, metadata))
            }
            Err(err) => {
                self.cache.remove_metadata_container(&meta);
                Err(err)
            }
        }
    }

    async fn fetch_data(&self, file: &FileRef, map: &TableMap) -> CacheResult<Arc<Vec<DataValue>>> {
        let (meta, metadata) = self.metadata_entry(file).await?;
        let full = metadata.full_map();
        if !full.is_superset_of(map) {
            return Err(CacheError::InvalidSelection(format!(
                "selection does not fit the dimensions of {file}"
            )));
        }

        let connector = self.connector(&file.database)?;
        let reader = self.reader.clone();
        let id = file.file.clone();
        let target = map.clone();
        let owner = meta.clone();
        let value = CachedAsyncValue::spawn(async move {
            let bytes = connector.read_file(&id).await?;
            let offset = match owner.data_section_offset() {
                Some(offset) => offset,
                None => {
                    let offset = reader.find_data_section_offset(&bytes)?;
                    owner.set_data_section_offset(offset)?;
                    offset
                }
            };
            Ok::<_, CacheError>(reader.read_values(&bytes, offset, &target, &full)?)
        });

        let container = match self.cache.set_data(file, map.clone(), value.clone()) {
            Ok(container) => Some(container),
            Err(err) => {
                // The metadata entry left the store while we were reading.
                warn!(file = %file, error = %err, "Serving data without caching it");
                None
            }
        };

        match value.get().await {
            Ok(data) => {
                debug!(file = %file, cells = data.len(), "Fetched table data");
                Ok(data)
            }
            Err(err) => {
                if let Some(container) = container {
                    self.cache.remove_data_container(&container);
                }
                Err(err)
            }
        }
    }
}

/// Cut the cells of `map` out of data laid out over `superset`.
fn slice(data: &[DataValue], superset: &TableMap, map: &TableMap) -> CacheResult<Vec<DataValue>> {
    let mapping = build_index_mapping(superset, map)?;
    mapping
        .into_iter()
        .map(|i| {
            data.get(i).copied().ok_or_else(|| {
                CacheError::InvalidState(format!(
                    "cached superset holds {} cells, index {} requested",
                    data.len(),
                    i
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_reorders_cells() {
        let superset = TableMap::default().with_dimension("year", ["2020", "2021", "2022"]);
        let map = TableMap::default().with_dimension("year", ["2022", "2020"]);
        let data = vec![
            DataValue::Number(1.0),
            DataValue::Number(2.0),
            DataValue::Number(3.0),
        ];
        assert_eq!(
            slice(&data, &superset, &map).unwrap(),
            vec![DataValue::Number(3.0), DataValue::Number(1.0)]
        );
    }

    #[test]
    fn test_slice_rejects_short_data() {
        let superset = TableMap::default().with_dimension("year", ["2020", "2021"]);
        let map = TableMap::default().with_dimension("year", ["2021"]);
        let data = vec![DataValue::Number(1.0)];
        assert!(matches!(
            slice(&data, &superset, &map),
            Err(CacheError::InvalidState(_))
        ));
    }
}
