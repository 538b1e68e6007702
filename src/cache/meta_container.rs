//! Per-table metadata cache entry.
//!
//! Besides the metadata handle, the entry is the registry of which maps have
//! data cached for the table. The facade keeps that registry in step with
//! the store: maps are added when data is stored and removed when the data
//! entry leaves the store for any reason.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::error;

use crate::cache::async_value::CachedAsyncValue;
use crate::cache::data_container::DataCacheContainer;
use crate::error::{CacheError, CacheResult};
use crate::table::ids::FileRef;
use crate::table::map::TableMap;
use crate::table::metadata::Metadata;

/// One cached table: metadata, data-section offset and related maps.
#[derive(Debug)]
pub struct MetaCacheContainer {
    file: FileRef,
    created_at: DateTime<Utc>,
    metadata: CachedAsyncValue<Metadata>,
    data_section_offset: OnceLock<u64>,
    related_maps: Mutex<Vec<TableMap>>,
}

impl MetaCacheContainer {
    pub fn new(file: FileRef, metadata: CachedAsyncValue<Metadata>) -> Self {
        Self::with_created_at(file, metadata, Utc::now())
    }

    pub fn with_created_at(
        file: FileRef,
        metadata: CachedAsyncValue<Metadata>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            file,
            created_at,
            metadata,
            data_section_offset: OnceLock::new(),
            related_maps: Mutex::new(Vec::new()),
        }
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &CachedAsyncValue<Metadata> {
        &self.metadata
    }

    pub fn data_section_offset(&self) -> Option<u64> {
        self.data_section_offset.get().copied()
    }

    /// Record where the table's values start. Write-once.
    ///
    /// Setting the same offset again is a no-op. A different offset means
    /// the file changed under a live cache entry and is an `InvalidState`.
    pub fn set_data_section_offset(&self, offset: u64) -> CacheResult<()> {
        let stored = *self.data_section_offset.get_or_init(|| offset);
        if stored == offset {
            return Ok(());
        }
        error!(
            file = %self.file,
            cached = stored,
            found = offset,
            "Data section offset changed for a cached table"
        );
        Err(CacheError::InvalidState(format!(
            "data section offset of {} changed from {} to {}",
            self.file, stored, offset
        )))
    }

    pub fn has_identical_map(&self, map: &TableMap) -> bool {
        self.related_maps.lock().iter().any(|m| m.is_identical(map))
    }

    /// The smallest cached map that contains `map`, if any.
    pub fn try_get_superset(&self, map: &TableMap) -> Option<TableMap> {
        self.related_maps
            .lock()
            .iter()
            .filter(|m| m.is_superset_of(map))
            .min_by_key(|m| m.size())
            .cloned()
    }

    /// Cached maps strictly contained in `map`.
    pub fn get_submaps(&self, map: &TableMap) -> Vec<TableMap> {
        self.related_maps
            .lock()
            .iter()
            .filter(|m| m.is_submap_of(map) && !m.is_identical(map))
            .cloned()
            .collect()
    }

    pub fn get_related_maps(&self) -> Vec<TableMap> {
        self.related_maps.lock().clone()
    }

    pub fn add_data_container(&self, container: &DataCacheContainer) {
        let mut maps = self.related_maps.lock();
        if !maps.iter().any(|m| m.is_identical(container.map())) {
            maps.push(container.map().clone());
        }
    }

    pub fn remove_data_container(&self, container: &DataCacheContainer) {
        self.related_maps
            .lock()
            .retain(|m| !m.is_identical(container.map()));
    }
}
