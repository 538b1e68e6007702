//! Per-(table, map) data cache entry.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};

use crate::cache::async_value::CachedAsyncValue;
use crate::cache::meta_container::MetaCacheContainer;
use crate::table::ids::FileRef;
use crate::table::map::TableMap;
use crate::table::metadata::DataValue;

/// Data for one map of one table.
///
/// Holds a weak back-reference to the metadata entry it was registered with,
/// so its eviction can be reported to exactly that entry without keeping it
/// alive.
#[derive(Debug)]
pub struct DataCacheContainer {
    file: FileRef,
    created_at: DateTime<Utc>,
    map: TableMap,
    data: CachedAsyncValue<Vec<DataValue>>,
    owner: Weak<MetaCacheContainer>,
}

impl DataCacheContainer {
    pub fn new(
        owner: &Arc<MetaCacheContainer>,
        map: TableMap,
        data: CachedAsyncValue<Vec<DataValue>>,
    ) -> Self {
        Self {
            file: owner.file().clone(),
            created_at: Utc::now(),
            map,
            data,
            owner: Arc::downgrade(owner),
        }
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn map(&self) -> &TableMap {
        &self.map
    }

    pub fn data(&self) -> &CachedAsyncValue<Vec<DataValue>> {
        &self.data
    }

    /// The owning metadata entry, if it still exists anywhere.
    pub fn owner(&self) -> Option<Arc<MetaCacheContainer>> {
        self.owner.upgrade()
    }

    pub fn is_owned_by(&self, meta: &Arc<MetaCacheContainer>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(meta))
    }
}
