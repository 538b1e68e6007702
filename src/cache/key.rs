//! Cache key space.
//!
//! Every tier hashes a constant seed ahead of the entity identity, so keys
//! of different tiers for the same file never coincide in practice.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::table::ids::{DatabaseId, FileRef};
use crate::table::map::TableMap;

/// The four cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    FileList,
    LastModified,
    Metadata,
    Data,
}

impl CacheTier {
    pub const ALL: [CacheTier; 4] = [
        CacheTier::FileList,
        CacheTier::LastModified,
        CacheTier::Metadata,
        CacheTier::Data,
    ];

    fn seed(&self) -> u64 {
        match self {
            CacheTier::FileList => 0x9e37_79b9_7f4a_7c15,
            CacheTier::LastModified => 0xc2b2_ae3d_27d4_eb4f,
            CacheTier::Metadata => 0x1656_67b1_9e37_79f9,
            CacheTier::Data => 0x27d4_eb2f_1656_67c5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::FileList => "file_list",
            CacheTier::LastModified => "last_modified",
            CacheTier::Metadata => "metadata",
            CacheTier::Data => "data",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key used uniformly by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u64);

impl CacheKey {
    fn derive(tier: CacheTier, entity: impl Hash) -> Self {
        // DefaultHasher::new() uses fixed keys, so keys are stable per build.
        let mut hasher = DefaultHasher::new();
        tier.seed().hash(&mut hasher);
        entity.hash(&mut hasher);
        CacheKey(hasher.finish())
    }

    pub fn file_list(database: &DatabaseId) -> Self {
        Self::derive(CacheTier::FileList, database)
    }

    pub fn last_modified(file: &FileRef) -> Self {
        Self::derive(CacheTier::LastModified, file)
    }

    pub fn metadata(file: &FileRef) -> Self {
        Self::derive(CacheTier::Metadata, file)
    }

    /// Value-code order within a dimension is part of the key.
    pub fn data(file: &FileRef, map: &TableMap) -> Self {
        Self::derive(CacheTier::Data, (file, map))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> FileRef {
        FileRef::parse("db", "tab").unwrap()
    }

    #[test]
    fn test_tiers_do_not_collide() {
        let f = file();
        let keys = [
            CacheKey::file_list(&f.database),
            CacheKey::last_modified(&f),
            CacheKey::metadata(&f),
            CacheKey::data(&f, &TableMap::default()),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_data_key_is_deterministic() {
        let f = file();
        let m1 = TableMap::default().with_dimension("year", ["2020", "2021"]);
        let m2 = TableMap::default().with_dimension("year", ["2020", "2021"]);
        let m3 = TableMap::default().with_dimension("year", ["2021", "2020"]);
        assert_eq!(CacheKey::data(&f, &m1), CacheKey::data(&f, &m2));
        assert_ne!(CacheKey::data(&f, &m1), CacheKey::data(&f, &m3));
    }

    #[test]
    fn test_data_key_depends_on_file() {
        let map = TableMap::default().with_dimension("year", ["2020"]);
        let other = FileRef::parse("db", "other").unwrap();
        assert_ne!(CacheKey::data(&file(), &map), CacheKey::data(&other, &map));
    }
}
