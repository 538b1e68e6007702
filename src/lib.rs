//! table-cache-tier: multi-tier cache for statistical table files.
//!
//! Caches, per database and table file, four kinds of entries in one
//! bounded in-process store:
//!   file listings → modification times → table metadata → data slices
//!
//! Data entries are owned by their table's metadata entry: when metadata
//! leaves the cache, its data follows. Requests for a subset of cached data
//! are sliced from the cached superset without touching the source.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod source;
pub mod table;
