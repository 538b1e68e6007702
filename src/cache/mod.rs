//! Tiered table cache.
//!
//! This module contains the cache data structures and algorithms:
//! - [`key`]: Cache tiers and the key space
//! - [`async_value`]: Shared compute-once value handles
//! - [`store`]: Bounded store with expiry and an eviction listener
//! - [`evictor`]: Victim selection by priority class and age/size score
//! - [`meta_container`], [`data_container`]: Per-table and per-map entries
//! - [`database_cache`]: Facade over the four tiers, with cascade invalidation
//! - [`freshness`]: Revalidation against file modification times
//! - [`data_source`]: Orchestrator serving queries from cache or source

pub mod async_value;
pub mod data_container;
pub mod data_source;
pub mod database_cache;
pub mod evictor;
pub mod freshness;
pub mod key;
pub mod meta_container;
pub mod store;

pub use async_value::CachedAsyncValue;
pub use data_source::{CachedDataSource, DataOutcome};
pub use database_cache::{CachePolicies, ClearScope, DatabaseCache, DatabasePolicy};
pub use key::{CacheKey, CacheTier};
