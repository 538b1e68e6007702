//! Freshness policy for cached table entries.
//!
//! A database with no revalidation interval trusts its cache until entries
//! leave the store. Otherwise an entry is fresh only if it was created after
//! the table file was last written. The modification time itself comes from
//! the last-modified tier, so a warm check costs one store lookup.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Result of a freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

impl Freshness {
    pub fn is_fresh(self) -> bool {
        self == Freshness::Fresh
    }
}

/// The revalidation rule of one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreshnessPolicy {
    revalidation_interval: Option<Duration>,
}

impl FreshnessPolicy {
    pub fn new(revalidation_interval: Option<Duration>) -> Self {
        Self {
            revalidation_interval: revalidation_interval.filter(|i| !i.is_zero()),
        }
    }

    /// Whether checks need the file's modification time at all.
    pub fn requires_revalidation(&self) -> bool {
        self.revalidation_interval.is_some()
    }

    /// Compare an entry's creation time with the file's last write.
    ///
    /// Equal timestamps are stale: the entry may predate the write.
    pub fn evaluate(&self, created_at: DateTime<Utc>, last_modified: DateTime<Utc>) -> Freshness {
        if !self.requires_revalidation() || created_at > last_modified {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }
}
