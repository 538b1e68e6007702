//! Eviction policy: decides which store entries to drop under size pressure.
//!
//! Victims are taken from the lowest priority class first. Within a class,
//! entries are ranked by a weighted score combining:
//! - Time since last access (old → evictable)
//! - Size relative to store capacity (large → evictable)

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cache::key::CacheKey;
use crate::config::EvictionConfig;

/// Retention class of a store entry. Lower classes are evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CachePriority {
    Low,
    Normal,
    High,
    /// Never chosen as a capacity victim; still subject to expiry.
    NeverRemove,
}

/// What the evictor needs to know about one entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryUsage {
    pub key: CacheKey,
    pub priority: CachePriority,
    pub size: usize,
    pub last_access: Instant,
}

/// An eviction candidate with its computed score.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: CacheKey,
    pub priority: CachePriority,
    pub size: usize,
    pub score: f64,
}

// Greater = evicted sooner: lower priority class wins, then higher score.
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.priority.cmp(&self.priority).then_with(|| {
            self.score
                .partial_cmp(&other.score)
                .unwrap_or(Ordering::Equal)
        })
    }
}

/// The eviction policy engine.
pub struct Evictor {
    config: EvictionConfig,
}

impl Evictor {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    /// Score of one entry within its priority class.
    ///
    /// ```text
    /// score(entry) = age_weight × seconds_since_access + size_weight × size / capacity
    /// ```
    pub fn compute_score(&self, entry: &EntryUsage, capacity: usize, now: Instant) -> f64 {
        let age_secs = now.saturating_duration_since(entry.last_access).as_secs_f64();
        let size_fraction = if capacity == 0 {
            0.0
        } else {
            entry.size as f64 / capacity as f64
        };
        self.config.age_weight * age_secs + self.config.size_weight * size_fraction
    }

    /// Select entries whose combined size frees at least `bytes_to_free`.
    ///
    /// Returns keys ordered by eviction priority (first evicted first).
    /// `NeverRemove` entries and the `protected` keys are never selected.
    pub fn select_victims(
        &self,
        entries: impl Iterator<Item = EntryUsage>,
        capacity: usize,
        bytes_to_free: usize,
        protected: &[CacheKey],
    ) -> Vec<EvictionCandidate> {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();

        for entry in entries {
            if entry.priority == CachePriority::NeverRemove || protected.contains(&entry.key) {
                continue;
            }
            heap.push(EvictionCandidate {
                key: entry.key,
                priority: entry.priority,
                size: entry.size,
                score: self.compute_score(&entry, capacity, now),
            });
        }

        let mut victims = Vec::new();
        let mut freed = 0usize;
        while freed < bytes_to_free {
            let Some(candidate) = heap.pop() else {
                break;
            };
            freed += candidate.size;
            victims.push(candidate);
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::table::ids::DatabaseId;

    fn key(n: u32) -> CacheKey {
        CacheKey::file_list(&DatabaseId::new(format!("db{n}")).unwrap())
    }

    fn usage(n: u32, priority: CachePriority, size: usize, age: Duration) -> EntryUsage {
        EntryUsage {
            key: key(n),
            priority,
            size,
            last_access: Instant::now() - age,
        }
    }

    #[test]
    fn test_low_priority_evicted_first() {
        let evictor = Evictor::new(EvictionConfig::default());
        let entries = vec![
            usage(0, CachePriority::Normal, 10, Duration::from_secs(2)),
            usage(1, CachePriority::Low, 10, Duration::ZERO),
            usage(2, CachePriority::High, 10, Duration::from_secs(3)),
        ];

        let victims = evictor.select_victims(entries.into_iter(), 1000, 10, &[]);
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].key, key(1));
    }

    #[test]
    fn test_older_entry_evicted_first_within_class() {
        let evictor = Evictor::new(EvictionConfig {
            age_weight: 1.0,
            size_weight: 0.0,
        });
        let entries = vec![
            usage(0, CachePriority::Low, 10, Duration::from_millis(100)),
            usage(1, CachePriority::Low, 10, Duration::from_secs(2)),
        ];

        let victims = evictor.select_victims(entries.into_iter(), 1000, 1, &[]);
        assert_eq!(victims[0].key, key(1));
    }

    #[test]
    fn test_protected_and_never_remove_excluded() {
        let evictor = Evictor::new(EvictionConfig::default());
        let entries = vec![
            usage(0, CachePriority::Low, 10, Duration::ZERO),
            usage(1, CachePriority::NeverRemove, 10, Duration::ZERO),
            usage(2, CachePriority::Normal, 10, Duration::ZERO),
        ];

        let victims = evictor.select_victims(entries.into_iter(), 1000, 1000, &[key(0)]);
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].key, key(2));
    }

    #[test]
    fn test_stops_once_enough_is_freed() {
        let evictor = Evictor::new(EvictionConfig::default());
        let entries = (0..10).map(|i| usage(i, CachePriority::Low, 100, Duration::ZERO));

        let victims = evictor.select_victims(entries, 10_000, 250, &[]);
        assert_eq!(victims.len(), 3);
    }
}
