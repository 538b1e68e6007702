//! Prometheus metrics for cache lookups and evictions.
//!
//! Each [`CacheMetrics`] owns its registry, so isolated caches (tests,
//! multiple instances) never share counters.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::cache::key::CacheTier;
use crate::cache::store::EvictionCause;

/// Outcome of a cache lookup, as counted in `table_cache_lookups_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Hit,
    Miss,
    Superset,
    Stale,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Hit => "hit",
            LookupOutcome::Miss => "miss",
            LookupOutcome::Superset => "superset",
            LookupOutcome::Stale => "stale",
        }
    }
}

/// Cache counters.
#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,
    lookups: IntCounterVec,
    evictions: IntCounterVec,
}

impl CacheMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let lookups = IntCounterVec::new(
            Opts::new("table_cache_lookups_total", "Cache lookups by tier and outcome"),
            &["tier", "outcome"],
        )?;
        let evictions = IntCounterVec::new(
            Opts::new("table_cache_evictions_total", "Entries leaving the cache by tier and cause"),
            &["tier", "cause"],
        )?;

        registry.register(Box::new(lookups.clone()))?;
        registry.register(Box::new(evictions.clone()))?;

        Ok(Self {
            registry,
            lookups,
            evictions,
        })
    }

    pub fn record_lookup(&self, tier: CacheTier, outcome: LookupOutcome) {
        self.lookups
            .with_label_values(&[tier.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn record_eviction(&self, tier: CacheTier, cause: EvictionCause) {
        self.evictions
            .with_label_values(&[tier.as_str(), cause.as_str()])
            .inc();
    }

    pub fn lookup_count(&self, tier: CacheTier, outcome: LookupOutcome) -> u64 {
        self.lookups
            .with_label_values(&[tier.as_str(), outcome.as_str()])
            .get()
    }

    pub fn eviction_count(&self, tier: CacheTier, cause: EvictionCause) -> u64 {
        self.evictions
            .with_label_values(&[tier.as_str(), cause.as_str()])
            .get()
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_isolated_per_instance() {
        let a = CacheMetrics::new().unwrap();
        let b = CacheMetrics::new().unwrap();

        a.record_lookup(CacheTier::Data, LookupOutcome::Hit);
        a.record_lookup(CacheTier::Data, LookupOutcome::Hit);
        a.record_eviction(CacheTier::Metadata, EvictionCause::Expired);

        assert_eq!(a.lookup_count(CacheTier::Data, LookupOutcome::Hit), 2);
        assert_eq!(b.lookup_count(CacheTier::Data, LookupOutcome::Hit), 0);
        assert_eq!(a.eviction_count(CacheTier::Metadata, EvictionCause::Expired), 1);
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.record_lookup(CacheTier::Metadata, LookupOutcome::Miss);
        let text = metrics.encode().unwrap();
        assert!(text.contains("table_cache_lookups_total"));
        assert!(text.contains("tier=\"metadata\""));
    }
}
