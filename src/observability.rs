//! Metrics hooks for the fetch-and-cache engines.
//!
//! Implement [`CacheMetrics`] to feed engine events into your monitoring
//! system:
//!
//! ```ignore
//! use cacheaside::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hits(&self, cache: &str, count: usize) {
//!         // counter!("cache_hits", "cache" => cache).increment(count as u64);
//!     }
//!     fn record_fallback(&self, cache: &str, count: usize, duration: Duration) {
//!         // histogram!("cache_fallback_seconds", "cache" => cache).record(duration);
//!     }
//!     // ... other methods keep their logging defaults
//! }
//!
//! // let engine = CacheEngine::new(backend)
//! //     .with_metrics(Box::new(PrometheusMetrics));
//! ```
//!
//! Every method has a default that logs through the `log` crate, so an
//! implementation only overrides what it exports. [`NoOpMetrics`] discards
//! everything and is what engines start with.
//!
//! `cache` is the mapping's [`cache_name`](crate::mapping::EntityCacheMapping::cache_name).

use std::time::Duration;

/// Hooks called by the engines on every lookup.
pub trait CacheMetrics: Send + Sync {
    /// Entities (or confirmed groups) served from the cache.
    fn record_hits(&self, cache: &str, count: usize) {
        debug!("Cache HIT: {} x{}", cache, count);
    }

    /// Ids that had to be fetched from the source.
    fn record_misses(&self, cache: &str, count: usize) {
        debug!("Cache MISS: {} x{}", cache, count);
    }

    /// Ids answered by a negative marker.
    fn record_negative_hits(&self, cache: &str, count: usize) {
        debug!("Cache NEGATIVE HIT: {} x{}", cache, count);
    }

    /// Indexed groups refetched because a member entry was gone.
    fn record_stale_group(&self, cache: &str, count: usize) {
        debug!("Cache STALE GROUP: {} x{}", cache, count);
    }

    /// One call to the source-of-truth fallback.
    fn record_fallback(&self, cache: &str, count: usize, duration: Duration) {
        debug!("Cache FALLBACK: {} x{} took {:?}", cache, count, duration);
    }

    /// The cache phase failed and the lookup degraded to the source.
    fn record_degraded(&self, cache: &str, error: &str) {
        warn!("Cache DEGRADED for {}: {}", cache, error);
    }

    /// An awaited write-back failed.
    fn record_write_failure(&self, operation: &str, error: &str) {
        warn!("Cache WRITE FAILED for {}: {}", operation, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hits(&self, _cache: &str, _count: usize) {}
    fn record_misses(&self, _cache: &str, _count: usize) {}
    fn record_negative_hits(&self, _cache: &str, _count: usize) {}
    fn record_stale_group(&self, _cache: &str, _count: usize) {}
    fn record_fallback(&self, _cache: &str, _count: usize, _duration: Duration) {}
    fn record_degraded(&self, _cache: &str, _error: &str) {}
    fn record_write_failure(&self, _operation: &str, _error: &str) {}
}
