use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics_consts::{
    CACHE_FAR_ERRORS, CACHE_FAR_HITS, CACHE_FAR_MISSES, CACHE_HIT_RATE, CACHE_INVALIDATIONS_PUBLISHED,
    CACHE_INVALIDATIONS_RECEIVED, CACHE_NEAR_ENTRIES, CACHE_NEAR_HITS, CACHE_NEAR_MISSES,
    CACHE_REPOSITORY_ERRORS, CACHE_REPOSITORY_LOADS, CACHE_REQUESTS,
};

/// Counters for one [`super::FlagCache`]. Updated with relaxed atomics, so a
/// snapshot taken under load is advisory rather than exact.
#[derive(Debug, Default)]
pub struct CacheStats {
    requests: AtomicU64,
    near_hits: AtomicU64,
    near_misses: AtomicU64,
    far_hits: AtomicU64,
    far_misses: AtomicU64,
    far_errors: AtomicU64,
    repository_loads: AtomicU64,
    repository_errors: AtomicU64,
    invalidations_published: AtomicU64,
    invalidations_received: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl CacheStats {
    pub fn record_request(&self) {
        bump(&self.requests);
    }

    pub fn record_near_hit(&self) {
        bump(&self.near_hits);
    }

    pub fn record_near_miss(&self) {
        bump(&self.near_misses);
    }

    pub fn record_far_hit(&self) {
        bump(&self.far_hits);
    }

    pub fn record_far_miss(&self) {
        bump(&self.far_misses);
    }

    pub fn record_far_error(&self) {
        bump(&self.far_errors);
    }

    pub fn record_repository_load(&self) {
        bump(&self.repository_loads);
    }

    pub fn record_repository_error(&self) {
        bump(&self.repository_errors);
    }

    pub fn record_invalidation_published(&self) {
        bump(&self.invalidations_published);
    }

    pub fn record_invalidation_received(&self) {
        bump(&self.invalidations_received);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            requests: read(&self.requests),
            near_hits: read(&self.near_hits),
            near_misses: read(&self.near_misses),
            far_hits: read(&self.far_hits),
            far_misses: read(&self.far_misses),
            far_errors: read(&self.far_errors),
            repository_loads: read(&self.repository_loads),
            repository_errors: read(&self.repository_errors),
            invalidations_published: read(&self.invalidations_published),
            invalidations_received: read(&self.invalidations_received),
        }
    }

    /// Push the current counters out as gauges.
    pub fn export(&self, near_entries: u64) {
        let snapshot = self.snapshot();
        gauge!(CACHE_REQUESTS).set(snapshot.requests as f64);
        gauge!(CACHE_NEAR_HITS).set(snapshot.near_hits as f64);
        gauge!(CACHE_NEAR_MISSES).set(snapshot.near_misses as f64);
        gauge!(CACHE_FAR_HITS).set(snapshot.far_hits as f64);
        gauge!(CACHE_FAR_MISSES).set(snapshot.far_misses as f64);
        gauge!(CACHE_FAR_ERRORS).set(snapshot.far_errors as f64);
        gauge!(CACHE_REPOSITORY_LOADS).set(snapshot.repository_loads as f64);
        gauge!(CACHE_REPOSITORY_ERRORS).set(snapshot.repository_errors as f64);
        gauge!(CACHE_INVALIDATIONS_PUBLISHED).set(snapshot.invalidations_published as f64);
        gauge!(CACHE_INVALIDATIONS_RECEIVED).set(snapshot.invalidations_received as f64);
        gauge!(CACHE_HIT_RATE).set(snapshot.hit_rate());
        gauge!(CACHE_NEAR_ENTRIES).set(near_entries as f64);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheStatsSnapshot {
    pub requests: u64,
    pub near_hits: u64,
    pub near_misses: u64,
    pub far_hits: u64,
    pub far_misses: u64,
    pub far_errors: u64,
    pub repository_loads: u64,
    pub repository_errors: u64,
    pub invalidations_published: u64,
    pub invalidations_received: u64,
}

impl CacheStatsSnapshot {
    /// Share of requests answered by either tier, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        let hits = (self.near_hits + self.far_hits).min(self.requests);
        hits as f64 / self.requests as f64
    }
}
