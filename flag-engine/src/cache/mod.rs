//! Two-tier cache for flag definitions and overrides.
//!
//! - [`NearTier`]: per-process moka cache with a short TTL
//! - [`FarTier`]: shared redis, longer TTL, optional
//! - [`FlagCache`]: composes both in front of a [`crate::repository::FlagRepository`]
//!   and keeps peers coherent over a pub/sub invalidation channel

use serde::{Deserialize, Serialize};
use std::fmt;

mod far;
mod flag_cache;
mod invalidation;
mod keys;
mod near;
mod stats;

pub use far::FarTier;
pub use flag_cache::{CacheSettings, FlagCache};
pub use invalidation::{InvalidationEvent, InvalidationMessage, WILDCARD};
pub use keys::CacheKeys;
pub use near::NearTier;
pub use stats::{CacheStats, CacheStatsSnapshot};

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// Found in this process's near tier
    NearCache,
    /// Found in the shared far tier
    FarCache,
    /// Both tiers missed, loaded from the repository
    LoaderCacheMiss,
    /// The far tier errored or timed out, loaded from the repository
    LoaderFarUnavailable,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSource::NearCache => write!(f, "near_cache"),
            CacheSource::FarCache => write!(f, "far_cache"),
            CacheSource::LoaderCacheMiss => write!(f, "loader_cache_miss"),
            CacheSource::LoaderFarUnavailable => write!(f, "loader_far_unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<V> {
    pub value: V,
    pub source: CacheSource,
}

impl<V> CacheResult<V> {
    pub fn new(value: V, source: CacheSource) -> Self {
        Self { value, source }
    }
}
