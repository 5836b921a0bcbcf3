use moka::sync::Cache;
use std::time::Duration;

/// In-process tier. Entries expire `ttl` after insertion and the tier holds at
/// most `max_capacity` of them, evicting the least recently used first.
///
/// Clones share the same underlying storage.
#[derive(Clone)]
pub struct NearTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<String, V>,
}

impl<V> NearTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Expired entries read as misses even before the sweep removes them.
    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key)
    }

    pub fn insert(&self, key: String, value: V) {
        self.cache.insert(key, value);
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Apply pending evictions now instead of lazily on the next access.
    pub fn sweep(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
