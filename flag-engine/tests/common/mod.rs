#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use common_redis::{Client, MockRedisClient};
use flag_engine::cache::CacheSettings;
use flag_engine::flags::flag_models::{FlagType, FlagValue, Targeting};
use flag_engine::flags::flag_operations::NewFlag;
use flag_engine::repository::MemoryFlagStore;
use flag_engine::test_utils::test_cache_settings;
use flag_engine::{FlagCache, FlagManager, FlagService};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// One process: its own cache, service and manager over a shared store and
/// (optionally) a shared redis.
pub struct Instance {
    pub cache: Arc<FlagCache>,
    pub service: FlagService,
    pub manager: FlagManager,
    listener: Option<JoinHandle<()>>,
}

impl Instance {
    pub async fn start(store: &Arc<MemoryFlagStore>, redis: Option<&MockRedisClient>) -> Self {
        Self::start_with(store, redis, test_cache_settings()).await
    }

    pub async fn start_with(
        store: &Arc<MemoryFlagStore>,
        redis: Option<&MockRedisClient>,
        settings: CacheSettings,
    ) -> Self {
        init_tracing();
        let far = redis.map(|redis| -> Arc<dyn Client + Send + Sync> { Arc::new(redis.clone()) });
        let cache = Arc::new(FlagCache::new(settings, store.clone(), far));
        let listener = cache
            .start_invalidation_listener()
            .await
            .expect("failed to subscribe to invalidations");

        Self {
            service: FlagService::new(cache.clone()),
            manager: FlagManager::new(store.clone(), cache.clone()),
            cache,
            listener,
        }
    }

    pub async fn stop(self) {
        self.cache.shutdown();
        if let Some(listener) = self.listener {
            listener.await.expect("listener task panicked");
        }
    }
}

/// Logs go to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn new_flag(key: &str, flag_type: FlagType) -> NewFlag {
    NewFlag {
        key: key.to_string(),
        name: key.to_string(),
        description: None,
        flag_type,
        default_value: FlagValue::Bool(false),
        targeting: Targeting::default(),
        category: None,
        metadata: serde_json::Map::new(),
    }
}

/// Waits until `instance` has applied at least `count` invalidations
/// published by its peers.
pub async fn wait_for_invalidations(instance: &Instance, count: u64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while instance.cache.stats().invalidations_received < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for invalidations");
}
