use chrono::Utc;
use common_redis::{Client as RedisClient, MockRedisClient};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{CacheSettings, FlagCache};
use crate::flags::flag_models::{
    FeatureFlag, FlagOverride, FlagStatus, FlagType, FlagValue, OverrideScope, Targeting,
};
use crate::repository::MemoryFlagStore;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// An active flag with empty targeting, a `false` default and a random salt.
pub fn create_test_flag(key: &str, flag_type: FlagType) -> FeatureFlag {
    let now = Utc::now();
    FeatureFlag {
        id: Uuid::now_v7(),
        key: key.to_string(),
        name: key.to_string(),
        description: None,
        flag_type,
        status: FlagStatus::Active,
        default_value: FlagValue::Bool(false),
        targeting: Targeting::default(),
        salt: random_string("", 16),
        category: None,
        metadata: serde_json::Map::new(),
        created_at: now,
        updated_at: now,
        created_by: Some("test".to_string()),
    }
}

/// Scoped to the user when `user_id` is set, else to the tenant.
pub fn create_test_override(
    flag_key: &str,
    tenant_id: Option<&str>,
    user_id: Option<&str>,
    value: FlagValue,
) -> FlagOverride {
    let scope = match (user_id, tenant_id) {
        (Some(user), _) => OverrideScope::User(user.to_string()),
        (None, Some(tenant)) => OverrideScope::Tenant(tenant.to_string()),
        (None, None) => OverrideScope::User(random_string("user_", 8)),
    };
    FlagOverride {
        id: Uuid::now_v7(),
        flag_key: flag_key.to_string(),
        scope,
        value,
        expires_at: None,
        reason: None,
        created_by: Some("test".to_string()),
        created_at: Utc::now(),
    }
}

/// Default settings with a sweep fast enough to observe in a test.
pub fn test_cache_settings() -> CacheSettings {
    CacheSettings {
        key_prefix: "flag_engine:".to_string(),
        sweep_interval: Duration::from_millis(50),
        ..CacheSettings::default()
    }
}

/// A cache over `store`, sharing `redis` as its far tier when given.
pub fn setup_flag_cache(
    store: &Arc<MemoryFlagStore>,
    redis: Option<&MockRedisClient>,
) -> Arc<FlagCache> {
    let far = redis.map(|redis| -> Arc<dyn RedisClient + Send + Sync> { Arc::new(redis.clone()) });
    Arc::new(FlagCache::new(test_cache_settings(), store.clone(), far))
}
