use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use common_redis::MockRedisClient;
use flag_engine::cache::CacheSource;
use flag_engine::flags::flag_match_reason::EvaluationReason;
use flag_engine::flags::flag_models::FlagType;
use flag_engine::flags::flag_operations::NewOverride;
use flag_engine::repository::MemoryFlagStore;
use flag_engine::test_utils::test_cache_settings;
use flag_engine::EvaluationContext;

use crate::common::*;
mod common;

#[tokio::test]
async fn it_converges_peers_after_a_write() -> Result<()> {
    let store = Arc::new(MemoryFlagStore::new());
    let redis = MockRedisClient::new();
    let writer = Instance::start(&store, Some(&redis)).await;
    let reader = Instance::start(&store, Some(&redis)).await;

    writer
        .manager
        .create_flag(new_flag("search.v2", FlagType::Boolean), "alice")
        .await?;

    let context = EvaluationContext::new().with_user("u1");
    assert!(!reader.service.is_enabled("search.v2", &context).await);
    let cached = reader.service.evaluate("search.v2", &context).await;
    assert_eq!(cached.cache_source, Some(CacheSource::NearCache));

    writer
        .manager
        .add_override(
            NewOverride {
                flag_key: "search.v2".to_string(),
                user_id: Some("u1".to_string()),
                value: Some(true.into()),
                ..Default::default()
            },
            "alice",
        )
        .await?;
    // one for the create, one for the override
    wait_for_invalidations(&reader, 2).await;

    // well inside the near-tier TTL, so only the invalidation explains this
    let result = reader.service.evaluate("search.v2", &context).await;
    assert_eq!(result.reason, EvaluationReason::UserOverride);
    assert!(result.enabled);
    assert!(reader.service.cache_stats().invalidations_received >= 1);

    writer.stop().await;
    reader.stop().await;
    Ok(())
}

#[tokio::test]
async fn it_propagates_the_kill_switch() -> Result<()> {
    let store = Arc::new(MemoryFlagStore::new());
    let redis = MockRedisClient::new();
    let admin = Instance::start(&store, Some(&redis)).await;
    let edge = Instance::start(&store, Some(&redis)).await;

    let mut input = new_flag("payments.retry", FlagType::Percentage);
    input.targeting.percentage = Some(100.0);
    admin.manager.create_flag(input, "alice").await?;

    let context = EvaluationContext::new().with_user("u1");
    assert!(edge.service.is_enabled("payments.retry", &context).await);

    admin.manager.kill_flag("payments.retry", "oncall", None).await?;
    wait_for_invalidations(&edge, 2).await;

    let result = edge.service.evaluate("payments.retry", &context).await;
    assert_eq!(result.reason, EvaluationReason::FlagDisabled);

    admin.stop().await;
    edge.stop().await;
    Ok(())
}

#[tokio::test]
async fn it_clears_peers_on_invalidate_all() -> Result<()> {
    let store = Arc::new(MemoryFlagStore::new());
    let redis = MockRedisClient::new();
    let first = Instance::start(&store, Some(&redis)).await;
    let second = Instance::start(&store, Some(&redis)).await;

    first
        .manager
        .create_flag(new_flag("a.flag", FlagType::Boolean), "alice")
        .await?;
    let context = EvaluationContext::new();
    second.service.evaluate("a.flag", &context).await;
    assert_eq!(
        second.service.evaluate("a.flag", &context).await.cache_source,
        Some(CacheSource::NearCache)
    );

    first.service.invalidate_all().await;
    wait_for_invalidations(&second, 2).await;

    assert_eq!(
        second.service.evaluate("a.flag", &context).await.cache_source,
        Some(CacheSource::LoaderCacheMiss)
    );

    first.stop().await;
    second.stop().await;
    Ok(())
}

#[tokio::test]
async fn it_serves_from_repository_when_far_tier_is_down() -> Result<()> {
    let store = Arc::new(MemoryFlagStore::new());
    let redis = MockRedisClient::new();
    let instance = Instance::start(&store, Some(&redis)).await;

    let mut input = new_flag("checkout.new_flow", FlagType::Percentage);
    input.targeting.percentage = Some(100.0);
    instance.manager.create_flag(input, "alice").await?;
    instance.service.invalidate_all().await;

    redis.set_unavailable(true);

    let result = instance
        .service
        .evaluate("checkout.new_flow", &EvaluationContext::new().with_user("u1"))
        .await;
    assert_eq!(result.reason, EvaluationReason::PercentageRollout);
    assert_eq!(result.cache_source, Some(CacheSource::LoaderFarUnavailable));
    assert!(instance.service.cache_stats().far_errors >= 1);

    // writes still succeed and are visible locally
    instance
        .manager
        .kill_flag("checkout.new_flow", "oncall", None)
        .await?;
    let result = instance
        .service
        .evaluate("checkout.new_flow", &EvaluationContext::new().with_user("u1"))
        .await;
    assert_eq!(result.reason, EvaluationReason::FlagDisabled);

    instance.stop().await;
    Ok(())
}

#[tokio::test]
async fn it_repopulates_near_tier_from_far_tier() -> Result<()> {
    let store = Arc::new(MemoryFlagStore::new());
    let redis = MockRedisClient::new();
    let warm = Instance::start(&store, Some(&redis)).await;

    warm.manager
        .create_flag(new_flag("a.flag", FlagType::Boolean), "alice")
        .await?;
    let reads_after_create = store.flag_reads();

    let cold = Instance::start(&store, Some(&redis)).await;
    let context = EvaluationContext::new();
    assert_eq!(
        cold.service.evaluate("a.flag", &context).await.cache_source,
        Some(CacheSource::FarCache)
    );
    assert_eq!(
        cold.service.evaluate("a.flag", &context).await.cache_source,
        Some(CacheSource::NearCache)
    );
    assert_eq!(store.flag_reads(), reads_after_create);

    warm.stop().await;
    cold.stop().await;
    Ok(())
}

#[tokio::test]
async fn it_expires_near_entries_without_invalidation() -> Result<()> {
    let store = Arc::new(MemoryFlagStore::new());
    let mut settings = test_cache_settings();
    settings.near_ttl = Duration::from_millis(100);
    let writer = Instance::start(&store, None).await;
    let reader = Instance::start_with(&store, None, settings).await;

    writer
        .manager
        .create_flag(new_flag("a.flag", FlagType::Boolean), "alice")
        .await?;
    let context = EvaluationContext::new().with_user("u1");
    assert!(!reader.service.is_enabled("a.flag", &context).await);

    // no far tier, so nothing tells the reader about this
    writer
        .manager
        .add_override(
            NewOverride {
                flag_key: "a.flag".to_string(),
                user_id: Some("u1".to_string()),
                value: Some(true.into()),
                ..Default::default()
            },
            "alice",
        )
        .await?;
    assert!(!reader.service.is_enabled("a.flag", &context).await);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(reader.service.is_enabled("a.flag", &context).await);

    writer.stop().await;
    reader.stop().await;
    Ok(())
}

#[tokio::test]
async fn it_forgets_missing_flags_once_created() -> Result<()> {
    let store = Arc::new(MemoryFlagStore::new());
    let redis = MockRedisClient::new();
    let admin = Instance::start(&store, Some(&redis)).await;
    let edge = Instance::start(&store, Some(&redis)).await;
    let context = EvaluationContext::new();

    for _ in 0..5 {
        let result = edge.service.evaluate("late.flag", &context).await;
        assert_eq!(result.reason, EvaluationReason::NotFound);
    }
    // one repository read, the rest answered by the remembered miss
    assert_eq!(store.flag_reads(), 1);
    assert!(!redis.contains_key("flag_engine:flag:late.flag"));

    admin
        .manager
        .create_flag(new_flag("late.flag", FlagType::Boolean), "alice")
        .await?;
    wait_for_invalidations(&edge, 1).await;

    let result = edge.service.evaluate("late.flag", &context).await;
    assert_eq!(result.reason, EvaluationReason::DefaultValue);

    admin.stop().await;
    edge.stop().await;
    Ok(())
}
