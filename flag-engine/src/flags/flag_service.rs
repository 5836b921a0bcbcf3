use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};

use crate::cache::{CacheStatsSnapshot, FlagCache};
use crate::flags::flag_matching::{EvaluationResult, FeatureFlagMatcher};
use crate::flags::flag_models::{EvaluationContext, FeatureFlag, FlagOverride, FlagStatus};
use crate::flags::flag_validation::is_valid_key;
use crate::metrics_consts::{
    FLAG_EVALUATIONS_COUNTER, FLAG_EVALUATION_ERRORS_COUNTER, FLAG_EVALUATION_TIME,
};

/// Read path: looks flags up through the cache and evaluates them.
///
/// Nothing here returns an error. A flag that can't be loaded evaluates to
/// disabled with reason `error`, an unknown one to `not_found`.
pub struct FlagService {
    cache: Arc<FlagCache>,
}

impl FlagService {
    pub fn new(cache: Arc<FlagCache>) -> Self {
        Self { cache }
    }

    pub async fn is_enabled(&self, key: &str, context: &EvaluationContext) -> bool {
        self.evaluate(key, context).await.enabled
    }

    pub async fn get_variant(&self, key: &str, context: &EvaluationContext) -> Option<String> {
        self.evaluate(key, context).await.variant
    }

    #[instrument(skip_all, fields(flag_key = %key))]
    pub async fn evaluate(&self, key: &str, context: &EvaluationContext) -> EvaluationResult {
        let start = Instant::now();
        let result = self.evaluate_key(key, context).await;
        finish(result, start)
    }

    /// Evaluates each key concurrently. Repeated keys collapse to one entry.
    pub async fn evaluate_many<K>(
        &self,
        keys: &[K],
        context: &EvaluationContext,
    ) -> HashMap<String, EvaluationResult>
    where
        K: AsRef<str>,
    {
        join_all(keys.iter().map(|key| self.evaluate(key.as_ref(), context)))
            .await
            .into_iter()
            .map(|result| (result.flag_key.clone(), result))
            .collect()
    }

    /// Every non-archived flag, evaluated for `context`. Empty if the flag
    /// list can't be loaded.
    #[instrument(skip_all)]
    pub async fn evaluate_all(&self, context: &EvaluationContext) -> HashMap<String, EvaluationResult> {
        let cached = match self.cache.get_all_flags().await {
            Ok(cached) => cached,
            Err(e) => {
                metrics::counter!(FLAG_EVALUATION_ERRORS_COUNTER, "op" => "evaluate_all").increment(1);
                warn!(error = %e, "Failed to load flag list, evaluating nothing");
                return HashMap::new();
            }
        };

        let source = cached.source;
        let live: Vec<&FeatureFlag> = cached
            .value
            .iter()
            .filter(|flag| flag.status != FlagStatus::Archived)
            .collect();

        join_all(live.into_iter().map(|flag| async move {
            let start = Instant::now();
            let overrides = self.overrides_for(&flag.key).await;
            let result = FeatureFlagMatcher::new(context, chrono::Utc::now())
                .evaluate(flag, &overrides)
                .with_cache_source(source);
            finish(result, start)
        }))
        .await
        .into_iter()
        .map(|result| (result.flag_key.clone(), result))
        .collect()
    }

    pub async fn invalidate_flag(&self, key: &str) {
        self.cache.invalidate_flag(key).await;
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all().await;
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    async fn evaluate_key(&self, key: &str, context: &EvaluationContext) -> EvaluationResult {
        // can't exist, so don't spend a cache slot or a repository read on it
        if !is_valid_key(key) {
            return EvaluationResult::not_found(key);
        }

        let cached = match self.cache.get_flag(key).await {
            Ok(cached) => cached,
            Err(e) => {
                metrics::counter!(FLAG_EVALUATION_ERRORS_COUNTER, "op" => "evaluate").increment(1);
                warn!(flag_key = %key, error = %e, "Failed to load flag, failing closed");
                return EvaluationResult::error(key);
            }
        };

        let Some(flag) = cached.value else {
            return EvaluationResult::not_found(key).with_cache_source(cached.source);
        };

        let overrides = self.overrides_for(key).await;
        FeatureFlagMatcher::new(context, chrono::Utc::now())
            .evaluate(&flag, &overrides)
            .with_cache_source(cached.source)
    }

    /// Overrides are an optional refinement: if they can't be loaded the
    /// flag's own targeting still applies.
    async fn overrides_for(&self, key: &str) -> Vec<FlagOverride> {
        match self.cache.get_overrides(key).await {
            Ok(cached) => cached.value,
            Err(e) => {
                warn!(flag_key = %key, error = %e, "Failed to load overrides, ignoring them");
                Vec::new()
            }
        }
    }
}

fn finish(mut result: EvaluationResult, start: Instant) -> EvaluationResult {
    let elapsed = start.elapsed();
    result.duration_us = elapsed.as_micros() as u64;

    metrics::counter!(FLAG_EVALUATIONS_COUNTER, "reason" => result.reason.as_str()).increment(1);
    metrics::histogram!(FLAG_EVALUATION_TIME).record(elapsed.as_secs_f64() * 1000.0);
    result
}
