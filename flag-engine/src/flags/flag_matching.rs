use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::CacheSource;
use crate::flags::flag_match_reason::EvaluationReason;
use crate::flags::flag_models::{
    EvaluationContext, FeatureFlag, FlagOverride, FlagType, FlagValue, Variant,
};
use crate::hashing::{is_in_rollout, select_variant};

/// Bucketing identifier for contexts that carry neither a user nor a tenant.
pub const ANONYMOUS_IDENTIFIER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EvaluationResult {
    pub flag_key: String,
    pub value: FlagValue,
    pub enabled: bool,
    pub reason: EvaluationReason,
    #[serde(default)]
    pub variant: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_us: u64,
    #[serde(default)]
    pub cache_source: Option<CacheSource>,
}

impl EvaluationResult {
    fn new(
        flag_key: &str,
        value: FlagValue,
        reason: EvaluationReason,
        variant: Option<String>,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            flag_key: flag_key.to_string(),
            enabled: value.is_truthy(),
            value,
            reason,
            variant,
            evaluated_at,
            duration_us: 0,
            cache_source: None,
        }
    }

    /// The flag doesn't exist. Always disabled.
    pub fn not_found(flag_key: &str) -> Self {
        Self::new(
            flag_key,
            FlagValue::Bool(false),
            EvaluationReason::NotFound,
            None,
            Utc::now(),
        )
    }

    /// The definition couldn't be loaded at all. Fails safe to disabled.
    pub fn error(flag_key: &str) -> Self {
        Self::new(
            flag_key,
            FlagValue::Bool(false),
            EvaluationReason::Error,
            None,
            Utc::now(),
        )
    }

    pub fn with_cache_source(mut self, source: CacheSource) -> Self {
        self.cache_source = Some(source);
        self
    }
}

/// Runs the precedence rules for one context.
///
/// Pure: everything it needs (flag, overrides, clock) is handed in, so the
/// same inputs give the same answer on every instance.
#[derive(Debug)]
pub struct FeatureFlagMatcher<'a> {
    context: &'a EvaluationContext,
    now: DateTime<Utc>,
}

impl<'a> FeatureFlagMatcher<'a> {
    pub fn new(context: &'a EvaluationContext, now: DateTime<Utc>) -> Self {
        Self { context, now }
    }

    /// The rules are checked in a fixed order and the first one that matches
    /// decides. Later rules rely on earlier ones not having matched.
    pub fn evaluate(&self, flag: &FeatureFlag, overrides: &[FlagOverride]) -> EvaluationResult {
        let targeting = &flag.targeting;

        if !flag.status.is_active() {
            return self.default_value(flag, EvaluationReason::FlagDisabled);
        }

        if let Some(environments) = targeting.environments.as_ref().filter(|e| !e.is_empty()) {
            let allowed = self
                .context
                .environment
                .as_ref()
                .is_some_and(|env| environments.contains(env));
            if !allowed {
                return self.default_value(flag, EvaluationReason::EnvironmentMismatch);
            }
        }

        if let Some(schedule) = &targeting.schedule {
            if !schedule.contains(self.now) {
                return self.default_value(flag, EvaluationReason::ScheduleInactive);
            }
        }

        let mut active_overrides = overrides
            .iter()
            .filter(|o| o.flag_key == flag.key && o.is_active_at(self.now));

        if let Some(user_id) = &self.context.user_id {
            if let Some(user_override) = active_overrides.clone().find(|o| o.applies_to_user(user_id)) {
                return self.value(flag, user_override.value.clone(), EvaluationReason::UserOverride);
            }
        }

        if let Some(tenant_id) = &self.context.tenant_id {
            if let Some(tenant_override) = active_overrides.find(|o| o.applies_to_tenant(tenant_id)) {
                return self.value(
                    flag,
                    tenant_override.value.clone(),
                    EvaluationReason::TenantOverride,
                );
            }

            if targeting.disabled_tenants.contains(tenant_id) {
                return self.default_value(flag, EvaluationReason::DisabledTenant);
            }

            if targeting.enabled_tenants.contains(tenant_id) {
                return self.value(flag, FlagValue::Bool(true), EvaluationReason::EnabledTenant);
            }
        }

        if let Some(user_id) = &self.context.user_id {
            if targeting.enabled_users.contains(user_id) {
                return self.value(flag, FlagValue::Bool(true), EvaluationReason::EnabledUser);
            }
        }

        if let Some(result) = self.rollout(flag) {
            return result;
        }

        if flag.flag_type == FlagType::Schedule && targeting.schedule.is_some() {
            // the window check above already passed
            return self.value(flag, FlagValue::Bool(true), EvaluationReason::ScheduleActive);
        }

        self.default_value(flag, EvaluationReason::DefaultValue)
    }

    /// Percentage and variant bucketing. `None` means the identifier wasn't
    /// picked and evaluation carries on to the remaining rules.
    fn rollout(&self, flag: &FeatureFlag) -> Option<EvaluationResult> {
        let targeting = &flag.targeting;
        let identifier = self.hashed_identifier();
        let in_rollout = |percentage: f64| {
            is_in_rollout(identifier, &flag.salt, percentage, targeting.bucketing)
        };

        match flag.flag_type {
            FlagType::Variant if !targeting.variants.is_empty() => match targeting.percentage {
                // a partial rollout gates who gets a variant at all; 0 means
                // no rollout was declared
                Some(percentage) if percentage > 0.0 && percentage < 100.0 => {
                    in_rollout(percentage)
                        .then(|| self.pick_variant(flag, EvaluationReason::PercentageRollout))
                        .flatten()
                }
                _ => self.pick_variant(flag, EvaluationReason::VariantSelection),
            },
            FlagType::Variant
            | FlagType::Boolean
            | FlagType::Percentage
            | FlagType::TenantList
            | FlagType::UserList
            | FlagType::Schedule => targeting
                .percentage
                .filter(|percentage| *percentage > 0.0 && in_rollout(*percentage))
                .map(|_| {
                    self.value(flag, FlagValue::Bool(true), EvaluationReason::PercentageRollout)
                }),
        }
    }

    fn pick_variant(&self, flag: &FeatureFlag, reason: EvaluationReason) -> Option<EvaluationResult> {
        let targeting = &flag.targeting;
        match select_variant(
            self.hashed_identifier(),
            &flag.salt,
            &targeting.variants,
            targeting.bucketing,
        ) {
            Ok(Variant { key, .. }) => Some(self.value(flag, FlagValue::String(key.clone()), reason)),
            Err(e) => {
                // definitions are validated on write, so this is a flag that bypassed validation
                warn!(flag_key = %flag.key, error = %e, "Skipping variant selection for misconfigured flag");
                None
            }
        }
    }

    /// User id if present, else tenant id, else a fixed sentinel, so every
    /// context has a stable bucket.
    pub fn hashed_identifier(&self) -> &str {
        self.context
            .user_id
            .as_deref()
            .or(self.context.tenant_id.as_deref())
            .unwrap_or(ANONYMOUS_IDENTIFIER)
    }

    fn value(&self, flag: &FeatureFlag, value: FlagValue, reason: EvaluationReason) -> EvaluationResult {
        let variant = match flag.flag_type {
            FlagType::Variant => value.as_str().map(str::to_string),
            _ => None,
        };
        EvaluationResult::new(&flag.key, value, reason, variant, self.now)
    }

    fn default_value(&self, flag: &FeatureFlag, reason: EvaluationReason) -> EvaluationResult {
        self.value(flag, flag.default_value.clone(), reason)
    }
}

/// Evaluates `flag` for `context` at the current time.
pub fn evaluate(
    flag: &FeatureFlag,
    context: &EvaluationContext,
    overrides: &[FlagOverride],
) -> EvaluationResult {
    FeatureFlagMatcher::new(context, Utc::now()).evaluate(flag, overrides)
}
