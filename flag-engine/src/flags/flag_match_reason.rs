use serde::{Deserialize, Serialize};

/// Why an evaluation produced its value. Closed set; callers may branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    FlagDisabled,
    EnvironmentMismatch,
    ScheduleInactive,
    UserOverride,
    TenantOverride,
    DisabledTenant,
    EnabledTenant,
    EnabledUser,
    VariantSelection,
    PercentageRollout,
    ScheduleActive,
    DefaultValue,
    NotFound,
    Error,
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::FlagDisabled => "flag_disabled",
            EvaluationReason::EnvironmentMismatch => "environment_mismatch",
            EvaluationReason::ScheduleInactive => "schedule_inactive",
            EvaluationReason::UserOverride => "user_override",
            EvaluationReason::TenantOverride => "tenant_override",
            EvaluationReason::DisabledTenant => "disabled_tenant",
            EvaluationReason::EnabledTenant => "enabled_tenant",
            EvaluationReason::EnabledUser => "enabled_user",
            EvaluationReason::VariantSelection => "variant_selection",
            EvaluationReason::PercentageRollout => "percentage_rollout",
            EvaluationReason::ScheduleActive => "schedule_active",
            EvaluationReason::DefaultValue => "default_value",
            EvaluationReason::NotFound => "not_found",
            EvaluationReason::Error => "error",
        }
    }
}

impl std::fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
