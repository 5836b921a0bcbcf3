use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::hashing::HashAlgorithm;

/// The shape of a flag. Evaluation matches on this exhaustively, so adding a
/// type forces every decision point to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Boolean,
    Percentage,
    #[serde(alias = "tenant-list")]
    TenantList,
    #[serde(alias = "user-list")]
    UserList,
    Schedule,
    Variant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    #[default]
    Active,
    Disabled,
    Archived,
}

impl FlagStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, FlagStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    String(String),
}

impl FlagValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Bool(value) => *value,
            FlagValue::String(value) => !value.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Bool(_) => None,
            FlagValue::String(value) => Some(value),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Variant {
    pub key: String,
    pub weight: u32,
}

impl Variant {
    pub fn new(key: impl Into<String>, weight: u32) -> Self {
        Self {
            key: key.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Schedule {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    // informational, start and end are absolute instants
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Schedule {
    /// Whether `now` falls inside `[start, end]`. A missing bound is open.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let started = self.start.map_or(true, |start| now >= start);
        let not_ended = self.end.map_or(true, |end| now <= end);
        started && not_ended
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Targeting {
    #[serde(default)]
    pub enabled_tenants: Vec<String>,
    #[serde(default)]
    pub disabled_tenants: Vec<String>,
    #[serde(default)]
    pub enabled_users: Vec<String>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    // declaration order is the bucketing order, never sort this
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub environments: Option<Vec<String>>,
    #[serde(default)]
    pub bucketing: HashAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeatureFlag {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    #[serde(default)]
    pub status: FlagStatus,
    pub default_value: FlagValue,
    #[serde(default)]
    pub targeting: Targeting,
    pub salt: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideScope {
    Tenant(String),
    User(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagOverride {
    pub id: Uuid,
    pub flag_key: String,
    pub scope: OverrideScope,
    pub value: FlagValue,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FlagOverride {
    /// An expired override is treated as absent, even while it is still stored.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    pub fn applies_to_user(&self, user_id: &str) -> bool {
        matches!(&self.scope, OverrideScope::User(id) if id == user_id)
    }

    pub fn applies_to_tenant(&self, tenant_id: &str) -> bool {
        matches!(&self.scope, OverrideScope::Tenant(id) if id == tenant_id)
    }
}

/// Who is asking. `attributes` is carried along for future targeting rules
/// and does not take part in evaluation yet.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }
}
