use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Archived,
    Deleted,
    OverrideAdded,
    OverrideRemoved,
    KillSwitch,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Archived => "archived",
            AuditAction::Deleted => "deleted",
            AuditAction::OverrideAdded => "override_added",
            AuditAction::OverrideRemoved => "override_removed",
            AuditAction::KillSwitch => "kill_switch",
        }
    }
}

/// One recorded mutation. Snapshots are the serialized flag or override
/// before and after the change; either side is absent for creates and deletes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub flag_key: String,
    pub action: AuditAction,
    #[serde(default)]
    pub previous_value: Option<serde_json::Value>,
    #[serde(default)]
    pub new_value: Option<serde_json::Value>,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(flag_key: impl Into<String>, action: AuditAction, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            flag_key: flag_key.into(),
            action,
            previous_value: None,
            new_value: None,
            actor: actor.into(),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_previous<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.previous_value = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn with_new<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.new_value = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}
