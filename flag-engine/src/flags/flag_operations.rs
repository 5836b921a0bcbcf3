use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::cache::FlagCache;
use crate::errors::FlagError;
use crate::flags::flag_models::{
    FeatureFlag, FlagOverride, FlagStatus, FlagType, FlagValue, OverrideScope, Targeting,
};
use crate::flags::flag_validation::{validate_key, validate_targeting};
use crate::metrics_consts::FLAG_MUTATIONS_COUNTER;
use crate::repository::FlagStore;

const SALT_LENGTH: usize = 16;

fn generate_salt() -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewFlag {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub default_value: FlagValue,
    #[serde(default)]
    pub targeting: Targeting,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Fields left as `None` keep their current value. Key, type and salt can't
/// be changed. Archiving goes through [`FlagManager::archive_flag`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlagUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<FlagStatus>,
    #[serde(default)]
    pub default_value: Option<FlagValue>,
    #[serde(default)]
    pub targeting: Option<Targeting>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl FlagUpdate {
    fn apply(self, flag: &mut FeatureFlag) -> Result<(), FlagError> {
        if self.status == Some(FlagStatus::Archived) {
            return Err(FlagError::InvalidUpdate(
                "archive the flag instead of setting its status".to_string(),
            ));
        }

        if let Some(name) = self.name {
            flag.name = name;
        }
        if let Some(description) = self.description {
            flag.description = Some(description);
        }
        if let Some(status) = self.status {
            flag.status = status;
        }
        if let Some(default_value) = self.default_value {
            flag.default_value = default_value;
        }
        if let Some(targeting) = self.targeting {
            flag.targeting = targeting;
        }
        if let Some(category) = self.category {
            flag.category = Some(category);
        }
        if let Some(metadata) = self.metadata {
            flag.metadata = metadata;
        }
        Ok(())
    }
}

/// Admin input for an override. Exactly one of `tenant_id` and `user_id`
/// must be set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NewOverride {
    pub flag_key: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub value: Option<FlagValue>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl NewOverride {
    fn scope(&self) -> Result<OverrideScope, FlagError> {
        match (&self.tenant_id, &self.user_id) {
            (Some(tenant), None) => Ok(OverrideScope::Tenant(tenant.clone())),
            (None, Some(user)) => Ok(OverrideScope::User(user.clone())),
            _ => Err(FlagError::InvalidOverrideScope),
        }
    }
}

/// Write path. Validates input, writes through the [`FlagStore`] together with
/// an audit entry, then refreshes the cache and notifies peers. A rejected or
/// failed write leaves both the store and the cache untouched.
pub struct FlagManager {
    store: Arc<dyn FlagStore>,
    cache: Arc<FlagCache>,
}

impl FlagManager {
    pub fn new(store: Arc<dyn FlagStore>, cache: Arc<FlagCache>) -> Self {
        Self { store, cache }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, FlagError>
    where
        F: Future<Output = Result<T, FlagError>>,
    {
        match tokio::time::timeout(self.cache.repository_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(FlagError::Timeout("repository")),
        }
    }

    /// Like `bounded`, for writes. A timed out write may still have landed
    /// in the store, so the affected cache entries are dropped before the
    /// error is returned. `None` means the write could touch any flag.
    async fn bounded_write<T, F>(&self, flag_key: Option<&str>, fut: F) -> Result<T, FlagError>
    where
        F: Future<Output = Result<T, FlagError>>,
    {
        let result = self.bounded(fut).await;
        if let Err(FlagError::Timeout(_)) = &result {
            warn!(flag_key = ?flag_key, "Store write timed out, invalidating in case it landed");
            match flag_key {
                Some(key) => self.cache.invalidate_flag(key).await,
                None => self.cache.invalidate_all().await,
            }
        }
        result
    }

    async fn current(&self, key: &str) -> Result<FeatureFlag, FlagError> {
        self.bounded(self.store.get_flag_by_key(key))
            .await?
            .ok_or_else(|| FlagError::FlagNotFound(key.to_string()))
    }

    async fn current_unarchived(&self, key: &str) -> Result<FeatureFlag, FlagError> {
        let flag = self.current(key).await?;
        if flag.status == FlagStatus::Archived {
            return Err(FlagError::FlagArchived(key.to_string()));
        }
        Ok(flag)
    }

    /// Stores `updated` in place of `previous` and refreshes caches.
    async fn replace(
        &self,
        previous: &FeatureFlag,
        mut updated: FeatureFlag,
        action: AuditAction,
        actor: &str,
        reason: Option<String>,
    ) -> Result<FeatureFlag, FlagError> {
        updated.updated_at = Utc::now();
        let audit = AuditEntry::new(&updated.key, action, actor)
            .with_previous(previous)?
            .with_new(&updated)?
            .with_reason(reason);

        self.bounded_write(
            Some(&updated.key),
            self.store.replace_flag(updated.clone(), audit),
        )
        .await?;
        self.cache.refresh_flag(&updated).await;
        record_mutation(action);
        Ok(updated)
    }

    #[instrument(skip_all, fields(flag_key = %input.key))]
    pub async fn create_flag(&self, input: NewFlag, actor: &str) -> Result<FeatureFlag, FlagError> {
        validate_key(&input.key)?;
        validate_targeting(input.flag_type, &input.targeting)?;

        let now = Utc::now();
        let flag = FeatureFlag {
            id: Uuid::now_v7(),
            key: input.key,
            name: input.name,
            description: input.description,
            flag_type: input.flag_type,
            status: FlagStatus::Active,
            default_value: input.default_value,
            targeting: input.targeting,
            salt: generate_salt(),
            category: input.category,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
            created_by: Some(actor.to_string()),
        };
        let audit = AuditEntry::new(&flag.key, AuditAction::Created, actor).with_new(&flag)?;

        self.bounded_write(Some(&flag.key), self.store.insert_flag(flag.clone(), audit))
            .await?;
        // also clears any "does not exist" entries peers are holding
        self.cache.refresh_flag(&flag).await;
        record_mutation(AuditAction::Created);
        info!(flag_key = %flag.key, actor, "Created flag");
        Ok(flag)
    }

    /// Returns the flag unchanged, without writing or auditing, when the
    /// update changes nothing.
    #[instrument(skip_all, fields(flag_key = %key))]
    pub async fn update_flag(
        &self,
        key: &str,
        update: FlagUpdate,
        actor: &str,
        reason: Option<String>,
    ) -> Result<FeatureFlag, FlagError> {
        let previous = self.current_unarchived(key).await?;

        let mut updated = previous.clone();
        update.apply(&mut updated)?;
        validate_targeting(updated.flag_type, &updated.targeting)?;

        if updated == previous {
            return Ok(previous);
        }
        self.replace(&previous, updated, AuditAction::Updated, actor, reason)
            .await
    }

    /// Immediately disables the flag everywhere. Already-disabled flags are
    /// left alone.
    #[instrument(skip_all, fields(flag_key = %key))]
    pub async fn kill_flag(
        &self,
        key: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<FeatureFlag, FlagError> {
        let previous = self.current_unarchived(key).await?;
        if previous.status == FlagStatus::Disabled {
            return Ok(previous);
        }

        let mut killed = previous.clone();
        killed.status = FlagStatus::Disabled;
        let killed = self
            .replace(&previous, killed, AuditAction::KillSwitch, actor, reason)
            .await?;
        info!(flag_key = %key, actor, "Kill switch engaged");
        Ok(killed)
    }

    /// Archiving is terminal: the flag evaluates to its default from now on
    /// and can't be updated, killed or archived again.
    #[instrument(skip_all, fields(flag_key = %key))]
    pub async fn archive_flag(
        &self,
        key: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<FeatureFlag, FlagError> {
        let previous = self.current_unarchived(key).await?;
        let mut archived = previous.clone();
        archived.status = FlagStatus::Archived;
        self.replace(&previous, archived, AuditAction::Archived, actor, reason)
            .await
    }

    /// Overrides for the flag stay behind; see
    /// [`FlagManager::remove_orphaned_overrides`].
    #[instrument(skip_all, fields(flag_key = %key))]
    pub async fn delete_flag(
        &self,
        key: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<FeatureFlag, FlagError> {
        let previous = self.current(key).await?;
        let audit = AuditEntry::new(key, AuditAction::Deleted, actor)
            .with_previous(&previous)?
            .with_reason(reason);

        let removed = self
            .bounded_write(Some(key), self.store.remove_flag(key, audit))
            .await?;
        self.cache.invalidate_flag(key).await;
        record_mutation(AuditAction::Deleted);
        info!(flag_key = %key, actor, "Deleted flag");
        Ok(removed)
    }

    #[instrument(skip_all, fields(flag_key = %input.flag_key))]
    pub async fn add_override(
        &self,
        input: NewOverride,
        actor: &str,
    ) -> Result<FlagOverride, FlagError> {
        let scope = input.scope()?;
        let value = input.value.ok_or_else(|| {
            FlagError::InvalidUpdate("override needs a value".to_string())
        })?;
        self.current(&input.flag_key).await?;

        let flag_override = FlagOverride {
            id: Uuid::now_v7(),
            flag_key: input.flag_key,
            scope,
            value,
            expires_at: input.expires_at,
            reason: input.reason.clone(),
            created_by: Some(actor.to_string()),
            created_at: Utc::now(),
        };
        let audit = AuditEntry::new(&flag_override.flag_key, AuditAction::OverrideAdded, actor)
            .with_new(&flag_override)?
            .with_reason(input.reason);

        self.bounded_write(
            Some(&flag_override.flag_key),
            self.store.insert_override(flag_override.clone(), audit),
        )
        .await?;
        self.cache.invalidate_flag(&flag_override.flag_key).await;
        record_mutation(AuditAction::OverrideAdded);
        Ok(flag_override)
    }

    #[instrument(skip_all, fields(override_id = %id))]
    pub async fn remove_override(
        &self,
        id: Uuid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<FlagOverride, FlagError> {
        let existing = self
            .bounded(self.store.get_override(id))
            .await?
            .ok_or_else(|| FlagError::OverrideNotFound(id.to_string()))?;
        let audit = AuditEntry::new(&existing.flag_key, AuditAction::OverrideRemoved, actor)
            .with_previous(&existing)?
            .with_reason(reason);

        let removed = self
            .bounded_write(Some(&existing.flag_key), self.store.remove_override(id, audit))
            .await?;
        self.cache.invalidate_flag(&removed.flag_key).await;
        record_mutation(AuditAction::OverrideRemoved);
        Ok(removed)
    }

    /// Removes overrides whose flag has been deleted. Each removal is audited.
    #[instrument(skip_all)]
    pub async fn remove_orphaned_overrides(
        &self,
        actor: &str,
    ) -> Result<Vec<FlagOverride>, FlagError> {
        let audit = |orphan: &FlagOverride| AuditEntry {
            previous_value: serde_json::to_value(orphan).ok(),
            ..AuditEntry::new(&orphan.flag_key, AuditAction::OverrideRemoved, actor)
                .with_reason(Some("flag no longer exists".to_string()))
        };

        let removed = self
            .bounded_write(None, self.store.remove_orphaned_overrides(&audit))
            .await?;

        let flag_keys: BTreeSet<&str> = removed.iter().map(|o| o.flag_key.as_str()).collect();
        for flag_key in flag_keys {
            self.cache.invalidate_flag(flag_key).await;
        }
        for _ in &removed {
            record_mutation(AuditAction::OverrideRemoved);
        }
        if !removed.is_empty() {
            info!(count = removed.len(), actor, "Removed orphaned overrides");
        }
        Ok(removed)
    }

    /// Oldest first. `None` returns every flag's history.
    pub async fn audit_log(&self, flag_key: Option<&str>) -> Result<Vec<AuditEntry>, FlagError> {
        self.bounded(self.store.audit_log(flag_key)).await
    }
}

fn record_mutation(action: AuditAction) {
    metrics::counter!(FLAG_MUTATIONS_COUNTER, "action" => action.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::flag_models::Variant;
    use crate::hashing::HashError;
    use crate::repository::{FlagRepository, MemoryFlagStore};
    use crate::cache::CacheSource;
    use crate::test_utils::{setup_flag_cache, test_cache_settings};
    use std::time::Duration;

    fn new_flag(key: &str) -> NewFlag {
        NewFlag {
            key: key.to_string(),
            name: key.to_string(),
            description: None,
            flag_type: FlagType::Boolean,
            default_value: FlagValue::Bool(false),
            targeting: Targeting::default(),
            category: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn setup() -> (Arc<MemoryFlagStore>, FlagManager) {
        let store = Arc::new(MemoryFlagStore::new());
        let cache = setup_flag_cache(&store, None);
        (store.clone(), FlagManager::new(store, cache))
    }

    async fn actions(manager: &FlagManager, key: &str) -> Vec<AuditAction> {
        manager
            .audit_log(Some(key))
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }

    #[tokio::test]
    async fn test_create_flag() {
        let (store, manager) = setup();
        let flag = manager
            .create_flag(new_flag("checkout.new_flow"), "alice")
            .await
            .unwrap();

        assert_eq!(flag.status, FlagStatus::Active);
        assert_eq!(flag.salt.len(), SALT_LENGTH);
        assert_eq!(flag.created_by.as_deref(), Some("alice"));
        assert_eq!(
            store.get_flag_by_key("checkout.new_flow").await.unwrap(),
            Some(flag.clone())
        );

        let log = manager.audit_log(Some("checkout.new_flow")).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::Created);
        assert_eq!(log[0].actor, "alice");
        assert!(log[0].previous_value.is_none());
        assert_eq!(log[0].new_value, Some(serde_json::to_value(&flag).unwrap()));
    }

    #[tokio::test]
    async fn test_salts_are_unique() {
        let (_store, manager) = setup();
        let a = manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();
        let b = manager.create_flag(new_flag("b.flag"), "alice").await.unwrap();
        assert_ne!(a.salt, b.salt);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input_without_writing() {
        let (store, manager) = setup();

        let err = manager.create_flag(new_flag("Bad-Key"), "alice").await.unwrap_err();
        assert!(matches!(err, FlagError::InvalidFlagKey(_)));

        let mut variant = new_flag("pricing.experiment");
        variant.flag_type = FlagType::Variant;
        let err = manager.create_flag(variant.clone(), "alice").await.unwrap_err();
        assert!(matches!(err, FlagError::InvalidVariants(HashError::NoVariants)));

        variant.targeting.variants = vec![Variant::new("a", 0)];
        let err = manager.create_flag(variant, "alice").await.unwrap_err();
        assert!(matches!(err, FlagError::InvalidVariants(HashError::ZeroWeight(_))));

        let mut rollout = new_flag("rollout.flag");
        rollout.targeting.percentage = Some(101.0);
        let err = manager.create_flag(rollout, "alice").await.unwrap_err();
        assert!(matches!(err, FlagError::InvalidTargeting(_)));

        assert!(store.get_all_flags().await.unwrap().is_empty());
        assert!(manager.audit_log(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_rejected() {
        let (_store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();
        let err = manager.create_flag(new_flag("a.flag"), "bob").await.unwrap_err();

        assert!(matches!(err, FlagError::FlagAlreadyExists(_)));
        assert_eq!(actions(&manager, "a.flag").await, vec![AuditAction::Created]);
    }

    #[tokio::test]
    async fn test_update_records_before_and_after() {
        let (_store, manager) = setup();
        let created = manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();

        let update = FlagUpdate {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        let updated = manager
            .update_flag("a.flag", update, "bob", Some("clarify".to_string()))
            .await
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.salt, created.salt);
        assert!(updated.updated_at >= created.updated_at);

        let log = manager.audit_log(Some("a.flag")).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].action, AuditAction::Updated);
        assert_eq!(log[1].previous_value.as_ref().unwrap()["name"], "a.flag");
        assert_eq!(log[1].new_value.as_ref().unwrap()["name"], "Renamed");
        assert_eq!(log[1].reason.as_deref(), Some("clarify"));
    }

    #[tokio::test]
    async fn test_noop_update_is_not_audited() {
        let (_store, manager) = setup();
        let created = manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();

        let unchanged = manager
            .update_flag(
                "a.flag",
                FlagUpdate {
                    name: Some("a.flag".to_string()),
                    ..Default::default()
                },
                "bob",
                None,
            )
            .await
            .unwrap();

        assert_eq!(unchanged, created);
        assert_eq!(actions(&manager, "a.flag").await, vec![AuditAction::Created]);
    }

    #[tokio::test]
    async fn test_update_cannot_archive() {
        let (_store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();
        let update = FlagUpdate {
            status: Some(FlagStatus::Archived),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_flag("a.flag", update, "bob", None).await,
            Err(FlagError::InvalidUpdate(_))
        ));
    }

    #[tokio::test]
    async fn test_kill_and_reenable() {
        let (_store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();

        let killed = manager
            .kill_flag("a.flag", "oncall", Some("incident".to_string()))
            .await
            .unwrap();
        assert_eq!(killed.status, FlagStatus::Disabled);

        // a second kill changes nothing
        manager.kill_flag("a.flag", "oncall", None).await.unwrap();

        let update = FlagUpdate {
            status: Some(FlagStatus::Active),
            ..Default::default()
        };
        let revived = manager.update_flag("a.flag", update, "oncall", None).await.unwrap();
        assert_eq!(revived.status, FlagStatus::Active);

        assert_eq!(
            actions(&manager, "a.flag").await,
            vec![AuditAction::Created, AuditAction::KillSwitch, AuditAction::Updated]
        );
    }

    #[tokio::test]
    async fn test_archived_is_terminal() {
        let (_store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();
        manager.archive_flag("a.flag", "alice", None).await.unwrap();

        assert!(matches!(
            manager.archive_flag("a.flag", "alice", None).await,
            Err(FlagError::FlagArchived(_))
        ));
        assert!(matches!(
            manager.kill_flag("a.flag", "alice", None).await,
            Err(FlagError::FlagArchived(_))
        ));
        assert!(matches!(
            manager
                .update_flag("a.flag", FlagUpdate::default(), "alice", None)
                .await,
            Err(FlagError::FlagArchived(_))
        ));
        assert_eq!(
            actions(&manager, "a.flag").await,
            vec![AuditAction::Created, AuditAction::Archived]
        );
    }

    #[tokio::test]
    async fn test_missing_flag_operations() {
        let (_store, manager) = setup();
        assert!(matches!(
            manager.kill_flag("ghost", "alice", None).await,
            Err(FlagError::FlagNotFound(_))
        ));
        assert!(matches!(
            manager.delete_flag("ghost", "alice", None).await,
            Err(FlagError::FlagNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_override_scope_validation() {
        let (_store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();

        let both = NewOverride {
            flag_key: "a.flag".to_string(),
            tenant_id: Some("acme".to_string()),
            user_id: Some("u1".to_string()),
            value: Some(true.into()),
            ..Default::default()
        };
        assert!(matches!(
            manager.add_override(both, "alice").await,
            Err(FlagError::InvalidOverrideScope)
        ));

        let neither = NewOverride {
            flag_key: "a.flag".to_string(),
            value: Some(true.into()),
            ..Default::default()
        };
        assert!(matches!(
            manager.add_override(neither, "alice").await,
            Err(FlagError::InvalidOverrideScope)
        ));

        let unknown = NewOverride {
            flag_key: "ghost".to_string(),
            user_id: Some("u1".to_string()),
            value: Some(true.into()),
            ..Default::default()
        };
        assert!(matches!(
            manager.add_override(unknown, "alice").await,
            Err(FlagError::FlagNotFound(_))
        ));

        assert_eq!(actions(&manager, "a.flag").await, vec![AuditAction::Created]);
    }

    #[tokio::test]
    async fn test_override_lifecycle() {
        let (store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();

        let added = manager
            .add_override(
                NewOverride {
                    flag_key: "a.flag".to_string(),
                    user_id: Some("u1".to_string()),
                    value: Some(true.into()),
                    reason: Some("beta tester".to_string()),
                    ..Default::default()
                },
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(added.scope, OverrideScope::User("u1".to_string()));
        assert_eq!(store.get_overrides_for_flag("a.flag").await.unwrap().len(), 1);

        manager.remove_override(added.id, "alice", None).await.unwrap();
        assert!(store.get_overrides_for_flag("a.flag").await.unwrap().is_empty());
        assert!(matches!(
            manager.remove_override(added.id, "alice", None).await,
            Err(FlagError::OverrideNotFound(_))
        ));

        assert_eq!(
            actions(&manager, "a.flag").await,
            vec![
                AuditAction::Created,
                AuditAction::OverrideAdded,
                AuditAction::OverrideRemoved
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_then_remove_orphans() {
        let (store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();
        manager.create_flag(new_flag("b.flag"), "alice").await.unwrap();
        for key in ["a.flag", "b.flag"] {
            manager
                .add_override(
                    NewOverride {
                        flag_key: key.to_string(),
                        tenant_id: Some("acme".to_string()),
                        value: Some(true.into()),
                        ..Default::default()
                    },
                    "alice",
                )
                .await
                .unwrap();
        }

        manager.delete_flag("a.flag", "alice", None).await.unwrap();
        assert_eq!(store.get_overrides_for_flag("a.flag").await.unwrap().len(), 1);

        let removed = manager.remove_orphaned_overrides("janitor").await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].flag_key, "a.flag");
        assert_eq!(store.get_overrides_for_flag("b.flag").await.unwrap().len(), 1);

        let log = manager.audit_log(Some("a.flag")).await.unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.action, AuditAction::OverrideRemoved);
        assert_eq!(last.actor, "janitor");
        assert!(last.previous_value.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_leaves_cache_untouched() {
        let (store, manager) = setup();
        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();
        store.set_unavailable(true);

        assert!(matches!(
            manager.kill_flag("a.flag", "oncall", None).await,
            Err(FlagError::RepositoryUnavailable(_))
        ));

        store.set_unavailable(false);
        assert_eq!(actions(&manager, "a.flag").await, vec![AuditAction::Created]);
    }

    #[tokio::test]
    async fn test_timed_out_write_invalidates_cache() {
        let store = Arc::new(MemoryFlagStore::new());
        let mut settings = test_cache_settings();
        settings.repository_timeout = Duration::from_millis(50);
        let cache = Arc::new(FlagCache::new(settings, store.clone(), None));
        let manager = FlagManager::new(store.clone(), cache.clone());

        manager.create_flag(new_flag("a.flag"), "alice").await.unwrap();
        let warm = cache.get_flag("a.flag").await.unwrap();
        assert_eq!(warm.source, CacheSource::NearCache);

        // the kill lands, but the store answers too late
        store.set_ack_latency(Duration::from_millis(200));
        assert!(matches!(
            manager.kill_flag("a.flag", "oncall", None).await,
            Err(FlagError::Timeout(_))
        ));
        store.set_ack_latency(Duration::ZERO);

        let reloaded = cache.get_flag("a.flag").await.unwrap();
        assert_eq!(reloaded.source, CacheSource::LoaderCacheMiss);
        assert_eq!(
            reloaded.value.map(|flag| flag.status),
            Some(FlagStatus::Disabled)
        );
    }
}
