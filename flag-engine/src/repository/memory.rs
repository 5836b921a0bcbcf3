use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{FlagRepository, FlagStore, OrphanAudit};
use crate::audit::AuditEntry;
use crate::errors::FlagError;
use crate::flags::flag_models::{FeatureFlag, FlagOverride};

#[derive(Default)]
struct State {
    flags: BTreeMap<String, FeatureFlag>,
    overrides: Vec<FlagOverride>,
    audit: Vec<AuditEntry>,
}

/// Process-local store. Flags, overrides and the audit log sit behind one
/// lock, so a mutation and its audit entry become visible together.
///
/// `set_unavailable` and `set_latency` let tests play a failing or slow
/// database. `set_ack_latency` delays the reply to a write that has already
/// been applied, like a commit whose acknowledgement is lost in a slow
/// network.
#[derive(Default)]
pub struct MemoryFlagStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    ack_latency_ms: AtomicU64,
    flag_reads: AtomicU64,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ack_latency(&self, latency: Duration) {
        self.ack_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// How many single-flag or full-list reads reached the store.
    pub fn flag_reads(&self) -> u64 {
        self.flag_reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn ready(&self) -> Result<(), FlagError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FlagError::RepositoryUnavailable(
                "store is unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies one write under the lock, then waits out the ack latency.
    async fn commit<T>(
        &self,
        write: impl FnOnce(&mut State) -> Result<T, FlagError>,
    ) -> Result<T, FlagError> {
        self.ready().await?;
        let result = write(&mut self.lock());
        let latency = self.ack_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        result
    }
}

#[async_trait]
impl FlagRepository for MemoryFlagStore {
    async fn get_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>, FlagError> {
        self.flag_reads.fetch_add(1, Ordering::SeqCst);
        self.ready().await?;
        Ok(self.lock().flags.get(key).cloned())
    }

    async fn get_all_flags(&self) -> Result<Vec<FeatureFlag>, FlagError> {
        self.flag_reads.fetch_add(1, Ordering::SeqCst);
        self.ready().await?;
        Ok(self.lock().flags.values().cloned().collect())
    }

    async fn get_overrides_for_context(
        &self,
        flag_key: &str,
        tenant_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<FlagOverride>, FlagError> {
        self.ready().await?;
        let now = Utc::now();
        Ok(self
            .lock()
            .overrides
            .iter()
            .filter(|o| o.flag_key == flag_key && o.is_active_at(now))
            .filter(|o| {
                user_id.is_some_and(|user| o.applies_to_user(user))
                    || tenant_id.is_some_and(|tenant| o.applies_to_tenant(tenant))
            })
            .cloned()
            .collect())
    }

    async fn get_overrides_for_flag(&self, flag_key: &str) -> Result<Vec<FlagOverride>, FlagError> {
        self.ready().await?;
        Ok(self
            .lock()
            .overrides
            .iter()
            .filter(|o| o.flag_key == flag_key)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn insert_flag(&self, flag: FeatureFlag, audit: AuditEntry) -> Result<(), FlagError> {
        self.commit(|state| {
            if state.flags.contains_key(&flag.key) {
                return Err(FlagError::FlagAlreadyExists(flag.key));
            }
            state.flags.insert(flag.key.clone(), flag);
            state.audit.push(audit);
            Ok(())
        })
        .await
    }

    async fn replace_flag(&self, flag: FeatureFlag, audit: AuditEntry) -> Result<(), FlagError> {
        self.commit(|state| {
            match state.flags.get_mut(&flag.key) {
                Some(existing) => *existing = flag,
                None => return Err(FlagError::FlagNotFound(flag.key)),
            }
            state.audit.push(audit);
            Ok(())
        })
        .await
    }

    async fn remove_flag(&self, key: &str, audit: AuditEntry) -> Result<FeatureFlag, FlagError> {
        self.commit(|state| {
            let removed = state
                .flags
                .remove(key)
                .ok_or_else(|| FlagError::FlagNotFound(key.to_string()))?;
            state.audit.push(audit);
            Ok(removed)
        })
        .await
    }

    async fn get_override(&self, id: Uuid) -> Result<Option<FlagOverride>, FlagError> {
        self.ready().await?;
        Ok(self.lock().overrides.iter().find(|o| o.id == id).cloned())
    }

    async fn insert_override(
        &self,
        flag_override: FlagOverride,
        audit: AuditEntry,
    ) -> Result<(), FlagError> {
        self.commit(|state| {
            if !state.flags.contains_key(&flag_override.flag_key) {
                return Err(FlagError::FlagNotFound(flag_override.flag_key));
            }
            state.overrides.push(flag_override);
            state.audit.push(audit);
            Ok(())
        })
        .await
    }

    async fn remove_override(&self, id: Uuid, audit: AuditEntry) -> Result<FlagOverride, FlagError> {
        self.commit(|state| {
            let position = state
                .overrides
                .iter()
                .position(|o| o.id == id)
                .ok_or_else(|| FlagError::OverrideNotFound(id.to_string()))?;
            let removed = state.overrides.remove(position);
            state.audit.push(audit);
            Ok(removed)
        })
        .await
    }

    async fn remove_orphaned_overrides(
        &self,
        audit: &OrphanAudit<'_>,
    ) -> Result<Vec<FlagOverride>, FlagError> {
        self.commit(|state| {
            let (orphaned, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.overrides)
                .into_iter()
                .partition(|o| !state.flags.contains_key(&o.flag_key));
            state.overrides = kept;
            state.audit.extend(orphaned.iter().map(audit));
            Ok(orphaned)
        })
        .await
    }

    async fn audit_log(&self, flag_key: Option<&str>) -> Result<Vec<AuditEntry>, FlagError> {
        self.ready().await?;
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|entry| flag_key.map_or(true, |key| entry.flag_key == key))
            .cloned()
            .collect())
    }
}
