use async_trait::async_trait;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::errors::FlagError;
use crate::flags::flag_models::{FeatureFlag, FlagOverride};

mod memory;

pub use memory::MemoryFlagStore;

/// Read side of the source of truth. The cache loads through this on a miss.
#[async_trait]
pub trait FlagRepository: Send + Sync {
    /// `Ok(None)` means the flag doesn't exist.
    async fn get_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>, FlagError>;

    async fn get_all_flags(&self) -> Result<Vec<FeatureFlag>, FlagError>;

    /// Unexpired overrides for `flag_key` that match the given tenant or user.
    /// For hosts that resolve overrides themselves; the cache fills its
    /// per-flag override entries from `get_overrides_for_flag` instead.
    async fn get_overrides_for_context(
        &self,
        flag_key: &str,
        tenant_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<FlagOverride>, FlagError>;

    /// Every override stored for `flag_key`, expired ones included.
    async fn get_overrides_for_flag(&self, flag_key: &str) -> Result<Vec<FlagOverride>, FlagError>;
}

/// Builds the audit entry for one orphaned override as it is removed.
pub type OrphanAudit<'a> = dyn Fn(&FlagOverride) -> AuditEntry + Send + Sync + 'a;

/// Write side. Each write carries its audit entry and must apply both or
/// neither.
#[async_trait]
pub trait FlagStore: FlagRepository {
    /// Fails with `FlagAlreadyExists` if the key is taken.
    async fn insert_flag(&self, flag: FeatureFlag, audit: AuditEntry) -> Result<(), FlagError>;

    /// Fails with `FlagNotFound` if there is nothing to replace.
    async fn replace_flag(&self, flag: FeatureFlag, audit: AuditEntry) -> Result<(), FlagError>;

    /// Returns the removed flag. Overrides are left in place.
    async fn remove_flag(&self, key: &str, audit: AuditEntry) -> Result<FeatureFlag, FlagError>;

    async fn get_override(&self, id: Uuid) -> Result<Option<FlagOverride>, FlagError>;

    async fn insert_override(
        &self,
        flag_override: FlagOverride,
        audit: AuditEntry,
    ) -> Result<(), FlagError>;

    async fn remove_override(&self, id: Uuid, audit: AuditEntry) -> Result<FlagOverride, FlagError>;

    /// Removes every override whose flag no longer exists, auditing each one.
    async fn remove_orphaned_overrides(
        &self,
        audit: &OrphanAudit<'_>,
    ) -> Result<Vec<FlagOverride>, FlagError>;

    /// Oldest first. `None` returns the history of every flag.
    async fn audit_log(&self, flag_key: Option<&str>) -> Result<Vec<AuditEntry>, FlagError>;
}
