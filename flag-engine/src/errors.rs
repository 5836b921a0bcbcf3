use common_redis::CustomRedisError;
use thiserror::Error;

use crate::hashing::HashError;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("invalid flag key {0:?}: must match ^[a-z][a-z0-9._]+$")]
    InvalidFlagKey(String),
    #[error("flag {0} already exists")]
    FlagAlreadyExists(String),
    #[error("flag {0} not found")]
    FlagNotFound(String),
    #[error("flag {0} is archived")]
    FlagArchived(String),
    #[error("override {0} not found")]
    OverrideNotFound(String),
    #[error("override must be scoped to exactly one of tenant or user")]
    InvalidOverrideScope,
    #[error("invalid targeting: {0}")]
    InvalidTargeting(String),
    #[error(transparent)]
    InvalidVariants(#[from] HashError),
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    #[error("failed to serialize flag data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("far cache error: {0}")]
    FarCache(#[from] CustomRedisError),
}

impl FlagError {
    /// Errors caused by the caller's input, as opposed to infrastructure.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            FlagError::InvalidFlagKey(_)
                | FlagError::FlagAlreadyExists(_)
                | FlagError::FlagNotFound(_)
                | FlagError::FlagArchived(_)
                | FlagError::OverrideNotFound(_)
                | FlagError::InvalidOverrideScope
                | FlagError::InvalidTargeting(_)
                | FlagError::InvalidVariants(_)
                | FlagError::InvalidUpdate(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_distinguishable() {
        assert!(FlagError::InvalidFlagKey("Bad".to_string()).is_validation_error());
        assert!(FlagError::InvalidVariants(HashError::NoVariants).is_validation_error());
        assert!(!FlagError::Timeout("repository").is_validation_error());
        assert!(!FlagError::RepositoryUnavailable("down".to_string()).is_validation_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            FlagError::InvalidFlagKey("Checkout".to_string()).to_string(),
            "invalid flag key \"Checkout\": must match ^[a-z][a-z0-9._]+$"
        );
        assert_eq!(
            FlagError::Timeout("repository").to_string(),
            "timed out waiting for repository"
        );
    }
}
