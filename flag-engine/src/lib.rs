pub mod audit;
pub mod cache;
pub mod config;
pub mod errors;
pub mod flags;
pub mod hashing;
pub mod metrics_consts;
pub mod repository;

// Shared with the integration tests under tests/, so it can't be cfg(test)
pub mod test_utils;

pub use cache::{CacheSettings, FlagCache};
pub use config::Config;
pub use errors::FlagError;
pub use flags::flag_matching::EvaluationResult;
pub use flags::flag_models::{EvaluationContext, FeatureFlag, FlagOverride};
pub use flags::flag_operations::FlagManager;
pub use flags::flag_service::FlagService;
