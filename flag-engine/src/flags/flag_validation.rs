use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::FlagError;
use crate::flags::flag_models::{FlagType, Targeting};
use crate::hashing::validate_variants;

static FLAG_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9._]+$").expect("hard-coded regular expression to be valid")
});

pub fn is_valid_key(key: &str) -> bool {
    FLAG_KEY_REGEX.is_match(key)
}

pub fn validate_key(key: &str) -> Result<(), FlagError> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(FlagError::InvalidFlagKey(key.to_string()))
    }
}

/// Rejects targeting the engine couldn't evaluate meaningfully.
pub fn validate_targeting(flag_type: FlagType, targeting: &Targeting) -> Result<(), FlagError> {
    if let Some(percentage) = targeting.percentage {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(FlagError::InvalidTargeting(format!(
                "percentage {percentage} is outside [0, 100]"
            )));
        }
    }

    if let Some(schedule) = &targeting.schedule {
        if let (Some(start), Some(end)) = (schedule.start, schedule.end) {
            if end < start {
                return Err(FlagError::InvalidTargeting(format!(
                    "schedule ends ({end}) before it starts ({start})"
                )));
            }
        }
    }

    match flag_type {
        FlagType::Variant => {
            validate_variants(&targeting.variants)?;
        }
        FlagType::Schedule if targeting.schedule.is_none() => {
            return Err(FlagError::InvalidTargeting(
                "schedule flags need a schedule".to_string(),
            ));
        }
        FlagType::Boolean
        | FlagType::Percentage
        | FlagType::TenantList
        | FlagType::UserList
        | FlagType::Schedule => {
            if !targeting.variants.is_empty() {
                validate_variants(&targeting.variants)?;
            }
        }
    }

    Ok(())
}
