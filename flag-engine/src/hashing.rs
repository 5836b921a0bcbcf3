//! Consistent bucketing for rollouts and variant assignment.
//!
//! Every decision is a pure function of `(salt, identifier)`, so the same
//! user lands in the same bucket on every instance, after every restart.
//! The per-flag salt keeps rollout curves independent across flags.

use murmur3::murmur3_32;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use thiserror::Error;

use crate::flags::flag_models::Variant;

const BUCKETS: u64 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("no variants declared")]
    NoVariants,
    #[error("variant {0:?} has zero weight")]
    ZeroWeight(String),
    #[error("variant weights sum to zero")]
    ZeroTotalWeight,
}

/// Which hash family a flag buckets with. Murmur3 is the default; SHA-256 is
/// for flags where callers control identifiers and might try to steer
/// themselves into a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Murmur3,
    Sha256,
}

impl HashAlgorithm {
    fn hash(&self, input: &str) -> u64 {
        match self {
            HashAlgorithm::Murmur3 => u64::from(fast_hash(input)),
            HashAlgorithm::Sha256 => secure_hash(input),
        }
    }
}

fn fast_hash(input: &str) -> u32 {
    // reading from an in-memory cursor cannot fail
    murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0)
}

fn secure_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn rollout_input(identifier: &str, salt: &str) -> String {
    format!("{salt}:{identifier}")
}

fn variant_input(identifier: &str, salt: &str) -> String {
    format!("{salt}:variant:{identifier}")
}

/// Stable bucket in `[0, 100)` using the fast 32-bit hash.
pub fn bucket(identifier: &str, salt: &str) -> u32 {
    (u64::from(fast_hash(&rollout_input(identifier, salt))) % BUCKETS) as u32
}

/// Stable bucket in `[0, 100)` using SHA-256.
pub fn secure_bucket(identifier: &str, salt: &str) -> u32 {
    (secure_hash(&rollout_input(identifier, salt)) % BUCKETS) as u32
}

/// Whether `identifier` falls inside a `percentage` rollout.
///
/// A larger percentage always includes everyone a smaller one did, since the
/// bucket never changes and only the threshold moves.
pub fn is_in_rollout(
    identifier: &str,
    salt: &str,
    percentage: f64,
    algorithm: HashAlgorithm,
) -> bool {
    if percentage <= 0.0 {
        return false;
    }
    if percentage >= 100.0 {
        return true;
    }

    let bucket = match algorithm {
        HashAlgorithm::Murmur3 => bucket(identifier, salt),
        HashAlgorithm::Sha256 => secure_bucket(identifier, salt),
    };
    f64::from(bucket) < percentage
}

/// Checks a variant set is usable for selection.
pub fn validate_variants(variants: &[Variant]) -> Result<u64, HashError> {
    if variants.is_empty() {
        return Err(HashError::NoVariants);
    }
    if let Some(variant) = variants.iter().find(|v| v.weight == 0) {
        return Err(HashError::ZeroWeight(variant.key.clone()));
    }

    let total: u64 = variants.iter().map(|v| u64::from(v.weight)).sum();
    if total == 0 {
        return Err(HashError::ZeroTotalWeight);
    }
    Ok(total)
}

/// Picks one variant, weighted, walking the declared order.
///
/// The share of identifiers landing on each variant converges to
/// `weight / sum(weights)`.
pub fn select_variant<'a>(
    identifier: &str,
    salt: &str,
    variants: &'a [Variant],
    algorithm: HashAlgorithm,
) -> Result<&'a Variant, HashError> {
    let total = validate_variants(variants)?;

    if let [only] = variants {
        return Ok(only);
    }

    let target = algorithm.hash(&variant_input(identifier, salt)) % total;
    let mut cumulative = 0u64;
    for variant in variants {
        cumulative += u64::from(variant.weight);
        if target < cumulative {
            return Ok(variant);
        }
    }

    // target < total == final cumulative, so the loop always returns
    Err(HashError::ZeroTotalWeight)
}
