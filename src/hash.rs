//! Deterministic bucketing.
//!
//! Hashes are FNV-1a (32 bit) over UTF-16 code units so that every SDK
//! speaking the same payload format puts a user in the same bucket.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Hash algorithm revision carried by rules and experiments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum HashVersion {
    /// `fnv(value + seed) % 1000 / 1000`
    #[default]
    V1,
    /// `fnv(str(fnv(seed + value))) % 10000 / 10000`
    V2,
}

impl TryFrom<u64> for HashVersion {
    type Error = ConfigError;

    fn try_from(version: u64) -> Result<Self, Self::Error> {
        match version {
            1 => Ok(HashVersion::V1),
            2 => Ok(HashVersion::V2),
            other => Err(ConfigError::UnsupportedHashVersion(other)),
        }
    }
}

impl From<HashVersion> for u64 {
    fn from(version: HashVersion) -> Self {
        match version {
            HashVersion::V1 => 1,
            HashVersion::V2 => 2,
        }
    }
}

/// FNV-1a over the UTF-16 code units of `parts` taken in order.
fn fnv1a32(parts: &[&str]) -> u32 {
    parts
        .iter()
        .flat_map(|part| part.encode_utf16())
        .fold(FNV_OFFSET, |hash, unit| {
            (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
        })
}

/// Map `(seed, value)` to a bucket in `[0, 1)`.
#[must_use]
pub fn hash(seed: &str, value: &str, version: HashVersion) -> f64 {
    match version {
        HashVersion::V1 => f64::from(fnv1a32(&[value, seed]) % 1000) / 1000.0,
        HashVersion::V2 => {
            let inner = fnv1a32(&[seed, value]).to_string();
            f64::from(fnv1a32(&[&inner]) % 10_000) / 10_000.0
        }
    }
}
