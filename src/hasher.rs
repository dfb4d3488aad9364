//! Deterministic hashing of identifiers into `[0, 1)`.
//!
//! Every client must compute exactly the same value for the same inputs, so the algorithm is
//! pinned here: 32-bit FNV-1a over UTF-16 code units (offset basis `0x811c9dc5`, prime
//! `0x01000193`).
//!
//! - Version 1: `fnv(value + seed) % 1000 / 1000`.
//! - Version 2: `fnv(decimal(fnv(seed + "_" + value))) % 10000 / 10000`. The second pass over the
//!   decimal digest fixes the skew version 1 shows for short sequential identifiers.
//!
//! Experiments created under version 1 keep using it forever.
use serde::{Deserialize, Serialize};

/// Hash algorithm generation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HashVersion {
    /// Original single-pass hash with 1000 buckets.
    #[default]
    V1,
    /// Double-pass hash with 10000 buckets.
    V2,
}

impl TryFrom<u8> for HashVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HashVersion::V1),
            2 => Ok(HashVersion::V2),
            other => Err(format!("unsupported hash version {other}")),
        }
    }
}

impl From<HashVersion> for u8 {
    fn from(value: HashVersion) -> u8 {
        match value {
            HashVersion::V1 => 1,
            HashVersion::V2 => 2,
        }
    }
}

/// Deterministic mapping of identifiers to the unit interval.
pub trait Hasher {
    /// Map `seed` and `value` to a float in `[0, 1)`.
    fn hash(&self, seed: &str, value: &str, version: HashVersion) -> f64;
}

/// The default (and only) hasher.
pub struct Fnv32Hasher;

impl Hasher for Fnv32Hasher {
    fn hash(&self, seed: &str, value: &str, version: HashVersion) -> f64 {
        match version {
            HashVersion::V1 => {
                let n = fnv32a(&format!("{value}{seed}"));
                f64::from(n % 1000) / 1000.0
            }
            HashVersion::V2 => {
                let first = fnv32a(&format!("{seed}_{value}"));
                let n = fnv32a(&first.to_string());
                f64::from(n % 10_000) / 10_000.0
            }
        }
    }
}

fn fnv32a(input: &str) -> u32 {
    input.encode_utf16().fold(0x811c_9dc5_u32, |hash, unit| {
        (hash ^ u32::from(unit)).wrapping_mul(0x0100_0193)
    })
}

#[cfg(test)]
pub struct DeterministicHasher(pub std::collections::HashMap<String, f64>);

#[cfg(test)]
impl Hasher for DeterministicHasher {
    fn hash(&self, _seed: &str, value: &str, _version: HashVersion) -> f64 {
        self.0.get(value).copied().unwrap_or(0.0)
    }
}
