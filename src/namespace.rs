//! Namespaces let several experiments share traffic without overlap: each experiment in a
//! namespace claims a disjoint sub-range of the namespace hash space.
use serde::Deserialize;

use crate::{
    hasher::{HashVersion, Hasher},
    ConfigurationError,
};

/// Mutual-exclusion group an experiment phase belongs to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    /// A disabled namespace admits every identifier.
    #[serde(default)]
    pub enabled: bool,
    /// Namespace id. Experiments sharing a namespace use the same id.
    #[serde(alias = "name", default)]
    pub id: String,
    /// Half-open sub-range `[lo, hi)` of `[0, 1)` claimed by the experiment.
    #[serde(default = "full_range")]
    pub range: (f64, f64),
}

fn full_range() -> (f64, f64) {
    (0.0, 1.0)
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace {
            enabled: false,
            id: String::new(),
            range: full_range(),
        }
    }
}

impl Namespace {
    /// Return `true` if `identifier` falls into the namespace range. Disabled namespace contains
    /// everything.
    pub fn contains(&self, identifier: &str, hasher: &impl Hasher) -> bool {
        if !self.enabled {
            return true;
        }
        let n = hasher.hash(&format!("__{}", self.id), identifier, HashVersion::V1);
        let (lo, hi) = self.range;
        lo <= n && n < hi
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        let (lo, hi) = self.range;
        if !self.enabled || (0.0 <= lo && lo <= hi && hi <= 1.0) {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidNamespaceRange(lo, hi))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::Namespace;
    use crate::hasher::{DeterministicHasher, Fnv32Hasher};

    fn namespace(lo: f64, hi: f64) -> Namespace {
        Namespace {
            enabled: true,
            id: "checkout".to_owned(),
            range: (lo, hi),
        }
    }

    #[test]
    fn disabled_contains_everything() {
        let ns = Namespace {
            enabled: false,
            ..namespace(0.0, 0.0)
        };
        assert!(ns.contains("anyone", &Fnv32Hasher));
    }

    #[test]
    fn pinned_membership() {
        // "__checkout" hashes: user_1 -> 0.148, user_2 -> 0.409, alice -> 0.993
        let ns = namespace(0.0, 0.4);
        assert!(ns.contains("user_1", &Fnv32Hasher));
        assert!(!ns.contains("user_2", &Fnv32Hasher));
        assert!(!ns.contains("alice", &Fnv32Hasher));
    }

    #[test]
    fn range_is_half_open() {
        let hasher = DeterministicHasher(HashMap::from([("edge".to_owned(), 0.4)]));
        assert!(!namespace(0.0, 0.4).contains("edge", &hasher));
        assert!(namespace(0.4, 1.0).contains("edge", &hasher));
    }

    #[test]
    fn disjoint_ranges_never_overlap() {
        let left = namespace(0.0, 0.4);
        let right = namespace(0.4, 1.0);
        let mut in_left = 0;
        for i in 0..10_000 {
            let id = format!("user_{i}");
            let a = left.contains(&id, &Fnv32Hasher);
            let b = right.contains(&id, &Fnv32Hasher);
            assert!(a != b, "{id} must be in exactly one range");
            if a {
                in_left += 1;
            }
        }
        assert_eq!(in_left, 3984);
    }

    #[test]
    fn parses_stored_shape() {
        let ns: Namespace =
            serde_json::from_str(r#"{"enabled": true, "name": "checkout", "range": [0, 0.5]}"#)
                .unwrap();
        assert_eq!(ns, namespace(0.0, 0.5));
        assert!(ns.validate().is_ok());
        assert!(namespace(0.5, 0.2).validate().is_err());
        assert!(namespace(0.0, 1.5).validate().is_err());
    }
}
