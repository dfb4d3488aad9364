use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::{
    condition::Condition,
    hasher::HashVersion,
    namespace::Namespace,
    partition,
    targeting::{Prerequisite, SavedGroupTargeting},
    ConfigurationError,
};

#[allow(missing_docs)]
pub type Timestamp = DateTime<Utc>;

/// Snapshot of all experiment definitions. This is the response format of the configuration
/// endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    /// Experiments keyed by id.
    ///
    /// Value is wrapped in `TryParse` so that if we fail to parse one experiment, the rest are
    /// still usable.
    pub experiments: HashMap<String, TryParse<Experiment>>,

    /// Experiments rejected when this snapshot replaced the previous one.
    #[serde(skip)]
    rejected: HashMap<String, Rejection>,
}

/// A rejected experiment update and the last accepted definition it was checked against.
#[derive(Debug, Clone)]
struct Rejection {
    error: ConfigurationError,
    baseline: Experiment,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Lifecycle status. Only running experiments assign variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum ExperimentStatus {
    Draft,
    #[default]
    Running,
    Stopped,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Experiment {
    pub id: String,
    pub tracking_key: String,
    pub hash_attribute: String,
    #[serde(default)]
    pub hash_version: HashVersion,
    /// Incremented to invalidate sticky assignments recorded under earlier versions.
    #[serde(default)]
    pub bucket_version: u32,
    /// Sticky assignments recorded under older bucket versions are ignored.
    #[serde(default)]
    pub min_bucket_version: u32,
    /// Used for hashing when the hash attribute is absent.
    #[serde(default, deserialize_with = "non_empty_string")]
    pub fallback_attribute: Option<String>,
    #[serde(default)]
    pub disable_sticky_bucketing: bool,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub archived: bool,
    pub variations: Vec<Variation>,
    /// The last phase is the current one.
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub sequential_testing_enabled: bool,
    #[serde(default = "default_tuning_parameter")]
    pub sequential_testing_tuning_parameter: f64,
}

fn default_tuning_parameter() -> f64 {
    5000.0
}

fn non_empty_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variation {
    pub id: String,
    /// Stable short code recorded in sticky bucket documents.
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Feature value served to contexts assigned to this variation.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Phase {
    #[serde(default)]
    pub date_started: Option<Timestamp>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub saved_groups: Vec<SavedGroupTargeting>,
    #[serde(default)]
    pub namespace: Namespace,
    /// Hash seed. Falls back to the experiment tracking key when empty.
    #[serde(default)]
    pub seed: String,
    /// Fraction of matched traffic admitted into the phase.
    pub coverage: f64,
    /// Index-aligned with the experiment's variations.
    pub variation_weights: Vec<f64>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Experiment {
    /// Current phase and its index.
    pub fn current_phase(&self) -> Option<(usize, &Phase)> {
        self.phases.iter().enumerate().last()
    }

    pub(crate) fn seed<'a>(&'a self, phase: &'a Phase) -> &'a str {
        if phase.seed.is_empty() {
            &self.tracking_key
        } else {
            &phase.seed
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running && !self.archived
    }

    /// Check the current phase is evaluable.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let (_, phase) = self.current_phase().ok_or(ConfigurationError::NoPhases)?;

        if self.variations.is_empty() {
            return Err(ConfigurationError::NoVariations);
        }
        if phase.variation_weights.len() != self.variations.len() {
            return Err(ConfigurationError::WeightCountMismatch {
                weights: phase.variation_weights.len(),
                variations: self.variations.len(),
            });
        }

        let mut keys = HashSet::new();
        if let Some(duplicate) = self.variations.iter().find(|v| !keys.insert(&v.key)) {
            return Err(ConfigurationError::DuplicateVariationKey(
                duplicate.key.clone(),
            ));
        }

        partition::validate(&phase.variation_weights, phase.coverage)?;
        phase.namespace.validate()
    }

    /// Check that replacing `previous` with `self` does not reorder variations of a phase that
    /// is already running. Reordering is allowed when a new phase starts or the bucket version is
    /// bumped.
    pub fn check_update(&self, previous: &Experiment) -> Result<(), ConfigurationError> {
        let same_phase = self.phases.len() == previous.phases.len();
        let same_bucket_version = self.bucket_version == previous.bucket_version;
        if !(same_phase && same_bucket_version) {
            return Ok(());
        }

        let keys = self.variations.iter().map(|v| &v.key);
        let previous_keys = previous.variations.iter().map(|v| &v.key);
        // Appending variations keeps existing indexes stable.
        if keys.zip(previous_keys).any(|(a, b)| a != b) {
            return Err(ConfigurationError::VariationOrderChanged);
        }
        Ok(())
    }
}

impl ExperimentConfig {
    /// Look up an experiment by id. Experiments that failed to parse are reported as `Err`.
    pub fn get(&self, experiment_id: &str) -> Option<Result<&Experiment, &serde_json::Value>> {
        self.experiments
            .get(experiment_id)
            .map(|experiment| match experiment {
                TryParse::Parsed(experiment) => Ok(experiment),
                TryParse::ParseFailed(value) => Err(value),
            })
    }

    pub(crate) fn rejection(&self, experiment_id: &str) -> Option<&ConfigurationError> {
        self.rejected.get(experiment_id).map(|rejection| &rejection.error)
    }

    /// Compare against the snapshot being replaced and reject unsafe experiment updates.
    ///
    /// A rejected experiment stays rejected until its definition is compatible with the last
    /// accepted one again.
    pub(crate) fn reject_unsafe_updates(&mut self, previous: &ExperimentConfig) {
        for (id, experiment) in &self.experiments {
            let TryParse::Parsed(experiment) = experiment else {
                continue;
            };
            let baseline = match (previous.rejected.get(id), previous.get(id)) {
                (Some(rejection), _) => &rejection.baseline,
                (None, Some(Ok(old))) => old,
                _ => continue,
            };

            if let Err(error) = experiment.check_update(baseline) {
                log::warn!(target: "bucketing",
                           experiment_id:display = id;
                           "rejecting experiment update: {error}");
                self.rejected.insert(
                    id.clone(),
                    Rejection {
                        error,
                        baseline: baseline.clone(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::BufReader};

    use super::{Experiment, ExperimentConfig, ExperimentStatus, TryParse};
    use crate::{hasher::HashVersion, ConfigurationError};

    fn load() -> ExperimentConfig {
        let f = File::open("tests/data/experiments.json")
            .expect("Failed to open tests/data/experiments.json");
        serde_json::from_reader(BufReader::new(f)).unwrap()
    }

    fn parsed(config: &ExperimentConfig, id: &str) -> Experiment {
        config.get(id).unwrap().unwrap().clone()
    }

    #[test]
    fn parses_stored_experiment() {
        let config = load();
        let experiment = parsed(&config, "exp_dd4gxd4lyel8bwi");
        assert_eq!(experiment.tracking_key, "add-cart");
        assert_eq!(experiment.hash_version, HashVersion::V2);
        assert_eq!(experiment.fallback_attribute, None);
        assert_eq!(experiment.bucket_version, 1);
        assert_eq!(experiment.status, ExperimentStatus::Running);
        assert_eq!(experiment.sequential_testing_tuning_parameter, 5000.0);

        let (index, phase) = experiment.current_phase().unwrap();
        assert_eq!(index, 0);
        assert_eq!(phase.seed, "add-cart");
        assert_eq!(phase.variation_weights, vec![0.5, 0.5]);
        assert!(!phase.namespace.enabled);
        assert!(phase.date_started.is_some());
        assert!(experiment.validate().is_ok());
    }

    #[test]
    fn parse_partially_if_unexpected() {
        let config = load();
        assert!(matches!(
            config.experiments.get("exp_bad_hash_version").unwrap(),
            TryParse::ParseFailed(_)
        ));
        assert!(config.get("exp_bad_hash_version").unwrap().is_err());
        assert!(config.get("missing").is_none());
    }

    #[test]
    fn validation_errors() {
        let config = load();
        let mut experiment = parsed(&config, "exp_dd4gxd4lyel8bwi");

        experiment.phases[0].variation_weights = vec![1.0];
        assert_eq!(
            experiment.validate(),
            Err(ConfigurationError::WeightCountMismatch {
                weights: 1,
                variations: 2
            })
        );

        experiment.phases[0].variation_weights = vec![0.5, 0.5];
        experiment.variations[1].key = "0".to_owned();
        assert_eq!(
            experiment.validate(),
            Err(ConfigurationError::DuplicateVariationKey("0".to_owned()))
        );

        experiment.variations.clear();
        assert_eq!(experiment.validate(), Err(ConfigurationError::NoVariations));

        experiment.phases.clear();
        assert_eq!(experiment.validate(), Err(ConfigurationError::NoPhases));
    }

    #[test]
    fn reordering_variations_requires_bucket_version_bump() {
        let config = load();
        let previous = parsed(&config, "exp_dd4gxd4lyel8bwi");

        let mut reordered = previous.clone();
        reordered.variations.reverse();
        assert_eq!(
            reordered.check_update(&previous),
            Err(ConfigurationError::VariationOrderChanged)
        );

        let mut appended = previous.clone();
        let mut extra = previous.variations[1].clone();
        extra.key = "2".to_owned();
        appended.variations.push(extra);
        assert_eq!(appended.check_update(&previous), Ok(()));

        reordered.bucket_version += 1;
        assert_eq!(reordered.check_update(&previous), Ok(()));
    }

    #[test]
    fn unsafe_update_is_rejected_in_snapshot() {
        let previous = load();
        let mut next = load();
        if let Some(TryParse::Parsed(experiment)) = next.experiments.get_mut("exp_dd4gxd4lyel8bwi")
        {
            experiment.variations.reverse();
        }
        next.reject_unsafe_updates(&previous);
        assert_eq!(
            next.rejection("exp_dd4gxd4lyel8bwi"),
            Some(&ConfigurationError::VariationOrderChanged)
        );
        assert_eq!(next.rejection("exp_checkout_namespace"), None);

        // Restoring the original order clears the rejection.
        let mut fixed = load();
        fixed.reject_unsafe_updates(&next);
        assert_eq!(fixed.rejection("exp_dd4gxd4lyel8bwi"), None);
    }
}
