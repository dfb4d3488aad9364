use std::collections::HashMap;

use serde::Serialize;

use crate::{
    attributes::get_path,
    experiment::{Experiment, ExperimentConfig, Timestamp},
    hasher::Hasher,
    partition,
    sticky::{Identity, Resolution, StickyBucketDocument, StickyBucketResolver, StickyBucketStore},
    targeting::{in_saved_groups, prerequisites_satisfied, FlagResolver, SavedGroups},
    Attributes, Error, Result,
};

/// Evaluation context: attributes describing the user or request, plus optional sticky bucket
/// documents that were loaded ahead of time.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Attributes the experiment is hashed and targeted on.
    pub attributes: Attributes,
    sticky_bucket_documents: HashMap<(String, String), StickyBucketDocument>,
}

impl Context {
    /// Create a context from attributes.
    pub fn new(attributes: Attributes) -> Self {
        Context {
            attributes,
            sticky_bucket_documents: HashMap::new(),
        }
    }

    /// Attach preloaded sticky bucket documents. They are consulted before the sticky bucket
    /// store.
    pub fn with_sticky_bucket_documents(
        mut self,
        documents: impl IntoIterator<Item = StickyBucketDocument>,
    ) -> Self {
        self.sticky_bucket_documents.extend(documents.into_iter().map(|doc| {
            (
                (doc.attribute_name.clone(), doc.attribute_value.clone()),
                doc,
            )
        }));
        self
    }

    /// Preloaded document for the given attribute pair, if any.
    pub fn sticky_bucket_document(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Option<&StickyBucketDocument> {
        self.sticky_bucket_documents
            .get(&(attribute_name.to_owned(), attribute_value.to_owned()))
    }
}

impl From<Attributes> for Context {
    fn from(attributes: Attributes) -> Self {
        Context::new(attributes)
    }
}

/// External collaborators consulted during evaluation.
#[derive(Clone, Copy)]
pub struct Collaborators<'c> {
    /// Storage for sticky bucket documents.
    pub sticky_bucket_store: &'c dyn StickyBucketStore,
    /// Resolves prerequisite flags.
    pub flag_resolver: &'c dyn FlagResolver,
    /// Answers saved group membership.
    pub saved_groups: &'c dyn SavedGroups,
}

/// Where the assigned variation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssignmentSource {
    /// Computed from the hash and the current weights.
    Fresh,
    /// Recorded earlier in a sticky bucket document.
    Sticky,
}

/// Why a context was evaluated but not included in the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExclusionReason {
    /// Experiment is not running or is archived.
    NotRunning,
    /// Current phase has a start date in the future.
    PhaseNotStarted,
    /// Neither the hash attribute nor the fallback attribute is usable.
    MissingHashAttribute,
    /// Identifier falls outside the experiment's namespace range.
    NotInNamespace,
    /// Targeting condition did not match.
    FailedCondition,
    /// A prerequisite flag is unresolved or does not satisfy its condition.
    FailedPrerequisite,
    /// Saved group targeting did not pass.
    NotInSavedGroups,
    /// Hash fell outside of coverage or into the weights' dead zone.
    NotCovered,
}

/// Result of evaluating one experiment for one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Experiment id.
    pub experiment_id: String,
    /// Index of the phase used for evaluation.
    pub phase_index: usize,
    /// Index of the assigned variation. `None` when not in the experiment.
    pub variation_index: Option<usize>,
    /// Key of the assigned variation.
    pub variation_key: Option<String>,
    /// Feature value of the assigned variation.
    pub value: Option<serde_json::Value>,
    /// Fresh or sticky. `None` when not in the experiment.
    pub source: Option<AssignmentSource>,
    /// Hash value of the identifier under the phase seed, if it was computed.
    pub bucket: Option<f64>,
    /// `true` if the context is included in the experiment.
    pub in_experiment: bool,
    /// Attribute the identifier was taken from (hash attribute or fallback attribute).
    pub hash_attribute: Option<String>,
    /// Identifier the experiment was hashed on.
    pub hash_value: Option<String>,
    /// Why the context is not in the experiment.
    pub exclusion: Option<ExclusionReason>,
}

impl Assignment {
    fn new(experiment: &Experiment, phase_index: usize) -> Self {
        Assignment {
            experiment_id: experiment.id.clone(),
            phase_index,
            variation_index: None,
            variation_key: None,
            value: None,
            source: None,
            bucket: None,
            in_experiment: false,
            hash_attribute: None,
            hash_value: None,
            exclusion: None,
        }
    }

    fn excluded(mut self, reason: ExclusionReason) -> Self {
        self.exclusion = Some(reason);
        self
    }
}

impl ExperimentConfig {
    /// Evaluate experiment `experiment_id` for `context`.
    pub fn eval_experiment(
        &self,
        experiment_id: &str,
        context: &Context,
        collaborators: Collaborators,
        hasher: &impl Hasher,
        now: Timestamp,
    ) -> Result<Assignment> {
        if let Some(err) = self.rejection(experiment_id) {
            return Err(err.clone().into());
        }

        match self.get(experiment_id).ok_or(Error::ExperimentNotFound)? {
            Ok(experiment) => experiment.eval(context, collaborators, hasher, now),
            Err(_) => Err(Error::ConfigurationParseError),
        }
    }
}

impl Experiment {
    /// Evaluate the current phase for `context`.
    ///
    /// A misconfigured experiment is reported as [`Error::Configuration`]. Contexts that cannot
    /// be evaluated for lack of data are excluded, which is not an error.
    pub fn eval(
        &self,
        context: &Context,
        collaborators: Collaborators,
        hasher: &impl Hasher,
        now: Timestamp,
    ) -> Result<Assignment> {
        self.validate()?;
        let (phase_index, phase) = self
            .current_phase()
            .ok_or(crate::ConfigurationError::NoPhases)?;

        let mut assignment = Assignment::new(self, phase_index);

        if !self.is_running() {
            return Ok(assignment.excluded(ExclusionReason::NotRunning));
        }
        if matches!(phase.date_started, Some(t) if now < t) {
            return Ok(assignment.excluded(ExclusionReason::PhaseNotStarted));
        }

        let Some(identity) = self.identity(&context.attributes) else {
            return Ok(assignment.excluded(ExclusionReason::MissingHashAttribute));
        };
        assignment.hash_attribute = Some(identity.attribute.clone());
        assignment.hash_value = Some(identity.value.clone());

        if !phase.namespace.contains(&identity.value, hasher) {
            return Ok(assignment.excluded(ExclusionReason::NotInNamespace));
        }
        if !phase.condition.matches(&context.attributes) {
            return Ok(assignment.excluded(ExclusionReason::FailedCondition));
        }
        if !prerequisites_satisfied(
            &phase.prerequisites,
            &context.attributes,
            collaborators.flag_resolver,
        )? {
            return Ok(assignment.excluded(ExclusionReason::FailedPrerequisite));
        }
        if !in_saved_groups(
            &phase.saved_groups,
            &identity.value,
            collaborators.saved_groups,
        )? {
            return Ok(assignment.excluded(ExclusionReason::NotInSavedGroups));
        }

        let n = hasher.hash(self.seed(phase), &identity.value, self.hash_version);
        assignment.bucket = Some(n);

        let resolver = StickyBucketResolver::new(collaborators.sticky_bucket_store);
        let resolution = resolver.resolve(context, self, &identity, || {
            Ok(partition::assign(
                n,
                &phase.variation_weights,
                phase.coverage,
            )?)
        })?;

        let (index, source) = match resolution {
            Resolution::Fresh(index) => (index, AssignmentSource::Fresh),
            Resolution::Sticky { variation, .. } => (variation, AssignmentSource::Sticky),
            Resolution::Excluded => {
                return Ok(assignment.excluded(ExclusionReason::NotCovered));
            }
        };

        // validate() guarantees variations and weights are index-aligned.
        let variation = self.variations.get(index).ok_or(
            crate::ConfigurationError::WeightCountMismatch {
                weights: phase.variation_weights.len(),
                variations: self.variations.len(),
            },
        )?;

        assignment.variation_index = Some(index);
        assignment.variation_key = Some(variation.key.clone());
        assignment.value = variation.value.clone();
        assignment.source = Some(source);
        assignment.in_experiment = true;
        Ok(assignment)
    }

    /// Identifier to hash on: the hash attribute, or the fallback attribute if the hash
    /// attribute is absent.
    fn identity(&self, attributes: &Attributes) -> Option<Identity> {
        std::iter::once(&self.hash_attribute)
            .chain(self.fallback_attribute.as_ref())
            .find_map(|attribute| {
                let value = get_path(attributes, attribute)?.to_identifier()?;
                Some(Identity {
                    attribute: attribute.clone(),
                    value,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        fs::File,
    };

    use chrono::{TimeZone, Utc};

    use super::{AssignmentSource, Collaborators, Context, ExclusionReason};
    use crate::{
        error::CollaboratorError,
        experiment::{ExperimentConfig, Timestamp},
        hasher::Fnv32Hasher,
        sticky::{assignment_key, InMemoryStickyBucketStore, StickyBucketDocument, StickyBucketStore},
        targeting::{NoopFlagResolver, NoopSavedGroups},
        AttributeValue, Attributes, ConfigurationError, Error,
    };

    fn load() -> ExperimentConfig {
        serde_json::from_reader(File::open("tests/data/experiments.json").unwrap()).unwrap()
    }

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap()
    }

    fn collaborators(store: &InMemoryStickyBucketStore) -> Collaborators<'_> {
        Collaborators {
            sticky_bucket_store: store,
            flag_resolver: &NoopFlagResolver,
            saved_groups: &NoopSavedGroups,
        }
    }

    fn context(id: &str) -> Context {
        Context::new(Attributes::from([("id".to_owned(), id.into())]))
    }

    #[test]
    fn pinned_scenario_assignment() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let assignment = config
            .eval_experiment(
                "exp_dd4gxd4lyel8bwi",
                &context("user_12345"),
                collaborators(&store),
                &Fnv32Hasher,
                now(),
            )
            .unwrap();

        assert!(assignment.in_experiment);
        assert_eq!(assignment.variation_index, Some(0));
        assert_eq!(assignment.variation_key.as_deref(), Some("0"));
        assert_eq!(assignment.bucket, Some(0.2716));
        assert_eq!(assignment.source, Some(AssignmentSource::Fresh));
        assert_eq!(assignment.hash_attribute.as_deref(), Some("id"));
        assert_eq!(assignment.hash_value.as_deref(), Some("user_12345"));
        assert_eq!(
            assignment.value,
            Some(serde_json::json!({"buttonText": "Add to cart"}))
        );

        // persisted under the current bucket version
        let doc = store.get("id", "user_12345").unwrap().unwrap();
        assert_eq!(
            doc.assignments[&assignment_key("exp_dd4gxd4lyel8bwi", 1)],
            "0"
        );
    }

    #[test]
    fn uniform_split_over_synthetic_identifiers() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let mut counts = [0usize; 2];
        for i in 0..10_000 {
            let assignment = config
                .eval_experiment(
                    "exp_dd4gxd4lyel8bwi",
                    &context(&format!("user_{i}")),
                    collaborators(&store),
                    &Fnv32Hasher,
                    now(),
                )
                .unwrap();
            counts[assignment.variation_index.unwrap()] += 1;
        }
        assert_eq!(counts, [5022, 4978]);
    }

    #[test]
    fn coverage_excludes_proportionally() {
        let mut config = load();
        if let Some(crate::experiment::TryParse::Parsed(experiment)) =
            config.experiments.get_mut("exp_dd4gxd4lyel8bwi")
        {
            experiment.phases[0].coverage = 0.1;
            experiment.disable_sticky_bucketing = true;
        }
        let store = InMemoryStickyBucketStore::new();
        let excluded = (0..10_000)
            .filter(|i| {
                let assignment = config
                    .eval_experiment(
                        "exp_dd4gxd4lyel8bwi",
                        &context(&format!("user_{i}")),
                        collaborators(&store),
                        &Fnv32Hasher,
                        now(),
                    )
                    .unwrap();
                assignment.exclusion == Some(ExclusionReason::NotCovered)
            })
            .count();
        assert_eq!(excluded, 8989);
    }

    #[test]
    fn zero_coverage_excludes_everyone() {
        let mut config = load();
        if let Some(crate::experiment::TryParse::Parsed(experiment)) =
            config.experiments.get_mut("exp_dd4gxd4lyel8bwi")
        {
            experiment.phases[0].coverage = 0.0;
        }
        let store = InMemoryStickyBucketStore::new();
        for i in 0..1_000 {
            let assignment = config
                .eval_experiment(
                    "exp_dd4gxd4lyel8bwi",
                    &context(&format!("user_{i}")),
                    collaborators(&store),
                    &Fnv32Hasher,
                    now(),
                )
                .unwrap();
            assert!(!assignment.in_experiment);
        }
        assert_eq!(store.get("id", "user_1").unwrap(), None);
    }

    #[test]
    fn missing_identifiers_fail_closed() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let contexts = [
            Context::default(),
            Context::new(Attributes::from([("id".to_owned(), "".into())])),
            Context::new(Attributes::from([("id".to_owned(), AttributeValue::Null)])),
            Context::new(Attributes::from([("email".to_owned(), "a@b.c".into())])),
        ];
        for context in &contexts {
            let assignment = config
                .eval_experiment(
                    "exp_dd4gxd4lyel8bwi",
                    context,
                    collaborators(&store),
                    &Fnv32Hasher,
                    now(),
                )
                .unwrap();
            assert!(!assignment.in_experiment);
            assert_eq!(
                assignment.exclusion,
                Some(ExclusionReason::MissingHashAttribute)
            );
            assert_eq!(assignment.bucket, None);
        }
    }

    #[test]
    fn namespace_ranges_are_exclusive() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let mut in_first = 0;
        for i in 0..10_000 {
            let context = context(&format!("user_{i}"));
            let eval = |id: &str| {
                config
                    .eval_experiment(id, &context, collaborators(&store), &Fnv32Hasher, now())
                    .unwrap()
            };
            let a = eval("exp_checkout_namespace");
            let b = eval("exp_checkout_payment");
            assert!(!(a.in_experiment && b.in_experiment));
            assert!(a.in_experiment || b.in_experiment);
            if a.in_experiment {
                in_first += 1;
            } else {
                assert_eq!(a.exclusion, Some(ExclusionReason::NotInNamespace));
            }
        }
        assert_eq!(in_first, 3984);
    }

    #[test]
    fn status_and_start_date_exclude() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let eval = |id: &str| {
            config
                .eval_experiment(id, &context("alice"), collaborators(&store), &Fnv32Hasher, now())
                .unwrap()
        };
        assert_eq!(eval("exp_draft").exclusion, Some(ExclusionReason::NotRunning));
        assert_eq!(
            eval("exp_future_phase").exclusion,
            Some(ExclusionReason::PhaseNotStarted)
        );

        let later = Utc.with_ymd_and_hms(2099, 6, 1, 0, 0, 0).unwrap();
        let assignment = config
            .eval_experiment(
                "exp_future_phase",
                &context("alice"),
                collaborators(&store),
                &Fnv32Hasher,
                later,
            )
            .unwrap();
        assert!(assignment.in_experiment);
    }

    #[test]
    fn configuration_errors_are_reported() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let eval = |id: &str| {
            config.eval_experiment(id, &context("alice"), collaborators(&store), &Fnv32Hasher, now())
        };
        assert!(matches!(
            eval("exp_bad_weights"),
            Err(Error::Configuration(ConfigurationError::WeightsExceedOne { .. }))
        ));
        assert!(matches!(
            eval("exp_bad_hash_version"),
            Err(Error::ConfigurationParseError)
        ));
        assert!(matches!(eval("missing"), Err(Error::ExperimentNotFound)));
        // unrelated experiments are unaffected
        assert!(eval("exp_dd4gxd4lyel8bwi").is_ok());
    }

    fn targeted_context(id: Option<&str>, device: Option<&str>) -> Context {
        let mut attributes = Attributes::from([
            ("country".to_owned(), "US".into()),
            ("browser.version".to_owned(), "2.1.0".into()),
        ]);
        if let Some(id) = id {
            attributes.insert("id".to_owned(), id.into());
        }
        if let Some(device) = device {
            attributes.insert("deviceId".to_owned(), device.into());
        }
        Context::new(attributes)
    }

    fn new_checkout_on(
        flag_id: &str,
        _: &Attributes,
    ) -> Result<Option<AttributeValue>, CollaboratorError> {
        Ok((flag_id == "new-checkout").then_some(true.into()))
    }

    #[test]
    fn targeting_pipeline() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let groups = HashMap::from([(
            "grp_internal".to_owned(),
            HashSet::from(["staff_1".to_owned()]),
        )]);
        let collaborators = Collaborators {
            sticky_bucket_store: &store,
            flag_resolver: &new_checkout_on,
            saved_groups: &groups,
        };
        let eval = |context: &Context| {
            config
                .eval_experiment("exp_targeted", context, collaborators, &Fnv32Hasher, now())
                .unwrap()
        };

        let included = eval(&targeted_context(Some("alice"), None));
        assert!(included.in_experiment);
        assert!(matches!(included.value, Some(serde_json::Value::Number(_))));

        let staff = eval(&targeted_context(Some("staff_1"), None));
        assert_eq!(staff.exclusion, Some(ExclusionReason::NotInSavedGroups));

        let mut wrong_country = targeted_context(Some("alice"), None);
        wrong_country
            .attributes
            .insert("country".to_owned(), "FR".into());
        assert_eq!(
            eval(&wrong_country).exclusion,
            Some(ExclusionReason::FailedCondition)
        );

        // fallback attribute is used when the hash attribute is absent
        let device = eval(&targeted_context(None, Some("device-42")));
        assert!(device.in_experiment);
        assert_eq!(device.hash_attribute.as_deref(), Some("deviceId"));
        assert!(store.get("deviceId", "device-42").unwrap().is_some());
    }

    #[test]
    fn unresolved_prerequisite_fails_closed() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let assignment = config
            .eval_experiment(
                "exp_targeted",
                &targeted_context(Some("alice"), None),
                collaborators(&store),
                &Fnv32Hasher,
                now(),
            )
            .unwrap();
        assert_eq!(
            assignment.exclusion,
            Some(ExclusionReason::FailedPrerequisite)
        );
    }

    #[test]
    fn sticky_assignment_survives_weight_change() {
        let mut config = load();
        let store = InMemoryStickyBucketStore::new();
        let first = config
            .eval_experiment(
                "exp_dd4gxd4lyel8bwi",
                &context("user_12345"),
                collaborators(&store),
                &Fnv32Hasher,
                now(),
            )
            .unwrap();
        assert_eq!(first.variation_index, Some(0));

        if let Some(crate::experiment::TryParse::Parsed(experiment)) =
            config.experiments.get_mut("exp_dd4gxd4lyel8bwi")
        {
            experiment.phases[0].variation_weights = vec![0.0, 1.0];
        }
        let second = config
            .eval_experiment(
                "exp_dd4gxd4lyel8bwi",
                &context("user_12345"),
                collaborators(&store),
                &Fnv32Hasher,
                now(),
            )
            .unwrap();
        assert_eq!(second.variation_index, Some(0));
        assert_eq!(second.source, Some(AssignmentSource::Sticky));
    }

    #[test]
    fn preloaded_documents_are_honored() {
        let config = load();
        let store = InMemoryStickyBucketStore::new();
        let mut doc = StickyBucketDocument::new("id", "user_12345");
        doc.assignments.insert(
            assignment_key("exp_dd4gxd4lyel8bwi", 1),
            "1".to_owned(),
        );
        let context = context("user_12345").with_sticky_bucket_documents([doc]);

        let assignment = config
            .eval_experiment(
                "exp_dd4gxd4lyel8bwi",
                &context,
                collaborators(&store),
                &Fnv32Hasher,
                now(),
            )
            .unwrap();
        assert_eq!(assignment.variation_index, Some(1));
        assert_eq!(assignment.source, Some(AssignmentSource::Sticky));
        assert_eq!(assignment.bucket, Some(0.2716));
    }

    #[test]
    fn empty_preloaded_document_does_not_mask_store() {
        let mut config = load();
        let store = InMemoryStickyBucketStore::new();
        let context = context("user_12345")
            .with_sticky_bucket_documents([StickyBucketDocument::new("id", "user_12345")]);

        let first = config
            .eval_experiment(
                "exp_dd4gxd4lyel8bwi",
                &context,
                collaborators(&store),
                &Fnv32Hasher,
                now(),
            )
            .unwrap();
        assert_eq!(first.variation_index, Some(0));
        assert_eq!(first.source, Some(AssignmentSource::Fresh));

        if let Some(crate::experiment::TryParse::Parsed(experiment)) =
            config.experiments.get_mut("exp_dd4gxd4lyel8bwi")
        {
            experiment.phases[0].variation_weights = vec![0.0, 1.0];
        }
        let second = config
            .eval_experiment(
                "exp_dd4gxd4lyel8bwi",
                &context,
                collaborators(&store),
                &Fnv32Hasher,
                now(),
            )
            .unwrap();
        assert_eq!(second.variation_index, Some(0));
        assert_eq!(second.source, Some(AssignmentSource::Sticky));

        let doc = store.get("id", "user_12345").unwrap().unwrap();
        assert_eq!(
            doc.assignments[&assignment_key("exp_dd4gxd4lyel8bwi", 1)],
            "0"
        );
    }
}
