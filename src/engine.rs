//! Assignment engine: evaluates experiments against a configuration snapshot and signals
//! exposures.
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use chrono::Utc;

use crate::{
    eval::{Assignment, AssignmentSource, Collaborators, Context},
    experiment::ExperimentConfig,
    exposure_logger::{ExposureEvent, ExposureLogger},
    hasher::Fnv32Hasher,
    sticky::StickyBucketStore,
    targeting::{FlagResolver, SavedGroups},
    Result,
};

/// `(experiment id, phase index, hash attribute, identifier)`
type ExposureKey = (String, usize, String, String);

/// Remembers which exposures were already signaled. Entries are kept until [`Self::clear`].
#[derive(Default)]
struct ExposureTracker {
    seen: Mutex<HashSet<ExposureKey>>,
}

impl ExposureTracker {
    /// Return `true` the first time `key` is seen.
    fn first_exposure(&self, key: ExposureKey) -> bool {
        // A panic while holding the lock cannot leave the set inconsistent.
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(key)
    }

    fn clear(&self) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

pub(crate) struct Engine<'a> {
    sticky_bucket_store: Box<dyn StickyBucketStore + Send + Sync + 'a>,
    flag_resolver: Box<dyn FlagResolver + Send + Sync + 'a>,
    saved_groups: Box<dyn SavedGroups + Send + Sync + 'a>,
    exposure_logger: Box<dyn ExposureLogger + Send + Sync + 'a>,
    exposures: ExposureTracker,
}

impl<'a> Engine<'a> {
    pub(crate) fn new(
        sticky_bucket_store: Box<dyn StickyBucketStore + Send + Sync + 'a>,
        flag_resolver: Box<dyn FlagResolver + Send + Sync + 'a>,
        saved_groups: Box<dyn SavedGroups + Send + Sync + 'a>,
        exposure_logger: Box<dyn ExposureLogger + Send + Sync + 'a>,
    ) -> Self {
        Engine {
            sticky_bucket_store,
            flag_resolver,
            saved_groups,
            exposure_logger,
            exposures: ExposureTracker::default(),
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            sticky_bucket_store: &*self.sticky_bucket_store,
            flag_resolver: &*self.flag_resolver,
            saved_groups: &*self.saved_groups,
        }
    }

    /// Evaluate a single experiment and signal exposure if the context is included.
    pub(crate) fn evaluate(
        &self,
        configuration: &ExperimentConfig,
        experiment_id: &str,
        context: &Context,
    ) -> Result<Assignment> {
        let assignment = match configuration.eval_experiment(
            experiment_id,
            context,
            self.collaborators(),
            &Fnv32Hasher,
            Utc::now(),
        ) {
            Ok(assignment) => assignment,
            Err(err) => {
                log::warn!(target: "bucketing",
                           experiment_id,
                           attributes:serde = context.attributes;
                           "error occurred while evaluating an experiment: {err}");
                return Err(err);
            }
        };

        log::trace!(target: "bucketing",
                    experiment_id,
                    assignment:serde = assignment;
                    "evaluated an experiment");

        if assignment.in_experiment {
            self.signal_exposure(configuration, &assignment, context);
        }

        Ok(assignment)
    }

    /// Forget signaled exposures, so the next inclusion of each context is signaled again.
    pub(crate) fn reset_exposures(&self) {
        self.exposures.clear();
        log::debug!(target: "bucketing", "cleared exposure deduplication state");
    }

    /// Evaluate every experiment in the snapshot. Failures are scoped to their experiment.
    pub(crate) fn evaluate_all(
        &self,
        configuration: &ExperimentConfig,
        context: &Context,
    ) -> HashMap<String, Result<Assignment>> {
        configuration
            .experiments
            .keys()
            .map(|id| (id.clone(), self.evaluate(configuration, id, context)))
            .collect()
    }

    fn signal_exposure(
        &self,
        configuration: &ExperimentConfig,
        assignment: &Assignment,
        context: &Context,
    ) {
        let (
            Some(variation_index),
            Some(variation_key),
            Some(hash_attribute),
            Some(identifier),
        ) = (
            assignment.variation_index,
            &assignment.variation_key,
            &assignment.hash_attribute,
            &assignment.hash_value,
        )
        else {
            return;
        };

        let key = (
            assignment.experiment_id.clone(),
            assignment.phase_index,
            hash_attribute.clone(),
            identifier.clone(),
        );
        if !self.exposures.first_exposure(key) {
            return;
        }

        let tracking_key = configuration
            .get(&assignment.experiment_id)
            .and_then(|experiment| experiment.ok())
            .map(|experiment| experiment.tracking_key.clone())
            .unwrap_or_default();

        let event = ExposureEvent {
            experiment_id: assignment.experiment_id.clone(),
            tracking_key,
            phase_index: assignment.phase_index,
            variation_index,
            variation_key: variation_key.clone(),
            hash_attribute: hash_attribute.clone(),
            identifier: identifier.clone(),
            sticky: assignment.source == Some(AssignmentSource::Sticky),
            attributes: context.attributes.clone(),
            timestamp: Utc::now().to_rfc3339(),
            meta_data: ExposureEvent::meta_data(),
        };

        log::trace!(target: "bucketing",
                    event:serde;
                    "recording exposure");
        self.exposure_logger.record_exposure(event);
    }
}
