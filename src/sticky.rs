//! Sticky bucketing keeps a context in the variation it was first assigned to, even if weights
//! change later, until the experiment's bucket version is bumped past the recorded one.
//!
//! Assignments are stored in [`StickyBucketDocument`]s owned by an external
//! [`StickyBucketStore`], one document per `(attribute name, attribute value)` pair.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::CollaboratorError, eval::Context, experiment::Experiment, ConfigurationError, Error,
    Result,
};

/// Recorded assignments for one identifier, keyed by `experimentId::bucketVersion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct StickyBucketDocument {
    pub attribute_name: String,
    pub attribute_value: String,
    /// Assignment key -> variation key.
    pub assignments: HashMap<String, String>,
}

impl StickyBucketDocument {
    /// Empty document for an attribute pair.
    pub fn new(attribute_name: impl Into<String>, attribute_value: impl Into<String>) -> Self {
        StickyBucketDocument {
            attribute_name: attribute_name.into(),
            attribute_value: attribute_value.into(),
            assignments: HashMap::new(),
        }
    }
}

/// Key under which an assignment is recorded.
pub fn assignment_key(experiment_id: &str, bucket_version: u32) -> String {
    format!("{experiment_id}::{bucket_version}")
}

/// External storage for sticky bucket documents.
///
/// Calls may perform I/O. Timeouts and retries are the store's responsibility.
pub trait StickyBucketStore {
    /// Load the document for an attribute pair, `Ok(None)` if there is none.
    fn get(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> std::result::Result<Option<StickyBucketDocument>, CollaboratorError>;

    /// Merge `doc.assignments` into the stored document. Concurrent writes to the same assignment
    /// key resolve as last-writer-wins.
    fn put(&self, doc: StickyBucketDocument) -> std::result::Result<(), CollaboratorError>;
}

/// `InMemoryStickyBucketStore` is a thread-safe store that keeps documents in process memory.
#[derive(Default)]
pub struct InMemoryStickyBucketStore {
    documents: RwLock<HashMap<(String, String), StickyBucketDocument>>,
}

impl InMemoryStickyBucketStore {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        InMemoryStickyBucketStore::default()
    }
}

impl StickyBucketStore for InMemoryStickyBucketStore {
    fn get(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> std::result::Result<Option<StickyBucketDocument>, CollaboratorError> {
        let documents = self
            .documents
            .read()
            .map_err(|_| "sticky bucket store lock is poisoned")?;
        Ok(documents
            .get(&(attribute_name.to_owned(), attribute_value.to_owned()))
            .cloned())
    }

    fn put(&self, doc: StickyBucketDocument) -> std::result::Result<(), CollaboratorError> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| "sticky bucket store lock is poisoned")?;
        documents
            .entry((doc.attribute_name.clone(), doc.attribute_value.clone()))
            .or_insert_with(|| {
                StickyBucketDocument::new(doc.attribute_name.clone(), doc.attribute_value.clone())
            })
            .assignments
            .extend(doc.assignments);
        Ok(())
    }
}

impl<T: StickyBucketStore + ?Sized> StickyBucketStore for Arc<T> {
    fn get(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> std::result::Result<Option<StickyBucketDocument>, CollaboratorError> {
        (**self).get(attribute_name, attribute_value)
    }

    fn put(&self, doc: StickyBucketDocument) -> std::result::Result<(), CollaboratorError> {
        (**self).put(doc)
    }
}

/// Identifier an experiment is hashed on: the hash attribute, or the fallback attribute if the
/// hash attribute is absent from the context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Identity {
    pub attribute: String,
    pub value: String,
}

/// Final variation decision of the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Freshly computed variation index (persisted if sticky bucketing is enabled).
    Fresh(usize),
    /// Variation index recorded under the given bucket version.
    #[allow(missing_docs)]
    Sticky { variation: usize, bucket_version: u32 },
    /// Not included in the experiment.
    Excluded,
}

/// Resolves sticky assignments through a [`StickyBucketStore`].
pub struct StickyBucketResolver<'a> {
    store: &'a dyn StickyBucketStore,
}

impl<'a> StickyBucketResolver<'a> {
    #[allow(missing_docs)]
    pub fn new(store: &'a dyn StickyBucketStore) -> Self {
        StickyBucketResolver { store }
    }

    /// Produce the final assignment for `identity`.
    ///
    /// If sticky bucketing is disabled, `compute` decides. Otherwise a recorded assignment for a
    /// bucket version in `[min_bucket_version, bucket_version]` wins, newest first, and `compute`
    /// is not called. Documents preloaded into the context are consulted before the store. Without
    /// a recorded assignment, the computed variation is adopted and persisted under the current
    /// bucket version.
    pub fn resolve(
        &self,
        context: &Context,
        experiment: &Experiment,
        identity: &Identity,
        compute: impl FnOnce() -> Result<Option<usize>>,
    ) -> Result<Resolution> {
        if experiment.disable_sticky_bucketing {
            return Ok(compute()?.map_or(Resolution::Excluded, Resolution::Fresh));
        }

        let preloaded = context.sticky_bucket_document(&identity.attribute, &identity.value);
        if let Some(resolution) =
            preloaded.and_then(|document| sticky_hit(document, experiment, identity))
        {
            return Ok(resolution);
        }

        // Preloaded documents can be partial, so a miss falls through to the store.
        let stored = self
            .store
            .get(&identity.attribute, &identity.value)
            .map_err(Error::sticky_bucket_store)?;
        if let Some(resolution) = stored
            .as_ref()
            .and_then(|document| sticky_hit(document, experiment, identity))
        {
            return Ok(resolution);
        }

        let Some(variation) = compute()? else {
            return Ok(Resolution::Excluded);
        };

        let variation_key = experiment
            .variations
            .get(variation)
            .map(|v| v.key.clone())
            .ok_or(ConfigurationError::WeightCountMismatch {
                weights: variation + 1,
                variations: experiment.variations.len(),
            })?;

        let mut document = merge(preloaded, stored)
            .unwrap_or_else(|| StickyBucketDocument::new(&identity.attribute, &identity.value));
        document.assignments.insert(
            assignment_key(&experiment.id, experiment.bucket_version),
            variation_key,
        );
        self.store
            .put(document)
            .map_err(Error::sticky_bucket_store)?;

        log::debug!(target: "bucketing",
                    experiment_id:display = experiment.id,
                    attribute:display = identity.attribute,
                    bucket_version = experiment.bucket_version;
                    "persisted sticky bucket assignment");

        Ok(Resolution::Fresh(variation))
    }
}

fn sticky_hit(
    document: &StickyBucketDocument,
    experiment: &Experiment,
    identity: &Identity,
) -> Option<Resolution> {
    let (variation, bucket_version) = lookup(document, experiment)?;
    log::debug!(target: "bucketing",
                experiment_id:display = experiment.id,
                attribute:display = identity.attribute,
                bucket_version;
                "sticky bucket hit");
    Some(Resolution::Sticky {
        variation,
        bucket_version,
    })
}

/// Persisted entries win over preloaded ones for the same assignment key.
fn merge(
    preloaded: Option<&StickyBucketDocument>,
    stored: Option<StickyBucketDocument>,
) -> Option<StickyBucketDocument> {
    match (preloaded, stored) {
        (Some(preloaded), Some(mut stored)) => {
            for (key, variation_key) in &preloaded.assignments {
                stored
                    .assignments
                    .entry(key.clone())
                    .or_insert_with(|| variation_key.clone());
            }
            Some(stored)
        }
        (Some(preloaded), None) => Some(preloaded.clone()),
        (None, stored) => stored,
    }
}

/// Find the newest recorded assignment within the accepted bucket versions. Recorded keys that
/// no longer name a variation are ignored.
fn lookup(document: &StickyBucketDocument, experiment: &Experiment) -> Option<(usize, u32)> {
    if experiment.bucket_version < experiment.min_bucket_version {
        return None;
    }
    (experiment.min_bucket_version..=experiment.bucket_version)
        .rev()
        .find_map(|version| {
            let key = document
                .assignments
                .get(&assignment_key(&experiment.id, version))?;
            let index = experiment.variations.iter().position(|v| &v.key == key)?;
            Some((index, version))
        })
}
