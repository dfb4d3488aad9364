//! Deterministic experiment assignment (bucketing) engine.
//!
//! # Overview
//!
//! Given an experiment definition and a [`Context`] describing a user or request, the engine
//! computes which variation (if any) the context belongs to. Every process evaluating the same
//! experiment for the same context computes the same assignment without coordinating with the
//! others: assignment is a pure function of the hashed identifier, the phase configuration and
//! the sticky bucket documents recorded earlier.
//!
//! Evaluation of the current phase proceeds as follows:
//!
//! 1. Experiments that are not running, or whose phase has not started, are excluded.
//! 2. The identifier is read from the hash attribute, falling back to the fallback attribute.
//! 3. The [`Namespace`] filter, targeting [`Condition`], prerequisite flags and saved groups must
//!    all pass.
//! 4. A recorded assignment in the [`StickyBucketStore`] within the accepted bucket versions
//!    wins.
//! 5. Otherwise, the [hash](Hasher) of the identifier is mapped to a variation by [`assign`],
//!    and the result is persisted for sticky bucketing.
//!
//! The [`Client`] keeps the latest configuration snapshot (optionally fetched by a
//! [`PollerThread`]), evaluates experiments, and passes an [`ExposureEvent`] to the configured
//! [`ExposureLogger`] the first time a context is included in an experiment phase.
//!
//! The sequential boundary checker ([`should_stop`]) is independent of live assignment and is meant to be called
//! periodically with aggregated statistics.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. A context lacking the data an experiment needs is
//! not an error: the returned [`Assignment`] is marked as not in the experiment and carries an
//! [`ExclusionReason`]. Misconfigured experiments produce [`Error::Configuration`], and failures
//! of external collaborators (sticky bucket store, flag resolver, saved groups provider) are
//! propagated as their own variants. Each experiment fails independently.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `bucketing` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into evaluation.
//!
//! # Examples
//!
//! A runnable example lives in the `demos/simple` directory of this crate.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod attributes;
mod client;
mod condition;
mod config;
mod configuration_store;
mod engine;
mod error;
mod eval;
mod experiment;
mod exposure_logger;
mod hasher;
mod namespace;
mod partition;
mod poller;
mod rules;
mod sequential;
mod sticky;
mod targeting;

pub use attributes::{AttributeValue, Attributes};
pub use client::Client;
pub use condition::{Condition, ConditionParseError, ElemMatch, Operator, ValueTest};
pub use config::ClientConfig;
pub use configuration_store::ConfigurationStore;
pub use error::{CollaboratorError, ConfigurationError, Error, Result};
pub use eval::{Assignment, AssignmentSource, Collaborators, Context, ExclusionReason};
pub use experiment::{
    Experiment, ExperimentConfig, ExperimentStatus, Phase, Timestamp, TryParse, Variation,
};
pub use exposure_logger::{ExposureEvent, ExposureLogger};
pub use hasher::{Fnv32Hasher, HashVersion, Hasher};
pub use namespace::Namespace;
pub use partition::{assign, bucket_ranges, BucketRange};
pub use poller::PollerThread;
pub use sequential::{
    confidence_half_width, should_stop, should_stop_with_alpha, RunningStatistic,
    SequentialDecision, DEFAULT_ALPHA,
};
pub use sticky::{
    assignment_key, InMemoryStickyBucketStore, StickyBucketDocument, StickyBucketStore,
};
pub use targeting::{FlagResolver, GroupMatch, Prerequisite, SavedGroupTargeting, SavedGroups};
