use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by external collaborators (sticky bucket store, flag resolver, saved
/// groups provider).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Enum representing possible errors.
///
/// Missing or incomplete context data is never an error: such contexts are excluded from the
/// experiment and the reason is reported on [`Assignment`](crate::Assignment).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Experiment definition is invalid. The experiment is excluded from assignment.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The requested experiment is not present in the current configuration.
    #[error("experiment not found")]
    ExperimentNotFound,

    /// Experiment is present in the configuration but failed to parse.
    #[error("error parsing experiment configuration")]
    ConfigurationParseError,

    /// Sticky bucket store failed to read or write an assignment document.
    #[error("sticky bucket store failed")]
    StickyBucketStore(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// Flag resolver failed while resolving a prerequisite flag.
    #[error("flag resolver failed")]
    FlagResolver(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// Saved groups provider failed while checking group membership.
    #[error("saved groups provider failed")]
    SavedGroups(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// Invalid api_host configuration.
    #[error("invalid api_host configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid client key.
    #[error("unauthorized, client_key is likely invalid")]
    Unauthorized,

    /// An I/O error.
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl Error {
    pub(crate) fn sticky_bucket_store(err: CollaboratorError) -> Self {
        Self::StickyBucketStore(Arc::from(err))
    }

    pub(crate) fn flag_resolver(err: CollaboratorError) -> Self {
        Self::FlagResolver(Arc::from(err))
    }

    pub(crate) fn saved_groups(err: CollaboratorError) -> Self {
        Self::SavedGroups(Arc::from(err))
    }
}

/// An experiment (or sequential testing setup) is misconfigured.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Experiment has no phases, so there is no current phase to evaluate.
    #[error("experiment has no phases")]
    NoPhases,

    /// Experiment has no variations.
    #[error("experiment has no variations")]
    NoVariations,

    /// Number of weights in the current phase does not match the number of variations.
    #[error("phase has {weights} weights for {variations} variations")]
    WeightCountMismatch {
        /// Number of weights in the phase.
        weights: usize,
        /// Number of variations in the experiment.
        variations: usize,
    },

    /// A variation weight is negative or not a finite number.
    #[error("invalid weight {weight} for variation {index}")]
    InvalidWeight {
        /// Index of the offending variation.
        index: usize,
        /// The weight as configured.
        weight: f64,
    },

    /// Variation weights sum to more than 1.
    #[error("variation weights sum to {sum}, which exceeds 1")]
    WeightsExceedOne {
        /// Sum of the configured weights.
        sum: f64,
    },

    /// Coverage is outside of `[0, 1]`.
    #[error("coverage {0} is outside of [0, 1]")]
    InvalidCoverage(f64),

    /// Namespace range is not a sub-range of `[0, 1]`.
    #[error("namespace range [{0}, {1}) is not a sub-range of [0, 1]")]
    InvalidNamespaceRange(f64, f64),

    /// Two variations share the same key.
    #[error("duplicate variation key {0:?}")]
    DuplicateVariationKey(String),

    /// Variation order changed for a running phase without a bucket version bump. Accepting it
    /// would silently reassign users.
    #[error("variation order changed for a running phase without a bucket version bump")]
    VariationOrderChanged,

    /// Sequential testing tuning parameter must be a positive finite number.
    #[error("sequential testing tuning parameter must be positive, got {0}")]
    InvalidTuningParameter(f64),

    /// Significance level must lie strictly between 0 and 1.
    #[error("alpha must be in (0, 1), got {0}")]
    InvalidAlpha(f64),

    /// Running statistic contains a non-finite effect or an invalid variance.
    #[error("invalid running statistic")]
    InvalidStatistic,
}
