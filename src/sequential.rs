//! Sequential boundary check deciding whether an experiment should keep recruiting.
//!
//! Uses an asymptotic confidence sequence, which stays valid no matter how often results are
//! peeked at. With tuning parameter `N*` (the sample size at which the bound is tightest) and
//! significance level `a`:
//!
//! ```text
//! rho       = sqrt((-2 ln a + ln(-2 ln a + 1)) / N*)
//! halfwidth = sqrt(var * n) * sqrt(2 (n rho^2 + 1) ln(sqrt(n rho^2 + 1) / a) / (n^2 rho^2))
//! ```
//!
//! where `var` is the variance of the effect estimate after `n` samples. Recruitment stops once
//! `|effect| > halfwidth`.
use serde::{Deserialize, Serialize};

use crate::{experiment::Experiment, ConfigurationError};

/// Significance level used by [`should_stop`].
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Outcome of the boundary check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SequentialDecision {
    /// Keep recruiting.
    Continue,
    /// The effect is outside the confidence sequence. Recruitment can stop.
    Stop,
}

/// Aggregated statistic supplied by the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningStatistic {
    /// Estimated treatment effect.
    pub effect: f64,
    /// Variance of the effect estimate.
    pub variance: f64,
}

/// Decide whether to stop recruitment at [`DEFAULT_ALPHA`].
pub fn should_stop(
    sample_size: u64,
    tuning_parameter: f64,
    statistic: &RunningStatistic,
) -> Result<SequentialDecision, ConfigurationError> {
    should_stop_with_alpha(sample_size, tuning_parameter, statistic, DEFAULT_ALPHA)
}

/// Same as [`should_stop`] with an explicit significance level.
pub fn should_stop_with_alpha(
    sample_size: u64,
    tuning_parameter: f64,
    statistic: &RunningStatistic,
    alpha: f64,
) -> Result<SequentialDecision, ConfigurationError> {
    if !statistic.effect.is_finite() {
        return Err(ConfigurationError::InvalidStatistic);
    }
    let Some(half_width) =
        confidence_half_width(sample_size, tuning_parameter, statistic.variance, alpha)?
    else {
        return Ok(SequentialDecision::Continue);
    };

    if statistic.effect.abs() > half_width {
        Ok(SequentialDecision::Stop)
    } else {
        Ok(SequentialDecision::Continue)
    }
}

/// Half-width of the confidence sequence after `sample_size` samples. `None` before the first
/// sample.
pub fn confidence_half_width(
    sample_size: u64,
    tuning_parameter: f64,
    variance: f64,
    alpha: f64,
) -> Result<Option<f64>, ConfigurationError> {
    if !(tuning_parameter.is_finite() && tuning_parameter > 0.0) {
        return Err(ConfigurationError::InvalidTuningParameter(tuning_parameter));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(ConfigurationError::InvalidAlpha(alpha));
    }
    if !(variance.is_finite() && variance >= 0.0) {
        return Err(ConfigurationError::InvalidStatistic);
    }
    if sample_size == 0 {
        return Ok(None);
    }

    let n = sample_size as f64;
    let log_alpha = -2.0 * alpha.ln();
    let rho_squared = (log_alpha + (log_alpha + 1.0).ln()) / tuning_parameter;
    let scaled = n * rho_squared + 1.0;

    let width = (2.0 * scaled * (scaled.sqrt() / alpha).ln() / (n * n * rho_squared)).sqrt();
    Ok(Some((variance * n).sqrt() * width))
}

impl Experiment {
    /// Apply the boundary check with the experiment's tuning parameter. `None` if sequential
    /// testing is disabled for the experiment.
    pub fn sequential_boundary(
        &self,
        sample_size: u64,
        statistic: &RunningStatistic,
    ) -> Result<Option<SequentialDecision>, ConfigurationError> {
        if !self.sequential_testing_enabled {
            return Ok(None);
        }
        let decision = should_stop(
            sample_size,
            self.sequential_testing_tuning_parameter,
            statistic,
        )?;
        log::debug!(target: "bucketing",
                    experiment_id:display = self.id,
                    sample_size,
                    decision:debug = decision;
                    "sequential boundary check");
        Ok(Some(decision))
    }
}
