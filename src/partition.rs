//! Mapping of a hash value to a variation.
//!
//! Weights are cumulatively summed and scaled by coverage, so variation `i` owns
//! `[coverage * sum(w[..i]), coverage * sum(w[..=i]))`. Everything from `coverage * sum(w)` up to
//! 1 is excluded. Ranges are half-open: a hash equal to a range end belongs to the next range.
use serde::Serialize;

use crate::ConfigurationError;

/// Tolerance for float rounding when checking that weights sum to at most 1.
const WEIGHT_SUM_EPSILON: f64 = 1e-9;

/// Half-open `[start, end)` slice of the hash space owned by one variation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct BucketRange {
    pub start: f64,
    pub end: f64,
}

impl BucketRange {
    #[allow(missing_docs)]
    pub fn contains(&self, n: f64) -> bool {
        self.start <= n && n < self.end
    }
}

/// Validate weights and coverage. Malformed input is rejected, never coerced.
pub fn validate(weights: &[f64], coverage: f64) -> Result<(), ConfigurationError> {
    if weights.is_empty() {
        return Err(ConfigurationError::NoVariations);
    }
    if !(0.0..=1.0).contains(&coverage) {
        return Err(ConfigurationError::InvalidCoverage(coverage));
    }
    if let Some((index, &weight)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(ConfigurationError::InvalidWeight { index, weight });
    }
    let sum: f64 = weights.iter().sum();
    if sum > 1.0 + WEIGHT_SUM_EPSILON {
        return Err(ConfigurationError::WeightsExceedOne { sum });
    }
    Ok(())
}

/// Contiguous ranges, one per variation, scaled by coverage.
pub fn bucket_ranges(weights: &[f64], coverage: f64) -> Result<Vec<BucketRange>, ConfigurationError> {
    validate(weights, coverage)?;

    let mut cumulative = 0.0;
    let ranges = weights
        .iter()
        .map(|w| {
            let start = cumulative * coverage;
            cumulative += w;
            BucketRange {
                start,
                end: cumulative * coverage,
            }
        })
        .collect();
    Ok(ranges)
}

/// Index of the first range containing `n`, or `None` if `n` falls into the excluded region.
pub fn choose_variation(n: f64, ranges: &[BucketRange]) -> Option<usize> {
    ranges.iter().position(|range| range.contains(n))
}

/// Map `n` to a variation index, or `None` if not included.
pub fn assign(n: f64, weights: &[f64], coverage: f64) -> Result<Option<usize>, ConfigurationError> {
    let ranges = bucket_ranges(weights, coverage)?;
    Ok(choose_variation(n, &ranges))
}
