//! Reductions and small statistics helpers
//!
//! `NaN` is the missing-value sentinel throughout the crate. The plain
//! reductions let it propagate; the `Nan*` variants skip it.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Reduction applied across targets (recomputation) or across sessions (aggregation)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Arithmetic mean; any missing value makes the result missing
    #[default]
    Mean,
    /// Arithmetic mean over the present values only
    NanMean,
    /// Median; any missing value makes the result missing
    Median,
    /// Median over the present values only
    NanMedian,
}

impl Reduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::Mean => "mean",
            Reduction::NanMean => "nan_mean",
            Reduction::Median => "median",
            Reduction::NanMedian => "nan_median",
        }
    }

    /// Reduce a slice of values. Returns `NaN` for empty input.
    pub fn reduce(&self, values: &[f64]) -> f64 {
        self.reduce_lane(ArrayView1::from(values))
    }

    /// Reduce one lane of an ndarray.
    pub fn reduce_lane(&self, lane: ArrayView1<f64>) -> f64 {
        match self {
            Reduction::Mean => lane.mean().unwrap_or(f64::NAN),
            Reduction::NanMean => mean(&present(lane)),
            Reduction::Median => median(&lane.to_vec()),
            Reduction::NanMedian => median(&present(lane)),
        }
    }
}

fn present(lane: ArrayView1<f64>) -> Vec<f64> {
    lane.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Arithmetic mean, `NaN` if empty or if any value is `NaN`
pub fn mean(values: &[f64]) -> f64 {
    ArrayView1::from(values).mean().unwrap_or(f64::NAN)
}

/// Median, `NaN` if empty or if any value is `NaN`
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation (denominator n)
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    ArrayView1::from(values).std(0.0)
}

/// Root mean square
pub fn rms(values: &[f64]) -> f64 {
    ArrayView1::from(values)
        .mapv(|v| v * v)
        .mean()
        .map_or(f64::NAN, f64::sqrt)
}

/// Convert a computed value to `Option`, treating `NaN` as absent.
pub fn defined(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}
