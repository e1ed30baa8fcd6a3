//! RTT summary statistics.
//!
//! Samples are milliseconds. A sample of `0.0` marks a failed attempt and is
//! ignored, so a set made only of failures has no statistics at all.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RttStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    /// Population standard deviation.
    pub stddev: f64,
}

/// Summarizes the valid samples in `samples`.
///
/// Returns `None` when there is no valid sample.
pub fn summarize(samples: &[f64]) -> Option<RttStats> {
    let valid: Vec<f64> = valid_samples(samples).collect();
    if valid.is_empty() {
        return None;
    }

    let n = valid.len() as f64;
    let min = valid.iter().copied().fold(f64::INFINITY, f64::min);
    let max = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = valid.iter().sum::<f64>() / n;
    let variance = valid.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n;

    Some(RttStats {
        min,
        avg,
        max,
        stddev: variance.sqrt(),
    })
}

/// Mean of the positive values, `None` when there are none.
pub fn mean_of_positive<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn valid_samples(samples: &[f64]) -> impl Iterator<Item = f64> + '_ {
    samples
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
}
