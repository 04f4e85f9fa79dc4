//! Descriptive statistics over pixel samples.
//!
//! Population statistics (`ddof = 0`) with percentiles interpolated linearly
//! between closest ranks, the convention used by most raster toolkits.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("no valid samples: {total} total values, 0 valid (all NaN)")]
    NoValidSamples { total: usize },
    #[error("percentile {0} is outside [0, 100]")]
    PercentileOutOfRange(f64),
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation using a two-pass accumulation.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Percentile of an ascending-sorted slice with linear interpolation.
///
/// `rank` is in percent. The slice must be non-empty and contain no NaN.
pub fn percentile_sorted(sorted: &[f64], rank: f64) -> Result<f64, StatsError> {
    if !(0.0..=100.0).contains(&rank) {
        return Err(StatsError::PercentileOutOfRange(rank));
    }
    if sorted.is_empty() {
        return Err(StatsError::NoValidSamples { total: 0 });
    }
    let position = rank / 100.0 * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Ok(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

/// Median of the non-NaN values in `values`.
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return Err(StatsError::NoValidSamples {
            total: values.len(),
        });
    }
    valid.sort_by(f64::total_cmp);
    percentile_sorted(&valid, 50.0)
}
