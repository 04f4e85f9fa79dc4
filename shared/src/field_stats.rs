//! Summary statistics of a raster restricted to a field mask.

use crop_math::stats::{mean, percentile_sorted, population_std, StatsError};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Percentile ranks reported when the caller does not ask for specific ones.
pub const DEFAULT_PERCENTILES: [f64; 5] = [10.0, 25.0, 50.0, 75.0, 90.0];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldStatsError {
    #[error("data shape {data:?} does not match mask shape {mask:?}")]
    ShapeMismatch {
        data: (usize, usize),
        mask: (usize, usize),
    },
    #[error(transparent)]
    Stats(#[from] StatsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub rank: f64,
    pub value: Option<f64>,
}

/// Statistics over the finite pixels inside a field.
///
/// When no pixel is valid every value is `None` and `count` is zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldStatistics {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    pub count: usize,
    pub percentiles: Vec<PercentileValue>,
}

impl FieldStatistics {
    fn empty(ranks: &[f64]) -> Self {
        Self {
            percentiles: ranks
                .iter()
                .map(|&rank| PercentileValue { rank, value: None })
                .collect(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Value at a requested percentile rank, if it was computed.
    pub fn percentile(&self, rank: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|p| p.rank == rank)
            .and_then(|p| p.value)
    }
}

/// Statistics of `data` over pixels where `mask` is true and the value is finite.
///
/// Percentile ranks are validated before any work is done, so an invalid rank
/// fails even for an all-NaN field.
pub fn compute_field_statistics(
    data: &ArrayView2<'_, f64>,
    mask: &ArrayView2<'_, bool>,
    percentiles: &[f64],
) -> Result<FieldStatistics, FieldStatsError> {
    if data.dim() != mask.dim() {
        return Err(FieldStatsError::ShapeMismatch {
            data: data.dim(),
            mask: mask.dim(),
        });
    }
    if let Some(&bad) = percentiles.iter().find(|r| !(0.0..=100.0).contains(*r)) {
        return Err(StatsError::PercentileOutOfRange(bad).into());
    }

    let mut valid: Vec<f64> = data
        .iter()
        .zip(mask.iter())
        .filter(|(v, &m)| m && v.is_finite())
        .map(|(&v, _)| v)
        .collect();
    if valid.is_empty() {
        return Ok(FieldStatistics::empty(percentiles));
    }
    valid.sort_by(f64::total_cmp);

    let percentiles = percentiles
        .iter()
        .map(|&rank| {
            percentile_sorted(&valid, rank).map(|value| PercentileValue {
                rank,
                value: Some(value),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FieldStatistics {
        mean: mean(&valid),
        std: population_std(&valid),
        min: valid.first().copied(),
        max: valid.last().copied(),
        median: Some(percentile_sorted(&valid, 50.0)?),
        count: valid.len(),
        percentiles,
    })
}
