//! Land surface temperature baseline and anomaly.
//!
//! The baseline for a month is the per-pixel mean of the clearest Landsat
//! surface temperature scenes from the same month of the preceding years.

use chrono::{Months, NaiveDate};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, Zip};
use shared::indices::{landsat, landsat_st_to_celsius};
use shared::{Bbox, RasterAccessor, Scene, SceneCatalog, SceneQuery, SortOrder};
use thiserror::Error;

/// Years searched before the target year.
pub const BASELINE_YEARS: i32 = 3;
/// Most recent scenes requested per year.
pub const SCENES_PER_YEAR: usize = 10;
/// Clearest scenes averaged into the baseline.
pub const BASELINE_SCENES: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThermalError {
    #[error("invalid month {month} of year {year}")]
    InvalidMonth { year: i32, month: u32 },
}

/// Historical mean temperature in degrees Celsius.
#[derive(Debug, Clone, PartialEq)]
pub struct LstBaseline {
    pub celsius: Array2<f64>,
    /// Scenes that contributed, clearest first.
    pub scene_ids: Vec<String>,
}

fn month_range(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ThermalError> {
    let invalid = || ThermalError::InvalidMonth { year, month };
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .ok_or_else(invalid)?;
    Ok((first, last))
}

/// Clearest first; scenes without a reported cover sort as 100%.
pub(crate) fn sort_by_cloud_cover(scenes: &mut [Scene]) {
    scenes.sort_by(|a, b| {
        a.cloud_cover
            .unwrap_or(100.0)
            .total_cmp(&b.cloud_cover.unwrap_or(100.0))
    });
}

/// Per-pixel mean ignoring NaN. A pixel NaN in every layer stays NaN.
fn nan_mean(layers: &[Array2<f64>]) -> Option<Array2<f64>> {
    let first = layers.first()?;
    let mut sum = Array2::<f64>::zeros(first.dim());
    let mut count = Array2::<f64>::zeros(first.dim());
    for layer in layers {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(layer)
            .for_each(|s, c, &v| {
                if !v.is_nan() {
                    *s += v;
                    *c += 1.0;
                }
            });
    }
    let mean = Zip::from(&sum)
        .and(&count)
        .map_collect(|&s, &c| if c > 0.0 { s / c } else { f64::NAN });
    Some(mean)
}

/// Baseline for `month` from the [`BASELINE_YEARS`] years before `year`.
///
/// Search or read failures for individual years and scenes are logged and
/// skipped. Returns `Ok(None)` when nothing usable was found.
pub fn compute_lst_baseline<C, A>(
    catalog: &C,
    accessor: &A,
    bbox: &Bbox,
    out_shape: Option<(usize, usize)>,
    year: i32,
    month: u32,
) -> Result<Option<LstBaseline>, ThermalError>
where
    C: SceneCatalog + ?Sized,
    A: RasterAccessor + ?Sized,
{
    month_range(year, month)?;

    let mut candidates = Vec::new();
    for past in (year - BASELINE_YEARS)..year {
        let (start, end) = month_range(past, month)?;
        let query = SceneQuery::new(landsat::COLLECTION, *bbox)
            .with_date_range(start, end)
            .with_limit(SCENES_PER_YEAR)
            .with_sort(SortOrder::Descending);
        match catalog.search(&query) {
            Ok(scenes) => {
                debug!("{} LST scenes for {}-{:02}", scenes.len(), past, month);
                candidates.extend(scenes);
            }
            Err(e) => warn!("No historical LST for {}-{:02}: {}", past, month, e),
        }
    }
    if candidates.is_empty() {
        info!("No historical LST data found for month {}", month);
        return Ok(None);
    }

    sort_by_cloud_cover(&mut candidates);

    let mut layers: Vec<Array2<f64>> = Vec::new();
    let mut scene_ids = Vec::new();
    for scene in candidates.iter().take(BASELINE_SCENES) {
        let dn = match accessor.read_band(scene, landsat::SURFACE_TEMPERATURE, bbox, out_shape) {
            Ok(dn) => dn,
            Err(e) => {
                warn!("Could not read LST for {}: {}", scene.id, e);
                continue;
            }
        };
        if let Some(first) = layers.first() {
            if first.dim() != dn.dim() {
                warn!(
                    "Skipping {}: shape {:?} differs from {:?}",
                    scene.id,
                    dn.dim(),
                    first.dim()
                );
                continue;
            }
        }
        layers.push(dn.mapv(landsat_st_to_celsius));
        scene_ids.push(scene.id.clone());
    }

    let Some(celsius) = nan_mean(&layers) else {
        info!("Could not compute LST baseline for month {}", month);
        return Ok(None);
    };
    info!("LST baseline computed from {} historical scenes", layers.len());
    Ok(Some(LstBaseline { celsius, scene_ids }))
}

/// `current - baseline` per pixel, or `None` when the grids differ.
pub fn lst_anomaly(current: &ArrayView2<'_, f64>, baseline: &LstBaseline) -> Option<Array2<f64>> {
    if current.dim() != baseline.celsius.dim() {
        return None;
    }
    Some(current - &baseline.celsius)
}
