//! Sentinel-1 backscatter flood detection.
//!
//! Open water is a specular reflector and shows very low VV backscatter.
//! Flooded vegetation instead raises the cross-polarised return relative to
//! VV, so it is detected by the VH/VV ratio at moderately low VV.

use ndarray::{Array2, ArrayView2, Zip};
use thiserror::Error;

/// VV below this (dB) is likely open water.
pub const VV_LIKELY_WATER_DB: f64 = -15.0;
/// VV ceiling (dB) for the flooded-vegetation test.
pub const VV_FLOODED_VEGETATION_DB: f64 = -12.0;
/// VH minus VV above this (dB) indicates flooded vegetation.
pub const VH_VV_RATIO_DB: f64 = -3.0;
/// VV above this (dB) is never considered at risk.
pub const VV_DRY_DB: f64 = -8.0;
/// dB span over which risk ramps from 0 to 1 below [`VV_LIKELY_WATER_DB`].
const RISK_RAMP_DB: f64 = 6.0;
/// Floor applied to linear backscatter before taking the logarithm.
const LINEAR_FLOOR: f64 = 1e-5;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("VV shape {vv:?} does not match VH shape {vh:?}")]
pub struct FloodError {
    pub vv: (usize, usize),
    pub vh: (usize, usize),
}

/// Linear backscatter to decibels, floored to avoid `log(0)`. NaN stays NaN.
pub fn to_db(linear: f64) -> f64 {
    if linear.is_nan() {
        return f64::NAN;
    }
    10.0 * linear.max(LINEAR_FLOOR).log10()
}

/// Per-pixel flood classification.
#[derive(Debug, Clone, PartialEq)]
pub struct FloodAssessment {
    /// Water or flooded vegetation.
    pub mask: Array2<bool>,
    /// Flood likelihood in `[0, 1]`, NaN where the input was NaN.
    pub risk: Array2<f64>,
}

impl FloodAssessment {
    /// Fraction of pixels flagged as flooded.
    pub fn coverage(&self) -> f64 {
        if self.mask.is_empty() {
            return 0.0;
        }
        self.mask.iter().filter(|&&m| m).count() as f64 / self.mask.len() as f64
    }
}

/// Classify flooding from linear VV and VH backscatter.
pub fn compute_flood_mask(
    vv: &ArrayView2<'_, f64>,
    vh: &ArrayView2<'_, f64>,
) -> Result<FloodAssessment, FloodError> {
    if vv.dim() != vh.dim() {
        return Err(FloodError {
            vv: vv.dim(),
            vh: vh.dim(),
        });
    }

    let mut mask = Array2::from_elem(vv.dim(), false);
    let mut risk = Array2::zeros(vv.dim());
    Zip::from(&mut mask)
        .and(&mut risk)
        .and(vv)
        .and(vh)
        .for_each(|m, r, &vv, &vh| {
            let vv_db = to_db(vv);
            let vh_db = to_db(vh);
            let open_water = vv_db < VV_LIKELY_WATER_DB;
            let flooded_vegetation =
                vh_db - vv_db > VH_VV_RATIO_DB && vv_db < VV_FLOODED_VEGETATION_DB;
            *m = open_water || flooded_vegetation;
            *r = if vv_db > VV_DRY_DB {
                0.0
            } else if vv_db.is_nan() {
                f64::NAN
            } else {
                ((VV_LIKELY_WATER_DB - vv_db) / RISK_RAMP_DB).clamp(0.0, 1.0)
            };
        });

    Ok(FloodAssessment { mask, risk })
}
