//! Cloud contamination measured from per-pixel quality classes.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Sentinel-2 scene classification values treated as cloud-like:
/// cloud shadow (3), medium (8) and high (9) probability cloud, thin cirrus (10).
pub const SCL_CLOUD_CLASSES: [u8; 4] = [3, 8, 9, 10];

/// The set of quality-band class values counted as cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudClasses {
    classes: Vec<u8>,
}

impl Default for CloudClasses {
    fn default() -> Self {
        Self::sentinel2_scl()
    }
}

impl CloudClasses {
    pub fn new(classes: impl Into<Vec<u8>>) -> Self {
        Self {
            classes: classes.into(),
        }
    }

    pub fn sentinel2_scl() -> Self {
        Self::new(SCL_CLOUD_CLASSES)
    }

    /// Whether a raw quality value belongs to the set.
    ///
    /// Quality bands arrive as floats after resampling; NaN and fractional
    /// values never match.
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() || value.fract() != 0.0 || !(0.0..=255.0).contains(&value) {
            return false;
        }
        self.classes.contains(&(value as u8))
    }

    /// Percentage (0-100) of pixels in the band that are cloud-like.
    ///
    /// An empty band counts as fully clouded.
    pub fn cloud_percentage(&self, band: &ArrayView2<'_, f64>) -> f64 {
        if band.is_empty() {
            return 100.0;
        }
        let cloudy = band.iter().filter(|&&v| self.contains(v)).count();
        cloudy as f64 / band.len() as f64 * 100.0
    }

    /// Fraction (0-1) of mask-interior pixels that are cloud-like.
    ///
    /// Returns `None` when the band and mask shapes differ. A mask with no
    /// interior pixels has nothing obscured and yields `0.0`.
    pub fn masked_cloud_fraction(
        &self,
        band: &ArrayView2<'_, f64>,
        mask: &ArrayView2<'_, bool>,
    ) -> Option<f64> {
        if band.dim() != mask.dim() {
            return None;
        }
        let (inside, cloudy) = band
            .iter()
            .zip(mask.iter())
            .filter(|(_, &m)| m)
            .fold((0usize, 0usize), |(n, c), (&v, _)| {
                (n + 1, c + usize::from(self.contains(v)))
            });
        if inside == 0 {
            return Some(0.0);
        }
        Some(cloudy as f64 / inside as f64)
    }
}
