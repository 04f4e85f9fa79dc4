//! Pixel-wise spectral indices and sensor scalings.
//!
//! Every normalized-difference index uses [`safe_ratio`]: where the
//! denominator is exactly zero the index is `0.0` rather than NaN or infinite,
//! so dark or no-data pixels do not poison field statistics.

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sentinel-2 L2A asset keys.
pub mod sentinel2 {
    pub const COLLECTION: &str = "s2_l2a";
    pub const BLUE: &str = "B02";
    pub const GREEN: &str = "B03";
    pub const RED: &str = "B04";
    pub const RED_EDGE: &str = "B05";
    pub const NIR: &str = "B08";
    pub const SWIR: &str = "B11";
    /// Scene classification (quality) band.
    pub const SCL: &str = "SCL";
}

/// Landsat 9 Collection 2 surface temperature assets.
pub mod landsat {
    pub const COLLECTION: &str = "ls9_st";
    pub const SURFACE_TEMPERATURE: &str = "ST_B10";
}

/// Landsat 9 Collection 2 surface reflectance assets.
pub mod landsat_sr {
    pub const COLLECTION: &str = "ls9_sr";
    pub const RED: &str = "SR_B4";
    pub const NIR: &str = "SR_B5";
    /// Reflectance per DN.
    pub const SCALE: f64 = 0.000_027_5;
    pub const OFFSET: f64 = -0.2;
}

/// Sentinel-1 radiometrically terrain corrected backscatter, linear power.
pub mod sentinel1 {
    pub const COLLECTION: &str = "s1_rtc";
    pub const VV: &str = "vv";
    pub const VH: &str = "vh";
}

/// CHIRPS daily precipitation assets.
pub mod chirps {
    pub const COLLECTION: &str = "rainfall_chirps_daily";
    /// Precipitation in mm/day.
    pub const RAINFALL: &str = "rainfall";
}

/// Collections whose scenes report an optical cloud cover.
pub const OPTICAL_COLLECTIONS: [&str; 3] = [sentinel2::COLLECTION, landsat_sr::COLLECTION, "ls8_sr"];

/// Landsat Collection 2 surface temperature scale factor (Kelvin per DN).
pub const LANDSAT_ST_SCALE: f64 = 0.003_418_02;
/// Landsat Collection 2 surface temperature offset in Kelvin.
pub const LANDSAT_ST_OFFSET: f64 = 149.0;
pub const KELVIN_TO_CELSIUS: f64 = 273.15;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("band shapes differ: {0:?} vs {1:?}")]
    ShapeMismatch((usize, usize), (usize, usize)),
    #[error("index {index} needs band {band}")]
    MissingBand { index: SpectralIndex, band: String },
    #[error("unknown spectral index '{0}'")]
    Unknown(String),
}

/// `numerator / denominator`, or `0.0` where the denominator is exactly zero.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn check_shapes(a: &ArrayView2<'_, f64>, b: &ArrayView2<'_, f64>) -> Result<(), IndexError> {
    if a.dim() != b.dim() {
        return Err(IndexError::ShapeMismatch(a.dim(), b.dim()));
    }
    Ok(())
}

/// `(a - b) / (a + b)` per pixel with the zero-denominator rule.
pub fn normalized_difference(
    a: &ArrayView2<'_, f64>,
    b: &ArrayView2<'_, f64>,
) -> Result<Array2<f64>, IndexError> {
    check_shapes(a, b)?;
    Ok(Zip::from(a)
        .and(b)
        .map_collect(|&a, &b| safe_ratio(a - b, a + b)))
}

/// Normalized Difference Vegetation Index.
pub fn ndvi(nir: &ArrayView2<'_, f64>, red: &ArrayView2<'_, f64>) -> Result<Array2<f64>, IndexError> {
    normalized_difference(nir, red)
}

/// Enhanced Vegetation Index, clipped to [-1, 1].
pub fn evi(
    nir: &ArrayView2<'_, f64>,
    red: &ArrayView2<'_, f64>,
    blue: &ArrayView2<'_, f64>,
) -> Result<Array2<f64>, IndexError> {
    check_shapes(nir, red)?;
    check_shapes(nir, blue)?;
    Ok(Zip::from(nir).and(red).and(blue).map_collect(|&n, &r, &b| {
        let value = 2.5 * safe_ratio(n - r, n + 6.0 * r - 7.5 * b + 1.0);
        if value.is_nan() {
            value
        } else {
            value.clamp(-1.0, 1.0)
        }
    }))
}

/// Landsat Collection 2 ST_B10 digital numbers to degrees Celsius.
pub fn landsat_st_to_celsius(dn: f64) -> f64 {
    dn * LANDSAT_ST_SCALE + LANDSAT_ST_OFFSET - KELVIN_TO_CELSIUS
}

/// Landsat Collection 2 surface reflectance DN to reflectance.
pub fn landsat_sr_reflectance(dn: f64) -> f64 {
    dn * landsat_sr::SCALE + landsat_sr::OFFSET
}

/// Indices computable from Sentinel-2 reflectance bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralIndex {
    /// `(NIR - RED) / (NIR + RED)`
    Ndvi,
    /// `(NIR - RED_EDGE) / (NIR + RED_EDGE)`
    Ndre,
    /// `(NIR - SWIR) / (NIR + SWIR)`
    Ndmi,
    /// `(GREEN - NIR) / (GREEN + NIR)`
    Ndwi,
    Evi,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 5] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Ndre,
        SpectralIndex::Ndmi,
        SpectralIndex::Ndwi,
        SpectralIndex::Evi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Ndre => "ndre",
            SpectralIndex::Ndmi => "ndmi",
            SpectralIndex::Ndwi => "ndwi",
            SpectralIndex::Evi => "evi",
        }
    }

    /// Sentinel-2 asset keys this index reads, in the order `compute` expects.
    pub fn required_bands(&self) -> &'static [&'static str] {
        use sentinel2::*;
        match self {
            SpectralIndex::Ndvi => &[NIR, RED],
            SpectralIndex::Ndre => &[NIR, RED_EDGE],
            SpectralIndex::Ndmi => &[NIR, SWIR],
            SpectralIndex::Ndwi => &[GREEN, NIR],
            SpectralIndex::Evi => &[NIR, RED, BLUE],
        }
    }

    /// Compute the index from bands looked up by asset key.
    pub fn compute<'a, F>(&self, mut band: F) -> Result<Array2<f64>, IndexError>
    where
        F: FnMut(&str) -> Option<ArrayView2<'a, f64>>,
    {
        let mut views = Vec::with_capacity(3);
        for key in self.required_bands() {
            let view = band(key).ok_or_else(|| IndexError::MissingBand {
                index: *self,
                band: key.to_string(),
            })?;
            views.push(view);
        }
        match self {
            SpectralIndex::Evi => evi(&views[0], &views[1], &views[2]),
            _ => normalized_difference(&views[0], &views[1]),
        }
    }
}

impl fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectralIndex {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        SpectralIndex::ALL
            .into_iter()
            .find(|index| index.name() == lower)
            .ok_or_else(|| IndexError::Unknown(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::collections::HashMap;

    #[test]
    fn test_safe_ratio() {
        assert_eq!(safe_ratio(1.0, 0.0), 0.0);
        assert_eq!(safe_ratio(0.0, 0.0), 0.0);
        assert_relative_eq!(safe_ratio(1.0, 4.0), 0.25);
    }

    #[test]
    fn test_ndvi() {
        let nir = array![[0.5, 0.0], [3000.0, 0.2]];
        let red = array![[0.1, 0.0], [1000.0, 0.2]];
        let index = ndvi(&nir.view(), &red.view()).unwrap();
        assert_relative_eq!(index[[0, 0]], 0.4 / 0.6);
        // Zero denominator gives zero, not NaN
        assert_eq!(index[[0, 1]], 0.0);
        assert_relative_eq!(index[[1, 0]], 0.5);
        assert_eq!(index[[1, 1]], 0.0);
    }

    #[test]
    fn test_ndvi_shape_mismatch() {
        let nir = Array2::<f64>::zeros((2, 2));
        let red = Array2::<f64>::zeros((2, 3));
        assert_eq!(
            ndvi(&nir.view(), &red.view()),
            Err(IndexError::ShapeMismatch((2, 2), (2, 3)))
        );
    }

    #[test]
    fn test_evi_is_clipped() {
        let nir = array![[0.5, 0.9]];
        let red = array![[0.1, 0.0]];
        let blue = array![[0.05, 0.5]];
        let index = evi(&nir.view(), &red.view(), &blue.view()).unwrap();
        // 2.5 * 0.4 / (0.5 + 0.6 - 0.375 + 1) = 1.0 / 1.725
        assert_relative_eq!(index[[0, 0]], 1.0 / 1.725, epsilon = 1e-12);
        // 2.5 * 0.9 / (0.9 - 3.75 + 1) is large and negative
        assert_eq!(index[[0, 1]], -1.0);
    }

    #[test]
    fn test_landsat_st_to_celsius() {
        // 149 K offset alone is far below freezing
        assert_relative_eq!(landsat_st_to_celsius(0.0), -124.15, epsilon = 1e-9);
        assert_relative_eq!(landsat_st_to_celsius(44_000.0), 26.242_88, epsilon = 1e-6);
    }

    #[test]
    fn test_landsat_sr_reflectance() {
        assert_relative_eq!(landsat_sr_reflectance(7272.727_272_7), 0.0, epsilon = 1e-9);
        assert_relative_eq!(landsat_sr_reflectance(10_909.090_909_1), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_spectral_index_compute() {
        let bands: HashMap<&str, Array2<f64>> = HashMap::from([
            (sentinel2::NIR, array![[0.6]]),
            (sentinel2::RED, array![[0.2]]),
            (sentinel2::GREEN, array![[0.3]]),
        ]);
        let lookup = |key: &str| bands.get(key).map(|a| a.view());

        let ndvi = SpectralIndex::Ndvi.compute(lookup).unwrap();
        assert_relative_eq!(ndvi[[0, 0]], 0.5);
        let ndwi = SpectralIndex::Ndwi.compute(lookup).unwrap();
        assert_relative_eq!(ndwi[[0, 0]], -1.0 / 3.0);
        assert_eq!(
            SpectralIndex::Ndre.compute(lookup),
            Err(IndexError::MissingBand {
                index: SpectralIndex::Ndre,
                band: "B05".to_string()
            })
        );
    }

    #[test]
    fn test_spectral_index_parse() {
        assert_eq!("NDVI".parse::<SpectralIndex>(), Ok(SpectralIndex::Ndvi));
        assert_eq!("evi".parse::<SpectralIndex>(), Ok(SpectralIndex::Evi));
        assert!("savi".parse::<SpectralIndex>().is_err());
        assert_eq!(SpectralIndex::Ndmi.to_string(), "ndmi");
    }
}
