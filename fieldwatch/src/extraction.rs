//! Streaming, cloud-gated reduction of scenes to a field time series.
//!
//! Scenes are handled one at a time in the order given. When a scene carries
//! the configured quality band, its cloud fraction is measured over the field
//! pixels first and the scene is rejected before any data band is read if
//! the fraction exceeds the gate. Accepted scenes are reduced with
//! [`compute_field_statistics`] to a single [`TimeseriesPoint`]. Rejected or
//! failed scenes produce no point at all.

use chrono::NaiveDate;
use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use shared::indices::{
    chirps, landsat, sentinel2, IndexError, KELVIN_TO_CELSIUS, LANDSAT_ST_OFFSET, LANDSAT_ST_SCALE,
};
use shared::{
    compute_field_statistics, Bbox, CloudClasses, FieldMask, FieldStatsError, RasterAccessor,
    RasterError, Scene, SpectralIndex, TimeseriesPoint, TimeseriesSummary, DEFAULT_PERCENTILES,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Default indices of a multi-index extraction.
pub const DEFAULT_INDICES: [SpectralIndex; 2] = [SpectralIndex::Ndvi, SpectralIndex::Evi];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Stats(#[from] FieldStatsError),
}

/// The per-pixel quantity reduced from each scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    /// A raw asset, rescaled as `value * scale + offset`.
    Band {
        asset: String,
        scale: f64,
        offset: f64,
    },
    /// A spectral index derived from reflectance bands.
    Index(SpectralIndex),
}

impl Signal {
    pub fn band(asset: impl Into<String>) -> Self {
        Signal::Band {
            asset: asset.into(),
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Landsat surface temperature in degrees Celsius.
    pub fn land_surface_temperature() -> Self {
        Signal::Band {
            asset: landsat::SURFACE_TEMPERATURE.to_string(),
            scale: LANDSAT_ST_SCALE,
            offset: LANDSAT_ST_OFFSET - KELVIN_TO_CELSIUS,
        }
    }

    /// Daily precipitation in mm.
    pub fn rainfall() -> Self {
        Self::band(chirps::RAINFALL)
    }

    /// Asset keys read for this signal.
    pub fn assets(&self) -> Vec<&str> {
        match self {
            Signal::Band { asset, .. } => vec![asset.as_str()],
            Signal::Index(index) => index.required_bands().to_vec(),
        }
    }

    /// Read and derive the signal for one scene on a `shape` grid over `bbox`.
    pub fn read<A: RasterAccessor + ?Sized>(
        &self,
        accessor: &A,
        scene: &Scene,
        bbox: &Bbox,
        shape: (usize, usize),
    ) -> Result<Array2<f64>, ExtractionError> {
        match self {
            Signal::Band {
                asset,
                scale,
                offset,
            } => {
                let mut band = accessor.read_band(scene, asset, bbox, Some(shape))?;
                if *scale != 1.0 || *offset != 0.0 {
                    band.mapv_inplace(|v| v * scale + offset);
                }
                Ok(band)
            }
            Signal::Index(index) => {
                let mut bands = HashMap::new();
                for &key in index.required_bands() {
                    bands.insert(key, accessor.read_band(scene, key, bbox, Some(shape))?);
                }
                Ok(index.compute(|key| bands.get(key).map(|b| b.view()))?)
            }
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Band { asset, .. } => f.write_str(asset),
            Signal::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Cloud gating and reduction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOptions {
    /// Scenes whose field cloud fraction exceeds this are dropped.
    pub max_cloud_fraction: f64,
    /// Per-pixel quality band, consulted only for scenes that carry it.
    pub quality_band: Option<String>,
    pub cloud_classes: CloudClasses,
    pub percentiles: Vec<f64>,
}

impl ExtractionOptions {
    /// Vegetation indices: gate at 0.5 on the Sentinel-2 SCL band.
    pub fn optical() -> Self {
        Self {
            max_cloud_fraction: 0.5,
            quality_band: Some(sentinel2::SCL.to_string()),
            cloud_classes: CloudClasses::sentinel2_scl(),
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }

    /// Land surface temperature: stricter gate at 0.3.
    pub fn thermal() -> Self {
        Self {
            max_cloud_fraction: 0.3,
            ..Self::optical()
        }
    }

    /// Non-optical signals are never gated.
    pub fn rainfall() -> Self {
        Self {
            max_cloud_fraction: 1.0,
            quality_band: None,
            ..Self::optical()
        }
    }

    pub fn with_max_cloud_fraction(mut self, fraction: f64) -> Self {
        self.max_cloud_fraction = fraction;
        self
    }

    pub fn with_quality_band(mut self, band: Option<String>) -> Self {
        self.quality_band = band;
        self
    }

    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self::optical()
    }
}

/// What happened to one scene.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneOutcome {
    Accepted(TimeseriesPoint),
    /// Field cloud fraction above the gate.
    Cloudy { cloud_fraction: f64 },
    /// No finite pixel inside the field.
    Empty,
}

/// One scene of a multi-index extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiIndexRow {
    pub date: NaiveDate,
    pub scene_id: String,
    pub cloud_fraction: f64,
    /// Field mean per index; indices with no valid pixel are absent.
    pub values: BTreeMap<SpectralIndex, f64>,
}

impl MultiIndexRow {
    pub fn value(&self, index: SpectralIndex) -> Option<f64> {
        self.values.get(&index).copied()
    }
}

/// Dates and values of one index across multi-index rows.
pub fn index_series(rows: &[MultiIndexRow], index: SpectralIndex) -> Vec<TimeseriesPoint> {
    rows.iter()
        .filter_map(|row| {
            let mut point = TimeseriesPoint::new(row.date, row.value(index)?);
            point.metadata.cloud_fraction = row.cloud_fraction;
            point.metadata.scene_id = row.scene_id.clone();
            Some(point)
        })
        .collect()
}

/// Summary of one index across multi-index rows.
pub fn index_summary(rows: &[MultiIndexRow], index: SpectralIndex) -> TimeseriesSummary {
    let values: Vec<f64> = rows.iter().filter_map(|row| row.value(index)).collect();
    TimeseriesSummary::from_values(&values)
}

/// Reduces scenes over one field mask.
pub struct FieldExtractor<'a, A: ?Sized> {
    accessor: &'a A,
    mask: &'a FieldMask,
    bbox: Bbox,
    options: ExtractionOptions,
}

impl<'a, A: RasterAccessor + ?Sized> FieldExtractor<'a, A> {
    /// `bbox` is the geographic box the mask grid was built for.
    pub fn new(accessor: &'a A, mask: &'a FieldMask, bbox: Bbox, options: ExtractionOptions) -> Self {
        Self {
            accessor,
            mask,
            bbox,
            options,
        }
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Fraction of field pixels flagged as cloud in `scene`.
    ///
    /// `0.0` when no quality band applies. A quality band that exists but
    /// cannot be read, or comes back on the wrong grid, counts as fully
    /// clouded.
    pub fn cloud_fraction(&self, scene: &Scene) -> f64 {
        let Some(band) = self.options.quality_band.as_deref() else {
            return 0.0;
        };
        if !scene.has_asset(band) {
            return 0.0;
        }

        let quality = match self
            .accessor
            .read_band(scene, band, &self.bbox, Some(self.mask.shape()))
        {
            Ok(quality) => quality,
            Err(e) => {
                warn!("Failed to read {} for {}: {}", band, scene.id, e);
                return 1.0;
            }
        };
        self.options
            .cloud_classes
            .masked_cloud_fraction(&quality.view(), &self.mask.view())
            .unwrap_or_else(|| {
                warn!(
                    "{} of {} has shape {:?}, expected {:?}",
                    band,
                    scene.id,
                    quality.dim(),
                    self.mask.shape()
                );
                1.0
            })
    }

    /// Gate and reduce a single scene.
    pub fn extract_scene(
        &self,
        scene: &Scene,
        signal: &Signal,
    ) -> Result<SceneOutcome, ExtractionError> {
        let cloud_fraction = self.cloud_fraction(scene);
        if cloud_fraction > self.options.max_cloud_fraction {
            info!(
                "Skipping {} ({}): cloud fraction {:.2} > {:.2}",
                scene.id,
                scene.date(),
                cloud_fraction,
                self.options.max_cloud_fraction
            );
            return Ok(SceneOutcome::Cloudy { cloud_fraction });
        }

        let data = signal.read(self.accessor, scene, &self.bbox, self.mask.shape())?;
        let stats =
            compute_field_statistics(&data.view(), &self.mask.view(), &self.options.percentiles)?;

        match TimeseriesPoint::from_statistics(scene.date(), &stats, cloud_fraction, &scene.id) {
            Some(point) => Ok(SceneOutcome::Accepted(point)),
            None => {
                debug!("Skipping {}: no valid {} pixels in field", scene.id, signal);
                Ok(SceneOutcome::Empty)
            }
        }
    }

    fn accept(&self, scene: &Scene, signal: &Signal) -> Option<TimeseriesPoint> {
        match self.extract_scene(scene, signal) {
            Ok(SceneOutcome::Accepted(point)) => Some(point),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping {} ({}): {}", scene.id, scene.date(), e);
                None
            }
        }
    }

    /// One point per accepted scene, in the order of `scenes`.
    pub fn extract(&self, scenes: &[Scene], signal: &Signal) -> Vec<TimeseriesPoint> {
        let total = scenes.len();
        let points: Vec<TimeseriesPoint> = scenes
            .iter()
            .enumerate()
            .filter_map(|(i, scene)| {
                debug!("Processing scene {}/{}: {}", i + 1, total, scene.id);
                self.accept(scene, signal)
            })
            .collect();
        info!("Extracted {} of {} scenes for {}", points.len(), total, signal);
        points
    }

    /// Several indices per scene under a single cloud gate.
    ///
    /// Every band any index needs is read once. A scene yields a row when at
    /// least one index has a valid field mean.
    pub fn extract_indices_scene(
        &self,
        scene: &Scene,
        indices: &[SpectralIndex],
    ) -> Result<Option<MultiIndexRow>, ExtractionError> {
        let cloud_fraction = self.cloud_fraction(scene);
        if cloud_fraction > self.options.max_cloud_fraction {
            info!(
                "Skipping {} ({}): cloud fraction {:.2} > {:.2}",
                scene.id,
                scene.date(),
                cloud_fraction,
                self.options.max_cloud_fraction
            );
            return Ok(None);
        }

        let shape = self.mask.shape();
        let mut bands: HashMap<&str, Array2<f64>> = HashMap::new();
        for index in indices {
            for &key in index.required_bands() {
                if !bands.contains_key(key) {
                    let band = self.accessor.read_band(scene, key, &self.bbox, Some(shape))?;
                    bands.insert(key, band);
                }
            }
        }

        let mut values = BTreeMap::new();
        for index in indices {
            let data = index.compute(|key| bands.get(key).map(|b| b.view()))?;
            let stats = compute_field_statistics(&data.view(), &self.mask.view(), &[])?;
            if let Some(mean) = stats.mean {
                values.insert(*index, mean);
            }
        }

        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(MultiIndexRow {
            date: scene.date(),
            scene_id: scene.id.clone(),
            cloud_fraction,
            values,
        }))
    }

    pub fn extract_indices(&self, scenes: &[Scene], indices: &[SpectralIndex]) -> Vec<MultiIndexRow> {
        scenes
            .iter()
            .filter_map(|scene| match self.extract_indices_scene(scene, indices) {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping {} ({}): {}", scene.id, scene.date(), e);
                    None
                }
            })
            .collect()
    }
}

impl<A: RasterAccessor + Sync + ?Sized> FieldExtractor<'_, A> {
    /// [`extract`](Self::extract) with scenes reduced in parallel.
    ///
    /// Output order still follows `scenes`.
    pub fn par_extract(&self, scenes: &[Scene], signal: &Signal) -> Vec<TimeseriesPoint> {
        let points: Vec<TimeseriesPoint> = scenes
            .par_iter()
            .filter_map(|scene| self.accept(scene, signal))
            .collect();
        info!(
            "Extracted {} of {} scenes for {}",
            points.len(),
            scenes.len(),
            signal
        );
        points
    }
}

/// Reduce chronologically ordered `scenes` to a field time series.
pub fn extract_field_timeseries<A: RasterAccessor + ?Sized>(
    scenes: &[Scene],
    accessor: &A,
    signal: &Signal,
    mask: &FieldMask,
    bbox: &Bbox,
    options: ExtractionOptions,
) -> Vec<TimeseriesPoint> {
    FieldExtractor::new(accessor, mask, *bbox, options).extract(scenes, signal)
}
