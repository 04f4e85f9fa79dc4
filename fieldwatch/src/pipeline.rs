//! End-to-end analysis of one field.
//!
//! boundary → bbox → chronological scenes → reference grid → mask →
//! extraction → summary. The reference grid is the native shape of the first
//! scene's reference band, falling back to a per-signal default when that
//! read fails, and takes its CRS from the scene's EPSG code.

use crate::catalog::{collect_scenes, latest_scenes};
use crate::conditions::{ConditionsRun, CurrentConditions};
use crate::config_storage::{AnalysisConfig, GridDefaults};
use crate::extraction::{index_summary, ExtractionOptions, FieldExtractor, MultiIndexRow, Signal};
use crate::phenology::{detect_seasons_from_points, PhenologyConfig, PhenologyError, Season};
use crate::selection::{select_best_scene, QualityBandClassifier, SceneSelection};
use chrono::NaiveDate;
use crop_math::bounds::METERS_PER_DEGREE;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use shared::indices::{chirps, landsat, sentinel2};
use shared::{
    Bbox, BoundaryShape, CatalogError, Crs, FieldBoundary, FieldMask, GridSpec, MaskError,
    RasterAccessor, Scene, SceneCatalog, SpectralIndex, TimeseriesPoint, TimeseriesSummary,
};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("failed to build field mask: {0}")]
    Mask(#[from] MaskError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
}

/// The sensor product a field series is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// A Sentinel-2 vegetation index.
    Vegetation(SpectralIndex),
    /// Landsat land surface temperature in degrees Celsius.
    LandSurfaceTemperature,
    /// CHIRPS daily rainfall in mm.
    Rainfall,
}

impl SignalKind {
    pub fn collection(&self) -> &'static str {
        match self {
            SignalKind::Vegetation(_) => sentinel2::COLLECTION,
            SignalKind::LandSurfaceTemperature => landsat::COLLECTION,
            SignalKind::Rainfall => chirps::COLLECTION,
        }
    }

    pub fn signal(&self) -> Signal {
        match self {
            SignalKind::Vegetation(index) => Signal::Index(*index),
            SignalKind::LandSurfaceTemperature => Signal::land_surface_temperature(),
            SignalKind::Rainfall => Signal::rainfall(),
        }
    }

    /// Band whose native shape defines the analysis grid.
    pub fn reference_band(&self) -> &'static str {
        match self {
            SignalKind::Vegetation(_) => sentinel2::RED,
            SignalKind::LandSurfaceTemperature => landsat::SURFACE_TEMPERATURE,
            SignalKind::Rainfall => chirps::RAINFALL,
        }
    }

    pub fn options(&self, config: &AnalysisConfig) -> ExtractionOptions {
        match self {
            SignalKind::Vegetation(_) => {
                ExtractionOptions::optical().with_max_cloud_fraction(config.gates.optical)
            }
            SignalKind::LandSurfaceTemperature => {
                ExtractionOptions::thermal().with_max_cloud_fraction(config.gates.thermal)
            }
            SignalKind::Rainfall => {
                ExtractionOptions::rainfall().with_max_cloud_fraction(config.gates.rainfall)
            }
        }
    }

    pub fn default_shape(&self, grids: &GridDefaults) -> (usize, usize) {
        match self {
            SignalKind::Vegetation(_) => grids.optical_shape,
            SignalKind::LandSurfaceTemperature => grids.thermal_shape,
            SignalKind::Rainfall => grids.rainfall_shape,
        }
    }

    /// Bbox padding as a multiple of the field radius.
    pub fn padding(&self, grids: &GridDefaults) -> f64 {
        match self {
            SignalKind::Vegetation(_) => grids.optical_padding,
            SignalKind::LandSurfaceTemperature => grids.thermal_padding,
            SignalKind::Rainfall => grids.rainfall_padding,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Vegetation(index) => write!(f, "{index}"),
            SignalKind::LandSurfaceTemperature => f.write_str("lst"),
            SignalKind::Rainfall => f.write_str("rainfall"),
        }
    }
}

impl FromStr for SignalKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lst" => Ok(SignalKind::LandSurfaceTemperature),
            "rainfall" => Ok(SignalKind::Rainfall),
            other => other
                .parse()
                .map(SignalKind::Vegetation)
                .map_err(|_| PipelineError::UnknownSignal(s.to_string())),
        }
    }
}

/// Radius of the field in the meridian metric of [`Bbox::for_radius`].
///
/// For polygons this is the farthest vertex from the centroid, so the
/// padded box always contains the whole ring.
pub fn field_radius_m(boundary: &FieldBoundary) -> f64 {
    if let BoundaryShape::Circular { radius_m, .. } = boundary.shape() {
        return *radius_m;
    }
    let center = boundary.centroid();
    boundary
        .ring()
        .iter()
        .map(|c| (c.x - center.lon).hypot(c.y - center.lat) * METERS_PER_DEGREE)
        .fold(0.0, f64::max)
}

/// A field's series for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnalysis {
    pub signal: SignalKind,
    pub boundary: FieldBoundary,
    pub bbox: Bbox,
    /// Grid the mask was built on; `None` when no scene was found.
    pub grid: Option<GridSpec>,
    pub mask_pixels: usize,
    pub scenes_found: usize,
    pub points: Vec<TimeseriesPoint>,
    pub summary: TimeseriesSummary,
}

impl FieldAnalysis {
    pub fn seasons(&self, config: &PhenologyConfig) -> Result<Vec<Season>, PhenologyError> {
        detect_seasons_from_points(&self.points, config)
    }
}

/// Several vegetation indices of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiIndexAnalysis {
    pub boundary: FieldBoundary,
    pub bbox: Bbox,
    pub grid: Option<GridSpec>,
    pub scenes_found: usize,
    pub rows: Vec<MultiIndexRow>,
    pub summary: BTreeMap<SpectralIndex, TimeseriesSummary>,
}

/// Runs field analyses against one catalog and raster accessor.
pub struct FieldAnalyzer<'a, C: ?Sized, A: ?Sized> {
    catalog: &'a C,
    accessor: &'a A,
    config: AnalysisConfig,
    parallel: bool,
}

impl<'a, C, A> FieldAnalyzer<'a, C, A>
where
    C: SceneCatalog + ?Sized,
    A: RasterAccessor + Sync + ?Sized,
{
    pub fn new(catalog: &'a C, accessor: &'a A, config: AnalysisConfig) -> Self {
        Self {
            catalog,
            accessor,
            config,
            parallel: false,
        }
    }

    /// Reduce scenes in parallel. Point order is unaffected.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Query box around the field for `kind`.
    pub fn bbox_for(&self, boundary: &FieldBoundary, kind: SignalKind) -> Bbox {
        let center = boundary.centroid();
        Bbox::for_radius(
            center.lat,
            center.lon,
            field_radius_m(boundary),
            kind.padding(&self.config.grids),
        )
    }

    /// Grid of the first scene's reference band.
    ///
    /// Rainfall rasters are always treated as geographic.
    pub fn reference_grid(&self, first: &Scene, kind: SignalKind, bbox: &Bbox) -> GridSpec {
        let shape = match self
            .accessor
            .read_band(first, kind.reference_band(), bbox, None)
        {
            Ok(band) => band.dim(),
            Err(e) => {
                let fallback = kind.default_shape(&self.config.grids);
                warn!("Error reading reference band: {}. Using {:?}", e, fallback);
                fallback
            }
        };
        let crs = match kind {
            SignalKind::Rainfall => Crs::Wgs84,
            _ => first.crs(),
        };
        info!("Reference grid {:?} in EPSG:{}", shape, crs.epsg());
        GridSpec::new(shape, *bbox, crs)
    }

    fn prepare(
        &self,
        boundary: &FieldBoundary,
        kind: SignalKind,
        date_range: (NaiveDate, NaiveDate),
    ) -> Result<(Bbox, Vec<Scene>, Option<FieldMask>), PipelineError> {
        info!(
            "Analyzing {} for field at ({:.5}, {:.5}), {:.2} ha, {} to {}",
            kind,
            boundary.centroid().lat,
            boundary.centroid().lon,
            boundary.area_ha(),
            date_range.0,
            date_range.1
        );
        let bbox = self.bbox_for(boundary, kind);
        let scenes = collect_scenes(
            self.catalog,
            &[kind.collection()],
            &bbox,
            date_range,
            &self.config.catalog,
        );
        let Some(first) = scenes.first() else {
            info!("No scenes found");
            return Ok((bbox, scenes, None));
        };

        let grid = self.reference_grid(first, kind, &bbox);
        let mask = FieldMask::create(boundary, grid)?;
        info!("Field mask coverage: {:.1}%", mask.coverage() * 100.0);
        if mask.is_empty() {
            warn!("Field mask has no pixels, every scene will be empty");
        }
        Ok((bbox, scenes, Some(mask)))
    }

    /// Series of `kind` over the field within the inclusive date range.
    pub fn analyze(
        &self,
        boundary: &FieldBoundary,
        kind: SignalKind,
        date_range: (NaiveDate, NaiveDate),
    ) -> Result<FieldAnalysis, PipelineError> {
        let (bbox, scenes, mask) = self.prepare(boundary, kind, date_range)?;

        let points = match &mask {
            Some(mask) => {
                let extractor =
                    FieldExtractor::new(self.accessor, mask, bbox, kind.options(&self.config));
                if self.parallel {
                    extractor.par_extract(&scenes, &kind.signal())
                } else {
                    extractor.extract(&scenes, &kind.signal())
                }
            }
            None => Vec::new(),
        };

        Ok(FieldAnalysis {
            signal: kind,
            boundary: boundary.clone(),
            bbox,
            grid: mask.as_ref().map(|m| *m.grid()),
            mask_pixels: mask.as_ref().map_or(0, FieldMask::pixel_count),
            scenes_found: scenes.len(),
            summary: TimeseriesSummary::from_points(&points),
            points,
        })
    }

    /// Several vegetation indices per scene under the optical gate.
    pub fn analyze_indices(
        &self,
        boundary: &FieldBoundary,
        indices: &[SpectralIndex],
        date_range: (NaiveDate, NaiveDate),
    ) -> Result<MultiIndexAnalysis, PipelineError> {
        let kind = SignalKind::Vegetation(SpectralIndex::Ndvi);
        let (bbox, scenes, mask) = self.prepare(boundary, kind, date_range)?;

        let rows = match &mask {
            Some(mask) => {
                FieldExtractor::new(self.accessor, mask, bbox, kind.options(&self.config))
                    .extract_indices(&scenes, indices)
            }
            None => Vec::new(),
        };
        let summary = indices
            .iter()
            .map(|&index| (index, index_summary(&rows, index)))
            .collect();

        Ok(MultiIndexAnalysis {
            boundary: boundary.clone(),
            bbox,
            grid: mask.as_ref().map(|m| *m.grid()),
            scenes_found: scenes.len(),
            rows,
            summary,
        })
    }

    /// Most recent usable Sentinel-2 scene over `bbox`.
    pub fn latest_scene(&self, bbox: &Bbox) -> Result<SceneSelection, PipelineError> {
        let candidates = latest_scenes(
            self.catalog,
            sentinel2::COLLECTION,
            bbox,
            self.config.selection.lookback,
        )?;
        let classifier = QualityBandClassifier::sentinel2(self.accessor, *bbox);
        Ok(select_best_scene(
            &candidates,
            &classifier,
            self.config.selection.threshold_pct,
        ))
    }

    /// Newest vegetation, temperature, flood and rainfall state of a field.
    ///
    /// All layers share the optical bbox and the grid of the selected
    /// Sentinel-2 scene. NDVI falls back to Landsat surface reflectance when
    /// the selected scene is too cloudy or yields no vegetation.
    pub fn current_conditions(
        &self,
        boundary: &FieldBoundary,
    ) -> Result<CurrentConditions, PipelineError> {
        let kind = SignalKind::Vegetation(SpectralIndex::Ndvi);
        let bbox = self.bbox_for(boundary, kind);
        info!(
            "Current conditions for field at ({:.5}, {:.5})",
            boundary.centroid().lat,
            boundary.centroid().lon
        );

        let selection = self.latest_scene(&bbox)?;
        let grid = match &selection.selected {
            Some(selected) => self.reference_grid(&selected.scene, kind, &bbox),
            None => {
                info!("No Sentinel-2 scene found");
                GridSpec::new(kind.default_shape(&self.config.grids), bbox, Crs::Wgs84)
            }
        };

        let mut run = ConditionsRun::new(self.catalog, self.accessor, boundary, bbox, grid.shape());
        let mut vegetation = match &selection.selected {
            Some(selected) => run.sentinel2(selected)?,
            None => None,
        };
        let too_cloudy = selection
            .selected_cloud()
            .map_or(false, |pct| pct > self.config.selection.landsat_fallback_pct);
        if vegetation.is_none() || too_cloudy {
            info!("Trying Landsat SR for NDVI");
            if let Some(landsat) = run.landsat_ndvi(selection.selected_cloud())? {
                vegetation = Some(landsat);
            }
        }

        let temperature = run.temperature()?;
        let flood = run.flood()?;
        let rainfall = run.rainfall()?;

        Ok(CurrentConditions {
            boundary: boundary.clone(),
            bbox,
            grid,
            vegetation,
            temperature,
            flood,
            rainfall,
            masks_built: run.masks_built(),
        })
    }
}
