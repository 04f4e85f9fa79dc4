//! Snapshot of a field from the newest imagery of each sensor.
//!
//! Every layer is read over one bbox and resampled to one reference shape,
//! the native shape of the selected Sentinel-2 red band. Layers whose scenes
//! come in different CRSs get their own field mask, drawn from a
//! [`MaskCache`] so each distinct grid is rasterised once.

use crate::catalog::latest_scenes;
use crate::extraction::{ExtractionOptions, FieldExtractor, Signal};
use crate::rainfall::{RainfallRasters, LONG_WINDOW_DAYS};
use crate::selection::ScoredScene;
use crate::thermal::{compute_lst_baseline, lst_anomaly, sort_by_cloud_cover};
use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use shared::indices::{
    chirps, landsat, landsat_sr, landsat_sr_reflectance, ndvi, sentinel1,
};
use shared::{
    compute_field_statistics, compute_flood_mask, Bbox, Crs, FieldBoundary, FieldMask,
    FieldStatistics, GridSpec, MaskCache, MaskError, RasterAccessor, RasterError, Scene,
    SceneCatalog, SpectralIndex, DEFAULT_PERCENTILES,
};
use std::collections::BTreeMap;

/// Indices reported for a Sentinel-2 snapshot. NDVI alone is reported
/// when a scene lacks the red-edge band.
pub const CONDITION_INDICES: [SpectralIndex; 2] = [SpectralIndex::Ndvi, SpectralIndex::Ndre];

/// Newest Landsat surface temperature scenes compared for cloud cover.
pub const LST_LOOKBACK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NdviSource {
    Sentinel2,
    Landsat,
}

/// Vegetation indices of the field from one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationSnapshot {
    pub source: NdviSource,
    pub scene_id: String,
    pub date: NaiveDate,
    /// Cloud percentage of the selected Sentinel-2 scene over the bbox.
    pub scene_cloud_pct: Option<f64>,
    /// Cloud fraction over the field pixels; Sentinel-2 only.
    pub field_cloud_fraction: Option<f64>,
    /// Field mean per index.
    pub indices: BTreeMap<SpectralIndex, f64>,
}

impl VegetationSnapshot {
    pub fn ndvi(&self) -> Option<f64> {
        self.indices.get(&SpectralIndex::Ndvi).copied()
    }
}

/// Land surface temperature of the field and its departure from the
/// same month of earlier years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSnapshot {
    pub scene_id: String,
    pub date: NaiveDate,
    pub celsius: FieldStatistics,
    /// `None` when no baseline could be built.
    pub anomaly: Option<FieldStatistics>,
    pub baseline_scenes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodSnapshot {
    pub scene_id: String,
    pub date: NaiveDate,
    /// Fraction of field pixels classified as water or flooded vegetation.
    pub field_fraction: f64,
    /// Same fraction over the whole bbox.
    pub area_fraction: f64,
    pub risk: FieldStatistics,
}

/// Field-mean rainfall totals in mm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainfallSnapshot {
    /// Daily rasters that could be read.
    pub days: usize,
    pub latest_date: NaiveDate,
    pub daily_mm: Option<f64>,
    pub short_total_mm: Option<f64>,
    pub long_total_mm: Option<f64>,
}

/// Everything known about a field right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub boundary: FieldBoundary,
    pub bbox: Bbox,
    /// Reference grid of the snapshot.
    pub grid: GridSpec,
    pub vegetation: Option<VegetationSnapshot>,
    pub temperature: Option<TemperatureSnapshot>,
    pub flood: Option<FloodSnapshot>,
    pub rainfall: Option<RainfallSnapshot>,
    /// Distinct grids the field was rasterised onto.
    pub masks_built: usize,
}

fn field_stats(data: &Array2<f64>, mask: &FieldMask, what: &str) -> Option<FieldStatistics> {
    match compute_field_statistics(&data.view(), &mask.view(), &DEFAULT_PERCENTILES) {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Could not summarise {}: {}", what, e);
            None
        }
    }
}

/// Reads the per-sensor layers of one snapshot.
pub(crate) struct ConditionsRun<'a, C: ?Sized, A: ?Sized> {
    catalog: &'a C,
    accessor: &'a A,
    bbox: Bbox,
    shape: (usize, usize),
    masks: MaskCache,
}

impl<'a, C, A> ConditionsRun<'a, C, A>
where
    C: SceneCatalog + ?Sized,
    A: RasterAccessor + ?Sized,
{
    pub(crate) fn new(
        catalog: &'a C,
        accessor: &'a A,
        boundary: &FieldBoundary,
        bbox: Bbox,
        shape: (usize, usize),
    ) -> Self {
        Self {
            catalog,
            accessor,
            bbox,
            shape,
            masks: MaskCache::new(boundary.clone()),
        }
    }

    pub(crate) fn masks_built(&self) -> usize {
        self.masks.len()
    }

    fn mask(&mut self, crs: Crs) -> Result<FieldMask, MaskError> {
        self.masks
            .get_or_create(GridSpec::new(self.shape, self.bbox, crs))
            .cloned()
    }

    fn read(&self, scene: &Scene, band: &str) -> Result<Array2<f64>, RasterError> {
        self.accessor
            .read_band(scene, band, &self.bbox, Some(self.shape))
    }

    fn newest(&self, collection: &str, limit: usize) -> Vec<Scene> {
        latest_scenes(self.catalog, collection, &self.bbox, limit).unwrap_or_else(|e| {
            warn!("Search for {} failed: {}", collection, e);
            Vec::new()
        })
    }

    /// Indices of the selected Sentinel-2 scene, never cloud gated.
    pub(crate) fn sentinel2(
        &mut self,
        selected: &ScoredScene,
    ) -> Result<Option<VegetationSnapshot>, MaskError> {
        let scene = &selected.scene;
        let mask = self.mask(scene.crs())?;
        let options = ExtractionOptions::optical().with_max_cloud_fraction(1.0);
        let extractor = FieldExtractor::new(self.accessor, &mask, self.bbox, options);
        let extracted = extractor
            .extract_indices_scene(scene, &CONDITION_INDICES)
            .or_else(|e| {
                warn!("Falling back to NDVI only for {}: {}", scene.id, e);
                extractor.extract_indices_scene(scene, &[SpectralIndex::Ndvi])
            });
        let row = match extracted {
            Ok(Some(row)) => row,
            Ok(None) => {
                info!("No valid vegetation pixels in {}", scene.id);
                return Ok(None);
            }
            Err(e) => {
                warn!("Could not read vegetation from {}: {}", scene.id, e);
                return Ok(None);
            }
        };
        Ok(Some(VegetationSnapshot {
            source: NdviSource::Sentinel2,
            scene_id: scene.id.clone(),
            date: scene.date(),
            scene_cloud_pct: Some(selected.cloud_pct),
            field_cloud_fraction: Some(row.cloud_fraction),
            indices: row.values,
        }))
    }

    /// NDVI from the newest Landsat surface reflectance scene.
    pub(crate) fn landsat_ndvi(
        &mut self,
        scene_cloud_pct: Option<f64>,
    ) -> Result<Option<VegetationSnapshot>, MaskError> {
        let Some(scene) = self.newest(landsat_sr::COLLECTION, 1).into_iter().next() else {
            info!("No Landsat SR scene for the NDVI fallback");
            return Ok(None);
        };
        info!("Landsat SR scene: {}", scene.id);

        let bands = self
            .read(&scene, landsat_sr::RED)
            .and_then(|red| Ok((red, self.read(&scene, landsat_sr::NIR)?)));
        let (red, nir) = match bands {
            Ok(bands) => bands,
            Err(e) => {
                warn!("Error computing Landsat SR NDVI: {}", e);
                return Ok(None);
            }
        };
        let red = red.mapv(landsat_sr_reflectance);
        let nir = nir.mapv(landsat_sr_reflectance);
        let index = match ndvi(&nir.view(), &red.view()) {
            Ok(index) => index,
            Err(e) => {
                warn!("Error computing Landsat SR NDVI: {}", e);
                return Ok(None);
            }
        };

        let mask = self.mask(scene.crs())?;
        let Some(mean) = field_stats(&index, &mask, "Landsat NDVI").and_then(|s| s.mean) else {
            return Ok(None);
        };
        info!("Using Landsat SR for NDVI");
        Ok(Some(VegetationSnapshot {
            source: NdviSource::Landsat,
            scene_id: scene.id.clone(),
            date: scene.date(),
            scene_cloud_pct,
            field_cloud_fraction: None,
            indices: BTreeMap::from([(SpectralIndex::Ndvi, mean)]),
        }))
    }

    /// Clearest of the newest LST scenes and its anomaly.
    pub(crate) fn temperature(&mut self) -> Result<Option<TemperatureSnapshot>, MaskError> {
        let mut candidates = self.newest(landsat::COLLECTION, LST_LOOKBACK);
        sort_by_cloud_cover(&mut candidates);
        let Some(scene) = candidates.into_iter().next() else {
            info!("No Landsat LST data found");
            return Ok(None);
        };
        info!(
            "Landsat LST scene: {} (cloud {:?}%)",
            scene.id, scene.cloud_cover
        );

        let celsius = match Signal::land_surface_temperature().read(
            self.accessor,
            &scene,
            &self.bbox,
            self.shape,
        ) {
            Ok(celsius) => celsius,
            Err(e) => {
                warn!("Could not read LST for {}: {}", scene.id, e);
                return Ok(None);
            }
        };
        let mask = self.mask(scene.crs())?;
        let Some(current) = field_stats(&celsius, &mask, "LST") else {
            return Ok(None);
        };

        let date = scene.date();
        let baseline = compute_lst_baseline(
            self.catalog,
            self.accessor,
            &self.bbox,
            Some(self.shape),
            date.year(),
            date.month(),
        )
        .unwrap_or_else(|e| {
            warn!("LST baseline failed: {}", e);
            None
        });
        let anomaly = baseline
            .as_ref()
            .and_then(|b| lst_anomaly(&celsius.view(), b))
            .and_then(|a| field_stats(&a, &mask, "LST anomaly"));
        if let Some(mean) = anomaly.as_ref().and_then(|a| a.mean) {
            info!("LST anomaly: mean {:+.1} C", mean);
        }

        Ok(Some(TemperatureSnapshot {
            scene_id: scene.id.clone(),
            date,
            celsius: current,
            anomaly,
            baseline_scenes: baseline.map(|b| b.scene_ids).unwrap_or_default(),
        }))
    }

    /// Flood classification of the newest Sentinel-1 scene.
    pub(crate) fn flood(&mut self) -> Result<Option<FloodSnapshot>, MaskError> {
        let Some(scene) = self.newest(sentinel1::COLLECTION, 1).into_iter().next() else {
            info!("No Sentinel-1 data found");
            return Ok(None);
        };
        let bands = self
            .read(&scene, sentinel1::VV)
            .and_then(|vv| Ok((vv, self.read(&scene, sentinel1::VH)?)));
        let (vv, vh) = match bands {
            Ok(bands) => bands,
            Err(e) => {
                warn!("Could not read backscatter for {}: {}", scene.id, e);
                return Ok(None);
            }
        };
        let assessment = match compute_flood_mask(&vv.view(), &vh.view()) {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!("Flood detection failed for {}: {}", scene.id, e);
                return Ok(None);
            }
        };

        let mask = self.mask(scene.crs())?;
        if assessment.mask.dim() != mask.shape() {
            warn!(
                "Backscatter of {} is {:?}, expected {:?}",
                scene.id,
                assessment.mask.dim(),
                mask.shape()
            );
            return Ok(None);
        }
        let flooded = Zip::from(&assessment.mask)
            .and(&mask.view())
            .fold(0usize, |n, &water, &inside| n + usize::from(water && inside));
        let field_pixels = mask.pixel_count();
        let field_fraction = if field_pixels == 0 {
            0.0
        } else {
            flooded as f64 / field_pixels as f64
        };
        let Some(risk) = field_stats(&assessment.risk, &mask, "flood risk") else {
            return Ok(None);
        };
        info!(
            "Flood detection: {:.1}% of field, {:.1}% of area",
            field_fraction * 100.0,
            assessment.coverage() * 100.0
        );

        Ok(Some(FloodSnapshot {
            scene_id: scene.id.clone(),
            date: scene.date(),
            field_fraction,
            area_fraction: assessment.coverage(),
            risk,
        }))
    }

    /// 7 and 30 day totals over the newest daily rainfall rasters.
    pub(crate) fn rainfall(&mut self) -> Result<Option<RainfallSnapshot>, MaskError> {
        let mut scenes = self.newest(chirps::COLLECTION, LONG_WINDOW_DAYS as usize);
        scenes.reverse();

        let mut rasters = RainfallRasters::standard();
        let mut latest_date = None;
        for scene in &scenes {
            let pushed = self
                .read(scene, chirps::RAINFALL)
                .map_err(|e| e.to_string())
                .and_then(|day| rasters.push(day).map_err(|e| e.to_string()));
            match pushed {
                Ok(()) => latest_date = Some(scene.date()),
                Err(e) => warn!("Could not read rainfall for {}: {}", scene.id, e),
            }
        }
        let Some(latest_date) = latest_date else {
            info!("No rainfall data found");
            return Ok(None);
        };
        info!("Fetched {} days of rainfall data", rasters.days());

        let mask = self.mask(Crs::Wgs84)?;
        let mean = |raster: Option<&Array2<f64>>| {
            raster
                .and_then(|r| field_stats(r, &mask, "rainfall"))
                .and_then(|s| s.mean)
        };
        Ok(Some(RainfallSnapshot {
            days: rasters.days(),
            latest_date,
            daily_mm: mean(rasters.latest()),
            short_total_mm: mean(rasters.short_total()),
            long_total_mm: mean(rasters.long_total()),
        }))
    }
}
