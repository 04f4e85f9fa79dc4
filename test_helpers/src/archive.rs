//! In-memory scene archive implementing both collaborator traits.

use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use shared::indices::sentinel2;
use shared::scene::resample_nearest;
use shared::{Bbox, CatalogError, RasterAccessor, RasterError, Scene, SceneCatalog, SceneQuery};
use std::collections::HashMap;
use std::sync::Mutex;

/// What a band read returns.
#[derive(Debug, Clone)]
pub enum BandSource {
    /// Every pixel has this value.
    Constant(f64),
    /// A fixed raster, nearest-neighbour resampled to the requested shape.
    Array(Array2<f64>),
    /// The read fails with this reason.
    Fail(String),
}

/// Scenes and bands held in memory.
///
/// Reads and searches are recorded so tests can check what the pipeline
/// actually fetched.
#[derive(Debug)]
pub struct SyntheticArchive {
    scenes: Vec<Scene>,
    bands: HashMap<(String, String), BandSource>,
    native_shape: (usize, usize),
    failing_page: Option<usize>,
    reads: Mutex<Vec<(String, String)>>,
    searches: Mutex<Vec<SceneQuery>>,
}

impl SyntheticArchive {
    /// Empty archive whose rasters are `native_shape` unless resampled.
    pub fn new(native_shape: (usize, usize)) -> Self {
        Self {
            scenes: Vec::new(),
            bands: HashMap::new(),
            native_shape,
            failing_page: None,
            reads: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn add_scene(&mut self, scene: Scene) -> &mut Self {
        self.scenes.push(scene);
        self
    }

    pub fn set_band(&mut self, scene_id: &str, band: &str, source: BandSource) -> &mut Self {
        self.bands
            .insert((scene_id.to_string(), band.to_string()), source);
        self
    }

    /// Searches for this page index fail.
    pub fn fail_on_page(&mut self, page: usize) -> &mut Self {
        self.failing_page = Some(page);
        self
    }

    /// Add a Sentinel-2 scene whose field NDVI is `ndvi` everywhere and whose
    /// quality band is the constant class `scl`.
    pub fn add_ndvi_scene(&mut self, id: &str, date: NaiveDate, ndvi: f64, scl: f64) -> &mut Self {
        let red = 1000.0;
        let nir = red * (1.0 + ndvi) / (1.0 - ndvi);
        self.add_scene(optical_scene(id, date));
        self.set_band(id, sentinel2::RED, BandSource::Constant(red));
        self.set_band(id, sentinel2::NIR, BandSource::Constant(nir));
        self.set_band(id, sentinel2::SCL, BandSource::Constant(scl))
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// `(scene_id, band)` of every read so far, in call order.
    pub fn reads(&self) -> Vec<(String, String)> {
        self.reads.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of reads of `band` across all scenes.
    pub fn read_count(&self, band: &str) -> usize {
        self.reads().iter().filter(|(_, b)| b == band).count()
    }

    pub fn searches(&self) -> Vec<SceneQuery> {
        self.searches.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Noon UTC on `date`.
pub fn at_noon(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(12, 0, 0)
        .expect("noon is a valid time")
        .and_utc()
}

/// A Sentinel-2 L2A scene carrying the usual reflectance and SCL assets.
pub fn optical_scene(id: &str, date: NaiveDate) -> Scene {
    Scene::new(id, sentinel2::COLLECTION, at_noon(date)).with_assets([
        sentinel2::BLUE,
        sentinel2::GREEN,
        sentinel2::RED,
        sentinel2::RED_EDGE,
        sentinel2::NIR,
        sentinel2::SWIR,
        sentinel2::SCL,
    ])
}

impl RasterAccessor for SyntheticArchive {
    fn read_band(
        &self,
        scene: &Scene,
        band: &str,
        _bbox: &Bbox,
        out_shape: Option<(usize, usize)>,
    ) -> Result<Array2<f64>, RasterError> {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push((scene.id.clone(), band.to_string()));
        }
        let shape = out_shape.unwrap_or(self.native_shape);
        match self.bands.get(&(scene.id.clone(), band.to_string())) {
            Some(BandSource::Constant(v)) => Ok(Array2::from_elem(shape, *v)),
            Some(BandSource::Array(a)) => Ok(resample_nearest(a, shape)),
            Some(BandSource::Fail(reason)) => Err(RasterError::Read {
                scene: scene.id.clone(),
                asset: band.to_string(),
                reason: reason.clone(),
            }),
            None => Err(RasterError::MissingAsset {
                scene: scene.id.clone(),
                asset: band.to_string(),
            }),
        }
    }
}

impl SceneCatalog for SyntheticArchive {
    fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>, CatalogError> {
        if let Ok(mut searches) = self.searches.lock() {
            searches.push(query.clone());
        }
        if self.failing_page == Some(query.page) {
            return Err(CatalogError::Request(format!("page {} unavailable", query.page)));
        }

        Ok(query.apply(&self.scenes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::SortOrder;
    use ndarray::array;
    use shared::indices::ndvi;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_ndvi_scene_round_trips_index() {
        let mut archive = SyntheticArchive::new((4, 4));
        archive.add_ndvi_scene("a", date(5, 1), 0.6, 4.0);
        let scene = &archive.scenes()[0];
        let bbox = Bbox::around(0.0, 0.0, 0.01);
        let red = archive.read_band(scene, sentinel2::RED, &bbox, None).unwrap();
        let nir = archive.read_band(scene, sentinel2::NIR, &bbox, None).unwrap();
        let index = ndvi(&nir.view(), &red.view()).unwrap();
        assert_relative_eq!(index[[0, 0]], 0.6, epsilon = 1e-12);
        assert_eq!(archive.read_count(sentinel2::RED), 1);
    }

    #[test]
    fn test_array_band_is_resampled() {
        let mut archive = SyntheticArchive::new((2, 2));
        archive.add_scene(optical_scene("a", date(5, 1)));
        archive.set_band("a", sentinel2::RED, BandSource::Array(array![[1.0, 2.0], [3.0, 4.0]]));
        let scene = &archive.scenes()[0];
        let bbox = Bbox::around(0.0, 0.0, 0.01);
        let out = archive.read_band(scene, sentinel2::RED, &bbox, Some((4, 4))).unwrap();
        assert_eq!(out[[3, 3]], 4.0);
        assert_eq!(out[[0, 3]], 2.0);
    }

    #[test]
    fn test_search_paging_and_order() {
        let mut archive = SyntheticArchive::new((2, 2));
        for d in 1..=5 {
            archive.add_scene(optical_scene(&format!("s{d}"), date(1, d)));
        }
        let bbox = Bbox::around(0.0, 0.0, 0.01);
        let query = SceneQuery::new(sentinel2::COLLECTION, bbox).with_limit(2);

        let first = archive.search(&query).unwrap();
        assert_eq!(first.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["s1", "s2"]);
        let last = archive.search(&query.clone().with_page(2)).unwrap();
        assert_eq!(last.len(), 1);

        let newest = archive
            .search(&query.clone().with_sort(SortOrder::Descending))
            .unwrap();
        assert_eq!(newest[0].id, "s5");
        assert_eq!(archive.searches().len(), 3);
    }

    #[test]
    fn test_missing_and_failing_bands() {
        let mut archive = SyntheticArchive::new((2, 2));
        archive.add_scene(optical_scene("x", date(2, 1)));
        archive.set_band("x", sentinel2::SCL, BandSource::Fail("corrupt".into()));
        let scene = archive.scenes()[0].clone();
        let bbox = Bbox::around(0.0, 0.0, 0.01);

        assert!(matches!(
            archive.read_band(&scene, sentinel2::SCL, &bbox, None),
            Err(RasterError::Read { .. })
        ));
        assert!(matches!(
            archive.read_band(&scene, sentinel2::RED, &bbox, None),
            Err(RasterError::MissingAsset { .. })
        ));
    }
}
