//! Scene handles and the collaborator traits used to fetch them.
//!
//! The pipeline never talks to a catalog service or decodes imagery itself.
//! It goes through two narrow traits:
//!
//! - [`SceneCatalog`] returns candidate acquisitions for a query.
//! - [`RasterAccessor`] returns one band of one scene, clipped to a bbox and
//!   optionally resampled to a fixed shape.
//!
//! Implementations must be safe to call once per band with no shared
//! session state between calls.

use chrono::{DateTime, NaiveDate, Utc};
use crop_math::{Bbox, Crs};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single satellite acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Opaque handle passed back to the raster accessor.
    pub id: String,
    pub collection: String,
    pub acquired: DateTime<Utc>,
    /// Scene-wide cloud cover in percent, when the provider reports one.
    pub cloud_cover: Option<f64>,
    /// Native EPSG code of the scene's rasters.
    pub epsg: Option<u32>,
    /// Asset (band) keys available for this scene.
    pub assets: Vec<String>,
}

impl Scene {
    pub fn new(id: impl Into<String>, collection: impl Into<String>, acquired: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            acquired,
            cloud_cover: None,
            epsg: None,
            assets: Vec::new(),
        }
    }

    pub fn with_cloud_cover(mut self, percent: f64) -> Self {
        self.cloud_cover = Some(percent);
        self
    }

    pub fn with_epsg(mut self, epsg: u32) -> Self {
        self.epsg = Some(epsg);
        self
    }

    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets = assets.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_asset(&self, key: &str) -> bool {
        self.assets.iter().any(|a| a == key)
    }

    pub fn date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }

    /// CRS of the scene's rasters, geographic when unknown.
    pub fn crs(&self) -> Crs {
        self.epsg.map(Crs::from_epsg).unwrap_or(Crs::Wgs84)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Oldest first
    #[default]
    Ascending,
    /// Newest first
    Descending,
}

/// Parameters of a catalog search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneQuery {
    pub collections: Vec<String>,
    pub bbox: Bbox,
    /// Inclusive acquisition date range.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub limit: usize,
    /// Zero-based page index; results are `limit` per page.
    pub page: usize,
    pub sort: SortOrder,
    /// Only return scenes whose reported cloud cover is at most this value.
    pub max_cloud_cover: Option<f64>,
}

impl SceneQuery {
    pub fn new(collection: impl Into<String>, bbox: Bbox) -> Self {
        Self {
            collections: vec![collection.into()],
            bbox,
            date_range: None,
            limit: 100,
            page: 0,
            sort: SortOrder::Ascending,
            max_cloud_cover: None,
        }
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_max_cloud_cover(mut self, percent: f64) -> Self {
        self.max_cloud_cover = Some(percent);
        self
    }

    /// Whether `scene` passes the collection, date and cloud filters.
    ///
    /// A scene without a reported cloud cover is never filtered on it.
    pub fn matches(&self, scene: &Scene) -> bool {
        let collection = self.collections.is_empty() || self.collections.contains(&scene.collection);
        let dated = match self.date_range {
            Some((start, end)) => scene.date() >= start && scene.date() <= end,
            None => true,
        };
        let clear = match (self.max_cloud_cover, scene.cloud_cover) {
            (Some(max), Some(cover)) => cover <= max,
            _ => true,
        };
        collection && dated && clear
    }

    /// Run the query over an in-memory scene list: filter, sort and page.
    pub fn apply<'s, I>(&self, scenes: I) -> Vec<Scene>
    where
        I: IntoIterator<Item = &'s Scene>,
    {
        let mut matches: Vec<Scene> = scenes
            .into_iter()
            .filter(|s| self.matches(s))
            .cloned()
            .collect();
        matches.sort_by_key(|s| s.acquired);
        if self.sort == SortOrder::Descending {
            matches.reverse();
        }
        matches
            .into_iter()
            .skip(self.page * self.limit)
            .take(self.limit)
            .collect()
    }
}

/// Nearest-neighbour resample of `src` to `shape`.
///
/// For accessors whose rasters are stored on a fixed grid and must honour an
/// `out_shape` request.
pub fn resample_nearest(src: &Array2<f64>, shape: (usize, usize)) -> Array2<f64> {
    let (src_rows, src_cols) = src.dim();
    if (src_rows, src_cols) == shape || src.is_empty() {
        return src.clone();
    }
    Array2::from_shape_fn(shape, |(r, c)| {
        src[[r * src_rows / shape.0, c * src_cols / shape.1]]
    })
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RasterError {
    #[error("scene {scene} has no asset {asset}")]
    MissingAsset { scene: String, asset: String },
    #[error("failed to read {asset} of scene {scene}: {reason}")]
    Read {
        scene: String,
        asset: String,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(String),
    #[error("invalid catalog response: {0}")]
    InvalidResponse(String),
}

/// Reads single bands of a scene.
pub trait RasterAccessor {
    /// Read `band` of `scene` clipped to the geographic `bbox`.
    ///
    /// When `out_shape` is given the band is resampled to `(rows, cols)`;
    /// otherwise the native resolution is returned.
    fn read_band(
        &self,
        scene: &Scene,
        band: &str,
        bbox: &Bbox,
        out_shape: Option<(usize, usize)>,
    ) -> Result<Array2<f64>, RasterError>;
}

/// Searches for acquisitions.
pub trait SceneCatalog {
    fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>, CatalogError>;
}

impl<T: RasterAccessor + ?Sized> RasterAccessor for &T {
    fn read_band(
        &self,
        scene: &Scene,
        band: &str,
        bbox: &Bbox,
        out_shape: Option<(usize, usize)>,
    ) -> Result<Array2<f64>, RasterError> {
        (**self).read_band(scene, band, bbox, out_shape)
    }
}

impl<T: SceneCatalog + ?Sized> SceneCatalog for &T {
    fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>, CatalogError> {
        (**self).search(query)
    }
}
