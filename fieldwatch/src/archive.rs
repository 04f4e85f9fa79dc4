//! Scene archive kept on local disk.
//!
//! Layout under the archive root:
//!
//! ```text
//! scenes.json                  JSON array of scenes
//! bands/<scene_id>/<band>.json 2-D array of pixel values, null for nodata
//! ```
//!
//! Rasters are stored already clipped to the area of interest, so the bbox of
//! a read is not used. A requested `out_shape` is honoured by nearest
//! neighbour resampling.

use log::{debug, info};
use ndarray::Array2;
use serde::Serialize;
use shared::scene::resample_nearest;
use shared::{Bbox, CatalogError, RasterAccessor, RasterError, Scene, SceneCatalog, SceneQuery};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCENES_FILE: &str = "scenes.json";
const BANDS_DIR: &str = "bands";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{}: rows have different lengths", path.display())]
    Ragged { path: PathBuf },
}

impl ArchiveError {
    fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::Io { source, .. } if source.kind() == ErrorKind::NotFound)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArchiveError> {
    let text = std::fs::read_to_string(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    let io = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let text = serde_json::to_string(value).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, text).map_err(io)
}

/// Scenes and bands read from a directory.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
    scenes: Vec<Scene>,
}

impl LocalArchive {
    /// Load the scene list under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let root = root.into();
        let scenes: Vec<Scene> = read_json(&root.join(SCENES_FILE))?;
        info!("Opened archive {} with {} scenes", root.display(), scenes.len());
        Ok(Self { root, scenes })
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    fn band_path(&self, scene_id: &str, band: &str) -> PathBuf {
        band_path(&self.root, scene_id, band)
    }

    /// One stored band at its native shape.
    pub fn load_band(&self, scene_id: &str, band: &str) -> Result<Array2<f64>, ArchiveError> {
        let path = self.band_path(scene_id, band);
        let rows: Vec<Vec<Option<f64>>> = read_json(&path)?;
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != cols) {
            return Err(ArchiveError::Ragged { path });
        }
        let values = rows
            .iter()
            .flatten()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        Array2::from_shape_vec((rows.len(), cols), values).map_err(|_| ArchiveError::Ragged { path })
    }
}

fn band_path(root: &Path, scene_id: &str, band: &str) -> PathBuf {
    root.join(BANDS_DIR)
        .join(scene_id)
        .join(format!("{band}.json"))
}

/// Write the scene list of an archive rooted at `root`.
pub fn write_scenes(root: &Path, scenes: &[Scene]) -> Result<(), ArchiveError> {
    write_json(&root.join(SCENES_FILE), scenes)
}

/// Store one band; NaN pixels are written as `null`.
pub fn write_band(
    root: &Path,
    scene_id: &str,
    band: &str,
    data: &Array2<f64>,
) -> Result<(), ArchiveError> {
    let rows: Vec<Vec<Option<f64>>> = data
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|v| (!v.is_nan()).then_some(*v)).collect())
        .collect();
    write_json(&band_path(root, scene_id, band), &rows)
}

impl SceneCatalog for LocalArchive {
    fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>, CatalogError> {
        Ok(query.apply(&self.scenes))
    }
}

impl RasterAccessor for LocalArchive {
    fn read_band(
        &self,
        scene: &Scene,
        band: &str,
        _bbox: &Bbox,
        out_shape: Option<(usize, usize)>,
    ) -> Result<Array2<f64>, RasterError> {
        debug!("Reading {} of {}", band, scene.id);
        match self.load_band(&scene.id, band) {
            Ok(data) => Ok(match out_shape {
                Some(shape) => resample_nearest(&data, shape),
                None => data,
            }),
            Err(e) if e.is_not_found() => Err(RasterError::MissingAsset {
                scene: scene.id.clone(),
                asset: band.to_string(),
            }),
            Err(e) => Err(RasterError::Read {
                scene: scene.id.clone(),
                asset: band.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
