//! Persisted analysis configuration and saved fields.
//!
//! Everything lives under one root directory (`~/.fieldwatch/` by default):
//!
//! ```text
//! ~/.fieldwatch/
//!   analysis.json        AnalysisConfig
//!   fields/<name>.json   saved FieldBoundary values
//! ```
//!
//! [`read_points`] loads exported time series files, which live wherever the
//! user keeps them.

use crate::phenology::PhenologyConfig;
use serde::{Deserialize, Serialize};
use log::info;
use shared::{FieldBoundary, TimeseriesPoint};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("HOME is not set")]
    NoHome,
    #[error("invalid field name '{0}': use letters, digits, '_' or '-'")]
    InvalidName(String),
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recent-scene selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Accept the newest scene whose field cloud cover is at most this percentage.
    pub threshold_pct: f64,
    /// How many of the newest scenes to consider.
    pub lookback: usize,
    /// Above this cloud percentage the current NDVI comes from Landsat.
    pub landsat_fallback_pct: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            threshold_pct: 10.0,
            lookback: 15,
            landsat_fallback_pct: 50.0,
        }
    }
}

/// Maximum cloud fraction over the field for a scene to be kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudGates {
    pub optical: f64,
    pub thermal: f64,
    pub rainfall: f64,
}

impl Default for CloudGates {
    fn default() -> Self {
        Self {
            optical: 0.5,
            thermal: 0.3,
            rainfall: 1.0,
        }
    }
}

/// Catalog paging and pre-filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Scene-level cloud cover filter for optical collections, in percent.
    pub max_cloud_cover: f64,
    pub page_size: usize,
    pub max_pages: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_cloud_cover: 50.0,
            page_size: 100,
            max_pages: 100,
        }
    }
}

/// Per-signal grid used when the reference band cannot be read, and the
/// bbox padding applied to the field radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridDefaults {
    pub optical_shape: (usize, usize),
    pub thermal_shape: (usize, usize),
    pub rainfall_shape: (usize, usize),
    pub optical_padding: f64,
    pub thermal_padding: f64,
    pub rainfall_padding: f64,
}

impl Default for GridDefaults {
    fn default() -> Self {
        Self {
            optical_shape: (512, 512),
            thermal_shape: (256, 256),
            rainfall_shape: (64, 64),
            optical_padding: 1.5,
            thermal_padding: 2.0,
            rainfall_padding: 3.0,
        }
    }
}

/// Every tunable of a field analysis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub selection: SelectionConfig,
    pub gates: CloudGates,
    pub catalog: CatalogConfig,
    pub grids: GridDefaults,
    pub phenology: PhenologyConfig,
}

/// Storage manager for fieldwatch configuration.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Storage rooted at `~/.fieldwatch`.
    pub fn new() -> Result<Self, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::NoHome)?;
        Ok(Self {
            root_path: PathBuf::from(home).join(".fieldwatch"),
        })
    }

    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn analysis_config_path(&self) -> PathBuf {
        self.root_path.join("analysis.json")
    }

    fn fields_dir(&self) -> PathBuf {
        self.root_path.join("fields")
    }

    fn field_path(&self, name: &str) -> Result<PathBuf, ConfigError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        Ok(self.fields_dir().join(format!("{name}.json")))
    }

    /// Load the saved analysis configuration.
    ///
    /// Returns None if nothing has been saved.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn load_analysis_config(&self) -> Option<Result<AnalysisConfig, ConfigError>> {
        let path = self.analysis_config_path();
        if !path.exists() {
            return None;
        }
        Some(read_json(&path))
    }

    /// Saved configuration, or defaults when none exists.
    pub fn load_or_default(&self) -> Result<AnalysisConfig, ConfigError> {
        self.load_analysis_config()
            .unwrap_or_else(|| Ok(AnalysisConfig::default()))
    }

    /// Save the analysis configuration, returning the file written.
    pub fn save_analysis_config(&self, config: &AnalysisConfig) -> Result<PathBuf, ConfigError> {
        std::fs::create_dir_all(&self.root_path)?;
        let path = self.analysis_config_path();
        write_json(&path, config)?;
        Ok(path)
    }

    /// Save a field boundary under `name`.
    pub fn save_field(&self, name: &str, boundary: &FieldBoundary) -> Result<PathBuf, ConfigError> {
        let path = self.field_path(name)?;
        std::fs::create_dir_all(self.fields_dir())?;
        write_json(&path, boundary)?;
        Ok(path)
    }

    /// Load a saved field.
    ///
    /// Returns None if no field has this name.
    pub fn load_field(&self, name: &str) -> Option<Result<FieldBoundary, ConfigError>> {
        let path = match self.field_path(name) {
            Ok(path) => path,
            Err(e) => return Some(Err(e)),
        };
        if !path.exists() {
            return None;
        }
        Some(read_json(&path))
    }

    /// Names of all saved fields, sorted.
    pub fn list_fields(&self) -> Result<Vec<String>, ConfigError> {
        let dir = self.fields_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a saved field. Returns Ok(false) if it didn't exist.
    pub fn delete_field(&self, name: &str) -> Result<bool, ConfigError> {
        let path = self.field_path(name)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".fieldwatch")))
    }
}

/// Load a JSON array of time series points. `null` values load as gaps.
pub fn read_points(path: &Path) -> Result<Vec<TimeseriesPoint>, ConfigError> {
    let points: Vec<TimeseriesPoint> = read_json(path)?;
    info!("Loaded {} points from {}", points.len(), path.display());
    Ok(points)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)?;
    Ok(())
}
