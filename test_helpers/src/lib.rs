//! Test helpers for fieldwatch
//!
//! Synthetic stand-ins for the external collaborators (scene catalog and
//! raster accessor), NDVI-like series generators, and a shared directory for
//! test artifacts such as rendered reports.

use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

pub mod archive;
pub mod series;

pub use archive::{at_noon, optical_scene, BandSource, SyntheticArchive};
pub use series::{bell_curve, daily_dates, double_season, spaced_dates};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
}

/// Returns the workspace root by walking up from the current directory until
/// a Cargo.toml declaring `[workspace]` is found.
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {}", e))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {}", e))
            })?;
            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }
        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// Directory for test artifacts (`<workspace>/test_output`), created on demand.
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");
    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }
    output_dir
}

/// Path of `path` inside the test artifact directory.
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}
