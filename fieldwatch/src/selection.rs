//! Recency-first scene selection under a cloud threshold.
//!
//! Candidates arrive newest first. The selector returns the first one whose
//! cloud percentage is within the threshold, so a slightly cloudier recent
//! scene wins over a cleaner old one. Only when nothing qualifies does it fall
//! back to the least cloudy candidate seen.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::indices::sentinel2;
use shared::{Bbox, CloudClasses, RasterAccessor, RasterError, Scene};

/// Estimates how cloudy a scene is, in percent.
pub trait CloudClassifier {
    fn cloud_percentage(&self, scene: &Scene) -> Result<f64, RasterError>;
}

/// Percentage of cloud-like pixels in a per-pixel quality band over a bbox.
pub struct QualityBandClassifier<'a, R: ?Sized> {
    accessor: &'a R,
    bbox: Bbox,
    band: String,
    classes: CloudClasses,
}

impl<'a, R: RasterAccessor + ?Sized> QualityBandClassifier<'a, R> {
    /// Classifier reading the Sentinel-2 SCL band.
    pub fn sentinel2(accessor: &'a R, bbox: Bbox) -> Self {
        Self::new(accessor, bbox, sentinel2::SCL, CloudClasses::sentinel2_scl())
    }

    pub fn new(accessor: &'a R, bbox: Bbox, band: impl Into<String>, classes: CloudClasses) -> Self {
        Self {
            accessor,
            bbox,
            band: band.into(),
            classes,
        }
    }
}

impl<R: RasterAccessor + ?Sized> CloudClassifier for QualityBandClassifier<'_, R> {
    fn cloud_percentage(&self, scene: &Scene) -> Result<f64, RasterError> {
        let band = self.accessor.read_band(scene, &self.band, &self.bbox, None)?;
        Ok(self.classes.cloud_percentage(&band.view()))
    }
}

/// Uses the provider's scene-wide cloud cover.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportedCloudCover;

impl CloudClassifier for ReportedCloudCover {
    fn cloud_percentage(&self, scene: &Scene) -> Result<f64, RasterError> {
        scene.cloud_cover.ok_or_else(|| RasterError::Read {
            scene: scene.id.clone(),
            asset: "eo:cloud_cover".to_string(),
            reason: "scene reports no cloud cover".to_string(),
        })
    }
}

/// A candidate with its measured cloud percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredScene {
    pub scene: Scene,
    pub cloud_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneSelection {
    /// The chosen scene: first within the threshold, else the fallback.
    pub selected: Option<ScoredScene>,
    /// Least cloudy candidate examined before the scan stopped.
    pub best_overall: Option<ScoredScene>,
    /// Whether `selected` actually met the threshold.
    pub met_threshold: bool,
}

impl SceneSelection {
    pub fn selected_cloud(&self) -> Option<f64> {
        self.selected.as_ref().map(|s| s.cloud_pct)
    }

    pub fn best_cloud_overall(&self) -> Option<f64> {
        self.best_overall.as_ref().map(|s| s.cloud_pct)
    }
}

/// Pick the most recent acceptable scene from newest-first `candidates`.
///
/// A classifier failure counts as 100% cloud for that candidate. Ties for
/// the fallback keep the newer scene.
pub fn select_best_scene<C: CloudClassifier + ?Sized>(
    candidates: &[Scene],
    classifier: &C,
    threshold_pct: f64,
) -> SceneSelection {
    let mut best: Option<ScoredScene> = None;

    for scene in candidates {
        let cloud_pct = classifier.cloud_percentage(scene).unwrap_or_else(|e| {
            warn!("Failed to classify clouds for {}: {}", scene.id, e);
            100.0
        });
        debug!("Scene {} cloud {:.1}%", scene.id, cloud_pct);

        if best.as_ref().map_or(true, |b| cloud_pct < b.cloud_pct) {
            best = Some(ScoredScene {
                scene: scene.clone(),
                cloud_pct,
            });
        }

        if cloud_pct <= threshold_pct {
            info!(
                "Selected {} ({}) with {:.1}% cloud",
                scene.id,
                scene.date(),
                cloud_pct
            );
            return SceneSelection {
                selected: Some(ScoredScene {
                    scene: scene.clone(),
                    cloud_pct,
                }),
                best_overall: best,
                met_threshold: true,
            };
        }
    }

    if let Some(fallback) = &best {
        info!(
            "No scene within {:.0}% cloud, falling back to {} ({:.1}%)",
            threshold_pct, fallback.scene.id, fallback.cloud_pct
        );
    }
    SceneSelection {
        selected: best.clone(),
        best_overall: best,
        met_threshold: false,
    }
}
