//! Field analysis pipeline.
//!
//! Geometry and masking live in `shared`; this crate drives them against a
//! scene catalog and raster accessor:
//!
//! - [`selection`] picks the most recent usable optical scene.
//! - [`extraction`] streams scenes into a cloud-gated field time series.
//! - [`phenology`] segments a series into growing seasons.
//! - [`pipeline`] wires boundary, catalog, mask and extraction together.
//! - [`conditions`] snapshots a field from the newest scene of each sensor.
//! - [`archive`] serves scenes and bands from a directory of JSON files.

pub mod archive;
pub mod catalog;
pub mod conditions;
pub mod config_storage;
pub mod extraction;
pub mod phenology;
pub mod pipeline;
pub mod rainfall;
pub mod report;
pub mod selection;
pub mod thermal;

pub use archive::{ArchiveError, LocalArchive};
pub use conditions::{CurrentConditions, NdviSource};
pub use config_storage::{AnalysisConfig, ConfigError, ConfigStorage};
pub use extraction::{
    extract_field_timeseries, ExtractionError, ExtractionOptions, FieldExtractor, MultiIndexRow,
    Signal,
};
pub use phenology::{
    classify_health, detect_seasons, detect_seasons_from_points, smooth, PhenologyConfig,
    PhenologyError, Season, SeasonHealth,
};
pub use pipeline::{FieldAnalysis, FieldAnalyzer, PipelineError, SignalKind};
pub use selection::{select_best_scene, CloudClassifier, SceneSelection};
