//! Shared components for the fieldwatch pipeline.
//!
//! This crate contains the domain types that every stage of the pipeline
//! agrees on: field boundaries, the masks rasterised from them, per-field
//! statistics, scene handles and the collaborator traits used to fetch
//! rasters, plus the pixel-level index math.

pub mod cloud;
pub mod field_boundary;
pub mod field_mask;
pub mod field_stats;
pub mod flood;
pub mod indices;
pub mod ring_buffer;
pub mod scene;
pub mod timeseries;

pub use cloud::CloudClasses;
pub use crop_math::{Bbox, Crs};
pub use field_boundary::{
    create_circular_boundary, create_polygon_boundary, BoundaryShape, FieldBoundary, GeoPoint,
    GeometryError,
};
pub use field_mask::{apply_field_mask, create_field_mask, FieldMask, GridSpec, MaskCache, MaskError};
pub use field_stats::{
    compute_field_statistics, FieldStatistics, FieldStatsError, PercentileValue, DEFAULT_PERCENTILES,
};
pub use flood::{compute_flood_mask, FloodAssessment};
pub use indices::SpectralIndex;
pub use ring_buffer::{RingBuffer, RollingError, RollingSum};
pub use scene::{CatalogError, RasterAccessor, RasterError, Scene, SceneCatalog, SceneQuery, SortOrder};
pub use timeseries::{PointMetadata, TimeseriesPoint, TimeseriesSummary};
