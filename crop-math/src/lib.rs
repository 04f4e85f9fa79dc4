//! crop-math - Geometric and statistical primitives for field analysis
//!
//! This crate holds the CRS-agnostic math that the field pipeline is built on:
//!
//! - **Projection** - CRS identifiers, the `Projector` seam and a built-in
//!   UTM / Web Mercator implementation
//! - **Bounds** - Axis-aligned extents and densified bounds reprojection
//! - **Affine** - North-up pixel grid transforms
//! - **Polygon** - Ring area, centroid and pixel-touch predicates
//! - **Statistics** - Mean, population standard deviation, percentiles
//!
//! # Example
//!
//! ```text
//! use crop_math::{BuiltinProjector, Crs, Projector};
//! use geo_types::coord;
//!
//! let utm = Crs::utm_for(36.8, -1.3);
//! let projected = BuiltinProjector
//!     .project(coord! { x: 36.8, y: -1.3 }, Crs::Wgs84, utm)
//!     .unwrap();
//! ```

pub mod affine;
pub mod bounds;
pub mod polygon;
pub mod projection;
pub mod stats;

pub use affine::{GridError, GridTransform};
pub use bounds::{transform_bounds, Bbox};
pub use polygon::{point_in_ring, ring_area, ring_centroid, segment_touches_rect};
pub use projection::{BuiltinProjector, Crs, ProjectionError, Projector};
pub use stats::{mean, median, percentile_sorted, population_std, StatsError};
