//! Axis-aligned extents and their reprojection.

use crate::projection::{Crs, ProjectionError, Projector};
use geo_types::{coord, Coord};
use serde::{Deserialize, Serialize};

/// Approximate length of one degree of latitude in meters.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Smallest meridian convergence factor applied to longitude buffers.
///
/// Keeps boxes near the poles finite.
const MIN_COS_LAT: f64 = 0.01;

/// Default number of points sampled along each edge when reprojecting bounds.
pub const DEFAULT_DENSIFY_POINTS: usize = 21;

/// Axis-aligned bounding box `[min_x, min_y, max_x, max_y]`.
///
/// In geographic coordinates this is `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bbox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Square box of `buffer_deg` degrees on each side of a geographic point.
    pub fn around(lat: f64, lon: f64, buffer_deg: f64) -> Self {
        Self::new(
            lon - buffer_deg,
            lat - buffer_deg,
            lon + buffer_deg,
            lat + buffer_deg,
        )
    }

    /// Box around a field of `radius_m` meters, padded by `padding`.
    ///
    /// One degree of latitude is taken as 111 km. A degree of longitude
    /// shrinks with `cos(lat)`, so the east-west buffer is widened by the same
    /// factor and the box still holds the field away from the equator.
    pub fn for_radius(lat: f64, lon: f64, radius_m: f64, padding: f64) -> Self {
        let lat_buffer = radius_m / METERS_PER_DEGREE * padding;
        let lon_buffer = lat_buffer / lat.to_radians().cos().max(MIN_COS_LAT);
        Self::new(
            lon - lon_buffer,
            lat - lat_buffer,
            lon + lon_buffer,
            lat + lat_buffer,
        )
    }

    /// Smallest box containing every point.
    pub fn envelope<I: IntoIterator<Item = Coord<f64>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::new(first.x, first.y, first.x, first.y);
        for p in iter {
            bbox.min_x = bbox.min_x.min(p.x);
            bbox.min_y = bbox.min_y.min(p.y);
            bbox.max_x = bbox.max_x.max(p.x);
            bbox.max_y = bbox.max_y.max(p.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, point: Coord<f64>) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// Reproject a bounding box by densifying its edges.
///
/// Each edge is sampled at `densify_points` positions (corners included),
/// every sample is projected and the envelope of the results is returned. A
/// straight edge in one system is usually curved in another, so projecting
/// only the four corners would clip the box.
pub fn transform_bounds<P: Projector + ?Sized>(
    projector: &P,
    bbox: &Bbox,
    from: Crs,
    to: Crs,
    densify_points: usize,
) -> Result<Bbox, ProjectionError> {
    if from == to {
        return Ok(*bbox);
    }
    let steps = densify_points.max(2);
    let mut samples = Vec::with_capacity(steps * 4);
    for i in 0..steps {
        let t = i as f64 / (steps - 1) as f64;
        let x = bbox.min_x + t * bbox.width();
        let y = bbox.min_y + t * bbox.height();
        samples.push(coord! { x: x, y: bbox.min_y });
        samples.push(coord! { x: x, y: bbox.max_y });
        samples.push(coord! { x: bbox.min_x, y: y });
        samples.push(coord! { x: bbox.max_x, y: y });
    }
    let projected = projector.project_ring(&samples, from, to)?;
    // `samples` is never empty, so the envelope always exists.
    Ok(Bbox::envelope(projected).unwrap_or(*bbox))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::BuiltinProjector;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_around() {
        let bbox = Bbox::around(-1.5, 35.2, 0.05);
        assert_abs_diff_eq!(bbox.min_x, 35.15, epsilon = 1e-12);
        assert_abs_diff_eq!(bbox.max_y, -1.45, epsilon = 1e-12);
        assert_abs_diff_eq!(bbox.width(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_for_radius() {
        let bbox = Bbox::for_radius(0.0, 0.0, 1110.0, 1.5);
        assert_abs_diff_eq!(bbox.max_x, 0.015, epsilon = 1e-12);
        assert_abs_diff_eq!(bbox.max_y, 0.015, epsilon = 1e-12);
    }

    #[test]
    fn test_for_radius_widens_longitude_with_latitude() {
        let bbox = Bbox::for_radius(60.0, 10.0, 1110.0, 1.0);
        assert_abs_diff_eq!(bbox.height(), 0.02, epsilon = 1e-12);
        // cos(60°) = 0.5
        assert_abs_diff_eq!(bbox.width(), 0.04, epsilon = 1e-9);

        let polar = Bbox::for_radius(90.0, 0.0, 1110.0, 1.0);
        assert!(polar.width().is_finite());
        assert_abs_diff_eq!(polar.width(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_envelope() {
        let bbox = Bbox::envelope(vec![
            coord! { x: 1.0, y: 5.0 },
            coord! { x: -2.0, y: 3.0 },
            coord! { x: 4.0, y: -1.0 },
        ])
        .unwrap();
        assert_eq!(bbox, Bbox::new(-2.0, -1.0, 4.0, 5.0));
        assert!(Bbox::envelope(Vec::new()).is_none());
    }

    #[test]
    fn test_transform_bounds_identity() {
        let bbox = Bbox::around(10.0, 10.0, 1.0);
        let same = transform_bounds(&BuiltinProjector, &bbox, Crs::Wgs84, Crs::Wgs84, 21).unwrap();
        assert_eq!(same, bbox);
    }

    #[test]
    fn test_transform_bounds_contains_projected_corners() {
        let bbox = Bbox::around(-1.5, 35.2, 0.05);
        let utm = Crs::utm_for(35.2, -1.5);
        let projected = transform_bounds(&BuiltinProjector, &bbox, Crs::Wgs84, utm, 21).unwrap();

        // ~11 km on each side
        assert!(projected.width() > 10_000.0 && projected.width() < 12_000.0);
        assert!(projected.height() > 10_000.0 && projected.height() < 12_000.0);

        let corner = BuiltinProjector
            .project(coord! { x: bbox.min_x, y: bbox.max_y }, Crs::Wgs84, utm)
            .unwrap();
        assert!(projected.contains(corner));
    }
}
