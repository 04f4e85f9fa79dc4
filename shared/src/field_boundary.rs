//! Field boundary construction in geographic coordinates.
//!
//! A boundary is a closed ring in WGS84 (`x = lon`, `y = lat`) together with
//! the way it was built and its area. Areas are never measured in degrees:
//! the ring is projected into the local UTM zone first, so one hectare is one
//! hectare wherever the field is.
//!
//! # Shapes
//! - **Circular**: center pivot style fields. The ring is a 64-segment
//!   polygon buffered in meters in the local UTM zone and then projected back.
//!   The reported area is the analytic `π·r²`, independent of the segment
//!   count.
//! - **Polygon**: arbitrary outlines from `(lat, lon)` vertices, closed
//!   automatically.

use crop_math::polygon::{ring_area, ring_centroid};
use crop_math::projection::{BuiltinProjector, Crs, ProjectionError, Projector};
use geo_types::{coord, Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Number of straight segments approximating a circular boundary.
pub const CIRCLE_SEGMENTS: usize = 64;

const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("radius must be positive and finite, got {0}")]
    InvalidRadius(f64),
    #[error("polygon must have at least 3 distinct vertices, got {0}")]
    TooFewVertices(usize),
    #[error("exterior ring is not closed")]
    OpenRing,
    #[error("({lat}, {lon}) is not a valid WGS84 position")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("projection failed: {0}")]
    Projection(#[from] ProjectionError),
}

/// Geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self, GeometryError> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        if !valid {
            return Err(GeometryError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    fn as_coord(&self) -> Coord<f64> {
        coord! { x: self.lon, y: self.lat }
    }
}

/// How a boundary was defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryShape {
    Circular { center: GeoPoint, radius_m: f64 },
    Polygon { vertex_count: usize },
}

/// Geographic footprint of a field.
///
/// Immutable once built; the exterior ring is always closed. Deserialising
/// goes back through the constructors, so a stored boundary is validated and
/// its area recomputed on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredBoundary")]
pub struct FieldBoundary {
    polygon: Polygon<f64>,
    shape: BoundaryShape,
    area_ha: f64,
}

impl FieldBoundary {
    /// Circular boundary around a center point.
    pub fn circular(center_lat: f64, center_lon: f64, radius_m: f64) -> Result<Self, GeometryError> {
        Self::circular_with(&BuiltinProjector, center_lat, center_lon, radius_m)
    }

    /// Circular boundary using a caller-supplied projector.
    pub fn circular_with<P: Projector + ?Sized>(
        projector: &P,
        center_lat: f64,
        center_lon: f64,
        radius_m: f64,
    ) -> Result<Self, GeometryError> {
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(GeometryError::InvalidRadius(radius_m));
        }
        let center = GeoPoint::new(center_lat, center_lon)?;
        let utm = Crs::utm_for(center.lon, center.lat);
        let center_utm = projector.project(center.as_coord(), Crs::Wgs84, utm)?;

        let mut ring_utm: Vec<Coord<f64>> = (0..CIRCLE_SEGMENTS)
            .map(|k| {
                let theta = 2.0 * PI * k as f64 / CIRCLE_SEGMENTS as f64;
                coord! {
                    x: center_utm.x + radius_m * theta.cos(),
                    y: center_utm.y + radius_m * theta.sin(),
                }
            })
            .collect();
        ring_utm.push(ring_utm[0]);

        let ring = projector.project_ring(&ring_utm, utm, Crs::Wgs84)?;
        let area_ha = PI * radius_m * radius_m / SQUARE_METERS_PER_HECTARE;

        Ok(Self {
            polygon: Polygon::new(LineString::from(ring), vec![]),
            shape: BoundaryShape::Circular { center, radius_m },
            area_ha,
        })
    }

    /// Polygon boundary from `(lat, lon)` vertices.
    pub fn polygon(vertices: &[(f64, f64)]) -> Result<Self, GeometryError> {
        Self::polygon_with(&BuiltinProjector, vertices)
    }

    /// Polygon boundary using a caller-supplied projector.
    pub fn polygon_with<P: Projector + ?Sized>(
        projector: &P,
        vertices: &[(f64, f64)],
    ) -> Result<Self, GeometryError> {
        if vertices.len() < 3 {
            return Err(GeometryError::TooFewVertices(vertices.len()));
        }
        let mut ring = vertices
            .iter()
            .map(|&(lat, lon)| GeoPoint::new(lat, lon).map(|p| p.as_coord()))
            .collect::<Result<Vec<_>, _>>()?;

        let distinct = count_distinct(&ring);
        if distinct < 3 {
            return Err(GeometryError::TooFewVertices(distinct));
        }
        if ring.first() != ring.last() {
            ring.push(ring[0]);
        }

        let centroid = ring_centroid(&ring).unwrap_or(ring[0]);
        let utm = Crs::utm_for(centroid.x, centroid.y);
        let ring_utm = projector.project_ring(&ring, Crs::Wgs84, utm)?;
        let area_ha = ring_area(&ring_utm) / SQUARE_METERS_PER_HECTARE;

        Ok(Self {
            polygon: Polygon::new(LineString::from(ring), vec![]),
            shape: BoundaryShape::Polygon {
                vertex_count: vertices.len(),
            },
            area_ha,
        })
    }

    pub fn polygon_geometry(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// Closed exterior ring, `x = lon`, `y = lat`.
    pub fn ring(&self) -> &[Coord<f64>] {
        &self.polygon.exterior().0
    }

    pub fn shape(&self) -> &BoundaryShape {
        &self.shape
    }

    pub fn area_ha(&self) -> f64 {
        self.area_ha
    }

    /// Geographic centroid of the ring.
    pub fn centroid(&self) -> GeoPoint {
        match &self.shape {
            BoundaryShape::Circular { center, .. } => *center,
            BoundaryShape::Polygon { .. } => {
                let c = ring_centroid(self.ring()).unwrap_or(self.ring()[0]);
                GeoPoint { lat: c.y, lon: c.x }
            }
        }
    }
}

/// Serialised layout of a [`FieldBoundary`], before validation.
#[derive(Deserialize)]
struct StoredBoundary {
    polygon: Polygon<f64>,
    shape: BoundaryShape,
}

impl TryFrom<StoredBoundary> for FieldBoundary {
    type Error = GeometryError;

    fn try_from(stored: StoredBoundary) -> Result<Self, Self::Error> {
        match stored.shape {
            BoundaryShape::Circular { center, radius_m } => {
                Self::circular(center.lat, center.lon, radius_m)
            }
            BoundaryShape::Polygon { .. } => {
                let ring = &stored.polygon.exterior().0;
                if ring.len() > 1 && ring.first() != ring.last() {
                    return Err(GeometryError::OpenRing);
                }
                let open = &ring[..ring.len().saturating_sub(1)];
                let vertices: Vec<(f64, f64)> = open.iter().map(|c| (c.y, c.x)).collect();
                Self::polygon(&vertices)
            }
        }
    }
}

fn count_distinct(points: &[Coord<f64>]) -> usize {
    let mut distinct: Vec<Coord<f64>> = Vec::with_capacity(points.len());
    for p in points {
        if !distinct.contains(p) {
            distinct.push(*p);
        }
    }
    distinct.len()
}

/// Build a circular field boundary. See [`FieldBoundary::circular`].
pub fn create_circular_boundary(
    center_lat: f64,
    center_lon: f64,
    radius_m: f64,
) -> Result<FieldBoundary, GeometryError> {
    FieldBoundary::circular(center_lat, center_lon, radius_m)
}

/// Build a polygon field boundary. See [`FieldBoundary::polygon`].
pub fn create_polygon_boundary(vertices: &[(f64, f64)]) -> Result<FieldBoundary, GeometryError> {
    FieldBoundary::polygon(vertices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_circular_area_is_analytic() {
        for radius in [10.0, 400.0, 1234.5, 5000.0] {
            let boundary = create_circular_boundary(-1.5, 35.2, radius).unwrap();
            assert_relative_eq!(boundary.area_ha(), PI * radius * radius / 10_000.0, epsilon = 1e-12);
        }
        let boundary = create_circular_boundary(-1.5, 35.2, 400.0).unwrap();
        assert_abs_diff_eq!(boundary.area_ha(), 50.27, epsilon = 0.01);
    }

    #[test]
    fn test_circular_ring_is_closed() {
        let boundary = create_circular_boundary(45.0, 7.0, 250.0).unwrap();
        let ring = boundary.ring();
        assert_eq!(ring.len(), CIRCLE_SEGMENTS + 1);
        assert_eq!(ring.first(), ring.last());
        assert!(matches!(
            boundary.shape(),
            BoundaryShape::Circular { radius_m, .. } if *radius_m == 250.0
        ));
    }

    #[test]
    fn test_circular_ring_radius_in_meters() {
        // 500 m at the equator is ~0.0045 degrees of longitude
        let boundary = create_circular_boundary(0.0, 33.0, 500.0).unwrap();
        let max_lon = boundary
            .ring()
            .iter()
            .map(|c| c.x)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_abs_diff_eq!(max_lon - 33.0, 500.0 / 111_320.0, epsilon = 2e-5);
    }

    #[test]
    fn test_circular_polygon_area_close_to_analytic() {
        let boundary = create_circular_boundary(-1.5, 35.2, 400.0).unwrap();
        let utm = Crs::utm_for(35.2, -1.5);
        let projected = BuiltinProjector
            .project_ring(boundary.ring(), Crs::Wgs84, utm)
            .unwrap();
        let polygon_ha = ring_area(&projected) / 10_000.0;
        assert_relative_eq!(polygon_ha, boundary.area_ha(), max_relative = 0.01);
    }

    #[test]
    fn test_invalid_radius() {
        assert_eq!(
            create_circular_boundary(0.0, 0.0, 0.0),
            Err(GeometryError::InvalidRadius(0.0))
        );
        assert_eq!(
            create_circular_boundary(0.0, 0.0, -5.0),
            Err(GeometryError::InvalidRadius(-5.0))
        );
        assert!(create_circular_boundary(0.0, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_center() {
        assert!(matches!(
            create_circular_boundary(95.0, 0.0, 100.0),
            Err(GeometryError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_polygon_boundary() {
        // ~1.11 km x ~1.11 km square near the equator
        let vertices = [(0.0, 30.0), (0.0, 30.01), (0.01, 30.01), (0.01, 30.0)];
        let boundary = create_polygon_boundary(&vertices).unwrap();
        let ring = boundary.ring();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        // Stored as (lon, lat)
        assert_eq!(ring[1], coord! { x: 30.01, y: 0.0 });
        assert_relative_eq!(boundary.area_ha(), 123.0, max_relative = 0.01);
        assert_eq!(
            boundary.shape(),
            &BoundaryShape::Polygon { vertex_count: 4 }
        );
    }

    #[test]
    fn test_polygon_already_closed() {
        let vertices = [(0.0, 30.0), (0.0, 30.01), (0.01, 30.01), (0.0, 30.0)];
        let boundary = create_polygon_boundary(&vertices).unwrap();
        assert_eq!(boundary.ring().len(), 4);
    }

    #[test]
    fn test_polygon_too_few_vertices() {
        assert_eq!(
            create_polygon_boundary(&[(0.0, 0.0), (1.0, 1.0)]),
            Err(GeometryError::TooFewVertices(2))
        );
        assert_eq!(
            create_polygon_boundary(&[(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            Err(GeometryError::TooFewVertices(2))
        );
    }

    #[test]
    fn test_polygon_centroid() {
        let vertices = [(10.0, 20.0), (10.0, 20.02), (10.02, 20.02), (10.02, 20.0)];
        let boundary = create_polygon_boundary(&vertices).unwrap();
        let centroid = boundary.centroid();
        assert_abs_diff_eq!(centroid.lat, 10.01, epsilon = 1e-9);
        assert_abs_diff_eq!(centroid.lon, 20.01, epsilon = 1e-9);
    }

    #[test]
    fn test_boundary_serializes() {
        let boundary = create_circular_boundary(-1.5, 35.2, 100.0).unwrap();
        let json = serde_json::to_string(&boundary).unwrap();
        assert!(json.contains("\"kind\":\"circular\""));
        let back: FieldBoundary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ring().len(), boundary.ring().len());
        assert_eq!(back.shape(), boundary.shape());

        let square = create_polygon_boundary(&[(0.0, 30.0), (0.0, 30.01), (0.01, 30.01), (0.01, 30.0)])
            .unwrap();
        let back: FieldBoundary = serde_json::from_str(&serde_json::to_string(&square).unwrap()).unwrap();
        assert_eq!(back.ring().len(), 5);
        assert_eq!(back.shape(), &BoundaryShape::Polygon { vertex_count: 4 });
        assert_relative_eq!(back.area_ha(), square.area_ha(), max_relative = 1e-9);
    }

    fn stored_polygon(ring: &str, area_ha: f64) -> String {
        let coords: Vec<String> = ring
            .split(';')
            .map(|pair| {
                let (x, y) = pair.split_once(',').unwrap();
                format!(r#"{{"x":{x},"y":{y}}}"#)
            })
            .collect();
        format!(
            r#"{{"polygon":{{"exterior":[{}],"interiors":[]}},"shape":{{"kind":"polygon","vertex_count":3}},"area_ha":{area_ha}}}"#,
            coords.join(",")
        )
    }

    #[test]
    fn test_deserialize_rejects_invalid_rings() {
        let valid = stored_polygon("30.0,0.0;30.01,0.0;30.01,0.01;30.0,0.0", 1.0);
        let boundary: FieldBoundary = serde_json::from_str(&valid).unwrap();
        // Stored area is ignored in favour of the measured one
        assert!(boundary.area_ha() > 10.0);

        let two_vertices = stored_polygon("30.0,0.0;30.01,0.0;30.0,0.0", 1.0);
        let err = serde_json::from_str::<FieldBoundary>(&two_vertices).unwrap_err();
        assert!(err.to_string().contains("at least 3"), "{err}");

        let open = stored_polygon("30.0,0.0;30.01,0.0;30.01,0.01;30.0,0.01", 1.0);
        let err = serde_json::from_str::<FieldBoundary>(&open).unwrap_err();
        assert!(err.to_string().contains("not closed"), "{err}");

        let bad_radius = r#"{"polygon":{"exterior":[],"interiors":[]},"shape":{"kind":"circular","center":{"lat":0.0,"lon":30.0},"radius_m":-4.0},"area_ha":0.0}"#;
        assert!(serde_json::from_str::<FieldBoundary>(bad_radius).is_err());
    }
}
