//! Coordinate reference systems and point reprojection.
//!
//! Geometry code never talks to a projection library directly. It goes
//! through the [`Projector`] trait, which maps single points (and rings)
//! between two [`Crs`] values. [`BuiltinProjector`] covers the systems the
//! field pipeline actually meets: geographic WGS84, the 120 UTM zones and
//! Web Mercator. Anything else is reported as unsupported so callers can
//! decide how to degrade.
//!
//! # Transverse Mercator
//! UTM uses the series expansions from Snyder, "Map Projections - A Working
//! Manual" (USGS PP 1395, pp. 61-64) on the WGS84 ellipsoid. Round-trip error
//! stays at the millimetre level inside a zone, which is far below the pixel
//! size of any sensor the pipeline reads.

use geo_types::{coord, Coord};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_4;
use std::fmt;
use thiserror::Error;

/// WGS84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM central meridian scale factor.
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
/// Latitude limits of the UTM system.
const UTM_MIN_LAT: f64 = -80.0;
const UTM_MAX_LAT: f64 = 84.0;
/// Web Mercator clips latitude so the projection stays square.
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_6;

/// Errors raised while moving coordinates between reference systems.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("unsupported coordinate reference system {0}")]
    UnsupportedCrs(Crs),
    #[error("invalid UTM zone {0}: must be within 1..=60")]
    InvalidZone(u8),
    #[error("coordinate ({x}, {y}) is not finite")]
    NonFinite { x: f64, y: f64 },
    #[error("latitude {lat} is outside the domain of {crs}")]
    LatitudeOutOfRange { lat: f64, crs: Crs },
}

/// A coordinate reference system understood by the pipeline.
///
/// Geographic coordinates are always ordered `x = longitude, y = latitude`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// Geographic WGS84 (EPSG:4326), degrees.
    Wgs84,
    /// WGS84 / UTM, meters.
    Utm { zone: u8, south: bool },
    /// WGS84 / Pseudo-Mercator (EPSG:3857), meters.
    WebMercator,
    /// Any other EPSG code, carried through untouched.
    Epsg(u32),
}

impl Crs {
    /// Resolve an EPSG code to the richest variant available.
    pub fn from_epsg(code: u32) -> Self {
        match code {
            4326 => Crs::Wgs84,
            3857 => Crs::WebMercator,
            32601..=32660 => Crs::Utm {
                zone: (code - 32600) as u8,
                south: false,
            },
            32701..=32760 => Crs::Utm {
                zone: (code - 32700) as u8,
                south: true,
            },
            other => Crs::Epsg(other),
        }
    }

    /// EPSG code of this system.
    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Utm { zone, south } => {
                if south {
                    32700 + zone as u32
                } else {
                    32600 + zone as u32
                }
            }
            Crs::Epsg(code) => code,
        }
    }

    /// Local UTM system for a geographic position.
    ///
    /// The zone is derived from longitude (6° bands starting at -180°) and the
    /// hemisphere from the sign of latitude; the equator belongs to the north.
    pub fn utm_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;
        Crs::Utm {
            zone,
            south: lat < 0.0,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Moves points between coordinate reference systems.
pub trait Projector {
    /// Project a single point from `from` into `to`.
    fn project(&self, point: Coord<f64>, from: Crs, to: Crs) -> Result<Coord<f64>, ProjectionError>;

    /// Project every vertex of a ring. Fails on the first vertex that fails.
    fn project_ring(
        &self,
        ring: &[Coord<f64>],
        from: Crs,
        to: Crs,
    ) -> Result<Vec<Coord<f64>>, ProjectionError> {
        ring.iter().map(|&p| self.project(p, from, to)).collect()
    }
}

/// Closed-form projector for WGS84, UTM and Web Mercator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinProjector;

impl Projector for BuiltinProjector {
    fn project(&self, point: Coord<f64>, from: Crs, to: Crs) -> Result<Coord<f64>, ProjectionError> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(ProjectionError::NonFinite {
                x: point.x,
                y: point.y,
            });
        }
        if from == to {
            return Ok(point);
        }
        let geographic = to_geographic(point, from)?;
        from_geographic(geographic, to)
    }
}

fn to_geographic(point: Coord<f64>, crs: Crs) -> Result<Coord<f64>, ProjectionError> {
    match crs {
        Crs::Wgs84 => Ok(point),
        Crs::Utm { zone, south } => utm_inverse(point, zone, south),
        Crs::WebMercator => Ok(web_mercator_inverse(point)),
        Crs::Epsg(_) => Err(ProjectionError::UnsupportedCrs(crs)),
    }
}

fn from_geographic(point: Coord<f64>, crs: Crs) -> Result<Coord<f64>, ProjectionError> {
    match crs {
        Crs::Wgs84 => Ok(point),
        Crs::Utm { zone, south } => utm_forward(point, zone, south),
        Crs::WebMercator => web_mercator_forward(point),
        Crs::Epsg(_) => Err(ProjectionError::UnsupportedCrs(crs)),
    }
}

fn eccentricity_squared() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

fn central_meridian(zone: u8) -> Result<f64, ProjectionError> {
    if !(1..=60).contains(&zone) {
        return Err(ProjectionError::InvalidZone(zone));
    }
    Ok((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0)
}

/// Meridional arc length from the equator to latitude `phi` (radians).
fn meridian_arc(phi: f64) -> f64 {
    let e2 = eccentricity_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn utm_forward(point: Coord<f64>, zone: u8, south: bool) -> Result<Coord<f64>, ProjectionError> {
    let lon0 = central_meridian(zone)?;
    let lat = point.y;
    if !(UTM_MIN_LAT..=UTM_MAX_LAT).contains(&lat) {
        return Err(ProjectionError::LatitudeOutOfRange {
            lat,
            crs: Crs::Utm { zone, south },
        });
    }

    let e2 = eccentricity_squared();
    let ep2 = e2 / (1.0 - e2);
    let phi = lat.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (point.x - lon0).to_radians();
    let m = meridian_arc(phi);

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let easting = UTM_K0
        * n
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0)
        + UTM_FALSE_EASTING;
    let mut northing = UTM_K0
        * (m + n
            * tan_phi
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));
    if south {
        northing += UTM_FALSE_NORTHING_SOUTH;
    }

    Ok(coord! { x: easting, y: northing })
}

fn utm_inverse(point: Coord<f64>, zone: u8, south: bool) -> Result<Coord<f64>, ProjectionError> {
    let lon0 = central_meridian(zone)?;
    let e2 = eccentricity_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let northing = if south {
        point.y - UTM_FALSE_NORTHING_SOUTH
    } else {
        point.y
    };
    let m = northing / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let tan_phi1 = phi1.tan();
    let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = WGS84_A / denom.sqrt();
    let t1 = tan_phi1 * tan_phi1;
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let r1 = WGS84_A * (1.0 - e2) / denom.powf(1.5);
    let d = (point.x - UTM_FALSE_EASTING) / (n1 * UTM_K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    let phi = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0 - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);
    let lambda = (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d5 / 120.0)
        / cos_phi1;

    Ok(coord! { x: lon0 + lambda.to_degrees(), y: phi.to_degrees() })
}

fn web_mercator_forward(point: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
    if point.y.abs() > WEB_MERCATOR_MAX_LAT {
        return Err(ProjectionError::LatitudeOutOfRange {
            lat: point.y,
            crs: Crs::WebMercator,
        });
    }
    let x = WGS84_A * point.x.to_radians();
    let y = WGS84_A * (FRAC_PI_4 + point.y.to_radians() / 2.0).tan().ln();
    Ok(coord! { x: x, y: y })
}

fn web_mercator_inverse(point: Coord<f64>) -> Coord<f64> {
    let lon = (point.x / WGS84_A).to_degrees();
    let lat = (2.0 * (point.y / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    coord! { x: lon, y: lat }
}
