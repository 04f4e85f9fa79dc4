//! Planar ring measurements and predicates.
//!
//! Rings are slices of vertices where the last vertex repeats the first. All
//! functions here work in whatever planar system the ring is expressed in;
//! callers project before measuring.

use geo_types::{coord, Coord};

/// Signed shoelace area. Positive for counter-clockwise rings.
pub fn signed_ring_area(ring: &[Coord<f64>]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let twice_area: f64 = ring
        .windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum();
    twice_area / 2.0
}

/// Unsigned area enclosed by a ring.
pub fn ring_area(ring: &[Coord<f64>]) -> f64 {
    signed_ring_area(ring).abs()
}

/// Area-weighted centroid of a ring.
///
/// Degenerate rings (zero area) fall back to the mean of their distinct
/// vertices. Returns `None` for an empty ring.
pub fn ring_centroid(ring: &[Coord<f64>]) -> Option<Coord<f64>> {
    if ring.is_empty() {
        return None;
    }
    let area = signed_ring_area(ring);
    if area.abs() > f64::EPSILON {
        let (mut cx, mut cy) = (0.0, 0.0);
        for w in ring.windows(2) {
            let cross = w[0].x * w[1].y - w[1].x * w[0].y;
            cx += (w[0].x + w[1].x) * cross;
            cy += (w[0].y + w[1].y) * cross;
        }
        return Some(coord! { x: cx / (6.0 * area), y: cy / (6.0 * area) });
    }

    let open = if ring.len() > 1 && ring.first() == ring.last() {
        &ring[..ring.len() - 1]
    } else {
        ring
    };
    let n = open.len() as f64;
    let sum = open
        .iter()
        .fold(coord! { x: 0.0, y: 0.0 }, |acc, p| acc + *p);
    Some(coord! { x: sum.x / n, y: sum.y / n })
}

/// Even-odd test for a point against a closed ring.
pub fn point_in_ring(point: Coord<f64>, ring: &[Coord<f64>]) -> bool {
    let mut inside = false;
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if point.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Whether segment `a`-`b` touches the closed rectangle `[min, max]`.
///
/// A single shared point, such as a grazed corner, counts as touching.
pub fn segment_touches_rect(
    a: Coord<f64>,
    b: Coord<f64>,
    min: Coord<f64>,
    max: Coord<f64>,
) -> bool {
    clip_segment(a, b, min, max).is_some()
}

/// Whether a non-degenerate piece of segment `a`-`b` lies in `[min, max]`.
///
/// Unlike [`segment_touches_rect`], a segment that meets the rectangle only
/// at a corner does not cross it.
pub fn segment_crosses_rect(
    a: Coord<f64>,
    b: Coord<f64>,
    min: Coord<f64>,
    max: Coord<f64>,
) -> bool {
    let moving = a != b;
    matches!(clip_segment(a, b, min, max), Some((t0, t1)) if t0 < t1 || !moving)
}

/// Liang-Barsky clipping: the segment is parameterised as `a + t(b - a)` and
/// clipped against each slab. Returns the surviving `t` interval.
fn clip_segment(
    a: Coord<f64>,
    b: Coord<f64>,
    min: Coord<f64>,
    max: Coord<f64>,
) -> Option<(f64, f64)> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;

    for (p, q) in [
        (-dx, a.x - min.x),
        (dx, max.x - a.x),
        (-dy, a.y - min.y),
        (dy, max.y - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    (t0 <= t1).then_some((t0, t1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unit_square() -> Vec<Coord<f64>> {
        vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 1.0, y: 0.0 },
            coord! { x: 1.0, y: 1.0 },
            coord! { x: 0.0, y: 1.0 },
            coord! { x: 0.0, y: 0.0 },
        ]
    }

    #[test]
    fn test_ring_area() {
        assert_abs_diff_eq!(signed_ring_area(&unit_square()), 1.0);
        let mut clockwise = unit_square();
        clockwise.reverse();
        assert_abs_diff_eq!(signed_ring_area(&clockwise), -1.0);
        assert_abs_diff_eq!(ring_area(&clockwise), 1.0);
        assert_eq!(ring_area(&[coord! { x: 0.0, y: 0.0 }]), 0.0);
    }

    #[test]
    fn test_ring_centroid() {
        let centroid = ring_centroid(&unit_square()).unwrap();
        assert_abs_diff_eq!(centroid.x, 0.5);
        assert_abs_diff_eq!(centroid.y, 0.5);

        // Collinear ring falls back to vertex mean.
        let line = vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 2.0, y: 0.0 },
            coord! { x: 4.0, y: 0.0 },
            coord! { x: 0.0, y: 0.0 },
        ];
        let centroid = ring_centroid(&line).unwrap();
        assert_abs_diff_eq!(centroid.x, 2.0);
        assert!(ring_centroid(&[]).is_none());
    }

    #[test]
    fn test_point_in_ring() {
        let square = unit_square();
        assert!(point_in_ring(coord! { x: 0.5, y: 0.5 }, &square));
        assert!(!point_in_ring(coord! { x: 1.5, y: 0.5 }, &square));
        assert!(!point_in_ring(coord! { x: -0.1, y: 0.9 }, &square));
    }

    #[test]
    fn test_segment_touches_rect() {
        let min = coord! { x: 0.0, y: 0.0 };
        let max = coord! { x: 1.0, y: 1.0 };

        // Crosses through the middle
        assert!(segment_touches_rect(
            coord! { x: -1.0, y: 0.5 },
            coord! { x: 2.0, y: 0.5 },
            min,
            max
        ));
        // Fully inside
        assert!(segment_touches_rect(
            coord! { x: 0.2, y: 0.2 },
            coord! { x: 0.3, y: 0.4 },
            min,
            max
        ));
        // Grazes a corner
        assert!(segment_touches_rect(
            coord! { x: 1.0, y: 2.0 },
            coord! { x: 2.0, y: 1.0 },
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 1.5, y: 1.5 }
        ));
        // Misses entirely
        assert!(!segment_touches_rect(
            coord! { x: 2.0, y: 0.0 },
            coord! { x: 3.0, y: 1.0 },
            min,
            max
        ));
        // Diagonal passing outside the corner
        assert!(!segment_touches_rect(
            coord! { x: 1.2, y: 2.0 },
            coord! { x: 2.0, y: 1.2 },
            min,
            max
        ));
    }

    #[test]
    fn test_segment_crosses_rect_ignores_corner_contact() {
        let min = coord! { x: 0.0, y: 0.0 };
        let max = coord! { x: 1.0, y: 1.0 };

        // Diagonal meeting only the (1, 1) corner
        let a = coord! { x: 1.0, y: 2.0 };
        let b = coord! { x: 2.0, y: 1.0 };
        assert!(segment_touches_rect(a, b, min, max));
        assert!(!segment_crosses_rect(a, b, min, max));

        // Diagonal through the pixel
        assert!(segment_crosses_rect(
            coord! { x: -1.0, y: -1.0 },
            coord! { x: 2.0, y: 2.0 },
            min,
            max
        ));
        // Degenerate segment inside
        let p = coord! { x: 0.5, y: 0.5 };
        assert!(segment_crosses_rect(p, p, min, max));
    }
}
