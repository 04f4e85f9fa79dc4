//! Rasterising field boundaries onto satellite pixel grids.
//!
//! A [`FieldMask`] marks the pixels of one specific grid (shape, bounding box
//! and CRS) that belong to a field. Masks are "all touched": a pixel is inside
//! when its center lies inside the ring *or* any boundary edge crosses it.
//! This deliberately over-includes edge pixels so that a field smaller than a
//! few pixels never rasterises to nothing.

use crate::field_boundary::FieldBoundary;
use crop_math::affine::{GridError, GridTransform};
use crop_math::bounds::{transform_bounds, Bbox, DEFAULT_DENSIFY_POINTS};
use crop_math::polygon::{point_in_ring, segment_crosses_rect};
use crop_math::projection::{BuiltinProjector, Crs, Projector};
use geo_types::{coord, Coord};
use log::{debug, warn};
use ndarray::{Array, Array2, ArrayView, ArrayView2, Axis, Dimension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaskError {
    #[error("shape mismatch: data {data:?} vs mask {mask:?}")]
    ShapeMismatch {
        data: Vec<usize>,
        mask: (usize, usize),
    },
    #[error("invalid target grid: {0}")]
    Grid(#[from] GridError),
}

/// The raster grid a mask is aligned to.
///
/// `bbox` is geographic (`[min_lon, min_lat, max_lon, max_lat]`); `crs` is the
/// native system of the raster the mask will be applied to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub bbox: Bbox,
    pub crs: Crs,
}

impl GridSpec {
    pub fn new(shape: (usize, usize), bbox: Bbox, crs: Crs) -> Self {
        Self {
            rows: shape.0,
            cols: shape.1,
            bbox,
            crs,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn key(&self) -> GridKey {
        GridKey {
            rows: self.rows,
            cols: self.cols,
            bbox: self.bbox.as_array().map(f64::to_bits),
            crs: self.crs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridKey {
    rows: usize,
    cols: usize,
    bbox: [u64; 4],
    crs: Crs,
}

/// Boolean raster, `true` inside the field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMask {
    mask: Array2<bool>,
    grid: GridSpec,
}

impl FieldMask {
    /// Rasterise `boundary` onto `grid` with the built-in projector.
    pub fn create(boundary: &FieldBoundary, grid: GridSpec) -> Result<Self, MaskError> {
        Self::create_with(&BuiltinProjector, boundary, grid)
    }

    /// Rasterise `boundary` onto `grid`.
    ///
    /// When the grid is not geographic, both the ring and the bbox are
    /// reprojected into its CRS. If either reprojection fails the mask is
    /// computed as if the inputs were already in the target system, which
    /// yields an approximate mask instead of aborting the analysis.
    pub fn create_with<P: Projector + ?Sized>(
        projector: &P,
        boundary: &FieldBoundary,
        grid: GridSpec,
    ) -> Result<Self, MaskError> {
        let (ring, bounds) = native_geometry(projector, boundary.ring(), &grid);
        let transform = GridTransform::from_bounds(&bounds, grid.rows, grid.cols)?;

        let pixel_ring: Vec<Coord<f64>> = ring
            .iter()
            .map(|c| {
                let (col, row) = transform.world_to_pixel(c.x, c.y);
                coord! { x: col, y: row }
            })
            .collect();
        let mask = rasterize_all_touched(&pixel_ring, grid.rows, grid.cols);

        debug!(
            "Field mask {}x{} in {}: {} pixels inside",
            grid.rows,
            grid.cols,
            grid.crs,
            mask.iter().filter(|&&m| m).count()
        );
        Ok(Self { mask, grid })
    }

    /// Wrap an existing boolean array. Its shape must match `grid`.
    pub fn from_array(mask: Array2<bool>, grid: GridSpec) -> Result<Self, MaskError> {
        if mask.dim() != grid.shape() {
            return Err(MaskError::ShapeMismatch {
                data: mask.shape().to_vec(),
                mask: grid.shape(),
            });
        }
        Ok(Self { mask, grid })
    }

    pub fn view(&self) -> ArrayView2<'_, bool> {
        self.mask.view()
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    /// Number of pixels inside the field.
    pub fn pixel_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Fraction of the grid covered by the field.
    pub fn coverage(&self) -> f64 {
        self.pixel_count() as f64 / self.mask.len() as f64
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_count() == 0
    }

    /// Whether this mask was built for exactly `grid`.
    pub fn matches(&self, grid: &GridSpec) -> bool {
        self.grid.key() == grid.key()
    }

    pub fn into_array(self) -> Array2<bool> {
        self.mask
    }
}

fn native_geometry<P: Projector + ?Sized>(
    projector: &P,
    ring: &[Coord<f64>],
    grid: &GridSpec,
) -> (Vec<Coord<f64>>, Bbox) {
    if grid.crs.is_geographic() {
        return (ring.to_vec(), grid.bbox);
    }
    let projected = projector
        .project_ring(ring, Crs::Wgs84, grid.crs)
        .and_then(|r| {
            transform_bounds(projector, &grid.bbox, Crs::Wgs84, grid.crs, DEFAULT_DENSIFY_POINTS)
                .map(|b| (r, b))
        });
    match projected {
        Ok(geometry) => geometry,
        Err(e) => {
            warn!(
                "Projection to {} failed: {}. Falling back to WGS84 calculation.",
                grid.crs, e
            );
            (ring.to_vec(), grid.bbox)
        }
    }
}

/// Burn a ring given in continuous pixel coordinates (`x = col`, `y = row`).
fn rasterize_all_touched(ring: &[Coord<f64>], rows: usize, cols: usize) -> Array2<bool> {
    let mut mask = Array2::from_elem((rows, cols), false);
    if ring.len() < 2 || ring.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return mask;
    }

    // Pixels crossed by an edge
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        let Some((r0, r1)) = pixel_span(a.y.min(b.y), a.y.max(b.y), rows) else {
            continue;
        };
        let Some((c0, c1)) = pixel_span(a.x.min(b.x), a.x.max(b.x), cols) else {
            continue;
        };
        for r in r0..=r1 {
            for c in c0..=c1 {
                if mask[[r, c]] {
                    continue;
                }
                let min = coord! { x: c as f64, y: r as f64 };
                let max = coord! { x: c as f64 + 1.0, y: r as f64 + 1.0 };
                if segment_crosses_rect(a, b, min, max) {
                    mask[[r, c]] = true;
                }
            }
        }
    }

    // Pixels whose center is inside
    let (min_x, max_x, min_y, max_y) = ring.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(x0, x1, y0, y1), c| (x0.min(c.x), x1.max(c.x), y0.min(c.y), y1.max(c.y)),
    );
    if let (Some((r0, r1)), Some((c0, c1))) = (
        pixel_span(min_y, max_y, rows),
        pixel_span(min_x, max_x, cols),
    ) {
        for r in r0..=r1 {
            for c in c0..=c1 {
                if !mask[[r, c]] {
                    let center = coord! { x: c as f64 + 0.5, y: r as f64 + 0.5 };
                    mask[[r, c]] = point_in_ring(center, ring);
                }
            }
        }
    }

    mask
}

/// Inclusive range of pixels `[i, i + 1)` that overlap `[lo, hi]`, clipped
/// to `0..len`.
///
/// A bound lying exactly on a pixel line does not pull in the pixel beyond
/// it, so an edge on a pixel line has an empty span.
fn pixel_span(lo: f64, hi: f64, len: usize) -> Option<(usize, usize)> {
    if hi <= 0.0 || lo >= len as f64 {
        return None;
    }
    let first = lo.floor().max(0.0) as usize;
    let last = (hi.ceil() as usize).min(len).checked_sub(1)?;
    (first <= last).then_some((first, last))
}

/// Rasterise a boundary onto a grid. See [`FieldMask::create`].
pub fn create_field_mask(
    boundary: &FieldBoundary,
    shape: (usize, usize),
    bbox: Bbox,
    crs: Crs,
) -> Result<FieldMask, MaskError> {
    FieldMask::create(boundary, GridSpec::new(shape, bbox, crs))
}

/// Copy `array`, replacing every pixel outside `mask` with `fill_value`.
///
/// Works for single-band `(H, W)` and multi-band `(H, W, C)` arrays; for the
/// latter the mask is broadcast over the channel axis.
pub fn apply_field_mask<D: Dimension>(
    array: &ArrayView<'_, f64, D>,
    mask: &ArrayView2<'_, bool>,
    fill_value: f64,
) -> Result<Array<f64, D>, MaskError> {
    let shape = array.shape();
    let mismatch = || MaskError::ShapeMismatch {
        data: shape.to_vec(),
        mask: mask.dim(),
    };
    if !(2..=3).contains(&shape.len()) || (shape[0], shape[1]) != mask.dim() {
        return Err(mismatch());
    }

    let mut result = array.to_owned().into_dyn();
    for ((row, col), &inside) in mask.indexed_iter() {
        if !inside {
            result
                .index_axis_mut(Axis(0), row)
                .index_axis_move(Axis(0), col)
                .fill(fill_value);
        }
    }
    result.into_dimensionality::<D>().map_err(|_| mismatch())
}

/// Masks for one boundary, keyed by target grid.
///
/// Scenes from the same collection share a grid, so the mask is rasterised
/// once per distinct (shape, bbox, CRS) combination.
#[derive(Debug, Clone)]
pub struct MaskCache {
    boundary: FieldBoundary,
    entries: HashMap<GridKey, FieldMask>,
}

impl MaskCache {
    pub fn new(boundary: FieldBoundary) -> Self {
        Self {
            boundary,
            entries: HashMap::new(),
        }
    }

    pub fn boundary(&self) -> &FieldBoundary {
        &self.boundary
    }

    /// Cached mask for `grid`, rasterising it on first use.
    pub fn get_or_create(&mut self, grid: GridSpec) -> Result<&FieldMask, MaskError> {
        let key = grid.key();
        if !self.entries.contains_key(&key) {
            let mask = FieldMask::create(&self.boundary, grid)?;
            self.entries.insert(key, mask);
        }
        Ok(&self.entries[&key])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_boundary::{create_circular_boundary, create_polygon_boundary};
    use ndarray::{s, Array3};

    fn field_grid(shape: (usize, usize), crs: Crs) -> (FieldBoundary, GridSpec) {
        let boundary = create_circular_boundary(-1.5, 35.2, 400.0).unwrap();
        let bbox = Bbox::around(-1.5, 35.2, 0.05);
        (boundary, GridSpec::new(shape, bbox, crs))
    }

    #[test]
    fn test_create_field_mask_shape() {
        let (boundary, grid) = field_grid((500, 500), Crs::Wgs84);
        let mask = create_field_mask(&boundary, grid.shape(), grid.bbox, grid.crs).unwrap();
        assert_eq!(mask.shape(), (500, 500));
        let inside = mask.pixel_count();
        assert!(inside > 0 && inside < 500 * 500);
        // ~50 ha over a ~123 km2 box, plus edge pixels
        assert!(mask.coverage() > 0.003 && mask.coverage() < 0.006, "{}", mask.coverage());
    }

    #[test]
    fn test_create_field_mask_projected() {
        let utm = Crs::utm_for(35.2, -1.5);
        let (boundary, grid) = field_grid((500, 500), utm);
        let mask = FieldMask::create(&boundary, grid).unwrap();
        let inside = mask.pixel_count();
        assert!(inside > 0 && inside < 500 * 500);

        // Center pixel is inside the field
        assert!(mask.view()[[250, 250]]);
        assert!(!mask.view()[[0, 0]]);
    }

    #[test]
    fn test_unsupported_crs_falls_back() {
        let (boundary, grid) = field_grid((200, 200), Crs::Epsg(2056));
        let fallback = FieldMask::create(&boundary, grid).unwrap();
        let (_, wgs_grid) = field_grid((200, 200), Crs::Wgs84);
        let geographic = FieldMask::create(&boundary, wgs_grid).unwrap();
        assert_eq!(fallback.view(), geographic.view());
        assert_eq!(fallback.grid().crs, Crs::Epsg(2056));
    }

    #[test]
    fn test_mask_is_deterministic() {
        let utm = Crs::utm_for(35.2, -1.5);
        let (boundary, grid) = field_grid((300, 300), utm);
        let a = FieldMask::create(&boundary, grid).unwrap();
        let b = FieldMask::create(&boundary, grid).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tiny_field_not_empty() {
        // 5 m radius field on 10 m-ish pixels
        let boundary = create_circular_boundary(-1.5, 35.2, 5.0).unwrap();
        let grid = GridSpec::new((1000, 1000), Bbox::around(-1.5, 35.2, 0.05), Crs::Wgs84);
        let mask = FieldMask::create(&boundary, grid).unwrap();
        assert!(mask.pixel_count() >= 1);
    }

    #[test]
    fn test_all_touched_includes_edge_pixels() {
        // Square covering pixel columns 2.5..6.5, rows 2.5..6.5 in a 10x10 grid
        let vertices = [(7.5, 2.5), (7.5, 6.5), (3.5, 6.5), (3.5, 2.5)];
        let boundary = create_polygon_boundary(&vertices).unwrap();
        let grid = GridSpec::new((10, 10), Bbox::new(0.0, 0.0, 10.0, 10.0), Crs::Wgs84);
        let mask = FieldMask::create(&boundary, grid).unwrap();

        // Rows 2..=6 and cols 2..=6 are touched: 25 pixels rather than 16 centers
        assert_eq!(mask.pixel_count(), 25);
        assert!(mask.view().slice(s![2..7, 2..7]).iter().all(|&m| m));
    }

    #[test]
    fn test_pixel_aligned_square_has_no_extra_ring() {
        // Edges on pixel lines: cols 2..7 and rows 2..7 of a 10x10 grid
        let vertices = [(8.0, 2.0), (8.0, 7.0), (3.0, 7.0), (3.0, 2.0)];
        let boundary = create_polygon_boundary(&vertices).unwrap();
        let grid = GridSpec::new((10, 10), Bbox::new(0.0, 0.0, 10.0, 10.0), Crs::Wgs84);
        let mask = FieldMask::create(&boundary, grid).unwrap();

        assert_eq!(mask.pixel_count(), 25);
        assert!(mask.view().slice(s![2..7, 2..7]).iter().all(|&m| m));
        assert!(!mask.view()[[1, 2]]);
        assert!(!mask.view()[[7, 7]]);
    }

    #[test]
    fn test_pixel_aligned_diamond_skips_corner_neighbours() {
        // Diamond whose edges pass exactly through pixel corners
        let vertices = [(7.0, 5.0), (5.0, 7.0), (3.0, 5.0), (5.0, 3.0)];
        let boundary = create_polygon_boundary(&vertices).unwrap();
        let grid = GridSpec::new((10, 10), Bbox::new(0.0, 0.0, 10.0, 10.0), Crs::Wgs84);
        let mask = FieldMask::create(&boundary, grid).unwrap();

        // Rows 3..7, cols 3..7 minus the four outer corners
        assert_eq!(mask.pixel_count(), 12);
        assert!(!mask.view()[[2, 4]]);
        assert!(!mask.view()[[3, 3]]);
    }

    #[test]
    fn test_pixel_span_half_open() {
        assert_eq!(pixel_span(2.0, 7.0, 10), Some((2, 6)));
        assert_eq!(pixel_span(2.5, 6.5, 10), Some((2, 6)));
        assert_eq!(pixel_span(3.0, 3.0, 10), None);
        assert_eq!(pixel_span(3.2, 3.2, 10), Some((3, 3)));
        assert_eq!(pixel_span(-4.0, 0.0, 10), None);
        assert_eq!(pixel_span(9.5, 14.0, 10), Some((9, 9)));
        assert_eq!(pixel_span(10.0, 14.0, 10), None);
    }

    #[test]
    fn test_invalid_grid() {
        let (boundary, grid) = field_grid((0, 10), Crs::Wgs84);
        assert!(matches!(
            FieldMask::create(&boundary, grid),
            Err(MaskError::Grid(GridError::EmptyShape { .. }))
        ));
    }

    #[test]
    fn test_apply_field_mask() {
        let data = Array2::<f64>::ones((100, 100));
        let mut mask = Array2::from_elem((100, 100), false);
        mask.slice_mut(s![40..60, 40..60]).fill(true);

        let masked = apply_field_mask(&data.view(), &mask.view(), f64::NAN).unwrap();
        assert_eq!(masked.iter().filter(|v| !v.is_nan()).count(), 400);
        assert!(masked[[0, 0]].is_nan());
        assert_eq!(masked[[50, 50]], 1.0);
    }

    #[test]
    fn test_apply_field_mask_custom_fill() {
        let data = Array2::<f64>::from_elem((4, 4), 3.0);
        let mut mask = Array2::from_elem((4, 4), false);
        mask[[1, 1]] = true;
        let masked = apply_field_mask(&data.view(), &mask.view(), -1.0).unwrap();
        assert_eq!(masked.iter().filter(|&&v| v == -1.0).count(), 15);
        assert_eq!(masked[[1, 1]], 3.0);
    }

    #[test]
    fn test_apply_field_mask_multiband() {
        let data = Array3::<f64>::ones((10, 10, 3));
        let mut mask = Array2::from_elem((10, 10), false);
        mask.slice_mut(s![0..2, 0..5]).fill(true);

        let masked = apply_field_mask(&data.view(), &mask.view(), 0.0).unwrap();
        assert_eq!(masked.dim(), (10, 10, 3));
        assert_eq!(masked.sum(), 30.0);
        assert!(masked.slice(s![5, 5, ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_apply_field_mask_shape_mismatch() {
        let data = Array2::<f64>::ones((10, 10));
        let mask = Array2::from_elem((5, 5), true);
        assert_eq!(
            apply_field_mask(&data.view(), &mask.view(), f64::NAN),
            Err(MaskError::ShapeMismatch {
                data: vec![10, 10],
                mask: (5, 5)
            })
        );
    }

    #[test]
    fn test_mask_cache() {
        let (boundary, grid) = field_grid((100, 100), Crs::Wgs84);
        let mut cache = MaskCache::new(boundary);
        let first = cache.get_or_create(grid).unwrap().clone();
        let second = cache.get_or_create(grid).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        let other = GridSpec::new((50, 50), grid.bbox, grid.crs);
        let resized = cache.get_or_create(other).unwrap();
        assert_eq!(resized.shape(), (50, 50));
        assert!(!resized.matches(&grid));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_from_array_checks_shape() {
        let grid = GridSpec::new((3, 3), Bbox::new(0.0, 0.0, 1.0, 1.0), Crs::Wgs84);
        assert!(FieldMask::from_array(Array2::from_elem((3, 3), true), grid).is_ok());
        assert!(FieldMask::from_array(Array2::from_elem((2, 3), true), grid).is_err());
    }
}
