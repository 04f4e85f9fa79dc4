//! North-up affine transforms between world coordinates and pixel grids.
//!
//! Follows the usual image convention: row 0 is the northern edge, column 0
//! the western edge, and pixel `(row, col)` covers the half-open square whose
//! upper-left corner is `(col, row)` in continuous pixel space.

use crate::bounds::Bbox;
use thiserror::Error;

/// Errors when a grid cannot be built from the requested shape and extent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("grid shape {rows}x{cols} has no pixels")]
    EmptyShape { rows: usize, cols: usize },
    #[error("grid bounds {0:?} have no area")]
    DegenerateBounds([f64; 4]),
}

/// Affine mapping for an axis-aligned, north-up raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTransform {
    left: f64,
    top: f64,
    pixel_width: f64,
    pixel_height: f64,
    rows: usize,
    cols: usize,
}

impl GridTransform {
    /// Build the transform that stretches `bounds` over `rows x cols` pixels.
    pub fn from_bounds(bounds: &Bbox, rows: usize, cols: usize) -> Result<Self, GridError> {
        if rows == 0 || cols == 0 {
            return Err(GridError::EmptyShape { rows, cols });
        }
        let width = bounds.width();
        let height = bounds.height();
        if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
            return Err(GridError::DegenerateBounds(bounds.as_array()));
        }
        Ok(Self {
            left: bounds.min_x,
            top: bounds.max_y,
            pixel_width: width / cols as f64,
            pixel_height: height / rows as f64,
            rows,
            cols,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        (self.pixel_width, self.pixel_height)
    }

    /// Continuous pixel coordinates `(col, row)` of a world point.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.left) / self.pixel_width,
            (self.top - y) / self.pixel_height,
        )
    }

    /// World coordinates of continuous pixel position `(col, row)`.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.left + col * self.pixel_width,
            self.top - row * self.pixel_height,
        )
    }

    /// World coordinates of the center of pixel `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }
}
