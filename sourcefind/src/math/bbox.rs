//! Inclusive row/column bounding box for pixel regions.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel indices.
///
/// Bounds are inclusive: pixel `(row, col)` is inside if
/// `min_row <= row <= max_row` and `min_col <= col <= max_col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_row: usize,
    pub max_row: usize,
    pub min_col: usize,
    pub max_col: usize,
}

impl BoundingBox {
    #[inline]
    pub const fn new(min_row: usize, max_row: usize, min_col: usize, max_col: usize) -> Self {
        Self {
            min_row,
            max_row,
            min_col,
            max_col,
        }
    }

    /// Box covering exactly one pixel.
    #[inline]
    pub const fn from_pixel(row: usize, col: usize) -> Self {
        Self::new(row, row, col, col)
    }

    /// Grow the box to include `(row, col)`.
    #[inline]
    pub fn include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.max_row = self.max_row.max(row);
        self.min_col = self.min_col.min(col);
        self.max_col = self.max_col.max(col);
    }

    /// Number of columns covered.
    #[inline]
    pub const fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }

    /// Number of rows covered.
    #[inline]
    pub const fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub const fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.min_row && row <= self.max_row && col >= self.min_col && col <= self.max_col
    }

    /// Expand by `pad` pixels on every side, clipped to a `rows` x `cols` image.
    pub fn padded(&self, pad: usize, rows: usize, cols: usize) -> Self {
        debug_assert!(self.max_row < rows && self.max_col < cols);
        Self {
            min_row: self.min_row.saturating_sub(pad),
            max_row: self.max_row.saturating_add(pad).min(rows - 1),
            min_col: self.min_col.saturating_sub(pad),
            max_col: self.max_col.saturating_add(pad).min(cols - 1),
        }
    }
}
