//! Precomputed cell origins for one output grid resolution.

use crate::util::{CascadeError, CascadeResult};

/// Cell-origin table for a `cells_y x cells_x` output grid.
///
/// Offsets are stored in cell units with `x = col` and `y = row`, which is
/// the form the decoder adds to the in-cell sigmoid. The table is built once
/// per resolution and shared read-only by every stage using that grid.
#[derive(Clone, Debug, PartialEq)]
pub struct GridOffsets {
    cells_y: usize,
    cells_x: usize,
    origins: Vec<[f32; 2]>,
}

impl GridOffsets {
    /// Builds the offsets for a square grid of `cells` cells per axis.
    pub fn square(cells: usize) -> CascadeResult<Self> {
        Self::new(cells, cells)
    }

    /// Builds the offsets for a `cells_y x cells_x` grid.
    pub fn new(cells_y: usize, cells_x: usize) -> CascadeResult<Self> {
        if cells_y == 0 || cells_x == 0 {
            return Err(CascadeError::InvalidInput("grid must have at least one cell"));
        }
        let mut origins = Vec::with_capacity(cells_y * cells_x);
        for row in 0..cells_y {
            for col in 0..cells_x {
                origins.push([col as f32, row as f32]);
            }
        }
        Ok(Self {
            cells_y,
            cells_x,
            origins,
        })
    }

    /// Number of cell rows.
    pub fn cells_y(&self) -> usize {
        self.cells_y
    }

    /// Number of cell columns.
    pub fn cells_x(&self) -> usize {
        self.cells_x
    }

    /// Number of cells per axis as `[x, y]`.
    pub fn num_cells(&self) -> [f32; 2] {
        [self.cells_x as f32, self.cells_y as f32]
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// Returns true if the grid has no cells; never the case for a built table.
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Cell origin in cell units as `[x, y]`.
    pub fn offset(&self, row: usize, col: usize) -> Option<[f32; 2]> {
        if row >= self.cells_y || col >= self.cells_x {
            return None;
        }
        self.origins.get(row * self.cells_x + col).copied()
    }

    /// Cell origin in normalized image space, in `[0, 1)`.
    pub fn origin_normalized(&self, row: usize, col: usize) -> Option<[f32; 2]> {
        let [x, y] = self.offset(row, col)?;
        let [nx, ny] = self.num_cells();
        Some([x / nx, y / ny])
    }

    /// Returns the owning cell `(row, col)` of a normalized point.
    pub fn cell_of(&self, x: f32, y: f32) -> (usize, usize) {
        let col = ((x * self.cells_x as f32).floor().max(0.0) as usize).min(self.cells_x - 1);
        let row = ((y * self.cells_y as f32).floor().max(0.0) as usize).min(self.cells_y - 1);
        (row, col)
    }
}
