//! Borrowed and owned views of a backbone's final projection.
//!
//! The projection is a dense `f32` tensor of shape
//! `(images, cells_y, cells_x, channels)` in row-major order, where
//! `channels = num_boxes * channels_per_box`.

use crate::util::{CascadeError, CascadeResult};

/// Borrowed projection tensor with an explicit shape.
#[derive(Copy, Clone, Debug)]
pub struct ProjectionView<'a> {
    data: &'a [f32],
    images: usize,
    cells_y: usize,
    cells_x: usize,
    channels: usize,
}

impl<'a> ProjectionView<'a> {
    /// Wraps `data` as a `(images, cells_y, cells_x, channels)` tensor.
    pub fn new(
        data: &'a [f32],
        images: usize,
        cells_y: usize,
        cells_x: usize,
        channels: usize,
    ) -> CascadeResult<Self> {
        if cells_y == 0 || cells_x == 0 || channels == 0 {
            return Err(CascadeError::InvalidInput(
                "projection needs at least one cell and one channel",
            ));
        }
        let needed = required_len(images, cells_y, cells_x, channels)?;
        if data.len() != needed {
            return Err(CascadeError::ShapeMismatch {
                context: "projection buffer",
                expected: needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            images,
            cells_y,
            cells_x,
            channels,
        })
    }

    pub fn images(&self) -> usize {
        self.images
    }

    pub fn cells_y(&self) -> usize {
        self.cells_y
    }

    pub fn cells_x(&self) -> usize {
        self.cells_x
    }

    /// Channels per cell across all box slots.
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn as_slice(&self) -> &'a [f32] {
        self.data
    }

    /// All channels of one cell.
    pub fn cell(&self, image: usize, row: usize, col: usize) -> Option<&'a [f32]> {
        if image >= self.images || row >= self.cells_y || col >= self.cells_x {
            return None;
        }
        let start = ((image * self.cells_y + row) * self.cells_x + col) * self.channels;
        self.data.get(start..start + self.channels)
    }
}

fn required_len(
    images: usize,
    cells_y: usize,
    cells_x: usize,
    channels: usize,
) -> CascadeResult<usize> {
    images
        .checked_mul(cells_y)
        .and_then(|v| v.checked_mul(cells_x))
        .and_then(|v| v.checked_mul(channels))
        .ok_or(CascadeError::InvalidInput("projection shape overflows"))
}

/// Owned projection tensor, as returned by a backbone.
#[derive(Clone, Debug, PartialEq)]
pub struct RawProjection {
    data: Vec<f32>,
    images: usize,
    cells_y: usize,
    cells_x: usize,
    channels: usize,
}

impl RawProjection {
    /// Takes ownership of a row-major `(images, cells_y, cells_x, channels)` buffer.
    pub fn from_vec(
        data: Vec<f32>,
        images: usize,
        cells_y: usize,
        cells_x: usize,
        channels: usize,
    ) -> CascadeResult<Self> {
        ProjectionView::new(&data, images, cells_y, cells_x, channels)?;
        Ok(Self {
            data,
            images,
            cells_y,
            cells_x,
            channels,
        })
    }

    /// Returns a borrowed view of the tensor.
    pub fn view(&self) -> ProjectionView<'_> {
        ProjectionView {
            data: &self.data,
            images: self.images,
            cells_y: self.cells_y,
            cells_x: self.cells_x,
            channels: self.channels,
        }
    }

    pub fn images(&self) -> usize {
        self.images
    }
}
