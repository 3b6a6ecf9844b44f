//! Grid-relative bounding-box codec.
//!
//! A box slot predicts a raw center `(cx, cy)` and a raw log-scale `(sx, sy)`
//! relative to its owning cell. Decoding maps them to normalized coordinates:
//!
//! ```text
//! center = (sigmoid(raw_center) + cell_offset) / num_cells
//! half   = exp(raw_scale) / num_cells
//! box    = clamp01(center - half, center + half)
//! ```
//!
//! The clamp loses information at the image border and is never undone.

mod grid;

pub use grid::GridOffsets;

use crate::detection::BoxCoords;
use crate::util::math::{logit, sigmoid};
use crate::util::{CascadeError, CascadeResult};

/// Selects which tensors the decoder exposes besides the final box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodecVariant {
    /// Only the clamped box.
    #[default]
    Ratio,
    /// The clamped box plus the pre-clip center and log-space scale used as
    /// regression targets by an external loss.
    Training,
}

/// Pre-clip tensors exposed by [`CodecVariant::Training`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CodecIntermediates {
    /// `sigmoid(raw_center) + cell_offset`, in cell units.
    pub shifted_center: [f32; 2],
    /// `raw_scale - ln(num_cells)`; `exp` of it is the normalized half extent.
    pub log_scale: [f32; 2],
}

/// Result of decoding one box slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodedBox {
    pub bbox: BoxCoords,
    pub intermediates: Option<CodecIntermediates>,
}

/// Raw activations that decode to a given box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawBox {
    pub center: [f32; 2],
    pub scale: [f32; 2],
}

/// Decodes one box slot into normalized image coordinates.
///
/// `cell_offset` and `num_cells` are `[x, y]` in cell units, as returned by
/// [`GridOffsets::offset`] and [`GridOffsets::num_cells`].
#[inline]
pub fn decode_box(
    raw_center: [f32; 2],
    raw_scale: [f32; 2],
    cell_offset: [f32; 2],
    num_cells: [f32; 2],
    variant: CodecVariant,
) -> DecodedBox {
    let shifted = [
        sigmoid(raw_center[0]) + cell_offset[0],
        sigmoid(raw_center[1]) + cell_offset[1],
    ];
    let cx = shifted[0] / num_cells[0];
    let cy = shifted[1] / num_cells[1];
    let hx = raw_scale[0].exp() / num_cells[0];
    let hy = raw_scale[1].exp() / num_cells[1];
    let bbox = BoxCoords::new(cx - hx, cy - hy, cx + hx, cy + hy).clamped();

    let intermediates = match variant {
        CodecVariant::Ratio => None,
        CodecVariant::Training => Some(CodecIntermediates {
            shifted_center: shifted,
            log_scale: [
                raw_scale[0] - num_cells[0].ln(),
                raw_scale[1] - num_cells[1].ln(),
            ],
        }),
    };
    DecodedBox {
        bbox,
        intermediates,
    }
}

/// Computes the raw activations that [`decode_box`] maps back to `bbox`.
///
/// The box center must lie strictly inside the cell at `cell_offset` and the
/// box must have positive extent; otherwise no finite activation exists.
pub fn encode_box(
    bbox: BoxCoords,
    cell_offset: [f32; 2],
    num_cells: [f32; 2],
) -> CascadeResult<RawBox> {
    let [cx, cy] = bbox.center();
    let fx = cx * num_cells[0] - cell_offset[0];
    let fy = cy * num_cells[1] - cell_offset[1];
    let inside = |f: f32| f > 0.0 && f < 1.0;
    if !inside(fx) || !inside(fy) {
        return Err(CascadeError::InvalidInput(
            "box center is outside the owning cell",
        ));
    }
    let hx = 0.5 * bbox.width();
    let hy = 0.5 * bbox.height();
    if hx <= 0.0 || hy <= 0.0 {
        return Err(CascadeError::InvalidInput("box has no extent"));
    }
    Ok(RawBox {
        center: [logit(fx), logit(fy)],
        scale: [(hx * num_cells[0]).ln(), (hy * num_cells[1]).ln()],
    })
}
