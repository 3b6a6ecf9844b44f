//! Mapping child-stage detections back into the parent frame.
//!
//! A child stage runs on the flat crop batch of a [`CropPlan`]. Rescaling
//! regroups that batch by parent image, maps every box through its crop's
//! affine transform, and concatenates the crops of one image along the slot
//! axis: crop `k`'s slot `b` lands on slot `k * num_boxes + b`.

mod batch;

pub use batch::{split_batch, split_batch_ragged};

use crate::crop::CropPlan;
use crate::detection::{CellIndex, DetectionGrid, StageOutput};
use crate::trace::{trace_event, trace_span};
use crate::util::{CascadeError, CascadeResult};

/// Rescales a child stage's output into per-image grids in parent coordinates.
///
/// Every child grid must share one layout. Images without crops get an empty
/// grid; a batch without any crops yields empty grids with no cells.
pub fn rescale_stage(child: StageOutput, plan: &CropPlan) -> CascadeResult<Vec<DetectionGrid>> {
    if child.batch_size() != plan.total_crops() {
        return Err(CascadeError::ShapeMismatch {
            context: "child batch vs crop plan",
            expected: plan.total_crops(),
            got: child.batch_size(),
        });
    }
    let _span = trace_span!(
        "rescale_stage",
        images = plan.num_images(),
        crops = plan.total_crops()
    )
    .entered();

    let (cells_y, cells_x, num_boxes) = match child.grids().first() {
        Some(grid) => (grid.cells_y(), grid.cells_x(), grid.num_boxes()),
        None => (0, 0, 0),
    };
    for grid in child.grids() {
        if grid.len() != cells_y * cells_x * num_boxes
            || grid.cells_y() != cells_y
            || grid.cells_x() != cells_x
        {
            return Err(CascadeError::ShapeMismatch {
                context: "child grid layout",
                expected: cells_y * cells_x * num_boxes,
                got: grid.len(),
            });
        }
    }

    let per_image = split_batch_ragged(child.into_grids(), &plan.counts())?;
    let mut out = Vec::with_capacity(per_image.len());
    for (image, grids) in per_image.into_iter().enumerate() {
        let crops = plan.crops(image);
        let mut streams: Vec<_> = grids
            .into_iter()
            .map(|grid| grid.into_detections().into_iter())
            .collect();

        let slots = crops.len() * num_boxes;
        let mut detections = Vec::with_capacity(cells_y * cells_x * slots);
        for row in 0..cells_y {
            for col in 0..cells_x {
                for (crop_idx, (crop, stream)) in crops.iter().zip(streams.iter_mut()).enumerate()
                {
                    for (b, mut det) in stream.by_ref().take(num_boxes).enumerate() {
                        det.bbox = crop.rect.map_to_parent(det.bbox);
                        det.cell = CellIndex {
                            row,
                            col,
                            slot: crop_idx * num_boxes + b,
                        };
                        detections.push(det);
                    }
                }
            }
        }
        out.push(DetectionGrid::new(cells_y, cells_x, slots, detections)?);
    }

    trace_event!(
        "stage_rescaled",
        detections = out.iter().map(DetectionGrid::len).sum::<usize>()
    );
    Ok(out)
}
