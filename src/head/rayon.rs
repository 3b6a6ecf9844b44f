//! Image-parallel formatting (feature-gated).
//!
//! Every image is decoded independently; results are collected in batch
//! order so the output is identical to the sequential path.

use crate::codec::GridOffsets;
use crate::detection::StageOutput;
use crate::head::format::{format_image, training_inputs, FormattedStage};
use crate::head::{ChannelLayout, HeadConfig, ProjectionView};
use crate::util::CascadeResult;
use rayon::prelude::*;

pub(crate) fn format_stage_par(
    view: ProjectionView<'_>,
    offsets: &GridOffsets,
    cfg: &HeadConfig,
    layout: &ChannelLayout,
) -> CascadeResult<FormattedStage> {
    let per_image: Vec<_> = (0..view.images())
        .into_par_iter()
        .map(|image| format_image(view, image, offsets, cfg, layout))
        .collect();

    let mut grids = Vec::with_capacity(per_image.len());
    let mut loss = training_inputs(cfg, 0);
    for result in per_image {
        let (grid, image_loss) = result?;
        grids.push(grid);
        if let (Some(all), Some(part)) = (loss.as_mut(), image_loss) {
            all.append(part);
        }
    }

    Ok(FormattedStage {
        output: StageOutput::new(grids),
        loss,
    })
}
