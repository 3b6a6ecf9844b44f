//! Sequential formatting of a projection into detection grids.

use crate::codec::{decode_box, CodecVariant, GridOffsets};
use crate::detection::{CellIndex, Detection, DetectionGrid, GroupFlag, StageOutput};
use crate::head::{ChannelLayout, HeadConfig, ProjectionView};
use crate::trace::{trace_event, trace_span};
use crate::util::math::{sigmoid, softmax_into};
use crate::util::{CascadeError, CascadeResult};

/// Per-box tensors handed to an external loss, aligned with the detections.
///
/// Entry `k` of every array belongs to the `k`-th detection when the stage's
/// grids are walked in batch order, then row-major cell order, then slot
/// order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LossInputs {
    /// Pre-clip centers in cell units.
    pub shifted_centers: Vec<[f32; 2]>,
    /// Log-space normalized half extents.
    pub log_scales: Vec<[f32; 2]>,
    pub confidences: Vec<f32>,
    /// Class probabilities, `num_classes` per box, when classification is on.
    pub class_probs: Option<Vec<f32>>,
    pub group_logits: Option<Vec<f32>>,
    pub offsets: Option<Vec<[f32; 2]>>,
}

impl LossInputs {
    fn with_capacity(cfg: &HeadConfig, boxes: usize) -> Self {
        Self {
            shifted_centers: Vec::with_capacity(boxes),
            log_scales: Vec::with_capacity(boxes),
            confidences: Vec::with_capacity(boxes),
            class_probs: cfg
                .with_classification
                .then(|| Vec::with_capacity(boxes * cfg.num_classes)),
            group_logits: cfg.with_group_flags.then(|| Vec::with_capacity(boxes)),
            offsets: cfg.with_offsets.then(|| Vec::with_capacity(boxes)),
        }
    }

    /// Number of boxes covered.
    pub fn len(&self) -> usize {
        self.confidences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confidences.is_empty()
    }

    pub(crate) fn append(&mut self, mut other: LossInputs) {
        self.shifted_centers.append(&mut other.shifted_centers);
        self.log_scales.append(&mut other.log_scales);
        self.confidences.append(&mut other.confidences);
        if let (Some(dst), Some(src)) = (self.class_probs.as_mut(), other.class_probs.as_mut()) {
            dst.append(src);
        }
        if let (Some(dst), Some(src)) = (self.group_logits.as_mut(), other.group_logits.as_mut())
        {
            dst.append(src);
        }
        if let (Some(dst), Some(src)) = (self.offsets.as_mut(), other.offsets.as_mut()) {
            dst.append(src);
        }
    }
}

/// Formatted stage with optional training tensors.
#[derive(Clone, Debug, PartialEq)]
pub struct FormattedStage {
    pub output: StageOutput,
    /// Present for [`CodecVariant::Training`].
    pub loss: Option<LossInputs>,
}

/// Formats every image of a projection into a [`DetectionGrid`].
///
/// The projection grid must match `offsets` and carry exactly
/// `num_boxes * channels_per_box` channels.
pub fn format_stage(
    view: ProjectionView<'_>,
    offsets: &GridOffsets,
    cfg: &HeadConfig,
) -> CascadeResult<FormattedStage> {
    let layout = cfg.layout()?;
    check_shape(view, offsets, &layout)?;

    let _span = trace_span!(
        "format_stage",
        images = view.images(),
        cells = offsets.len(),
        boxes = layout.num_boxes()
    )
    .entered();

    #[cfg(feature = "rayon")]
    if cfg.parallel {
        let formatted = super::rayon::format_stage_par(view, offsets, cfg, &layout)?;
        trace_event!("stage_formatted", detections = formatted.output.num_detections());
        return Ok(formatted);
    }

    let mut grids = Vec::with_capacity(view.images());
    let mut loss = training_inputs(cfg, 0);
    for image in 0..view.images() {
        let (grid, image_loss) = format_image(view, image, offsets, cfg, &layout)?;
        grids.push(grid);
        if let (Some(all), Some(part)) = (loss.as_mut(), image_loss) {
            all.append(part);
        }
    }

    let output = StageOutput::new(grids);
    trace_event!("stage_formatted", detections = output.num_detections());
    Ok(FormattedStage { output, loss })
}

pub(crate) fn training_inputs(cfg: &HeadConfig, boxes: usize) -> Option<LossInputs> {
    match cfg.variant {
        CodecVariant::Ratio => None,
        CodecVariant::Training => Some(LossInputs::with_capacity(cfg, boxes)),
    }
}

fn check_shape(
    view: ProjectionView<'_>,
    offsets: &GridOffsets,
    layout: &ChannelLayout,
) -> CascadeResult<()> {
    if view.cells_y() != offsets.cells_y() {
        return Err(CascadeError::ShapeMismatch {
            context: "projection rows vs grid offsets",
            expected: offsets.cells_y(),
            got: view.cells_y(),
        });
    }
    if view.cells_x() != offsets.cells_x() {
        return Err(CascadeError::ShapeMismatch {
            context: "projection cols vs grid offsets",
            expected: offsets.cells_x(),
            got: view.cells_x(),
        });
    }
    if view.channels() != layout.channels_per_cell() {
        return Err(CascadeError::ShapeMismatch {
            context: "projection channels",
            expected: layout.channels_per_cell(),
            got: view.channels(),
        });
    }
    Ok(())
}

/// Formats one image of the projection.
pub(crate) fn format_image(
    view: ProjectionView<'_>,
    image: usize,
    offsets: &GridOffsets,
    cfg: &HeadConfig,
    layout: &ChannelLayout,
) -> CascadeResult<(DetectionGrid, Option<LossInputs>)> {
    let num_boxes = layout.num_boxes();
    let per_box = layout.channels_per_box();
    let num_cells = offsets.num_cells();
    let total = offsets.len() * num_boxes;

    let mut detections = Vec::with_capacity(total);
    let mut loss = training_inputs(cfg, total);
    let mut probs = Vec::new();

    for row in 0..offsets.cells_y() {
        for col in 0..offsets.cells_x() {
            let cell = view
                .cell(image, row, col)
                .ok_or(CascadeError::IndexOutOfBounds {
                    index: image,
                    len: view.images(),
                    context: "image",
                })?;
            let cell_offset = offsets
                .offset(row, col)
                .ok_or(CascadeError::IndexOutOfBounds {
                    index: row * offsets.cells_x() + col,
                    len: offsets.len(),
                    context: "cell",
                })?;

            for (slot, rec) in cell.chunks_exact(per_box).enumerate() {
                let c = ChannelLayout::CENTER;
                let s = ChannelLayout::SCALE;
                let decoded = decode_box(
                    [rec[c], rec[c + 1]],
                    [rec[s], rec[s + 1]],
                    cell_offset,
                    num_cells,
                    cfg.variant,
                );
                let confidence = sigmoid(rec[ChannelLayout::CONFIDENCE]);
                let offset = layout
                    .offset()
                    .map(|at| [sigmoid(rec[at]), sigmoid(rec[at + 1])]);
                let group = layout.group().map(|at| GroupFlag { logit: rec[at] });
                let class_probs = layout.classes().map(|(at, n)| {
                    softmax_into(&rec[at..at + n], &mut probs);
                    probs.clone()
                });

                if let (Some(loss), Some(inter)) = (loss.as_mut(), decoded.intermediates) {
                    loss.shifted_centers.push(inter.shifted_center);
                    loss.log_scales.push(inter.log_scale);
                    loss.confidences.push(confidence);
                    if let (Some(dst), Some(p)) = (loss.class_probs.as_mut(), &class_probs) {
                        dst.extend_from_slice(p);
                    }
                    if let (Some(dst), Some(g)) = (loss.group_logits.as_mut(), group) {
                        dst.push(g.logit);
                    }
                    if let (Some(dst), Some(o)) = (loss.offsets.as_mut(), offset) {
                        dst.push(o);
                    }
                }

                detections.push(Detection {
                    bbox: decoded.bbox,
                    confidence,
                    class_probs,
                    group,
                    offset,
                    cell: CellIndex { row, col, slot },
                });
            }
        }
    }

    let grid = DetectionGrid::new(offsets.cells_y(), offsets.cells_x(), num_boxes, detections)?;
    Ok((grid, loss))
}
