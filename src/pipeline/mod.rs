//! Cascade driver wiring the stages together.
//!
//! Stage `k` runs the backbone on its batch, formats the projection, and
//! (unless it is the last stage) selects crops for stage `k + 1`. Every
//! batch item remembers its root image and its rectangle in root
//! coordinates, so carried detections of any stage and the last stage's
//! output are mapped straight into the root frame.

use crate::codec::GridOffsets;
use crate::config::{StageConfig, WeightSharing};
use crate::crop::{extract_crops, select_crops, CropExtractor, CropPlan, CropRect, CropSlot};
use crate::detection::{CarriedDetection, CellIndex, DetectionGrid, StageOutput};
use crate::head::{format_stage, RawProjection};
use crate::merge::{merge, FinalDetections};
use crate::rescale::rescale_stage;
use crate::trace::{trace_event, trace_span};
use crate::util::{CascadeError, CascadeResult};

/// What the backbone needs to know about the stage it runs.
#[derive(Clone, Copy, Debug)]
pub struct StageSpec<'a> {
    /// Position of the stage in the cascade.
    pub index: usize,
    pub config: &'a StageConfig,
    pub grid: &'a GridOffsets,
    /// Resolved parameter sharing for this call.
    pub weights: WeightSharing,
}

/// Feature extractor plus final projection, provided by the caller.
///
/// Must return one projection row per input image, shaped
/// `(images, cells_y, cells_x, num_boxes * channels_per_box)` for the
/// stage's grid and head.
pub trait Backbone {
    type Image;

    fn project(
        &self,
        images: &[Self::Image],
        stage: &StageSpec<'_>,
    ) -> CascadeResult<RawProjection>;
}

struct Stage {
    config: StageConfig,
    grid: GridOffsets,
}

/// A configured multi-stage cascade.
pub struct CascadePipeline {
    stages: Vec<Stage>,
}

#[derive(Clone, Copy)]
struct Origin {
    root: usize,
    rect: CropRect,
}

impl CascadePipeline {
    /// Validates every stage and precomputes its grid offsets.
    pub fn new(configs: Vec<StageConfig>) -> CascadeResult<Self> {
        if configs.is_empty() {
            return Err(CascadeError::InvalidInput("cascade needs at least one stage"));
        }
        let mut stages = Vec::with_capacity(configs.len());
        for (index, config) in configs.into_iter().enumerate() {
            config.validate()?;
            if let Some((source, option)) = config.weights.source() {
                if source >= index {
                    return Err(CascadeError::invalid_config(
                        option,
                        format!("stage {index} can only reuse an earlier stage, got {source}"),
                    ));
                }
            }
            let grid = GridOffsets::new(config.cells_y, config.cells_x)?;
            stages.push(Stage { config, grid });
        }
        Ok(Self { stages })
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Configuration of stage `index`.
    pub fn stage_config(&self, index: usize) -> Option<&StageConfig> {
        self.stages.get(index).map(|stage| &stage.config)
    }

    /// Grid offsets of stage `index`.
    pub fn grid(&self, index: usize) -> Option<&GridOffsets> {
        self.stages.get(index).map(|stage| &stage.grid)
    }

    /// Runs the full cascade and returns merged detections per input image.
    pub fn run<B, E>(
        &self,
        backbone: &B,
        extractor: &E,
        images: &[B::Image],
    ) -> CascadeResult<Vec<FinalDetections>>
    where
        B: Backbone,
        E: CropExtractor<Image = B::Image>,
    {
        let _span = trace_span!("cascade", images = images.len(), stages = self.stages.len())
            .entered();

        let mut origins: Vec<Origin> = (0..images.len())
            .map(|root| Origin {
                root,
                rect: CropRect::full(),
            })
            .collect();
        let mut carried: Vec<Vec<CarriedDetection>> = vec![Vec::new(); images.len()];
        let mut crops: Option<Vec<B::Image>> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let batch: &[B::Image] = crops.as_deref().unwrap_or(images);
            let _stage_span = trace_span!("stage", index = index, batch = batch.len()).entered();

            let spec = StageSpec {
                index,
                config: &stage.config,
                grid: &stage.grid,
                weights: stage.config.weights,
            };
            let projection = backbone.project(batch, &spec)?;
            if projection.images() != batch.len() {
                return Err(CascadeError::ShapeMismatch {
                    context: "backbone projection batch",
                    expected: batch.len(),
                    got: projection.images(),
                });
            }
            let output = format_stage(projection.view(), &stage.grid, &stage.config.head)?.output;

            if index + 1 == self.stages.len() {
                let rescaled = to_root_frame(output, &origins, images.len())?;
                return merge(rescaled, carried, stage.config.score_mode);
            }

            let selection =
                select_crops(&output, stage.config.image_size, &stage.config.selector)?;
            for kept in selection.carried.into_iter().flatten() {
                let origin = origins[kept.image()];
                let mut det = kept.into_detection();
                det.bbox = origin.rect.map_to_parent(det.bbox);
                carried[origin.root].push(CarriedDetection::new(origin.root, det));
            }

            if selection.plan.total_crops() == 0 {
                trace_event!("cascade_exhausted", stage = index);
                let empty = vec![DetectionGrid::new(0, 0, 0, Vec::new())?; images.len()];
                return merge(empty, carried, stage.config.score_mode);
            }

            let next_batch = extract_crops(extractor, batch, &selection.plan)?;
            let mut next_origins = Vec::with_capacity(selection.plan.total_crops());
            for crop in selection.plan.flatten() {
                let parent = origins[crop.image];
                next_origins.push(Origin {
                    root: parent.root,
                    rect: parent.rect.compose(&crop.rect)?,
                });
            }
            origins = next_origins;
            crops = Some(next_batch);
        }

        Err(CascadeError::InvalidInput("cascade ended without a final stage"))
    }
}

/// Rescales a stage's output into root-image grids using each item's origin.
fn to_root_frame(
    output: StageOutput,
    origins: &[Origin],
    num_roots: usize,
) -> CascadeResult<Vec<DetectionGrid>> {
    if output.batch_size() != origins.len() {
        return Err(CascadeError::ShapeMismatch {
            context: "stage batch vs tracked origins",
            expected: origins.len(),
            got: output.batch_size(),
        });
    }
    let mut per_root: Vec<Vec<CropSlot>> = vec![Vec::new(); num_roots];
    for origin in origins {
        let crops = per_root
            .get_mut(origin.root)
            .ok_or(CascadeError::IndexOutOfBounds {
                index: origin.root,
                len: num_roots,
                context: "root image",
            })?;
        crops.push(CropSlot {
            image: origin.root,
            slot: crops.len(),
            rect: origin.rect,
            source: CellIndex {
                row: 0,
                col: 0,
                slot: 0,
            },
            confidence: 1.0,
        });
    }
    let plan = CropPlan::new(per_root)?;
    rescale_stage(output, &plan)
}
