//! gridcascade is the geometric core of a cascaded grid object detector.
//!
//! A coarse stage decodes per-cell box predictions, flags "group" boxes that
//! likely cover several objects, and crops them. A finer stage re-detects
//! inside each crop; its boxes are mapped back into the parent frame and
//! merged with the detections resolved earlier. Backbones, pixel resampling,
//! losses, and evaluation are external and plug in through traits and plain
//! data records. Image-parallel formatting is available via the `rayon`
//! feature.

pub mod codec;
pub mod config;
pub mod crop;
pub mod detection;
pub mod head;
pub mod lowlevel;
pub mod merge;
pub mod pipeline;
pub mod rescale;
mod trace;
pub mod util;

pub use codec::{decode_box, encode_box, CodecVariant, GridOffsets};
pub use config::{ConfigMap, ConfigValue, StageConfig, WeightSharing};
pub use crop::{
    select_crops, CropExtractor, CropPlan, CropRect, CropSlot, ImageSize, OverflowPolicy,
    Selection, SelectorConfig,
};
pub use detection::{
    BoxCoords, CarriedDetection, CellIndex, Detection, DetectionGrid, GroupFlag, StageOutput,
};
pub use head::{
    format_stage, FormattedStage, HeadConfig, LossInputs, ProjectionView, RawProjection,
};
pub use merge::{merge, FinalDetections, ScoreMode};
pub use pipeline::{Backbone, CascadePipeline, StageSpec};
pub use rescale::{rescale_stage, split_batch, split_batch_ragged};
pub use util::{CascadeError, CascadeResult};

#[cfg(feature = "image-io")]
pub use crop::io;
