//! Final per-image concatenation of rescaled and carried detections.
//!
//! No deduplication or suppression happens here; the merged lists feed an
//! external evaluation step.

use crate::detection::{CarriedDetection, Detection, DetectionGrid};
use crate::trace::{trace_event, trace_span};
use crate::util::{CascadeError, CascadeResult};

/// How the reported detection score is derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScoreMode {
    /// The confidence alone.
    #[default]
    Confidence,
    /// Confidence times the highest class probability; confidence alone for
    /// detections without class probabilities.
    ConfidenceTimesMaxClass,
}

impl ScoreMode {
    /// Score of one detection under this mode.
    pub fn score(self, det: &Detection) -> f32 {
        match self {
            ScoreMode::Confidence => det.confidence,
            ScoreMode::ConfidenceTimesMaxClass => match det.best_class() {
                Some((_, prob)) => det.confidence * prob,
                None => det.confidence,
            },
        }
    }
}

/// Merged detections of one image, in evaluation-ready form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinalDetections {
    /// `[xmin, ymin, xmax, ymax]` in normalized coordinates.
    pub bounding_boxes: Vec<[f32; 4]>,
    pub detection_scores: Vec<f32>,
    /// The full records behind the two arrays above, index-aligned.
    pub detections: Vec<Detection>,
}

impl FinalDetections {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    fn push(&mut self, det: Detection, mode: ScoreMode) {
        self.bounding_boxes.push(det.bbox.to_array());
        self.detection_scores.push(mode.score(&det));
        self.detections.push(det);
    }
}

/// Concatenates, per image, the rescaled detections followed by the carried ones.
///
/// The output for image `i` holds exactly `rescaled[i].len() + carried[i].len()`
/// entries.
pub fn merge(
    rescaled: Vec<DetectionGrid>,
    carried: Vec<Vec<CarriedDetection>>,
    mode: ScoreMode,
) -> CascadeResult<Vec<FinalDetections>> {
    if rescaled.len() != carried.len() {
        return Err(CascadeError::ShapeMismatch {
            context: "carried images vs rescaled images",
            expected: rescaled.len(),
            got: carried.len(),
        });
    }
    let _span = trace_span!("merge", images = rescaled.len()).entered();

    let mut out = Vec::with_capacity(rescaled.len());
    for (image, (grid, kept)) in rescaled.into_iter().zip(carried).enumerate() {
        let mut merged = FinalDetections::default();
        let total = grid.len() + kept.len();
        merged.bounding_boxes.reserve(total);
        merged.detection_scores.reserve(total);
        merged.detections.reserve(total);

        for det in grid.into_detections() {
            merged.push(det, mode);
        }
        for carried in kept {
            if carried.image() != image {
                return Err(CascadeError::ShapeMismatch {
                    context: "carried detection parent image",
                    expected: image,
                    got: carried.image(),
                });
            }
            merged.push(carried.into_detection(), mode);
        }
        debug_assert_eq!(merged.len(), total);
        out.push(merged);
    }

    trace_event!(
        "merged",
        detections = out.iter().map(FinalDetections::len).sum::<usize>()
    );
    Ok(out)
}
