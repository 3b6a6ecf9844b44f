//! Detection records shared by every stage of the cascade.
//!
//! A [`DetectionGrid`] holds one image's detections in row-major
//! `(row, col, slot)` order. Stages produce grids with a fixed number of box
//! slots per cell; rescaled grids hold `crops * slots` slots per cell.

use crate::util::math::clamp01;
use crate::util::{CascadeError, CascadeResult};

/// Axis-aligned box in normalized `[0, 1]` image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxCoords {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoxCoords {
    /// Creates a box without clamping or ordering checks.
    pub const fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Clamps every coordinate to `[0, 1]`.
    ///
    /// The clamp is lossy at the image border and is never undone.
    pub fn clamped(self) -> Self {
        Self {
            xmin: clamp01(self.xmin),
            ymin: clamp01(self.ymin),
            xmax: clamp01(self.xmax),
            ymax: clamp01(self.ymax),
        }
    }

    /// Returns `[xmin, ymin, xmax, ymax]`.
    pub fn to_array(self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    /// Box center as `[x, y]`.
    pub fn center(&self) -> [f32; 2] {
        [
            0.5 * (self.xmin + self.xmax),
            0.5 * (self.ymin + self.ymax),
        ]
    }

    /// True if the box is ordered and lies inside the unit square.
    pub fn is_valid(&self) -> bool {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        self.xmin <= self.xmax
            && self.ymin <= self.ymax
            && in_unit(self.xmin)
            && in_unit(self.ymin)
            && in_unit(self.xmax)
            && in_unit(self.ymax)
    }
}

/// Position of a detection inside its stage's output grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellIndex {
    pub row: usize,
    pub col: usize,
    pub slot: usize,
}

/// Raw group-flag activation for one box slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupFlag {
    /// Pre-sigmoid logit as produced by the head.
    pub logit: f32,
}

impl GroupFlag {
    /// Group probability.
    pub fn probability(&self) -> f32 {
        crate::util::math::sigmoid(self.logit)
    }

    /// True if the probability reaches `threshold`.
    pub fn is_set(&self, threshold: f32) -> bool {
        self.probability() >= threshold
    }
}

/// One decoded box prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoxCoords,
    /// Objectness in `[0, 1]`.
    pub confidence: f32,
    /// Softmax class distribution, present when classification is enabled.
    pub class_probs: Option<Vec<f32>>,
    pub group: Option<GroupFlag>,
    /// Sigmoid-bounded crop adjustment `[x, y]`, present when offsets are enabled.
    pub offset: Option<[f32; 2]>,
    pub cell: CellIndex,
}

impl Detection {
    /// Highest class probability and its index.
    pub fn best_class(&self) -> Option<(usize, f32)> {
        let probs = self.class_probs.as_ref()?;
        probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// One image's detections over a `cells_y x cells_x x num_boxes` layout.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionGrid {
    cells_y: usize,
    cells_x: usize,
    num_boxes: usize,
    detections: Vec<Detection>,
}

impl DetectionGrid {
    /// Wraps detections already laid out in row-major `(row, col, slot)` order.
    pub fn new(
        cells_y: usize,
        cells_x: usize,
        num_boxes: usize,
        detections: Vec<Detection>,
    ) -> CascadeResult<Self> {
        let expected = cells_y * cells_x * num_boxes;
        if detections.len() != expected {
            return Err(CascadeError::ShapeMismatch {
                context: "detection grid",
                expected,
                got: detections.len(),
            });
        }
        Ok(Self {
            cells_y,
            cells_x,
            num_boxes,
            detections,
        })
    }

    pub fn cells_y(&self) -> usize {
        self.cells_y
    }

    pub fn cells_x(&self) -> usize {
        self.cells_x
    }

    /// Box slots per cell.
    pub fn num_boxes(&self) -> usize {
        self.num_boxes
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Detection at `(row, col, slot)`.
    pub fn get(&self, row: usize, col: usize, slot: usize) -> Option<&Detection> {
        if row >= self.cells_y || col >= self.cells_x || slot >= self.num_boxes {
            return None;
        }
        self.detections
            .get((row * self.cells_x + col) * self.num_boxes + slot)
    }

    /// Detections in row-major cell order, then slot order.
    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    pub fn into_detections(self) -> Vec<Detection> {
        self.detections
    }
}

impl<'a> IntoIterator for &'a DetectionGrid {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Formatted output of one stage over a batch of images or crops.
#[derive(Clone, Debug, PartialEq)]
pub struct StageOutput {
    grids: Vec<DetectionGrid>,
}

impl StageOutput {
    pub fn new(grids: Vec<DetectionGrid>) -> Self {
        Self { grids }
    }

    /// Number of batch items (images or crops).
    pub fn batch_size(&self) -> usize {
        self.grids.len()
    }

    pub fn grids(&self) -> &[DetectionGrid] {
        &self.grids
    }

    pub fn grid(&self, index: usize) -> Option<&DetectionGrid> {
        self.grids.get(index)
    }

    pub fn into_grids(self) -> Vec<DetectionGrid> {
        self.grids
    }

    /// Total number of detections across the batch.
    pub fn num_detections(&self) -> usize {
        self.grids.iter().map(DetectionGrid::len).sum()
    }
}

/// A detection resolved at an earlier stage and excluded from further crops.
#[derive(Clone, Debug, PartialEq)]
pub struct CarriedDetection {
    image: usize,
    detection: Detection,
}

impl CarriedDetection {
    pub(crate) fn new(image: usize, detection: Detection) -> Self {
        Self { image, detection }
    }

    /// Index of the parent image in the stage batch that produced it.
    pub fn image(&self) -> usize {
        self.image
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn into_detection(self) -> Detection {
        self.detection
    }
}

#[cfg(test)]
mod tests {
    use super::{BoxCoords, CellIndex, Detection, DetectionGrid};

    fn det(slot: usize) -> Detection {
        Detection {
            bbox: BoxCoords::new(0.1, 0.1, 0.2, 0.2),
            confidence: 0.5,
            class_probs: Some(vec![0.2, 0.7, 0.1]),
            group: None,
            offset: None,
            cell: CellIndex {
                row: 0,
                col: 0,
                slot,
            },
        }
    }

    #[test]
    fn grid_rejects_wrong_cardinality() {
        assert!(DetectionGrid::new(2, 2, 1, vec![det(0)]).is_err());
    }

    #[test]
    fn grid_indexes_row_major() {
        let dets = (0..8).map(det).collect();
        let grid = DetectionGrid::new(2, 2, 2, dets).unwrap();
        assert_eq!(grid.get(1, 0, 1).unwrap().cell.slot, 5);
        assert!(grid.get(2, 0, 0).is_none());
    }

    #[test]
    fn best_class_picks_max_probability() {
        assert_eq!(det(0).best_class(), Some((1, 0.7)));
    }

    #[test]
    fn clamped_box_is_valid() {
        let b = BoxCoords::new(-0.2, 0.3, 1.4, 0.9).clamped();
        assert!(b.is_valid());
        assert_eq!(b.to_array(), [0.0, 0.3, 1.0, 0.9]);
    }
}
