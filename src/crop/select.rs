//! Group detection and crop placement between stages.
//!
//! A detection is a group if its flag probability reaches the threshold.
//! Stages without group flags fall back to the most confident detections.
//! Groups become crops; every other detection is carried to the final
//! output unchanged.

use crate::crop::{CropPlan, CropRect, CropSlot, ImageSize};
use crate::detection::{CarriedDetection, Detection, DetectionGrid, StageOutput};
use crate::trace::{trace_debug, trace_event, trace_span};
use crate::util::{CascadeError, CascadeResult};

/// Smallest accepted `min_crop_side`; below it `center +/- side / 2` can
/// round back to `center` and collapse the crop.
pub const MIN_CROP_SIDE_FLOOR: f32 = 1e-4;

/// What to do when an image has more groups than `max_crops_per_image`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Keep the most confident groups and carry the rest.
    #[default]
    Cap,
    /// Fail the step.
    Reject,
}

/// Configuration of group selection and crop placement.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectorConfig {
    /// Minimum group probability, in `[0, 1]`.
    pub group_threshold: f32,
    /// Minimum confidence for a detection to be considered a group.
    pub min_group_confidence: f32,
    /// Groups per image when the stage predicts no group flags.
    pub fallback_top_k: usize,
    /// Maximum crops per image.
    pub max_crops_per_image: usize,
    pub overflow: OverflowPolicy,
    /// Normalized margin added to each side of a crop.
    pub margin: f32,
    /// Minimum normalized crop side.
    pub min_crop_side: f32,
    /// Minimum crop side in pixels of the stage input.
    pub min_crop_pixels: f32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            group_threshold: 0.5,
            min_group_confidence: 0.0,
            fallback_top_k: 0,
            max_crops_per_image: 5,
            overflow: OverflowPolicy::Cap,
            margin: 0.0,
            min_crop_side: 0.05,
            min_crop_pixels: 0.0,
        }
    }
}

impl SelectorConfig {
    /// Checks ranges; called once at stage setup.
    pub fn validate(&self) -> CascadeResult<()> {
        if !(0.0..=1.0).contains(&self.group_threshold) {
            return Err(CascadeError::invalid_config(
                "group_threshold",
                "must lie in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_group_confidence) {
            return Err(CascadeError::invalid_config(
                "min_group_confidence",
                "must lie in [0, 1]",
            ));
        }
        if self.max_crops_per_image == 0 {
            return Err(CascadeError::invalid_config(
                "max_crops_per_image",
                "must be at least 1",
            ));
        }
        if !(self.margin >= 0.0 && self.margin.is_finite()) {
            return Err(CascadeError::invalid_config(
                "margin",
                "must be finite and non-negative",
            ));
        }
        if !(self.min_crop_side >= MIN_CROP_SIDE_FLOOR && self.min_crop_side <= 1.0) {
            return Err(CascadeError::invalid_config(
                "min_crop_side",
                format!("must lie in [{MIN_CROP_SIDE_FLOOR}, 1]"),
            ));
        }
        if !(self.min_crop_pixels >= 0.0 && self.min_crop_pixels.is_finite()) {
            return Err(CascadeError::invalid_config(
                "min_crop_pixels",
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Crops for the next stage plus the detections resolved at this one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    pub plan: CropPlan,
    /// Carried detections per parent image, in enumeration order.
    pub carried: Vec<Vec<CarriedDetection>>,
}

/// Splits every image's detections into crops and carried detections.
///
/// Crop order per image is row-major cell order, then slot order, and is
/// reproducible for fixed inputs.
pub fn select_crops(
    stage: &StageOutput,
    image_size: ImageSize,
    cfg: &SelectorConfig,
) -> CascadeResult<Selection> {
    cfg.validate()?;
    let _span = trace_span!("select_crops", images = stage.batch_size()).entered();

    let min_side = [
        min_side(cfg, image_size.width()),
        min_side(cfg, image_size.height()),
    ];

    let mut plan = Vec::with_capacity(stage.batch_size());
    let mut carried = Vec::with_capacity(stage.batch_size());
    for (image, grid) in stage.grids().iter().enumerate() {
        let groups = pick_groups(image, grid, cfg)?;

        let mut crops = Vec::with_capacity(groups.len());
        let mut resolved = Vec::with_capacity(grid.len() - groups.len());
        let mut next_group = groups.iter().copied().peekable();
        for (idx, det) in grid.iter().enumerate() {
            if next_group.peek() == Some(&idx) {
                next_group.next();
                let rect = crop_for(det, cfg.margin, min_side)?;
                trace_debug!(
                    "crop_placed",
                    image = image,
                    row = det.cell.row,
                    col = det.cell.col,
                    slot = det.cell.slot
                );
                crops.push(CropSlot {
                    image,
                    slot: crops.len(),
                    rect,
                    source: det.cell,
                    confidence: det.confidence,
                });
            } else {
                resolved.push(CarriedDetection::new(image, det.clone()));
            }
        }
        plan.push(crops);
        carried.push(resolved);
    }

    let plan = CropPlan::new(plan)?;
    trace_event!(
        "crops_selected",
        crops = plan.total_crops(),
        carried = carried.iter().map(Vec::len).sum::<usize>()
    );
    Ok(Selection { plan, carried })
}

fn min_side(cfg: &SelectorConfig, pixels: u32) -> f32 {
    cfg.min_crop_side
        .max(cfg.min_crop_pixels / pixels as f32)
        .min(1.0)
}

/// Indices (into the grid) of the detections that become crops, ascending.
fn pick_groups(
    image: usize,
    grid: &DetectionGrid,
    cfg: &SelectorConfig,
) -> CascadeResult<Vec<usize>> {
    let has_flags = grid.iter().any(|det| det.group.is_some());
    let mut groups: Vec<usize> = if has_flags {
        grid.iter()
            .enumerate()
            .filter(|(_, det)| is_group(det, cfg))
            .map(|(idx, _)| idx)
            .collect()
    } else {
        let mut ranked: Vec<usize> = grid
            .iter()
            .enumerate()
            .filter(|(_, det)| det.confidence >= cfg.min_group_confidence)
            .map(|(idx, _)| idx)
            .collect();
        rank_by_confidence(grid, &mut ranked);
        ranked.truncate(cfg.fallback_top_k);
        ranked.sort_unstable();
        ranked
    };

    if groups.len() > cfg.max_crops_per_image {
        match cfg.overflow {
            OverflowPolicy::Reject => {
                return Err(CascadeError::TooManyGroups {
                    image,
                    count: groups.len(),
                    max: cfg.max_crops_per_image,
                });
            }
            OverflowPolicy::Cap => {
                trace_debug!(
                    "groups_capped",
                    image = image,
                    dropped = groups.len() - cfg.max_crops_per_image
                );
                rank_by_confidence(grid, &mut groups);
                groups.truncate(cfg.max_crops_per_image);
                groups.sort_unstable();
            }
        }
    }
    Ok(groups)
}

fn is_group(det: &Detection, cfg: &SelectorConfig) -> bool {
    det.group
        .is_some_and(|flag| flag.is_set(cfg.group_threshold))
        && det.confidence >= cfg.min_group_confidence
}

/// Sorts by descending confidence; ties keep enumeration order.
fn rank_by_confidence(grid: &DetectionGrid, indices: &mut [usize]) {
    let dets = grid.as_slice();
    indices.sort_by(|&a, &b| {
        dets[b]
            .confidence
            .total_cmp(&dets[a].confidence)
            .then_with(|| a.cmp(&b))
    });
}

/// Crop around a group box, widened by its offset and the margin.
fn crop_for(det: &Detection, margin: f32, min_side: [f32; 2]) -> CascadeResult<CropRect> {
    let [cx, cy] = det.bbox.center();
    let [ox, oy] = det.offset.unwrap_or([0.0, 0.0]);
    let hx = 0.5 * det.bbox.width() * (1.0 + ox) + margin;
    let hy = 0.5 * det.bbox.height() * (1.0 + oy) + margin;
    let (xmin, xmax) = fit_axis(cx, hx, min_side[0]);
    let (ymin, ymax) = fit_axis(cy, hy, min_side[1]);
    CropRect::new(xmin, ymin, xmax, ymax)
}

/// Clamps `[center - half, center + half]` to `[0, 1]` and grows it to at
/// least `min_side`, shifting it back inside the image if needed.
fn fit_axis(center: f32, half: f32, min_side: f32) -> (f32, f32) {
    let mut lo = (center - half).max(0.0);
    let mut hi = (center + half).min(1.0);
    if hi - lo < min_side {
        let mid = center.clamp(0.0, 1.0);
        lo = mid - 0.5 * min_side;
        hi = mid + 0.5 * min_side;
        if lo < 0.0 {
            hi -= lo;
            lo = 0.0;
        }
        if hi > 1.0 {
            lo -= hi - 1.0;
            hi = 1.0;
        }
        lo = lo.max(0.0);
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::{fit_axis, MIN_CROP_SIDE_FLOOR};

    #[test]
    fn fit_axis_floors_small_extent() {
        let (lo, hi) = fit_axis(0.5, 0.001, 0.1);
        assert!((hi - lo - 0.1).abs() < 1e-6);
        assert!((lo - 0.45).abs() < 1e-6);
    }

    #[test]
    fn fit_axis_shifts_inside_at_border() {
        let (lo, hi) = fit_axis(0.0, 0.0, 0.2);
        assert_eq!(lo, 0.0);
        assert!((hi - 0.2).abs() < 1e-6);
        let (lo, hi) = fit_axis(1.0, 0.01, 0.2);
        assert_eq!(hi, 1.0);
        assert!((lo - 0.8).abs() < 1e-6);
    }

    #[test]
    fn fit_axis_clamps_large_extent() {
        assert_eq!(fit_axis(0.5, 0.9, 0.1), (0.0, 1.0));
    }

    #[test]
    fn fit_axis_keeps_floor_side_open_for_point_boxes() {
        for center in [0.0_f32, 0.25, 0.5, 0.999_9, 1.0] {
            let (lo, hi) = fit_axis(center, 0.0, MIN_CROP_SIDE_FLOOR);
            assert!(hi > lo, "{center}: ({lo}, {hi})");
        }
    }
}
