//! Crop rectangles and the plan that orders them between stages.
//!
//! A [`CropPlan`] lists, per parent image, the crops selected for the next
//! stage in a fixed slot order. The next stage sees the crops as one flat
//! batch (image-major, slot-minor); rescaling relies on that order alone to
//! route each crop's detections back to its parent image.

pub mod extract;
#[cfg(feature = "image-io")]
pub mod io;
mod select;

pub use extract::{extract_crops, CropExtractor};
pub use select::{
    select_crops, OverflowPolicy, Selection, SelectorConfig, MIN_CROP_SIDE_FLOOR,
};

use crate::detection::{BoxCoords, CellIndex};
use crate::util::math::clamp01;
use crate::util::{CascadeError, CascadeResult};

/// Lower bound on a crop's scale factor when mapping into the parent frame.
pub const CROP_SCALE_EPS: f32 = 1e-8;

/// Pixel size of the images a stage runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    width: u32,
    height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> CascadeResult<Self> {
        if width == 0 || height == 0 {
            return Err(CascadeError::InvalidInput("image size must be non-zero"));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Sub-region of a parent frame, in the parent's normalized coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRect {
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
}

impl CropRect {
    /// Creates a crop; rejects non-finite or degenerate rectangles.
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> CascadeResult<Self> {
        let finite = [xmin, ymin, xmax, ymax].iter().all(|v| v.is_finite());
        if !finite || xmax <= xmin || ymax <= ymin {
            return Err(CascadeError::DegenerateCrop {
                xmin,
                ymin,
                xmax,
                ymax,
            });
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    /// The whole parent frame.
    pub fn full() -> Self {
        Self {
            xmin: 0.0,
            ymin: 0.0,
            xmax: 1.0,
            ymax: 1.0,
        }
    }

    /// Builds a crop without the degeneracy check.
    ///
    /// Used to exercise the scale floor of [`CropRect::map_to_parent`].
    pub fn new_unchecked(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmax
    }

    pub fn ymax(&self) -> f32 {
        self.ymax
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// Maps a crop-local box into the parent frame.
    ///
    /// `parent = min + local * max(eps, max - min)`, then clamped to `[0, 1]`.
    #[inline]
    pub fn map_to_parent(&self, local: BoxCoords) -> BoxCoords {
        let sx = self.width().max(CROP_SCALE_EPS);
        let sy = self.height().max(CROP_SCALE_EPS);
        BoxCoords::new(
            clamp01(self.xmin + local.xmin * sx),
            clamp01(self.ymin + local.ymin * sy),
            clamp01(self.xmin + local.xmax * sx),
            clamp01(self.ymin + local.ymax * sy),
        )
    }

    /// Maps a parent-frame box into this crop's local frame (no clamping).
    pub fn map_to_local(&self, parent: BoxCoords) -> BoxCoords {
        let sx = self.width().max(CROP_SCALE_EPS);
        let sy = self.height().max(CROP_SCALE_EPS);
        BoxCoords::new(
            (parent.xmin - self.xmin) / sx,
            (parent.ymin - self.ymin) / sy,
            (parent.xmax - self.xmin) / sx,
            (parent.ymax - self.ymin) / sy,
        )
    }

    /// Expresses `inner`, given in this crop's local frame, in the parent frame.
    pub fn compose(&self, inner: &CropRect) -> CascadeResult<CropRect> {
        let mapped = self.map_to_parent(BoxCoords::new(
            inner.xmin, inner.ymin, inner.xmax, inner.ymax,
        ));
        CropRect::new(mapped.xmin, mapped.ymin, mapped.xmax, mapped.ymax)
    }
}

/// One crop scheduled for the next stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropSlot {
    /// Parent image index.
    pub image: usize,
    /// Position among the parent's crops.
    pub slot: usize,
    pub rect: CropRect,
    /// Cell of the group detection the crop was derived from.
    pub source: CellIndex,
    /// Confidence of that group detection.
    pub confidence: f32,
}

/// Crops per parent image, in deterministic slot order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CropPlan {
    images: Vec<Vec<CropSlot>>,
}

impl CropPlan {
    /// Builds a plan; every slot must carry its own image and slot position.
    pub fn new(images: Vec<Vec<CropSlot>>) -> CascadeResult<Self> {
        for (image, crops) in images.iter().enumerate() {
            for (slot, crop) in crops.iter().enumerate() {
                if crop.image != image || crop.slot != slot {
                    return Err(CascadeError::InvalidInput(
                        "crop slot does not match its position in the plan",
                    ));
                }
            }
        }
        Ok(Self { images })
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// Crops of one parent image.
    pub fn crops(&self, image: usize) -> &[CropSlot] {
        self.images.get(image).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Crop count per parent image.
    pub fn counts(&self) -> Vec<usize> {
        self.images.iter().map(Vec::len).collect()
    }

    /// Size of the flat child batch.
    pub fn total_crops(&self) -> usize {
        self.images.iter().map(Vec::len).sum()
    }

    /// Crop count shared by every image, if the plan is uniform.
    pub fn uniform_crops(&self) -> Option<usize> {
        let first = self.images.first()?.len();
        self.images
            .iter()
            .all(|crops| crops.len() == first)
            .then_some(first)
    }

    /// Crops in flat child-batch order.
    pub fn flatten(&self) -> impl Iterator<Item = &CropSlot> + '_ {
        self.images.iter().flatten()
    }
}
