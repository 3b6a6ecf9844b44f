//! Pixel crop extraction seam.
//!
//! Resampling is delegated to a [`CropExtractor`]; the cascade only decides
//! where to crop.

use crate::crop::{CropPlan, CropRect};
use crate::util::{CascadeError, CascadeResult};

/// Cuts a normalized rectangle out of an image and resizes it to the next
/// stage's input resolution.
pub trait CropExtractor {
    type Image;

    fn extract(&self, image: &Self::Image, rect: &CropRect) -> CascadeResult<Self::Image>;
}

/// Extracts every crop of `plan` in flat child-batch order.
pub fn extract_crops<E: CropExtractor>(
    extractor: &E,
    images: &[E::Image],
    plan: &CropPlan,
) -> CascadeResult<Vec<E::Image>> {
    if images.len() != plan.num_images() {
        return Err(CascadeError::ShapeMismatch {
            context: "crop plan images",
            expected: plan.num_images(),
            got: images.len(),
        });
    }
    let mut out = Vec::with_capacity(plan.total_crops());
    for crop in plan.flatten() {
        let image = images.get(crop.image).ok_or(CascadeError::IndexOutOfBounds {
            index: crop.image,
            len: images.len(),
            context: "image",
        })?;
        out.push(extractor.extract(image, &crop.rect)?);
    }
    Ok(out)
}
