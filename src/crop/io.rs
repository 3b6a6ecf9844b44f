//! Crop extraction backed by the `image` crate.
//!
//! Available when the `image-io` feature is enabled.

use crate::crop::{CropExtractor, CropRect};
use crate::util::{CascadeError, CascadeResult};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

/// Crops with pixel-aligned bounds and resizes to a fixed resolution.
#[derive(Clone, Copy, Debug)]
pub struct ResizeCropper {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl ResizeCropper {
    /// Creates a cropper producing `width x height` images.
    pub fn new(width: u32, height: u32) -> CascadeResult<Self> {
        if width == 0 || height == 0 {
            return Err(CascadeError::InvalidInput("crop resolution must be non-zero"));
        }
        Ok(Self {
            width,
            height,
            filter: FilterType::Triangle,
        })
    }

    /// Sets the resampling filter.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }
}

/// Pixel span `[start, end)` covering the normalized range `[lo, hi]`.
fn pixel_span(lo: f32, hi: f32, size: u32) -> (u32, u32) {
    let size_f = size as f32;
    let start = ((lo * size_f).floor().max(0.0) as u32).min(size - 1);
    let end = ((hi * size_f).ceil() as u32).clamp(start + 1, size);
    (start, end)
}

impl CropExtractor for ResizeCropper {
    type Image = RgbImage;

    fn extract(&self, image: &RgbImage, rect: &CropRect) -> CascadeResult<RgbImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(CascadeError::ImageIo {
                reason: "source image is empty".to_owned(),
            });
        }
        let (x0, x1) = pixel_span(rect.xmin(), rect.xmax(), image.width());
        let (y0, y1) = pixel_span(rect.ymin(), rect.ymax(), image.height());
        let cropped = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
        Ok(imageops::resize(&cropped, self.width, self.height, self.filter))
    }
}

/// Loads an image from disk as RGB.
pub fn load_rgb_image<P: AsRef<Path>>(path: P) -> CascadeResult<RgbImage> {
    let img = image::open(path).map_err(|err| CascadeError::ImageIo {
        reason: err.to_string(),
    })?;
    Ok(img.to_rgb8())
}
