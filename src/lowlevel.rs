//! Low-level building blocks for custom cascade drivers.
//!
//! These expose the codec intermediates, channel layout, and crop helpers
//! beneath the [`CascadePipeline`](crate::CascadePipeline) API. Most users
//! should prefer the top-level stage functions.

pub use crate::codec::{CodecIntermediates, DecodedBox, RawBox};
pub use crate::crop::{extract_crops, CROP_SCALE_EPS, MIN_CROP_SIDE_FLOOR};
pub use crate::head::ChannelLayout;
