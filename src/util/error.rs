//! Error types for gridcascade.

use thiserror::Error;

/// Result alias for gridcascade operations.
pub type CascadeResult<T> = std::result::Result<T, CascadeError>;

/// Errors that can occur while building or running a detection cascade.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CascadeError {
    /// A configuration option has an invalid value.
    #[error("invalid configuration option `{option}`: {reason}")]
    InvalidConfig {
        option: String,
        reason: String,
    },
    /// A required configuration option was not supplied.
    #[error("missing required configuration option `{option}`")]
    MissingOption { option: String },
    /// Two collaborating arrays disagree on a size.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    /// An index exceeded the valid range.
    #[error("{context} index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        context: &'static str,
    },
    /// A crop rectangle has zero or negative extent.
    #[error("degenerate crop rectangle ({xmin}, {ymin}, {xmax}, {ymax})")]
    DegenerateCrop {
        xmin: f32,
        ymin: f32,
        xmax: f32,
        ymax: f32,
    },
    /// An image produced more groups than the configured maximum.
    #[error("image {image} has {count} groups, more than the maximum of {max}")]
    TooManyGroups { image: usize, count: usize, max: usize },
    /// The input data or parameters are invalid.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Image decoding or resampling failed.
    #[error("image i/o error: {reason}")]
    ImageIo { reason: String },
}

impl CascadeError {
    pub(crate) fn invalid_config(option: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            option: option.to_owned(),
            reason: reason.into(),
        }
    }
}
