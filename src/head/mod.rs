//! Detection head output formatting.
//!
//! Turns a backbone projection into typed [`Detection`](crate::Detection)
//! records. Per box slot the channels are packed as
//!
//! ```text
//! [cx, cy, sx, sy, conf, (ox, oy)?, (group)?, (class_0 .. class_n)?]
//! ```
//!
//! and the projection holds `num_boxes` such records back to back per cell.

mod format;
pub mod projection;
#[cfg(feature = "rayon")]
mod rayon;

pub use format::{format_stage, FormattedStage, LossInputs};
pub use projection::{ProjectionView, RawProjection};

use crate::codec::CodecVariant;
use crate::util::{CascadeError, CascadeResult};

/// Configuration of a detection head.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadConfig {
    /// Box slots per grid cell.
    pub num_boxes: usize,
    /// Predict a class distribution per box.
    pub with_classification: bool,
    /// Number of classes; must exceed 1 when classification is enabled.
    pub num_classes: usize,
    /// Predict a group flag per box.
    pub with_group_flags: bool,
    /// Predict a crop offset per box.
    pub with_offsets: bool,
    /// Which codec tensors to expose.
    pub variant: CodecVariant,
    /// Format images in parallel when the `rayon` feature is enabled.
    pub parallel: bool,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            num_boxes: 1,
            with_classification: false,
            num_classes: 0,
            with_group_flags: false,
            with_offsets: false,
            variant: CodecVariant::Ratio,
            parallel: false,
        }
    }
}

impl HeadConfig {
    /// Checks the option combination; called once at stage setup.
    pub fn validate(&self) -> CascadeResult<()> {
        if self.num_boxes == 0 {
            return Err(CascadeError::invalid_config(
                "num_boxes",
                "must be at least 1",
            ));
        }
        if self.with_classification && self.num_classes <= 1 {
            return Err(CascadeError::invalid_config(
                "num_classes",
                format!(
                    "must be greater than 1 when classification is enabled, got {}",
                    self.num_classes
                ),
            ));
        }
        Ok(())
    }

    /// Channel layout implied by this configuration.
    pub fn layout(&self) -> CascadeResult<ChannelLayout> {
        self.validate()?;
        Ok(ChannelLayout::new(self))
    }
}

/// Channel positions inside one box slot's record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelLayout {
    offset: Option<usize>,
    group: Option<usize>,
    classes: Option<(usize, usize)>,
    per_box: usize,
    num_boxes: usize,
}

impl ChannelLayout {
    pub(crate) const CENTER: usize = 0;
    pub(crate) const SCALE: usize = 2;
    pub(crate) const CONFIDENCE: usize = 4;

    fn new(cfg: &HeadConfig) -> Self {
        let mut next = Self::CONFIDENCE + 1;
        let offset = cfg.with_offsets.then(|| {
            let at = next;
            next += 2;
            at
        });
        let group = cfg.with_group_flags.then(|| {
            let at = next;
            next += 1;
            at
        });
        let classes = cfg.with_classification.then(|| {
            let at = next;
            next += cfg.num_classes;
            (at, cfg.num_classes)
        });
        Self {
            offset,
            group,
            classes,
            per_box: next,
            num_boxes: cfg.num_boxes,
        }
    }

    /// Channels per box slot.
    pub fn channels_per_box(&self) -> usize {
        self.per_box
    }

    /// Channels per cell across all slots.
    pub fn channels_per_cell(&self) -> usize {
        self.per_box * self.num_boxes
    }

    pub fn num_boxes(&self) -> usize {
        self.num_boxes
    }

    /// Start of the offset pair, if present.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Position of the group logit, if present.
    pub fn group(&self) -> Option<usize> {
        self.group
    }

    /// Start and count of the class logits, if present.
    pub fn classes(&self) -> Option<(usize, usize)> {
        self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::HeadConfig;

    #[test]
    fn layout_packs_enabled_components_in_order() {
        let cfg = HeadConfig {
            num_boxes: 2,
            with_classification: true,
            num_classes: 3,
            with_group_flags: true,
            with_offsets: true,
            ..HeadConfig::default()
        };
        let layout = cfg.layout().unwrap();
        assert_eq!(layout.offset(), Some(5));
        assert_eq!(layout.group(), Some(7));
        assert_eq!(layout.classes(), Some((8, 3)));
        assert_eq!(layout.channels_per_box(), 11);
        assert_eq!(layout.channels_per_cell(), 22);
    }

    #[test]
    fn minimal_layout_has_five_channels() {
        let layout = HeadConfig::default().layout().unwrap();
        assert_eq!(layout.channels_per_box(), 5);
        assert_eq!(layout.group(), None);
    }

    #[test]
    fn zero_boxes_is_a_config_error() {
        let cfg = HeadConfig {
            num_boxes: 0,
            ..HeadConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
