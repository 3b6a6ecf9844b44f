//! Stage configuration from a flat key/value map.
//!
//! Each stage is configured by one flat map mixing head, selector, and
//! merge options. Unknown keys, wrongly typed values, and missing required
//! keys are configuration errors naming the offending key.

use crate::codec::CodecVariant;
use crate::crop::{ImageSize, OverflowPolicy, SelectorConfig};
use crate::head::HeadConfig;
use crate::merge::ScoreMode;
use crate::util::{CascadeError, CascadeResult};
use std::collections::BTreeMap;

/// One configuration value.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_owned())
    }
}

/// Flat configuration map for one stage.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

const HEAD_KEYS: &[&str] = &[
    "num_boxes",
    "with_classification",
    "num_classes",
    "with_group_flags",
    "with_offsets",
    "variant",
    "parallel",
];

const SELECTOR_KEYS: &[&str] = &[
    "group_threshold",
    "min_group_confidence",
    "fallback_top_k",
    "max_crops_per_image",
    "overflow",
    "margin",
    "min_crop_side",
    "min_crop_pixels",
];

const STAGE_KEYS: &[&str] = &[
    "cells_y",
    "cells_x",
    "image_width",
    "image_height",
    "score_mode",
    "reuse_weights_from",
    "reuse_backbone_from",
];

/// Parameter sharing between stages, passed explicitly to the backbone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WeightSharing {
    /// The stage owns its parameters.
    #[default]
    Own,
    /// The stage reuses the backbone and head parameters of an earlier stage.
    ReuseFrom(usize),
    /// The stage shares an earlier stage's backbone but owns its head.
    ReuseBackboneFrom(usize),
}

impl WeightSharing {
    /// The earlier stage this one borrows from, with the option naming it.
    pub fn source(&self) -> Option<(usize, &'static str)> {
        match *self {
            WeightSharing::Own => None,
            WeightSharing::ReuseFrom(stage) => Some((stage, "reuse_weights_from")),
            WeightSharing::ReuseBackboneFrom(stage) => Some((stage, "reuse_backbone_from")),
        }
    }
}

/// Complete configuration of one cascade stage.
#[derive(Clone, Debug, PartialEq)]
pub struct StageConfig {
    pub cells_y: usize,
    pub cells_x: usize,
    /// Pixel size of the images (or crops) the stage runs on.
    pub image_size: ImageSize,
    pub head: HeadConfig,
    pub selector: SelectorConfig,
    pub score_mode: ScoreMode,
    pub weights: WeightSharing,
}

impl StageConfig {
    /// Validates every part of the stage configuration.
    pub fn validate(&self) -> CascadeResult<()> {
        if self.cells_y == 0 {
            return Err(CascadeError::invalid_config("cells_y", "must be at least 1"));
        }
        if self.cells_x == 0 {
            return Err(CascadeError::invalid_config("cells_x", "must be at least 1"));
        }
        self.head.validate()?;
        self.selector.validate()
    }

    /// Parses a stage configuration from a flat map.
    ///
    /// `num_boxes` is required, as is `num_classes` when
    /// `with_classification` is true. Other keys fall back to their defaults.
    pub fn from_map(map: &ConfigMap) -> CascadeResult<Self> {
        for key in map.keys() {
            let known = HEAD_KEYS
                .iter()
                .chain(SELECTOR_KEYS)
                .chain(STAGE_KEYS)
                .any(|k| *k == key.as_str());
            if !known {
                return Err(CascadeError::invalid_config(key, "unknown option"));
            }
        }

        let reader = Reader { map };
        let width = to_u32("image_width", reader.usize_or("image_width", 416)?)?;
        let height = to_u32("image_height", reader.usize_or("image_height", 416)?)?;
        let image_size = ImageSize::new(width, height)?;

        let weights = match (
            reader.opt_usize("reuse_weights_from")?,
            reader.opt_usize("reuse_backbone_from")?,
        ) {
            (Some(_), Some(_)) => {
                return Err(CascadeError::invalid_config(
                    "reuse_backbone_from",
                    "cannot be combined with `reuse_weights_from`",
                ))
            }
            (Some(stage), None) => WeightSharing::ReuseFrom(stage),
            (None, Some(stage)) => WeightSharing::ReuseBackboneFrom(stage),
            (None, None) => WeightSharing::Own,
        };

        let cfg = Self {
            cells_y: reader.usize_or("cells_y", 13)?,
            cells_x: reader.usize_or("cells_x", 13)?,
            image_size,
            head: head_from_map(&reader)?,
            selector: selector_from_map(&reader)?,
            score_mode: match reader.opt_str("score_mode")? {
                None | Some("confidence") => ScoreMode::Confidence,
                Some("confidence_times_max_class") => ScoreMode::ConfidenceTimesMaxClass,
                Some(other) => {
                    return Err(CascadeError::invalid_config(
                        "score_mode",
                        format!("unknown mode `{other}`"),
                    ))
                }
            },
            weights,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn head_from_map(reader: &Reader<'_>) -> CascadeResult<HeadConfig> {
    let defaults = HeadConfig::default();
    let num_boxes = reader
        .opt_usize("num_boxes")?
        .ok_or_else(|| CascadeError::MissingOption {
            option: "num_boxes".to_owned(),
        })?;
    let with_classification = reader.bool_or("with_classification", false)?;
    let num_classes = if with_classification {
        reader
            .opt_usize("num_classes")?
            .ok_or_else(|| CascadeError::MissingOption {
                option: "num_classes".to_owned(),
            })?
    } else {
        reader.usize_or("num_classes", defaults.num_classes)?
    };
    let variant = match reader.opt_str("variant")? {
        None | Some("ratio") => CodecVariant::Ratio,
        Some("training") => CodecVariant::Training,
        Some(other) => {
            return Err(CascadeError::invalid_config(
                "variant",
                format!("unknown codec variant `{other}`"),
            ))
        }
    };
    Ok(HeadConfig {
        num_boxes,
        with_classification,
        num_classes,
        with_group_flags: reader.bool_or("with_group_flags", defaults.with_group_flags)?,
        with_offsets: reader.bool_or("with_offsets", defaults.with_offsets)?,
        variant,
        parallel: reader.bool_or("parallel", defaults.parallel)?,
    })
}

fn selector_from_map(reader: &Reader<'_>) -> CascadeResult<SelectorConfig> {
    let d = SelectorConfig::default();
    let overflow = match reader.opt_str("overflow")? {
        None | Some("cap") => OverflowPolicy::Cap,
        Some("reject") => OverflowPolicy::Reject,
        Some(other) => {
            return Err(CascadeError::invalid_config(
                "overflow",
                format!("unknown policy `{other}`"),
            ))
        }
    };
    Ok(SelectorConfig {
        group_threshold: reader.f32_or("group_threshold", d.group_threshold)?,
        min_group_confidence: reader.f32_or("min_group_confidence", d.min_group_confidence)?,
        fallback_top_k: reader.usize_or("fallback_top_k", d.fallback_top_k)?,
        max_crops_per_image: reader.usize_or("max_crops_per_image", d.max_crops_per_image)?,
        overflow,
        margin: reader.f32_or("margin", d.margin)?,
        min_crop_side: reader.f32_or("min_crop_side", d.min_crop_side)?,
        min_crop_pixels: reader.f32_or("min_crop_pixels", d.min_crop_pixels)?,
    })
}

fn to_u32(key: &str, value: usize) -> CascadeResult<u32> {
    match u32::try_from(value) {
        Ok(0) => Err(CascadeError::invalid_config(key, "must be at least 1")),
        Ok(v) => Ok(v),
        Err(_) => Err(CascadeError::invalid_config(key, "value too large")),
    }
}

struct Reader<'a> {
    map: &'a ConfigMap,
}

impl Reader<'_> {
    fn type_error(key: &str, expected: &str) -> CascadeError {
        CascadeError::invalid_config(key, format!("expected {expected}"))
    }

    fn bool_or(&self, key: &str, default: bool) -> CascadeResult<bool> {
        match self.map.get(key) {
            None => Ok(default),
            Some(ConfigValue::Bool(v)) => Ok(*v),
            Some(_) => Err(Self::type_error(key, "a boolean")),
        }
    }

    fn opt_usize(&self, key: &str) -> CascadeResult<Option<usize>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(v)) => usize::try_from(*v)
                .map(Some)
                .map_err(|_| Self::type_error(key, "a non-negative integer")),
            Some(_) => Err(Self::type_error(key, "an integer")),
        }
    }

    fn usize_or(&self, key: &str, default: usize) -> CascadeResult<usize> {
        Ok(self.opt_usize(key)?.unwrap_or(default))
    }

    fn f32_or(&self, key: &str, default: f32) -> CascadeResult<f32> {
        match self.map.get(key) {
            None => Ok(default),
            Some(ConfigValue::Float(v)) => Ok(*v as f32),
            Some(ConfigValue::Int(v)) => Ok(*v as f32),
            Some(_) => Err(Self::type_error(key, "a number")),
        }
    }

    fn opt_str(&self, key: &str) -> CascadeResult<Option<&str>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(Self::type_error(key, "a string")),
        }
    }
}
