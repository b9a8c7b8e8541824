//! # Model Architectures
//!
//! - `espnetv2`: the segmentation network with its SSSR branch.
//! - `modules`: decoder building blocks (pyramid pooling, gated skip
//!   projection, transposed-convolution upsampling).
//! - `param_groups`: parameter grouping for differential learning rates.

pub mod espnetv2;
pub mod modules;
pub mod param_groups;

pub use espnetv2::{
    EspnetV2SegConfig, EspnetV2Segmentation, EspnetV2SegmentationRecord, SegmentationFeatures,
};
pub use modules::*;
pub use param_groups::{GroupLearningRates, ParamGroup, PolyLrSchedule};
