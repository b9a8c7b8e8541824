//! # ESPNetv2-DSRL-Burn
//!
//! ESPNetv2 semantic segmentation with the DSRL super-resolution branch,
//! built on the Burn deep learning framework. The network takes an image at
//! half the label resolution and predicts class scores at full resolution.
//!
//! ## Modules
//!
//! - `config`: model configuration and dataset presets.
//! - `error`: the crate error type.
//! - `losses`: pixel-wise cross-entropy with an ignore label.
//! - `metrics`: confusion matrix, mean IoU and pixel accuracy.
//! - `models`: the segmentation network, its decoder blocks and the
//!   learning-rate groups.
//! - `dataset`, `training` (feature `train`): data loading and learner glue.
//! - `pretrained` (feature `pretrained`): PyTorch checkpoint import.
//!
//! ## Key Components
//!
//! - `EspnetV2Segmentation`: the model.
//! - `ModelConfig`: the configuration that drives its construction.
//! - `EspnetError`: every error the crate returns.

pub mod config;
mod error;
pub mod losses;
pub mod metrics;
pub mod models;

#[cfg(feature = "train")]
pub mod dataset;
#[cfg(feature = "pretrained")]
pub mod pretrained;
#[cfg(feature = "train")]
pub mod training;

mod tests;

#[doc(inline)]
pub use config::{BackboneConfig, DatasetKind, DecoderConfig, ModelConfig, SssrConfig};
#[doc(inline)]
pub use error::{EspnetError, EspnetResult};
#[doc(inline)]
pub use losses::{SegmentationLoss, SegmentationLossConfig};
#[doc(inline)]
pub use metrics::ConfusionMatrix;
#[doc(inline)]
pub use models::{
    EspnetV2SegConfig, EspnetV2Segmentation, EspnetV2SegmentationRecord, GroupLearningRates,
    ParamGroup, PolyLrSchedule, SegmentationFeatures,
};

#[cfg(feature = "train")]
#[doc(inline)]
pub use dataset::{SegmentationBatch, SegmentationBatcher, SegmentationDataset, SegmentationItem};
#[cfg(feature = "train")]
#[doc(inline)]
pub use metrics::{MeanIoUInput, MeanIoUMetric, MeanIoUMetricConfig};
#[cfg(feature = "train")]
#[doc(inline)]
pub use training::SegmentationOutput;

#[doc(inline)]
pub use eespnet;
