//! Segmentation metrics.
//!
//! [`ConfusionMatrix`] is backend-agnostic and usable for offline evaluation.
//! The training feature adds [`MeanIoUMetric`] for the learner dashboard.

pub mod confusion;
#[cfg(feature = "train")]
pub mod input;
#[cfg(feature = "train")]
pub mod miou;

pub use confusion::*;
#[cfg(feature = "train")]
pub use input::*;
#[cfg(feature = "train")]
pub use miou::*;
