//! Configuration module for ESPNet.
//!
//! - `core`: the model configuration structures
//! - `enums`: enumeration types used in configurations

pub mod core;
pub mod enums;

pub use core::{BackboneConfig, DecoderConfig, ModelConfig, SssrConfig};
pub use enums::DatasetKind;
