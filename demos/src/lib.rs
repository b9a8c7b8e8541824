//! ESPNetv2-DSRL Demos
//!
//! Command-line applications around the `espnet-burn` model.
//!
//! ## Available Demos
//!
//! - `train`: training with per-group learning rates, a poly schedule and mIoU validation
//! - `inference`: segment single images or directories into colour-coded class maps
//! - `converter`: convert PyTorch checkpoints to Burn format (feature `pretrained`)
//! - `summary`: print the architecture, parameter counts and stage shapes
//!
//! ## Usage
//!
//! ```bash
//! # Train a model
//! cargo run --release --bin train -- --config train_config.json
//!
//! # Run inference
//! cargo run --release --bin inference -- checkpoints/model.mpk image.jpg
//!
//! # Convert a PyTorch checkpoint
//! cargo run --release --features pretrained --bin converter -- model.pth model
//!
//! # Inspect the network
//! cargo run --bin summary -- --scale 2.0 --height 256 --width 512
//! ```

pub mod common;
pub mod config;

pub use common::{
    create_device, get_backend_name, init_logging, SelectedBackend, SelectedDevice, TrainBackend,
};
pub use config::{ConverterConfig, InferenceConfig, TrainingConfig};
