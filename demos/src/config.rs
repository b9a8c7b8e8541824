//! Configuration for the demo binaries.
//!
//! Each binary reads an optional JSON file into one of these structures and
//! then applies its command-line overrides.

use std::path::PathBuf;

use espnet_burn::{DatasetKind, ModelConfig};
use serde::{Deserialize, Serialize};

/// Configuration for training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Model configuration.
    pub model: ModelConfig,
    /// Dataset layout.
    pub dataset: DatasetKind,
    /// Dataset root directory.
    pub data_root: PathBuf,
    /// Split used for training.
    pub train_split: String,
    /// Split used for validation.
    pub val_split: String,
    /// Label resolution `[height, width]`; inputs are half of it.
    pub label_size: [usize; 2],
    /// Number of training epochs.
    pub num_epochs: usize,
    /// Batch size for training.
    pub batch_size: usize,
    /// Encoder learning rate.
    pub learning_rate: f64,
    /// Decoder and SSSR learning rate as a multiple of `learning_rate`.
    pub head_lr_multiplier: f64,
    /// Exponent of the poly schedule.
    pub poly_power: f64,
    /// SGD momentum.
    pub momentum: f64,
    /// L2 weight decay.
    pub weight_decay: f32,
    /// ImageNet EESPNet checkpoint (`.pth`) for the encoder.
    pub pretrained_backbone: Option<PathBuf>,
    /// Keep the encoder fixed.
    pub freeze_backbone: bool,
    /// Path to save model checkpoints.
    pub checkpoint_path: PathBuf,
    /// Checkpoint saving frequency (epochs).
    pub checkpoint_frequency: usize,
    /// Number of workers for data loading.
    pub num_workers: usize,
    /// Shuffle seed.
    pub seed: u64,
    /// Train with Burn's `Learner` (single learning rate, metric dashboard)
    /// instead of the grouped-rate loop.
    #[serde(default)]
    pub use_learner: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::for_dataset(DatasetKind::Pascal),
            dataset: DatasetKind::Pascal,
            data_root: PathBuf::from("datasets/VOCdevkit/VOC2012"),
            train_split: "train".to_string(),
            val_split: "val".to_string(),
            label_size: [512, 512],
            num_epochs: 100,
            batch_size: 8,
            learning_rate: 9e-4,
            head_lr_multiplier: 10.0,
            poly_power: 0.9,
            momentum: 0.9,
            weight_decay: 4e-5,
            pretrained_backbone: None,
            freeze_backbone: false,
            checkpoint_path: PathBuf::from("checkpoints"),
            checkpoint_frequency: 10,
            num_workers: 4,
            seed: 42,
            use_learner: false,
        }
    }
}

/// Configuration for inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Model configuration; must match the checkpoint.
    pub model: ModelConfig,
    /// Network input size `(width, height)`. None rounds the image size to a multiple of 16.
    pub input_size: Option<(u32, u32)>,
    /// Output path for results.
    pub output_path: PathBuf,
    /// Also write the colour mask blended over the input image.
    pub save_overlay: bool,
    /// Mask opacity for the overlay.
    pub overlay_alpha: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::for_dataset(DatasetKind::Pascal),
            input_size: None,
            output_path: PathBuf::from("outputs"),
            save_overlay: true,
            overlay_alpha: 0.5,
        }
    }
}

/// Configuration for checkpoint conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Input model path (PyTorch .pth file).
    pub input_path: PathBuf,
    /// Output model path (Burn .mpk file).
    pub output_path: PathBuf,
    /// Model configuration.
    pub model: ModelConfig,
    /// Convert only the EESPNet encoder from an ImageNet checkpoint.
    pub backbone_only: bool,
    /// Key holding the state dict, e.g. `state_dict`.
    pub top_level_key: Option<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("models/espnetv2_dsrl.pth"),
            output_path: PathBuf::from("models/espnetv2_dsrl"),
            model: ModelConfig::for_dataset(DatasetKind::Pascal),
            backbone_only: false,
            top_level_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_config_json_round_trip() {
        let config = TrainingConfig {
            dataset: DatasetKind::City,
            model: ModelConfig::for_dataset(DatasetKind::City),
            label_size: [512, 1024],
            ..TrainingConfig::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: TrainingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dataset, DatasetKind::City);
        assert_eq!(parsed.label_size, [512, 1024]);
        assert_eq!(parsed.model.decoder.num_classes, 19);
    }
}
