//! Core configuration structures for ESPNetv2 segmentation.
//!
//! This module contains the configuration that defines the encoder width,
//! the decoder planes and whether the super-resolution branch is built.

use burn::prelude::*;
use eespnet::EESPNetConfig;

use super::enums::DatasetKind;
use crate::error::{EspnetError, EspnetResult};

/// Main configuration for the segmentation model.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Encoder configuration.
    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,
    /// Decoder configuration.
    #[config(default = "DecoderConfig::new()")]
    pub decoder: DecoderConfig,
    /// Super-resolution branch configuration.
    #[config(default = "SssrConfig::new()")]
    pub sssr: SssrConfig,
}

/// EESPNet encoder configuration.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Width multiplier of the EESPNet encoder.
    #[config(default = "2.0")]
    pub scale: f32,
    /// Channels of the input image.
    #[config(default = "3")]
    pub in_channels: usize,
    /// Feed the input image into the encoder's down-sampling blocks.
    #[config(default = "true")]
    pub input_reinforcement: bool,
}

/// Decoder configuration.
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Number of segmentation classes.
    #[config(default = "21")]
    pub num_classes: usize,
    /// Benchmark the decoder widths are taken from.
    #[config(default = "DatasetKind::Pascal")]
    pub dataset: DatasetKind,
    /// Resampling factors of the pyramid pooling branches.
    #[config(default = "vec![2.0, 1.5, 1.0, 0.5, 0.1]")]
    pub pyramid_scales: Vec<f64>,
}

/// Semantic-segmentation super-resolution (SSSR) branch configuration.
#[derive(Config, Debug)]
pub struct SssrConfig {
    /// Build the two transposed-convolution stages. When disabled the decoder
    /// output is bilinearly resized to twice the input resolution.
    #[config(default = "true")]
    pub enabled: bool,
}

impl ModelConfig {
    /// Configuration with the decoder widths and class count of `dataset`.
    #[must_use]
    pub fn for_dataset(dataset: DatasetKind) -> Self {
        let num_classes = dataset.default_num_classes();
        Self::new().with_decoder(
            DecoderConfig::new()
                .with_dataset(dataset)
                .with_num_classes(num_classes),
        )
    }

    /// Validate the configuration and return appropriate errors for invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(EspnetError::InvalidConfiguration)` if any validation rule is violated.
    /// Returns `Err(EspnetError::UnsupportedBackbone)` if the encoder scale has no channel layout.
    pub fn validate(&self) -> EspnetResult<()> {
        // 1. The encoder must be buildable
        self.backbone.eespnet().channel_config()?;

        // 2. An image needs at least one channel
        if self.backbone.in_channels == 0 {
            return Err(EspnetError::InvalidConfiguration {
                reason: "in_channels must be greater than 0".to_string(),
            });
        }

        // 3. The pyramid projection is num_classes / 2 wide
        if self.decoder.num_classes < 2 {
            return Err(EspnetError::InvalidConfiguration {
                reason: format!(
                    "num_classes must be at least 2, got {}",
                    self.decoder.num_classes
                ),
            });
        }

        // 4. Pyramid scales
        if self.decoder.pyramid_scales.is_empty() {
            return Err(EspnetError::InvalidConfiguration {
                reason: "pyramid_scales must not be empty".to_string(),
            });
        }
        if let Some(scale) = self
            .decoder
            .pyramid_scales
            .iter()
            .find(|s| !s.is_finite() || **s <= 0.0)
        {
            return Err(EspnetError::InvalidConfiguration {
                reason: format!("pyramid scale must be positive and finite, got {scale}"),
            });
        }

        Ok(())
    }

    /// Decoder planes `[4b, 3b, 2b, num_classes]`.
    #[must_use]
    pub fn dec_planes(&self) -> [usize; 4] {
        let base = self.decoder.dataset.base_dec_planes();
        [4 * base, 3 * base, 2 * base, self.decoder.num_classes]
    }

    /// Projection width inside every pyramid pooling block.
    #[must_use]
    pub fn pyramid_projection(&self) -> usize {
        (self.decoder.num_classes / 2).min(self.decoder.dataset.base_dec_planes())
    }
}

impl BackboneConfig {
    /// EESPNet configuration for use as an encoder (no classification top).
    #[must_use]
    pub fn eespnet(&self) -> EESPNetConfig {
        EESPNetConfig::new()
            .with_scale(self.scale)
            .with_image_channels(self.in_channels)
            .with_input_reinforcement(self.input_reinforcement)
            .with_include_top(false)
    }
}
