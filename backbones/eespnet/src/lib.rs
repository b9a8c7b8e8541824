//! EESPNet backbone (the image classifier of ESPNetv2) for Burn.
//!
//! The network is a stack of strided [`DownSampler`] blocks and residual
//! [`Eesp`] units. Used as a segmentation encoder, it exposes the four
//! feature maps at strides 2, 4, 8 and 16 through
//! [`EESPNet::forward_features`]; the classification top (`level5` and the
//! linear classifier) is optional.

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::module::adaptive_avg_pool2d,
};
use burn_extra_ops::{linear_normal, zero_bias};

mod eesp;
mod error;
mod layers;

pub use eesp::*;
pub use error::{EESPNetError, EESPNetResult};
pub use layers::*;

const BASE_CHANNELS: usize = 32;
const BRANCHES: usize = 4;
const REPETITIONS: [usize; 4] = [0, 3, 7, 3];
const RECEPTIVE_LIMITS: [usize; 5] = [13, 11, 9, 7, 5];

/// Whether an EESP unit `in_channels -> out_channels` has a valid grouped
/// projection: both sides and the branch width divisible by [`BRANCHES`].
const fn splits_into_branches(in_channels: usize, out_channels: usize) -> bool {
    let width = out_channels / BRANCHES;
    width > 0
        && out_channels % BRANCHES == 0
        && in_channels % BRANCHES == 0
        && width % BRANCHES == 0
}

/// EESPNet configuration.
#[derive(Config, Debug)]
pub struct EESPNetConfig {
    /// Width multiplier `s`.
    #[config(default = "1.0")]
    pub scale: f32,
    /// Channels of the input image.
    #[config(default = "3")]
    pub image_channels: usize,
    /// ImageNet classes of the classification top.
    #[config(default = "1000")]
    pub num_classes: usize,
    /// Feed the input image into every down-sampling block.
    #[config(default = "true")]
    pub input_reinforcement: bool,
    /// Build `level5` and the classifier.
    #[config(default = "true")]
    pub include_top: bool,
    /// Dropout before the classifier.
    #[config(default = "0.2")]
    pub dropout: f64,
}

impl EESPNetConfig {
    /// Stage widths for the configured scale.
    ///
    /// Entries 0-4 are the outputs of `level1` .. `level5`, entry 5 the width
    /// of the final point-wise convolution in front of the classifier.
    ///
    /// | s    | widths                          |
    /// |------|---------------------------------|
    /// | 0.5  | 16, 32, 64, 128, 256, 1024      |
    /// | 1.0  | 32, 64, 128, 256, 512, 1024     |
    /// | 1.25 | 32, 80, 160, 320, 640, 1024     |
    /// | 1.5  | 32, 96, 192, 384, 768, 1024     |
    /// | 2.0  | 32, 128, 256, 512, 1024, 1280   |
    pub fn channel_config(&self) -> EESPNetResult<[usize; 6]> {
        let scale = self.scale;
        let supported = scale > 0.0 && (scale <= 1.5 || (scale - 2.0).abs() < f32::EPSILON);
        let scaled = (BASE_CHANNELS as f64 * f64::from(scale)).floor() as usize;
        let base_s = scaled.div_ceil(BRANCHES) * BRANCHES;
        if !supported || base_s == 0 {
            return Err(EESPNetError::UnsupportedScale { scale });
        }

        let mut config = [0; 6];
        config[0] = base_s.min(BASE_CHANNELS);
        for (i, width) in config.iter_mut().enumerate().take(5).skip(1) {
            *width = base_s << i;
        }
        config[5] = if scale <= 1.5 { 1024 } else { 1280 };

        // every strided block and residual unit must split into grouped branches
        let strided = config
            .windows(2)
            .take(4)
            .all(|pair| splits_into_branches(pair[0], pair[1] - pair[0]));
        let residual = config[2..5]
            .iter()
            .all(|&channels| splits_into_branches(channels, channels));
        if !strided || !residual {
            return Err(EESPNetError::UnsupportedScale { scale });
        }
        Ok(config)
    }

    /// Initializes a new EESPNet.
    pub fn init<B: Backend>(&self, device: &B::Device) -> EESPNetResult<EESPNet<B>> {
        let config = self.channel_config()?;
        let down = |in_channels: usize, out_channels: usize, r_lim: usize| {
            DownSamplerConfig::new(in_channels, out_channels)
                .with_branches(BRANCHES)
                .with_r_lim(r_lim)
                .with_reinforce(self.input_reinforcement)
                .with_image_channels(self.image_channels)
                .init(device)
        };
        let units = |channels: usize, reps: usize, r_lim: usize| {
            (0..reps)
                .map(|_| {
                    EespConfig::new(channels, channels)
                        .with_branches(BRANCHES)
                        .with_r_lim(r_lim)
                        .init(device)
                })
                .collect::<EESPNetResult<Vec<_>>>()
        };

        let level1 = CbrConfig::new(self.image_channels, config[0], 3)
            .with_stride(2)
            .init(device);
        let level2_0 = down(config[0], config[1], RECEPTIVE_LIMITS[0])?;
        let level3_0 = down(config[1], config[2], RECEPTIVE_LIMITS[1])?;
        let level3 = units(config[2], REPETITIONS[1], RECEPTIVE_LIMITS[2])?;
        let level4_0 = down(config[2], config[3], RECEPTIVE_LIMITS[2])?;
        let level4 = units(config[3], REPETITIONS[2], RECEPTIVE_LIMITS[3])?;

        let (level5_0, level5, level5_dw, level5_pw, classifier) = if self.include_top {
            // level5_0 owns a reinforcement branch but is never given the image
            let level5_0 = down(config[3], config[4], RECEPTIVE_LIMITS[3])?;
            let level5 = units(config[4], REPETITIONS[3], RECEPTIVE_LIMITS[4])?;
            let level5_dw = CbrConfig::new(config[4], config[4], 3)
                .with_groups(config[4])
                .init(device);
            let level5_pw = CbrConfig::new(config[4], config[5], 1)
                .with_groups(BRANCHES)
                .init(device);
            let mut classifier = LinearConfig::new(config[5], self.num_classes)
                .with_initializer(linear_normal(0.001))
                .init(device);
            classifier.bias = zero_bias(classifier.bias);
            (
                Some(level5_0),
                level5,
                Some(level5_dw),
                Some(level5_pw),
                Some(classifier),
            )
        } else {
            (None, Vec::new(), None, None, None)
        };

        Ok(EESPNet {
            level1,
            level2_0,
            level3_0,
            level3,
            level4_0,
            level4,
            level5_0,
            level5,
            level5_dw,
            level5_pw,
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier,
        })
    }
}

/// EESPNet backbone.
#[derive(Module, Debug)]
pub struct EESPNet<B: Backend> {
    pub level1: Cbr<B>,
    pub level2_0: DownSampler<B>,
    pub level3_0: DownSampler<B>,
    pub level3: Vec<Eesp<B>>,
    pub level4_0: DownSampler<B>,
    pub level4: Vec<Eesp<B>>,
    pub level5_0: Option<DownSampler<B>>,
    pub level5: Vec<Eesp<B>>,
    pub level5_dw: Option<Cbr<B>>,
    pub level5_pw: Option<Cbr<B>>,
    pub dropout: Dropout,
    pub classifier: Option<Linear<B>>,
}

impl<B: Backend> EESPNet<B> {
    /// Encoder features `[l1, l2, l3, l4]` at strides 2, 4, 8 and 16.
    pub fn forward_features(&self, x: Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
        let image = self.level2_0.inp_reinf.as_ref().map(|_| x.clone());

        let l1 = self.level1.forward(x);
        let l2 = self.level2_0.forward(l1.clone(), image.clone());

        let l3 = self.level3_0.forward(l2.clone(), image.clone());
        let l3 = self.level3.iter().fold(l3, |x, unit| unit.forward(x));

        let l4 = self.level4_0.forward(l3.clone(), image);
        let l4 = self.level4.iter().fold(l4, |x, unit| unit.forward(x));

        [l1, l2, l3, l4]
    }

    /// Class logits `[batch, num_classes]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> EESPNetResult<Tensor<B, 2>> {
        let (Some(level5_0), Some(level5_dw), Some(level5_pw), Some(classifier)) = (
            &self.level5_0,
            &self.level5_dw,
            &self.level5_pw,
            &self.classifier,
        ) else {
            return Err(EESPNetError::MissingClassifier);
        };

        let [_, _, _, l4] = self.forward_features(x);
        let l5 = level5_0.forward(l4, None);
        let l5 = self.level5.iter().fold(l5, |x, unit| unit.forward(x));
        let l5 = level5_pw.forward(level5_dw.forward(l5));

        let pooled = self.dropout.forward(adaptive_avg_pool2d(l5, [1, 1]));
        let [batch, channels, _, _] = pooled.dims();
        Ok(classifier.forward(pooled.reshape([batch, channels])))
    }

    /// Channels of `[l1, l2, l3, l4]`.
    pub fn output_channels(&self) -> [usize; 4] {
        [
            self.level1.act.alpha.val().dims()[0],
            self.level2_0.act.alpha.val().dims()[0],
            self.level3_0.act.alpha.val().dims()[0],
            self.level4_0.act.alpha.val().dims()[0],
        ]
    }

    /// Drops the classification top, keeping the encoder only.
    pub fn without_top(self) -> Self {
        Self {
            level5_0: None,
            level5: Vec::new(),
            level5_dw: None,
            level5_pw: None,
            classifier: None,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_channel_config_per_scale() {
        let expected = [
            (0.5, [16, 32, 64, 128, 256, 1024]),
            (1.0, [32, 64, 128, 256, 512, 1024]),
            (1.25, [32, 80, 160, 320, 640, 1024]),
            (1.5, [32, 96, 192, 384, 768, 1024]),
            (2.0, [32, 128, 256, 512, 1024, 1280]),
        ];
        for (scale, channels) in expected {
            let config = EESPNetConfig::new().with_scale(scale);
            assert_eq!(config.channel_config().unwrap(), channels, "scale {scale}");
        }
    }

    #[test]
    fn test_unsupported_scale() {
        for scale in [0.0, -1.0, 0.25, 0.75, 1.1, 1.75, 3.0] {
            let result = EESPNetConfig::new().with_scale(scale).channel_config();
            assert_eq!(result, Err(EESPNetError::UnsupportedScale { scale }));
        }
    }

    #[test]
    fn test_every_accepted_scale_builds() {
        let device = Default::default();
        for step in 1..=30 {
            let scale = step as f32 * 0.05;
            let config = EESPNetConfig::new().with_scale(scale).with_include_top(false);
            if config.channel_config().is_ok() {
                assert!(config.init::<TestBackend>(&device).is_ok(), "scale {scale}");
            }
        }
    }

    #[test]
    fn test_forward_features_strides() {
        let device = Default::default();
        let model = EESPNetConfig::new()
            .with_scale(0.5)
            .with_include_top(false)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([1, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device);
        let [l1, l2, l3, l4] = model.forward_features(x);

        assert_eq!(l1.dims(), [1, 16, 32, 32]);
        assert_eq!(l2.dims(), [1, 32, 16, 16]);
        assert_eq!(l3.dims(), [1, 64, 8, 8]);
        assert_eq!(l4.dims(), [1, 128, 4, 4]);
        assert_eq!(model.output_channels(), [16, 32, 64, 128]);
    }

    #[test]
    fn test_forward_features_without_reinforcement() {
        let device = Default::default();
        let model = EESPNetConfig::new()
            .with_scale(0.5)
            .with_include_top(false)
            .with_input_reinforcement(false)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(model.level3_0.inp_reinf.is_none());

        let x = Tensor::random([2, 3, 48, 32], Distribution::Normal(0.0, 1.0), &device);
        let [_, _, _, l4] = model.forward_features(x);
        assert_eq!(l4.dims(), [2, 128, 3, 2]);
    }

    #[test]
    fn test_classifier_head() {
        let device = Default::default();
        let model = EESPNetConfig::new()
            .with_scale(0.5)
            .with_num_classes(10)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.level5.len(), 3);

        let x = Tensor::random([2, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(model.forward(x).unwrap().dims(), [2, 10]);
    }

    #[test]
    fn test_missing_classifier() {
        let device = Default::default();
        let model = EESPNetConfig::new()
            .with_scale(0.5)
            .init::<TestBackend>(&device)
            .unwrap()
            .without_top();

        let x = Tensor::random([1, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        assert!(matches!(
            model.forward(x),
            Err(EESPNetError::MissingClassifier)
        ));
    }
}
