//! Parameter groups for differential learning rates.
//!
//! The pretrained encoder is fine-tuned with the base learning rate while
//! the freshly initialized decoder and super-resolution branch learn faster.
//! Gradients are split per group and each group is stepped with its own rate.

use burn::{
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use super::espnetv2::EspnetV2Segmentation;

/// A disjoint subset of the model's parameters.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ParamGroup {
    /// The EESPNet encoder.
    Backbone,
    /// Pyramid pooling blocks, skip projections and the decoder BR layers.
    Segmentation,
    /// The two transposed-convolution stages.
    SuperResolution,
}

impl ParamGroup {
    /// Every group, in stepping order.
    pub const ALL: [Self; 3] = [Self::Backbone, Self::Segmentation, Self::SuperResolution];
}

/// Learning rate per [`ParamGroup`].
#[derive(Config, Debug)]
pub struct GroupLearningRates {
    pub backbone: f64,
    pub segmentation: f64,
    pub super_resolution: f64,
}

impl GroupLearningRates {
    /// Backbone at `base_lr`, every other group at `base_lr * head_multiplier`.
    pub fn from_base(base_lr: f64, head_multiplier: f64) -> Self {
        let head = base_lr * head_multiplier;
        Self::new(base_lr, head, head)
    }

    /// Rate of one group.
    pub const fn get(&self, group: &ParamGroup) -> f64 {
        match group {
            ParamGroup::Backbone => self.backbone,
            ParamGroup::Segmentation => self.segmentation,
            ParamGroup::SuperResolution => self.super_resolution,
        }
    }

    /// Every rate multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.backbone * factor,
            self.segmentation * factor,
            self.super_resolution * factor,
        )
    }
}

/// Polynomial decay, `lr * (1 - epoch / max_epochs) ^ power`.
#[derive(Config, Debug)]
pub struct PolyLrSchedule {
    pub max_epochs: usize,
    #[config(default = "0.9")]
    pub power: f64,
}

impl PolyLrSchedule {
    /// Multiplier for `epoch` (0-based); reaches 0 at `max_epochs`.
    pub fn factor(&self, epoch: usize) -> f64 {
        if self.max_epochs == 0 {
            return 1.0;
        }
        let progress = (epoch as f64 / self.max_epochs as f64).min(1.0);
        (1.0 - progress).powf(self.power)
    }

    /// Group rates for `epoch`.
    pub fn rates(&self, base: &GroupLearningRates, epoch: usize) -> GroupLearningRates {
        base.scaled(self.factor(epoch))
    }
}

impl<B: Backend> EspnetV2Segmentation<B> {
    /// Number of parameters in `group`.
    pub fn num_params_in(&self, group: &ParamGroup) -> usize {
        match group {
            ParamGroup::Backbone => self.base_net.num_params(),
            ParamGroup::Segmentation => {
                self.bu_dec_l1.num_params()
                    + self.bu_dec_l2.num_params()
                    + self.bu_dec_l3.num_params()
                    + self.bu_dec_l4.num_params()
                    + self.merge_enc_dec_l2.num_params()
                    + self.merge_enc_dec_l3.num_params()
                    + self.merge_enc_dec_l4.num_params()
                    + self.bu_br_l2.num_params()
                    + self.bu_br_l3.num_params()
                    + self.bu_br_l4.num_params()
            }
            ParamGroup::SuperResolution => {
                self.bu_dec_l5.num_params() + self.bu_dec_l6.num_params()
            }
        }
    }

    /// Stops gradients from reaching the encoder.
    pub fn freeze_backbone(mut self) -> Self {
        self.base_net = self.base_net.no_grad();
        self
    }
}

impl<B: AutodiffBackend> EspnetV2Segmentation<B> {
    /// Moves the gradients of `group` out of `grads`.
    pub fn group_gradients(
        &self,
        group: &ParamGroup,
        grads: &mut B::Gradients,
    ) -> Vec<GradientsParams> {
        match group {
            ParamGroup::Backbone => vec![GradientsParams::from_module(grads, &self.base_net)],
            ParamGroup::Segmentation => vec![
                GradientsParams::from_module(grads, &self.bu_dec_l1),
                GradientsParams::from_module(grads, &self.bu_dec_l2),
                GradientsParams::from_module(grads, &self.bu_dec_l3),
                GradientsParams::from_module(grads, &self.bu_dec_l4),
                GradientsParams::from_module(grads, &self.merge_enc_dec_l2),
                GradientsParams::from_module(grads, &self.merge_enc_dec_l3),
                GradientsParams::from_module(grads, &self.merge_enc_dec_l4),
                GradientsParams::from_module(grads, &self.bu_br_l2),
                GradientsParams::from_module(grads, &self.bu_br_l3),
                GradientsParams::from_module(grads, &self.bu_br_l4),
            ],
            ParamGroup::SuperResolution => vec![
                GradientsParams::from_module(grads, &self.bu_dec_l5),
                GradientsParams::from_module(grads, &self.bu_dec_l6),
            ],
        }
    }

    /// One optimizer update where each group uses its own learning rate.
    pub fn step_grouped<O>(
        self,
        optim: &mut O,
        mut grads: B::Gradients,
        rates: &GroupLearningRates,
    ) -> Self
    where
        O: Optimizer<Self, B>,
        Self: AutodiffModule<B>,
    {
        let mut model = self;
        for group in &ParamGroup::ALL {
            let parts = model.group_gradients(group, &mut grads);
            for part in parts.into_iter().filter(|part| !part.is_empty()) {
                model = optim.step(rates.get(group), model, part);
            }
        }
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BackboneConfig, ModelConfig},
        models::EspnetV2SegConfig,
    };
    use burn::{
        backend::{ndarray::NdArray, Autodiff},
        optim::SgdConfig,
        tensor::{Distribution, TensorData},
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    fn model() -> EspnetV2Segmentation<TestBackend> {
        let config = ModelConfig::new().with_backbone(BackboneConfig::new().with_scale(0.5));
        EspnetV2SegConfig::new(config)
            .init(&Default::default())
            .unwrap()
    }

    #[test]
    fn test_groups_partition_parameters() {
        let model = model();
        let total: usize = ParamGroup::ALL
            .iter()
            .map(|group| model.num_params_in(group))
            .sum();
        assert_eq!(total, model.num_params());
        assert!(model.num_params_in(&ParamGroup::SuperResolution) > 0);
    }

    #[test]
    fn test_rates_from_base() {
        let rates = GroupLearningRates::from_base(1e-3, 10.0);
        assert_eq!(rates.get(&ParamGroup::Backbone), 1e-3);
        assert!((rates.get(&ParamGroup::Segmentation) - 1e-2).abs() < 1e-12);
        assert!((rates.get(&ParamGroup::SuperResolution) - 1e-2).abs() < 1e-12);
    }

    #[test]
    fn test_poly_schedule() {
        let schedule = PolyLrSchedule::new(10);
        assert_eq!(schedule.factor(0), 1.0);
        assert!((schedule.factor(5) - 0.5_f64.powf(0.9)).abs() < 1e-12);
        assert_eq!(schedule.factor(10), 0.0);
        assert_eq!(schedule.factor(20), 0.0);

        let rates = schedule.rates(&GroupLearningRates::from_base(1.0, 10.0), 5);
        assert!((rates.segmentation - 10.0 * 0.5_f64.powf(0.9)).abs() < 1e-9);
    }

    #[test]
    fn test_grouped_step_respects_zero_backbone_rate() {
        let device = Default::default();
        let model = model();
        let encoder_before = model.base_net.level1.conv.weight.val().inner();
        let decoder_before = model.bu_dec_l4.merge_conv.weight.val().inner();

        let x = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let targets = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::new(vec![1i64; 64 * 64], [1, 64, 64]),
            &device,
        );
        let loss = model.loss().forward(model.forward(x), targets);
        let grads = loss.backward();

        let mut optim = SgdConfig::new().init();
        let rates = GroupLearningRates::new(0.0, 0.1, 0.1);
        let model = model.step_grouped(&mut optim, grads, &rates);

        let encoder_after = model.base_net.level1.conv.weight.val().inner();
        let decoder_after = model.bu_dec_l4.merge_conv.weight.val().inner();

        let encoder_change: f32 = (encoder_after - encoder_before).abs().sum().into_scalar();
        let decoder_change: f32 = (decoder_after - decoder_before).abs().sum().into_scalar();
        assert_eq!(encoder_change, 0.0);
        assert!(decoder_change > 0.0);
    }

    #[test]
    fn test_frozen_backbone_has_no_gradients() {
        let device = Default::default();
        let model = model().freeze_backbone();

        let x = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let mut grads = model.forward(x).mean().backward();

        let backbone = model.group_gradients(&ParamGroup::Backbone, &mut grads);
        assert!(backbone.iter().all(GradientsParams::is_empty));

        let head = model.group_gradients(&ParamGroup::Segmentation, &mut grads);
        assert!(head.iter().any(|part| !part.is_empty()));
    }
}
