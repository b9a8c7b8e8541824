//! # ESPNetv2 Segmentation with Super-Resolution
//!
//! The EESPNet encoder produces features at strides 2, 4, 8 and 16. A
//! bottom-up decoder of [`EfficientPyrPool`] blocks climbs back to stride 2,
//! adding a gated projection of the matching encoder stage at every step.
//! Two learned 2x upsampling stages (the SSSR branch) then lift the class
//! scores to twice the input resolution, so a network fed a half-resolution
//! image predicts at full label resolution.

use burn::{prelude::*, tensor::backend::Backend};
use burn_extra_ops::{resize_bilinear, TensorExtraOps};
use eespnet::{Br, BrConfig, EESPNet};

use super::modules::{
    DeconvBnAct, DeconvBnActConfig, EfficientPwConv, EfficientPwConvConfig, EfficientPyrPool,
    EfficientPyrPoolConfig,
};
use crate::{
    config::ModelConfig,
    error::EspnetResult,
    losses::{SegmentationLoss, SegmentationLossConfig},
};

#[cfg(feature = "train")]
use crate::{dataset::SegmentationBatch, training::SegmentationOutput};
#[cfg(feature = "train")]
use burn::{
    tensor::backend::AutodiffBackend,
    train::{TrainOutput, TrainStep, ValidStep},
};

/// Configuration for the [`EspnetV2Segmentation`] model.
#[derive(Config, Debug)]
pub struct EspnetV2SegConfig {
    /// The detailed model configuration.
    pub config: ModelConfig,
    /// The loss function configuration.
    #[config(default = "SegmentationLossConfig::new()")]
    pub loss: SegmentationLossConfig,
}

impl EspnetV2SegConfig {
    /// Initializes the model with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the encoder cannot
    /// be built at the requested scale.
    pub fn init<B: Backend>(&self, device: &B::Device) -> EspnetResult<EspnetV2Segmentation<B>> {
        self.config.validate()?;

        let base_net = self.config.backbone.eespnet().init(device)?;
        let enc = base_net.output_channels();
        let dec = self.config.dec_planes();
        let proj = self.config.pyramid_projection();

        let pyr_pool = |in_planes: usize, out_planes: usize| {
            EfficientPyrPoolConfig::new(in_planes, proj, out_planes)
                .with_scales(self.config.decoder.pyramid_scales.clone())
        };
        let merge = |in_planes: usize, out_planes: usize| {
            EfficientPwConvConfig::new(in_planes, out_planes).init(device)
        };
        let sssr = |enabled: bool| {
            enabled.then(|| DeconvBnActConfig::new(dec[3], dec[3]).init(device))
        };

        tracing::debug!(
            encoder = ?enc,
            decoder = ?dec,
            projection = proj,
            sssr = self.config.sssr.enabled,
            "building ESPNetv2 segmentation model"
        );

        Ok(EspnetV2Segmentation {
            bu_dec_l1: pyr_pool(enc[3], dec[0]).init(device),
            bu_dec_l2: pyr_pool(dec[0], dec[1]).init(device),
            bu_dec_l3: pyr_pool(dec[1], dec[2]).init(device),
            bu_dec_l4: pyr_pool(dec[2], dec[3])
                .with_last_layer_br(false)
                .init(device),
            merge_enc_dec_l2: merge(enc[2], dec[0]),
            merge_enc_dec_l3: merge(enc[1], dec[1]),
            merge_enc_dec_l4: merge(enc[0], dec[2]),
            bu_br_l2: BrConfig::new(dec[0]).init(device),
            bu_br_l3: BrConfig::new(dec[1]).init(device),
            bu_br_l4: BrConfig::new(dec[2]).init(device),
            bu_dec_l5: sssr(self.config.sssr.enabled),
            bu_dec_l6: sssr(self.config.sssr.enabled),
            base_net,
            loss: self.loss.init(),
        })
    }
}

/// Every intermediate tensor of one forward pass.
#[derive(Debug, Clone)]
pub struct SegmentationFeatures<B: Backend> {
    /// Encoder outputs at strides 2, 4, 8, 16.
    pub encoder: [Tensor<B, 4>; 4],
    /// Decoder outputs at strides 16, 8, 4, 2; the last one holds class scores.
    pub decoder: [Tensor<B, 4>; 4],
    /// Output of the first SSSR stage (same resolution as the input).
    pub sssr_hidden: Option<Tensor<B, 4>>,
    /// Class scores at twice the input resolution.
    pub output: Tensor<B, 4>,
}

/// ESPNetv2 segmentation network with the DSRL super-resolution branch.
#[derive(Module, Debug)]
pub struct EspnetV2Segmentation<B: Backend> {
    /// EESPNet encoder without its classification top.
    pub base_net: EESPNet<B>,
    pub bu_dec_l1: EfficientPyrPool<B>,
    pub bu_dec_l2: EfficientPyrPool<B>,
    pub bu_dec_l3: EfficientPyrPool<B>,
    pub bu_dec_l4: EfficientPyrPool<B>,
    pub merge_enc_dec_l2: EfficientPwConv<B>,
    pub merge_enc_dec_l3: EfficientPwConv<B>,
    pub merge_enc_dec_l4: EfficientPwConv<B>,
    pub bu_br_l2: Br<B>,
    pub bu_br_l3: Br<B>,
    pub bu_br_l4: Br<B>,
    /// SSSR branch.
    pub bu_dec_l5: Option<DeconvBnAct<B>>,
    pub bu_dec_l6: Option<DeconvBnAct<B>>,
    /// The loss function for training.
    loss: SegmentationLoss<B>,
}

impl<B: Backend> EspnetV2Segmentation<B> {
    /// Class scores `[N, classes, 2H, 2W]` for an `[N, 3, H, W]` image batch.
    ///
    /// `H` and `W` should be multiples of 16; other sizes still work, the
    /// decoder then resamples to whatever size each encoder stage produced.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_features(x).output
    }

    /// Forward pass that keeps every intermediate tensor.
    pub fn forward_features(&self, x: Tensor<B, 4>) -> SegmentationFeatures<B> {
        let [height, width] = x.spatial_size();
        tracing::debug!(shape = ?x.dims(), "input");

        let [l1, l2, l3, l4] = self.base_net.forward_features(x);
        tracing::debug!(
            l1 = ?l1.dims(),
            l2 = ?l2.dims(),
            l3 = ?l3.dims(),
            l4 = ?l4.dims(),
            "encoder"
        );

        let bu0 = self.bu_dec_l1.forward(l4.clone());
        tracing::debug!(shape = ?bu0.dims(), "decoder stage 1");

        let bu1 = Self::decode(
            bu0.clone(),
            l3.clone(),
            &self.merge_enc_dec_l2,
            &self.bu_br_l2,
            &self.bu_dec_l2,
        );
        tracing::debug!(shape = ?bu1.dims(), "decoder stage 2");

        let bu2 = Self::decode(
            bu1.clone(),
            l2.clone(),
            &self.merge_enc_dec_l3,
            &self.bu_br_l3,
            &self.bu_dec_l3,
        );
        tracing::debug!(shape = ?bu2.dims(), "decoder stage 3");

        let bu3 = Self::decode(
            bu2.clone(),
            l1.clone(),
            &self.merge_enc_dec_l4,
            &self.bu_br_l4,
            &self.bu_dec_l4,
        );
        tracing::debug!(shape = ?bu3.dims(), "decoder stage 4");

        let (sssr_hidden, output) = match (&self.bu_dec_l5, &self.bu_dec_l6) {
            (Some(l5), Some(l6)) => {
                let hidden = l5.forward(bu3.clone());
                let output = l6.forward(hidden.clone());
                tracing::debug!(hidden = ?hidden.dims(), output = ?output.dims(), "sssr");
                (Some(hidden), output)
            }
            _ => (None, resize_bilinear(bu3.clone(), [height * 2, width * 2])),
        };

        SegmentationFeatures {
            encoder: [l1, l2, l3, l4],
            decoder: [bu0, bu1, bu2, bu3],
            sssr_hidden,
            output,
        }
    }

    /// Upsample, fuse the projected skip, then refine with the next pyramid block.
    fn decode(
        bottom_up: Tensor<B, 4>,
        skip: Tensor<B, 4>,
        merge: &EfficientPwConv<B>,
        br: &Br<B>,
        pyr_pool: &EfficientPyrPool<B>,
    ) -> Tensor<B, 4> {
        let skip = merge.forward(skip);
        let bottom_up = resize_bilinear(bottom_up, skip.spatial_size());
        pyr_pool.forward(br.forward(bottom_up + skip))
    }

    /// Per-class argmax `[N, 2H, 2W]`.
    pub fn predict(&self, x: Tensor<B, 4>) -> Tensor<B, 3, Int> {
        self.forward(x).argmax(1).squeeze(1)
    }

    /// Number of segmentation classes.
    pub fn num_classes(&self) -> usize {
        self.bu_dec_l4.merge_conv.weight.val().dims()[0]
    }

    /// Whether the SSSR branch is present.
    pub const fn has_sssr(&self) -> bool {
        self.bu_dec_l5.is_some() && self.bu_dec_l6.is_some()
    }

    /// The loss function this model was configured with.
    pub const fn loss(&self) -> &SegmentationLoss<B> {
        &self.loss
    }

    /// Forward pass and loss for one labelled batch.
    #[cfg(feature = "train")]
    pub fn forward_segmentation(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        let logits = self.forward(batch.images);
        let loss = self.loss.forward(logits.clone(), batch.targets.clone());

        SegmentationOutput {
            loss,
            logits,
            targets: batch.targets,
        }
    }
}

#[cfg(feature = "train")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>>
    for EspnetV2Segmentation<B>
{
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "train")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>>
    for EspnetV2Segmentation<B>
{
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch)
    }
}
