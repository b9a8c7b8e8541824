//! # Efficient Pyramid Pooling
//!
//! Projects the input to a narrow width, runs one depth-wise 3x3 convolution
//! per resampling scale, and merges the branches back through a shuffled
//! grouped convolution.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::module::adaptive_avg_pool2d,
};
use burn_extra_ops::{
    kaiming_fan_out, resize_bilinear, zero_bias, ChannelShuffle, ChannelShuffleConfig,
};
use eespnet::{Br, BrConfig, Cbr, CbrConfig};

/// Smallest side of a pyramid branch.
const MIN_BRANCH_SIZE: usize = 5;

/// Configuration for [`EfficientPyrPool`].
#[derive(Config, Debug)]
pub struct EfficientPyrPoolConfig {
    pub in_planes: usize,
    pub proj_planes: usize,
    pub out_planes: usize,
    #[config(default = "vec![2.0, 1.5, 1.0, 0.5, 0.1]")]
    pub scales: Vec<f64>,
    /// End with batch norm and PReLU. The final decoder block emits raw
    /// class scores and disables this, keeping a bias on its last conv.
    #[config(default = "true")]
    pub last_layer_br: bool,
}

impl EfficientPyrPoolConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EfficientPyrPool<B> {
        let mut scales = self.scales.clone();
        scales.sort_by(|a, b| b.total_cmp(a));
        let branches = scales.len();
        let proj = self.proj_planes;

        let stages = (0..branches)
            .map(|_| {
                Conv2dConfig::new([proj, proj], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_groups(proj)
                    .with_bias(false)
                    .with_initializer(kaiming_fan_out(proj, [3, 3]))
                    .init(device)
            })
            .collect();

        let mut merge_conv = Conv2dConfig::new([proj, self.out_planes], [1, 1])
            .with_bias(!self.last_layer_br)
            .with_initializer(kaiming_fan_out(self.out_planes, [1, 1]))
            .init(device);
        merge_conv.bias = zero_bias(merge_conv.bias);

        EfficientPyrPool {
            projection_layer: CbrConfig::new(self.in_planes, proj, 1).init(device),
            stages,
            merge_br: BrConfig::new(proj * branches).init(device),
            shuffle: ChannelShuffleConfig::new(branches).init(),
            merge_cbr: CbrConfig::new(proj * branches, proj, 3)
                .with_groups(proj)
                .init(device),
            merge_conv,
            br: self
                .last_layer_br
                .then(|| BrConfig::new(self.out_planes).init(device)),
            scales: Ignored(scales),
        }
    }
}

/// Multi-scale pyramid pooling block of the ESPNetv2 decoder.
#[derive(Module, Debug)]
pub struct EfficientPyrPool<B: Backend> {
    pub projection_layer: Cbr<B>,
    pub stages: Vec<Conv2d<B>>,
    pub merge_br: Br<B>,
    pub shuffle: ChannelShuffle,
    pub merge_cbr: Cbr<B>,
    pub merge_conv: Conv2d<B>,
    pub br: Option<Br<B>>,
    scales: Ignored<Vec<f64>>,
}

impl<B: Backend> EfficientPyrPool<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.projection_layer.forward(x);
        let [_, _, height, width] = x.dims();

        let branches = self
            .stages
            .iter()
            .zip(self.scales.iter())
            .map(|(stage, &scale)| {
                let size = [branch_size(height, scale), branch_size(width, scale)];
                if scale < 1.0 {
                    let h = stage.forward(adaptive_avg_pool2d(x.clone(), size));
                    resize_bilinear(h, [height, width])
                } else if scale > 1.0 {
                    let h = stage.forward(resize_bilinear(x.clone(), size));
                    adaptive_avg_pool2d(h, [height, width])
                } else {
                    stage.forward(x.clone())
                }
            })
            .collect();

        let out = self.merge_br.forward(Tensor::cat(branches, 1));
        let out = self.shuffle.forward(out);
        let out = self.merge_cbr.forward(out);
        let out = self.merge_conv.forward(out);

        match &self.br {
            Some(br) => br.forward(out),
            None => out,
        }
    }

    /// Resampling scales, largest first.
    pub fn scales(&self) -> &[f64] {
        &self.scales
    }
}

fn branch_size(side: usize, scale: f64) -> usize {
    let scaled = (side as f64 * scale).ceil() as usize;
    scaled.max(MIN_BRANCH_SIZE)
}
