//! Learned 2x upsampling stage of the super-resolution branch.

use burn::{
    nn::{
        conv::{ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, PRelu,
    },
    prelude::*,
};
use eespnet::prelu;

/// Configuration for [`DeconvBnAct`].
#[derive(Config, Debug)]
pub struct DeconvBnActConfig {
    pub in_planes: usize,
    pub out_planes: usize,
}

impl DeconvBnActConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DeconvBnAct<B> {
        DeconvBnAct {
            conv_trans: ConvTranspose2dConfig::new([self.in_planes, self.out_planes], [3, 3])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_padding_out([1, 1])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(self.out_planes).init(device),
            act: prelu(self.out_planes, device),
        }
    }
}

/// Transposed convolution (k3, s2, p1, output padding 1), batch norm, PReLU.
///
/// Maps `[N, C, H, W]` to `[N, C', 2H, 2W]`.
#[derive(Module, Debug)]
pub struct DeconvBnAct<B: Backend> {
    pub conv_trans: ConvTranspose2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub act: PRelu<B>,
}

impl<B: Backend> DeconvBnAct<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_trans.forward(x);
        let x = self.bn.forward(x);
        self.act.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_doubles_resolution() {
        let device = Default::default();
        let block = DeconvBnActConfig::new(21, 21).init::<TestBackend>(&device);
        let x = Tensor::random([2, 21, 7, 9], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [2, 21, 14, 18]);
    }

    #[test]
    fn test_no_bias() {
        let device = Default::default();
        let block = DeconvBnActConfig::new(4, 8).init::<TestBackend>(&device);
        assert!(block.conv_trans.bias.is_none());
    }
}
