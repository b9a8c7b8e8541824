//! Encoder-to-decoder projection with a global channel gate.

use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
    tensor::{activation::sigmoid, module::adaptive_avg_pool2d},
};
use burn_extra_ops::kaiming_fan_out;
use eespnet::{Cbr, CbrConfig};

/// Configuration for [`EfficientPwConv`].
#[derive(Config, Debug)]
pub struct EfficientPwConvConfig {
    pub in_planes: usize,
    pub out_planes: usize,
}

impl EfficientPwConvConfig {
    /// Groups of the 3x3 expansion convolution.
    pub const fn groups(&self) -> usize {
        gcd(self.in_planes, self.out_planes)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> EfficientPwConv<B> {
        EfficientPwConv {
            wt_conv: Conv2dConfig::new([self.in_planes, self.out_planes], [1, 1])
                .with_bias(false)
                .with_initializer(kaiming_fan_out(self.out_planes, [1, 1]))
                .init(device),
            expansion_layer: CbrConfig::new(self.in_planes, self.out_planes, 3)
                .with_groups(self.groups())
                .init(device),
        }
    }
}

/// Grouped 3x3 expansion scaled by a sigmoid gate computed from the globally
/// pooled input.
#[derive(Module, Debug)]
pub struct EfficientPwConv<B: Backend> {
    pub wt_conv: Conv2d<B>,
    pub expansion_layer: Cbr<B>,
}

impl<B: Backend> EfficientPwConv<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let weights = sigmoid(self.wt_conv.forward(adaptive_avg_pool2d(x.clone(), [1, 1])));
        self.expansion_layer.forward(x) * weights
    }
}

const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_groups_follow_gcd() {
        assert_eq!(EfficientPwConvConfig::new(256, 64).groups(), 64);
        assert_eq!(EfficientPwConvConfig::new(80, 48).groups(), 16);
        assert_eq!(EfficientPwConvConfig::new(32, 21).groups(), 1);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let block = EfficientPwConvConfig::new(24, 16).init::<TestBackend>(&device);
        let x = Tensor::random([2, 24, 10, 6], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [2, 16, 10, 6]);
    }

    #[test]
    fn test_gate_bounds_output_by_expansion() {
        let device = Default::default();
        let block = EfficientPwConvConfig::new(8, 8).init::<TestBackend>(&device);
        let x = Tensor::random([1, 8, 5, 5], Distribution::Normal(0.0, 1.0), &device);

        let gated = block.forward(x.clone()).abs();
        let expanded = block.expansion_layer.forward(x).abs();
        let excess: f32 = (gated - expanded).clamp_min(0.0).sum().into_scalar();
        assert!(excess < 1e-5);
    }
}
