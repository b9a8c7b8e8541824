//! Convolution / normalization / activation building blocks.
//!
//! Field names follow the reference PyTorch modules (`conv`, `bn`, `act`) so
//! that checkpoints map onto these structs without renaming.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PRelu, PReluConfig, PaddingConfig2d,
    },
    prelude::*,
};
use burn_extra_ops::kaiming_fan_out;

fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel_size: usize,
    stride: usize,
    dilation: usize,
    groups: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = ((kernel_size - 1) / 2) * dilation;
    Conv2dConfig::new(channels, [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_dilation([dilation, dilation])
        .with_groups(groups)
        .with_bias(false)
        .with_initializer(kaiming_fan_out(channels[1], [kernel_size, kernel_size]))
        .init(device)
}

/// Per-channel PReLU, `nn.PReLU(channels)`.
pub fn prelu<B: Backend>(channels: usize, device: &B::Device) -> PRelu<B> {
    PReluConfig::new()
        .with_num_parameters(channels)
        .init(device)
}

/// Configuration for [`Cbr`]: convolution, batch norm, PReLU.
#[derive(Config, Debug)]
pub struct CbrConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    #[config(default = "1")]
    pub stride: usize,
    #[config(default = "1")]
    pub groups: usize,
}

impl CbrConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Cbr<B> {
        Cbr {
            conv: conv2d(
                [self.in_channels, self.out_channels],
                self.kernel_size,
                self.stride,
                1,
                self.groups,
                device,
            ),
            bn: BatchNormConfig::new(self.out_channels).init(device),
            act: prelu(self.out_channels, device),
        }
    }
}

/// Convolution followed by batch normalization and PReLU.
#[derive(Module, Debug)]
pub struct Cbr<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub act: PRelu<B>,
}

impl<B: Backend> Cbr<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        self.act.forward(x)
    }
}

/// Configuration for [`Br`]: batch norm and PReLU.
#[derive(Config, Debug)]
pub struct BrConfig {
    pub channels: usize,
}

impl BrConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Br<B> {
        Br {
            bn: BatchNormConfig::new(self.channels).init(device),
            act: prelu(self.channels, device),
        }
    }
}

/// Batch normalization followed by PReLU.
#[derive(Module, Debug)]
pub struct Br<B: Backend> {
    pub bn: BatchNorm<B, 2>,
    pub act: PRelu<B>,
}

impl<B: Backend> Br<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.act.forward(self.bn.forward(x))
    }
}

/// Configuration for [`Cb`]: convolution and batch norm.
#[derive(Config, Debug)]
pub struct CbConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    #[config(default = "1")]
    pub stride: usize,
    #[config(default = "1")]
    pub groups: usize,
}

impl CbConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Cb<B> {
        Cb {
            conv: conv2d(
                [self.in_channels, self.out_channels],
                self.kernel_size,
                self.stride,
                1,
                self.groups,
                device,
            ),
            bn: BatchNormConfig::new(self.out_channels).init(device),
        }
    }
}

/// Convolution followed by batch normalization.
#[derive(Module, Debug)]
pub struct Cb<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> Cb<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Configuration for [`CDilated`].
#[derive(Config, Debug)]
pub struct CDilatedConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    #[config(default = "1")]
    pub stride: usize,
    #[config(default = "1")]
    pub dilation: usize,
    #[config(default = "1")]
    pub groups: usize,
}

impl CDilatedConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CDilated<B> {
        CDilated {
            conv: conv2d(
                [self.in_channels, self.out_channels],
                self.kernel_size,
                self.stride,
                self.dilation,
                self.groups,
                device,
            ),
        }
    }
}

/// Dilated convolution that preserves spatial size at stride 1.
#[derive(Module, Debug)]
pub struct CDilated<B: Backend> {
    pub conv: Conv2d<B>,
}

impl<B: Backend> CDilated<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_cbr_strided_halves_resolution() {
        let device = Default::default();
        let cbr = CbrConfig::new(3, 16, 3)
            .with_stride(2)
            .init::<TestBackend>(&device);
        let x = Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(cbr.forward(x).dims(), [2, 16, 16, 16]);
        assert!(cbr.conv.bias.is_none());
        assert_eq!(cbr.act.alpha.val().dims(), [16]);
    }

    #[test]
    fn test_grouped_cb_keeps_resolution() {
        let device = Default::default();
        let cb = CbConfig::new(8, 8, 1)
            .with_groups(4)
            .init::<TestBackend>(&device);
        let x = Tensor::random([1, 8, 9, 7], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(cb.forward(x).dims(), [1, 8, 9, 7]);
    }

    #[test]
    fn test_dilated_padding_preserves_size() {
        let device = Default::default();
        for dilation in [1, 2, 3, 6] {
            let conv = CDilatedConfig::new(4, 4, 3)
                .with_dilation(dilation)
                .with_groups(4)
                .init::<TestBackend>(&device);
            let x = Tensor::random([1, 4, 16, 16], Distribution::Normal(0.0, 1.0), &device);
            assert_eq!(conv.forward(x).dims(), [1, 4, 16, 16], "dilation {dilation}");
        }
    }

    #[test]
    fn test_br_is_shape_preserving() {
        let device = Default::default();
        let br = BrConfig::new(5).init::<TestBackend>(&device);
        let x = Tensor::random([3, 5, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(br.forward(x).dims(), [3, 5, 4, 4]);
    }
}
