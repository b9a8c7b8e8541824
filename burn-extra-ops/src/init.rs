//! Weight initialization helpers shared by the ESPNet layers.

use burn::{module::Param, nn::Initializer, prelude::*};

/// Kaiming normal initialization in fan-out mode with the ReLU gain,
/// `nn.init.kaiming_normal_(w, mode="fan_out")`.
///
/// The fan-out is `out_channels * kh * kw` regardless of the group count.
pub fn kaiming_fan_out(out_channels: usize, kernel_size: [usize; 2]) -> Initializer {
    let fan_out = (out_channels * kernel_size[0] * kernel_size[1]).max(1) as f64;
    Initializer::Normal {
        mean: 0.0,
        std: (2.0 / fan_out).sqrt(),
    }
}

/// Normal initialization with a small standard deviation for classifier heads.
pub const fn linear_normal(std: f64) -> Initializer {
    Initializer::Normal { mean: 0.0, std }
}

/// Resets an optional bias parameter to zeros, keeping its shape and device.
pub fn zero_bias<B: Backend>(bias: Option<Param<Tensor<B, 1>>>) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|bias| Param::from_tensor(bias.val().zeros_like()))
}
