//! Additional operations for the Burn deep learning framework
//!
//! This crate provides the small tensor operations ESPNetv2 relies on that are
//! not available in the core Burn framework: channel shuffling, size-targeted
//! resampling and the initialization schemes of the reference weights.

use burn::prelude::*;

mod init;
mod resize;
mod shuffle;

// Convenient re-exports
pub use init::{kaiming_fan_out, linear_normal, zero_bias};
pub use resize::{pool_to_match, resize_bilinear};
pub use shuffle::{channel_shuffle, ChannelShuffle, ChannelShuffleConfig};

/// Additional operations for Burn image tensors
pub trait TensorExtraOps<B: Backend> {
    /// Shuffle the channel axis across `groups` groups.
    fn channel_shuffle(self, groups: usize) -> Self;

    /// Bilinearly resample to `[height, width]` with aligned corners.
    fn resize_bilinear(self, size: [usize; 2]) -> Self;

    /// Spatial size `[height, width]`.
    fn spatial_size(&self) -> [usize; 2];
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 4> {
    fn channel_shuffle(self, groups: usize) -> Self {
        channel_shuffle(self, groups)
    }

    fn resize_bilinear(self, size: [usize; 2]) -> Self {
        resize_bilinear(self, size)
    }

    fn spatial_size(&self) -> [usize; 2] {
        let [_, _, height, width] = self.dims();
        [height, width]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{ndarray::NdArray, Autodiff},
        tensor::Tensor,
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_tensor_extra_ops() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::random(
            [2, 8, 4, 5],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let shuffled = tensor.clone().channel_shuffle(4);
        assert_eq!(shuffled.dims(), tensor.dims());

        let resized = tensor.resize_bilinear([8, 10]);
        assert_eq!(resized.spatial_size(), [8, 10]);
    }

    #[test]
    fn test_gradients_flow_through_shuffle_and_resize() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::ones([1, 4, 3, 3], &device).require_grad();

        let out = tensor.clone().channel_shuffle(2).resize_bilinear([6, 6]);
        let grads = out.sum().backward();

        let grad = tensor.grad(&grads).expect("input requires grad");
        assert_eq!(grad.dims(), [1, 4, 3, 3]);
    }
}
