//! Spatial resampling helpers.

use burn::{
    nn::pool::AvgPool2d,
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// Bilinear resize of a `[N, C, H, W]` tensor to `size = [height, width]`.
///
/// Burn's bilinear kernel samples with aligned corners, which matches
/// `F.interpolate(..., mode="bilinear", align_corners=True)`.
/// Returns the input untouched when it already has the requested size.
pub fn resize_bilinear<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if [height, width] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Bilinear))
}

/// Applies `pool` until neither spatial side exceeds `size`.
///
/// With a stride-2 pool this halves the image until it lines up with a
/// feature map that was produced by the same number of strided stages.
pub fn pool_to_match<B: Backend>(
    mut x: Tensor<B, 4>,
    pool: &AvgPool2d,
    size: [usize; 2],
) -> Tensor<B, 4> {
    loop {
        let [_, _, height, width] = x.dims();
        if height <= size[0] && width <= size[1] {
            return x;
        }
        let pooled = pool.forward(x);
        let [_, _, new_height, new_width] = pooled.dims();
        // a non-reducing pool would never terminate
        if new_height >= height && new_width >= width {
            return pooled;
        }
        x = pooled;
    }
}
