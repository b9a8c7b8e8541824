//! Inputs consumed by the training metrics.

use burn::{prelude::*, tensor::Int};

/// Raw logits and their class-map targets.
#[derive(Debug, Clone)]
pub struct MeanIoUInput<B: Backend> {
    /// `[batch, classes, height, width]`
    pub logits: Tensor<B, 4>,
    /// `[batch, height', width']`
    pub targets: Tensor<B, 3, Int>,
}

impl<B: Backend> MeanIoUInput<B> {
    pub const fn new(logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Self {
        Self { logits, targets }
    }
}
