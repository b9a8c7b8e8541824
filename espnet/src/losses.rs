//! Pixel-wise cross-entropy for semantic segmentation.
//!
//! Equivalent to `nn.CrossEntropyLoss(ignore_index=255)` over `[N, C, H, W]`
//! logits and `[N, H, W]` class maps, averaged over the labelled pixels.

use burn::{
    module::Ignored,
    prelude::*,
    tensor::{activation::log_softmax, backend::Backend, Int, Tensor},
};
use burn_extra_ops::resize_bilinear;

/// Configuration for [`SegmentationLoss`].
#[derive(Config, Debug)]
pub struct SegmentationLossConfig {
    /// Label value that contributes neither loss nor gradient.
    #[config(default = "Some(255)")]
    pub ignore_index: Option<usize>,
}

impl SegmentationLossConfig {
    pub fn init<B: Backend>(&self) -> SegmentationLoss<B> {
        SegmentationLoss {
            ignore_index: Ignored(self.ignore_index),
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Cross-entropy with an ignore label.
#[derive(Module, Debug)]
pub struct SegmentationLoss<B: Backend> {
    ignore_index: Ignored<Option<usize>>,
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> SegmentationLoss<B> {
    /// Mean negative log-likelihood of the target class over labelled pixels.
    ///
    /// Logits are bilinearly resized to the label resolution when the two
    /// differ. Labels outside `[0, C)` are treated like the ignore index.
    /// Returns zero when no pixel is labelled.
    ///
    /// # Shapes
    /// - logits: `[batch, classes, height, width]`
    /// - targets: `[batch, height', width']`
    /// - output: `[1]`
    pub fn forward(&self, logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let [_, num_classes, _, _] = logits.dims();
        let [_, height, width] = targets.dims();

        let log_probs = log_softmax(resize_bilinear(logits, [height, width]), 1);

        let mut valid = targets.clone().lower_elem(num_classes as i64).int()
            * targets.clone().greater_equal_elem(0).int();
        if let Some(ignore) = *self.ignore_index {
            valid = valid * targets.clone().not_equal_elem(ignore as i64).int();
        }
        let valid = valid.equal_elem(1);

        let safe_targets = targets.mask_fill(valid.clone().bool_not(), 0);
        let picked: Tensor<B, 3> = log_probs
            .gather(1, safe_targets.unsqueeze_dim(1))
            .squeeze(1);

        let weights = valid.float();
        let count = weights.clone().sum().clamp_min(1.0);
        -(picked * weights).sum() / count
    }

    /// Configured ignore label.
    pub fn ignore_index(&self) -> Option<usize> {
        *self.ignore_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{ndarray::NdArray, Autodiff},
        tensor::{Distribution, TensorData},
    };

    type TestBackend = NdArray<f32>;

    fn labels(values: Vec<i64>, shape: [usize; 3]) -> Tensor<TestBackend, 3, Int> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_uniform_logits_give_log_num_classes() {
        let device = Default::default();
        let loss = SegmentationLossConfig::new().init::<TestBackend>();
        let logits = Tensor::<TestBackend, 4>::zeros([2, 4, 3, 3], &device);
        let targets = labels(vec![1; 18], [2, 3, 3]);

        let value: f32 = loss.forward(logits, targets).into_scalar();
        assert!((value - 4.0_f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_confident_correct_logits_give_small_loss() {
        let device = Default::default();
        let loss = SegmentationLossConfig::new().init::<TestBackend>();
        // class 0 scores 20, class 1 scores 0
        let logits = Tensor::<TestBackend, 4>::cat(
            vec![
                Tensor::full([1, 1, 2, 2], 20.0, &device),
                Tensor::zeros([1, 1, 2, 2], &device),
            ],
            1,
        );
        let targets = labels(vec![0; 4], [1, 2, 2]);

        let value: f32 = loss.forward(logits, targets).into_scalar();
        assert!(value < 1e-6);
    }

    #[test]
    fn test_ignored_pixels_do_not_count() {
        let device = Default::default();
        let loss = SegmentationLossConfig::new().init::<TestBackend>();
        let logits = Tensor::<TestBackend, 4>::cat(
            vec![
                Tensor::full([1, 1, 1, 2], 20.0, &device),
                Tensor::zeros([1, 1, 1, 2], &device),
            ],
            1,
        );
        // the wrong label is ignored, so only the correct pixel is averaged
        let targets = labels(vec![0, 255], [1, 1, 2]);
        let value: f32 = loss.forward(logits.clone(), targets).into_scalar();
        assert!(value < 1e-6);

        let all_ignored = labels(vec![255, 255], [1, 1, 2]);
        let value: f32 = loss.forward(logits, all_ignored).into_scalar();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_logits_resized_to_label_size() {
        let device = Default::default();
        let loss = SegmentationLossConfig::new()
            .with_ignore_index(None)
            .init::<TestBackend>();
        assert_eq!(loss.ignore_index(), None);

        let logits = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let targets = labels(vec![2; 64], [1, 8, 8]);
        let value: f32 = loss.forward(logits, targets).into_scalar();
        assert!((value - 3.0_f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_gradients_reach_logits() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let loss = SegmentationLossConfig::new().init::<AutodiffBackend>();

        let logits =
            Tensor::<AutodiffBackend, 4>::random([1, 5, 4, 4], Distribution::Default, &device)
                .require_grad();
        let targets = Tensor::<AutodiffBackend, 3, Int>::from_data(
            TensorData::new(vec![3i64; 16], [1, 4, 4]),
            &device,
        );

        let grads = loss.forward(logits.clone(), targets).backward();
        assert!(logits.grad(&grads).is_some());
    }
}
