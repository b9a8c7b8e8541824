//! Learner integration for the segmentation model.
//!
//! [`SegmentationOutput`] is what `TrainStep`/`ValidStep` return; it adapts
//! into burn's `LossInput` and into [`MeanIoUInput`].

use crate::metrics::MeanIoUInput;
use burn::{
    prelude::*,
    tensor::{backend::Backend, Int, Transaction},
    train::metric::{Adaptor, ItemLazy, LossInput},
};

/// Output of one training or validation step.
#[derive(Debug, Clone)]
pub struct SegmentationOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    /// `[batch, classes, height, width]`
    pub logits: Tensor<B, 4>,
    /// `[batch, height', width']`
    pub targets: Tensor<B, 3, Int>,
}

impl<B: Backend> ItemLazy for SegmentationOutput<B> {
    type ItemSync = Self;

    fn sync(self) -> Self::ItemSync {
        let transaction_result = Transaction::default()
            .register(self.loss)
            .register(self.logits)
            .register(self.targets)
            .execute();

        let [loss, logits, targets] = transaction_result.try_into().unwrap_or_else(|_| {
            panic!(
                "Failed to extract exactly 3 tensors from transaction. \
                     Expected: [loss, logits, targets]."
            )
        });

        let device = &Default::default();

        Self {
            loss: Tensor::from_data(loss, device),
            logits: Tensor::from_data(logits, device),
            targets: Tensor::from_data(targets, device),
        }
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for SegmentationOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

impl<B: Backend> Adaptor<MeanIoUInput<B>> for SegmentationOutput<B> {
    fn adapt(&self) -> MeanIoUInput<B> {
        MeanIoUInput::new(self.logits.clone(), self.targets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_sync_preserves_values() {
        let device = Default::default();
        let output = SegmentationOutput::<TestBackend> {
            loss: Tensor::from_floats([0.25], &device),
            logits: Tensor::ones([1, 3, 2, 2], &device),
            targets: Tensor::from_data(TensorData::new(vec![0i64, 1, 2, 255], [1, 2, 2]), &device),
        };

        let synced = output.sync();
        let loss: f32 = synced.loss.clone().into_scalar();
        assert_eq!(loss, 0.25);
        assert_eq!(synced.logits.dims(), [1, 3, 2, 2]);

        let miou: MeanIoUInput<TestBackend> = synced.adapt();
        assert_eq!(miou.targets.dims(), [1, 2, 2]);
        let _loss: LossInput<TestBackend> = synced.adapt();
    }
}
