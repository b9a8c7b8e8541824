//! Running mean IoU for the training dashboard.

use burn::{
    prelude::*,
    train::metric::{Metric, MetricEntry, MetricMetadata, Numeric},
};
use burn_extra_ops::resize_bilinear;
use std::marker::PhantomData;

use super::{confusion::ConfusionMatrix, input::MeanIoUInput};

#[derive(Config, Debug)]
pub struct MeanIoUMetricConfig {
    pub num_classes: usize,
    #[config(default = "Some(255)")]
    pub ignore_index: Option<usize>,
}

impl MeanIoUMetricConfig {
    pub fn init<B: Backend>(&self) -> MeanIoUMetric<B> {
        MeanIoUMetric {
            matrix: ConfusionMatrix::new(self.num_classes, self.ignore_index),
            _b: PhantomData,
        }
    }
}

/// Mean IoU accumulated over every batch since the last `clear`.
#[derive(Debug, Clone)]
pub struct MeanIoUMetric<B: Backend> {
    matrix: ConfusionMatrix,
    _b: PhantomData<B>,
}

impl<B: Backend> MeanIoUMetric<B> {
    pub fn new(num_classes: usize) -> Self {
        MeanIoUMetricConfig::new(num_classes).init()
    }

    /// Accumulated confusion matrix.
    pub const fn matrix(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    fn update_stats(&mut self, logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) {
        let [_, height, width] = targets.dims();
        let predictions = resize_bilinear(logits, [height, width])
            .argmax(1)
            .squeeze::<3>(1);
        self.matrix.update(predictions, targets);
    }
}

impl<B: Backend> Metric for MeanIoUMetric<B> {
    type Input = MeanIoUInput<B>;

    fn name(&self) -> String {
        "mIoU".to_string()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        self.update_stats(item.logits.clone(), item.targets.clone());
        let value = self.matrix.mean_iou();
        MetricEntry::new(self.name(), format!("{value:.5}"), format!("{value:.5}"))
    }

    fn clear(&mut self) {
        self.matrix.reset();
    }
}

impl<B: Backend> Numeric for MeanIoUMetric<B> {
    fn value(&self) -> f64 {
        self.matrix.mean_iou()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_miou_from_logits() {
        let device = Default::default();
        let mut metric = MeanIoUMetric::<TestBackend>::new(2);

        // class 1 wins on the left column, class 0 on the right
        let logits = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0], [1, 2, 2, 2]),
            &device,
        );
        let targets = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::new(vec![1i64, 0, 1, 0], [1, 2, 2]),
            &device,
        );

        metric.update_stats(logits, targets);
        assert_eq!(metric.value(), 1.0);

        metric.clear();
        assert_eq!(metric.matrix().total(), 0);
    }
}
