//! Confusion-matrix based segmentation scores.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Int},
};

/// Accumulated `target x prediction` pixel counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    ignore_index: Option<usize>,
    /// Row-major, row = target class, column = predicted class.
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize, ignore_index: Option<usize>) -> Self {
        Self {
            num_classes,
            ignore_index,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Adds one pair of class maps. Pixels whose target is the ignore index
    /// or out of range are skipped; so are out-of-range predictions.
    pub fn update_from_iter(
        &mut self,
        predictions: impl IntoIterator<Item = i64>,
        targets: impl IntoIterator<Item = i64>,
    ) {
        for (pred, target) in predictions.into_iter().zip(targets) {
            let (Ok(pred), Ok(target)) = (usize::try_from(pred), usize::try_from(target)) else {
                continue;
            };
            if Some(target) == self.ignore_index
                || target >= self.num_classes
                || pred >= self.num_classes
            {
                continue;
            }
            self.counts[target * self.num_classes + pred] += 1;
        }
    }

    /// Adds a batch of `[N, H, W]` class maps.
    pub fn update<B: Backend>(&mut self, predictions: Tensor<B, 3, Int>, targets: Tensor<B, 3, Int>) {
        let predictions = predictions.into_data();
        let targets = targets.into_data();
        self.update_from_iter(predictions.iter::<i64>(), targets.iter::<i64>());
    }

    /// Folds another matrix of the same shape into this one.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.num_classes, other.num_classes);
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    fn count(&self, target: usize, pred: usize) -> u64 {
        self.counts[target * self.num_classes + pred]
    }

    /// Labelled pixels seen so far.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// IoU of every class; `None` for classes absent from both targets and predictions.
    pub fn iou_per_class(&self) -> Vec<Option<f64>> {
        (0..self.num_classes)
            .map(|class| {
                let tp = self.count(class, class);
                let target_total: u64 = (0..self.num_classes).map(|p| self.count(class, p)).sum();
                let pred_total: u64 = (0..self.num_classes).map(|t| self.count(t, class)).sum();
                let union = target_total + pred_total - tp;
                (union > 0).then(|| tp as f64 / union as f64)
            })
            .collect()
    }

    /// Mean IoU over the classes that occurred.
    pub fn mean_iou(&self) -> f64 {
        let present: Vec<f64> = self.iou_per_class().into_iter().flatten().collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().sum::<f64>() / present.len() as f64
    }

    /// Fraction of labelled pixels classified correctly.
    pub fn pixel_accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.num_classes).map(|c| self.count(c, c)).sum();
        correct as f64 / total as f64
    }
}
