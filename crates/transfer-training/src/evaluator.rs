//! Test-set evaluation.

use burn::tensor::{backend::AutodiffBackend, ElementConversion};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use transfer_core::{Error, Result};
use transfer_dataset::BatchLoader;

use crate::model::TransferModel;

/// Top-1 results of an evaluation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Correct predictions per class index
    pub per_class_correct: Vec<usize>,
    /// Examples per class index
    pub per_class_total: Vec<usize>,
}

impl EvaluationReport {
    pub fn new(per_class_correct: Vec<usize>, per_class_total: Vec<usize>) -> Self {
        Self {
            per_class_correct,
            per_class_total,
        }
    }

    pub fn correct(&self) -> usize {
        self.per_class_correct.iter().sum()
    }

    pub fn total(&self) -> usize {
        self.per_class_total.iter().sum()
    }

    /// Fraction of correct predictions
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f64 / total as f64,
        }
    }

    /// Accuracy as a whole percentage, rounded down
    pub fn percent(&self) -> usize {
        match self.total() {
            0 => 0,
            total => 100 * self.correct() / total,
        }
    }

    /// Accuracy of each class, `None` when a class had no examples
    pub fn per_class_accuracy(&self) -> Vec<Option<f64>> {
        self.per_class_correct
            .iter()
            .zip(&self.per_class_total)
            .map(|(&correct, &total)| (total > 0).then(|| correct as f64 / total as f64))
            .collect()
    }
}

/// Run one inference-only pass over `loader`.
///
/// Uses the model's gradient-free view in evaluation mode and leaves the
/// model untouched.
pub fn evaluate<B: AutodiffBackend>(
    model: &TransferModel<B>,
    loader: &mut BatchLoader<B::InnerBackend>,
) -> Result<EvaluationReport> {
    if loader.is_empty() {
        return Err(Error::Data(format!(
            "Test split {} has no images",
            loader.dataset().root().display()
        )));
    }

    let num_classes = model.head().num_classes();
    let mut per_class_correct = vec![0usize; num_classes];
    let mut per_class_total = vec![0usize; num_classes];
    let inference = model.inference();

    for batch in loader.iter() {
        let batch = batch?;
        let n = batch.len();
        let predictions = inference.forward(batch.images).argmax(1).reshape([n]);

        let predicted: Vec<i64> = predictions
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| Error::Model(format!("failed to read predictions: {e:?}")))?;
        let targets: Vec<i64> = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| Error::Model(format!("failed to read targets: {e:?}")))?;

        for (&target, &prediction) in targets.iter().zip(&predicted) {
            let class = target as usize;
            if class >= num_classes {
                return Err(Error::Data(format!(
                    "label {class} outside the {num_classes} classes the model was trained on"
                )));
            }
            per_class_total[class] += 1;
            if prediction == target {
                per_class_correct[class] += 1;
            }
        }
    }

    let report = EvaluationReport::new(per_class_correct, per_class_total);
    info!(
        "Test accuracy: {}/{} = {:.4}",
        report.correct(),
        report.total(),
        report.accuracy()
    );
    for (class, accuracy) in report.per_class_accuracy().iter().enumerate() {
        if let Some(accuracy) = accuracy {
            debug!("  class {class}: {:.4}", accuracy);
        }
    }

    Ok(report)
}

/// Number of matching entries between predictions and targets.
pub(crate) fn count_correct<B: burn::tensor::backend::Backend>(
    log_probs: burn::tensor::Tensor<B, 2>,
    targets: burn::tensor::Tensor<B, 1, burn::tensor::Int>,
) -> usize {
    let n = targets.dims()[0];
    let correct: i64 = log_probs
        .argmax(1)
        .reshape([n])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}
