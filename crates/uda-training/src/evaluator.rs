//! Held-out evaluation of the classifier.
//!
//! The evaluator runs the encoder and classifier in inference mode over a
//! labeled store, in store order and in fixed-size batches, and accumulates
//! a confusion matrix. Callers pass the inference view of the model
//! (`AutodiffModule::valid`) so batch norm uses running statistics and
//! dropout is disabled.

use burn::tensor::backend::Backend;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};
use uda_core::{Error, EvaluationMetrics, Result};
use uda_dataset::{SampleStore, WindowBatcher};

use crate::model::UdaModel;

/// Batched classifier evaluation
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    batch_size: usize,
}

impl Evaluator {
    /// Create an evaluator processing `batch_size` windows at a time
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Evaluates `model` on every window of `store`.
    ///
    /// Fails with [`Error::Evaluation`] when the store is empty, unlabeled,
    /// or has a different class count than the model.
    pub fn evaluate<B: Backend>(
        &self,
        model: &UdaModel<B>,
        store: &SampleStore,
        device: &B::Device,
    ) -> Result<EvaluationMetrics> {
        if store.is_empty() {
            return Err(Error::Evaluation("evaluation store is empty".to_string()));
        }
        if !store.is_fully_labeled() {
            return Err(Error::Evaluation(
                "evaluation store contains unlabeled windows".to_string(),
            ));
        }
        if store.num_classes() != model.num_classes() {
            return Err(Error::Evaluation(format!(
                "store has {} classes but the classifier predicts {}",
                store.num_classes(),
                model.num_classes()
            )));
        }

        let batcher = WindowBatcher::<B>::new();
        let mut metrics = EvaluationMetrics::new(model.num_classes());
        let indices: Vec<usize> = (0..store.len()).collect();
        let start = Instant::now();

        for chunk in indices.chunks(self.batch_size) {
            let batch = batcher.batch_indices(store, chunk, device);
            let predictions = model
                .forward(batch.signals)
                .logits
                .argmax(1)
                .into_data()
                .convert::<i64>()
                .to_vec::<i64>()
                .map_err(|e| Error::Evaluation(format!("failed to read predictions: {e:?}")))?;

            for (&index, predicted) in chunk.iter().zip(predictions) {
                if let Some(actual) = store.window(index).and_then(|w| w.label) {
                    metrics.update_confusion_matrix(actual, predicted as usize);
                }
            }
        }

        metrics.compute_from_confusion_matrix();
        debug!(
            samples = metrics.num_samples,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Evaluation pass finished"
        );
        info!(
            "Evaluation: accuracy={:.4}, balanced={:.4}, macro_f1={:.4}",
            metrics.accuracy,
            metrics.balanced_accuracy(),
            metrics.macro_f1()
        );
        Ok(metrics)
    }

    /// Human-readable per-class report
    pub fn format_report(metrics: &EvaluationMetrics) -> String {
        let mut report = format!(
            "{:<8} {:>10} {:>10} {:>10} {:>10}\n",
            "Class", "Accuracy", "Precision", "Recall", "F1"
        );
        report.push_str(&"-".repeat(52));
        report.push('\n');
        for class_id in 0..metrics.num_classes() {
            let accuracy = metrics.per_class_accuracy[class_id]
                .map_or_else(|| "n/a".to_string(), |a| format!("{a:.4}"));
            report.push_str(&format!(
                "{:<8} {:>10} {:>10.4} {:>10.4} {:>10.4}\n",
                class_id,
                accuracy,
                metrics.per_class_precision[class_id],
                metrics.per_class_recall[class_id],
                metrics.per_class_f1[class_id]
            ));
        }
        report.push_str(&format!(
            "accuracy {:.4} | balanced {:.4} | macro F1 {:.4} | {} samples",
            metrics.accuracy,
            metrics.balanced_accuracy(),
            metrics.macro_f1(),
            metrics.num_samples
        ));
        report
    }

    /// Writes the confusion matrix as CSV, rows are true classes
    pub fn export_confusion_matrix(metrics: &EvaluationMetrics, output_path: &Path) -> Result<()> {
        use std::fs::File;
        use std::io::Write;

        let mut file = File::create(output_path)?;
        write!(file, "True\\Predicted")?;
        for i in 0..metrics.num_classes() {
            write!(file, ",{i}")?;
        }
        writeln!(file)?;

        for (i, row) in metrics.confusion_matrix.iter().enumerate() {
            write!(file, "{i}")?;
            for val in row {
                write!(file, ",{val}")?;
            }
            writeln!(file)?;
        }

        info!("Confusion matrix exported to {:?}", output_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use uda_core::{DomainKind, ModelConfig};
    use uda_dataset::SignalWindow;

    type TestBackend = NdArray;

    fn small_model(num_classes: usize) -> UdaModel<TestBackend> {
        let config = ModelConfig {
            num_classes,
            channels: vec![4, 8],
            feature_dim: 8,
            first_kernel: 5,
            ..ModelConfig::default()
        };
        UdaModel::new(&config, &Default::default())
    }

    fn store(windows: usize, labeled: bool) -> SampleStore {
        let windows = (0..windows)
            .map(|i| {
                let values = (0..64).map(|t| ((t + i) as f32 * 0.1).sin()).collect();
                if labeled {
                    SignalWindow::labeled(values, i % 3, DomainKind::Target)
                } else {
                    SignalWindow::unlabeled(values, DomainKind::Target)
                }
            })
            .collect();
        SampleStore::from_windows(DomainKind::Target, 3, windows).unwrap()
    }

    #[test]
    fn test_counts_every_window() {
        let device = Default::default();
        let metrics = Evaluator::new(4)
            .evaluate(&small_model(3), &store(10, true), &device)
            .unwrap();
        assert_eq!(metrics.num_samples, 10);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
        let row_sums: Vec<usize> = metrics.confusion_matrix.iter().map(|r| r.iter().sum()).collect();
        assert_eq!(row_sums, vec![4, 3, 3]);
    }

    #[test]
    fn test_rejects_unusable_stores() {
        let device = Default::default();
        let evaluator = Evaluator::new(4);
        let model = small_model(3);

        let empty = SampleStore::new(DomainKind::Target, 3);
        assert!(matches!(
            evaluator.evaluate(&model, &empty, &device),
            Err(Error::Evaluation(_))
        ));
        assert!(matches!(
            evaluator.evaluate(&model, &store(5, false), &device),
            Err(Error::Evaluation(_))
        ));
        assert!(matches!(
            evaluator.evaluate(&small_model(2), &store(5, true), &device),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn test_report_and_export() {
        let mut metrics = EvaluationMetrics::new(2);
        metrics.update_confusion_matrix(0, 0);
        metrics.update_confusion_matrix(1, 0);
        metrics.compute_from_confusion_matrix();

        let report = Evaluator::format_report(&metrics);
        assert!(report.contains("accuracy 0.5000"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confusion.csv");
        Evaluator::export_confusion_matrix(&metrics, &path).unwrap();
        let csv = std::fs::read_to_string(path).unwrap();
        assert_eq!(csv, "True\\Predicted,0,1\n0,1,0\n1,1,0\n");
    }
}
