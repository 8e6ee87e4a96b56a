//! Evaluation metrics, training history and metric sinks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::Result;

/// Classification metrics over a labeled evaluation set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Overall accuracy
    pub accuracy: f64,
    /// Per-class accuracy (recall), `None` when the class has no samples
    pub per_class_accuracy: Vec<Option<f64>>,
    /// Per-class precision
    pub per_class_precision: Vec<f64>,
    /// Per-class recall
    pub per_class_recall: Vec<f64>,
    /// Per-class F1 score
    pub per_class_f1: Vec<f64>,
    /// Confusion matrix (actual x predicted)
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Total number of samples evaluated
    pub num_samples: usize,
}

impl EvaluationMetrics {
    /// Creates an empty metrics instance
    pub fn new(num_classes: usize) -> Self {
        Self {
            accuracy: 0.0,
            per_class_accuracy: vec![None; num_classes],
            per_class_precision: vec![0.0; num_classes],
            per_class_recall: vec![0.0; num_classes],
            per_class_f1: vec![0.0; num_classes],
            confusion_matrix: vec![vec![0; num_classes]; num_classes],
            num_samples: 0,
        }
    }

    /// Number of classes tracked
    pub fn num_classes(&self) -> usize {
        self.confusion_matrix.len()
    }

    /// Updates confusion matrix with a prediction
    pub fn update_confusion_matrix(&mut self, actual: usize, predicted: usize) {
        let n = self.num_classes();
        if actual < n && predicted < n {
            self.confusion_matrix[actual][predicted] += 1;
        }
    }

    /// Computes every derived metric from the confusion matrix
    pub fn compute_from_confusion_matrix(&mut self) {
        let num_classes = self.num_classes();
        self.num_samples = self.confusion_matrix.iter().flatten().sum();

        if self.num_samples == 0 {
            return;
        }

        let correct: usize = (0..num_classes).map(|i| self.confusion_matrix[i][i]).sum();
        self.accuracy = correct as f64 / self.num_samples as f64;

        for class_id in 0..num_classes {
            let true_positives = self.confusion_matrix[class_id][class_id] as f64;
            let actual_total: usize = self.confusion_matrix[class_id].iter().sum();
            let predicted_total: usize = (0..num_classes)
                .map(|i| self.confusion_matrix[i][class_id])
                .sum();

            self.per_class_accuracy[class_id] = if actual_total > 0 {
                Some(true_positives / actual_total as f64)
            } else {
                None
            };

            let precision = if predicted_total > 0 {
                true_positives / predicted_total as f64
            } else {
                0.0
            };
            let recall = self.per_class_accuracy[class_id].unwrap_or(0.0);
            let f1 = if precision + recall > 0.0 {
                2.0 * (precision * recall) / (precision + recall)
            } else {
                0.0
            };

            self.per_class_precision[class_id] = precision;
            self.per_class_recall[class_id] = recall;
            self.per_class_f1[class_id] = f1;
        }
    }

    /// Macro-averaged F1 over classes present in the evaluation set
    pub fn macro_f1(&self) -> f64 {
        let present: Vec<f64> = self
            .per_class_accuracy
            .iter()
            .zip(&self.per_class_f1)
            .filter(|(acc, _)| acc.is_some())
            .map(|(_, f1)| *f1)
            .collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().sum::<f64>() / present.len() as f64
    }

    /// Mean of per-class accuracies, robust to class imbalance
    pub fn balanced_accuracy(&self) -> f64 {
        let present: Vec<f64> = self.per_class_accuracy.iter().flatten().copied().collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().sum::<f64>() / present.len() as f64
    }
}

/// What a metric record describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// One optimizer step
    Iteration,
    /// Averages over one training epoch
    Epoch,
    /// Held-out target evaluation
    Evaluation,
}

/// A single metrics event emitted by the training loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    /// Record kind
    pub kind: MetricKind,
    /// Epoch (1-based)
    pub epoch: usize,
    /// Global iteration counter
    pub iteration: usize,
    /// Named loss values
    pub losses: BTreeMap<String, f64>,
    /// Accuracy, when the record carries one
    pub accuracy: Option<f64>,
}

impl MetricRecord {
    /// Creates a record without losses
    pub fn new(kind: MetricKind, epoch: usize, iteration: usize) -> Self {
        Self {
            kind,
            epoch,
            iteration,
            losses: BTreeMap::new(),
            accuracy: None,
        }
    }

    /// Adds a named loss value
    pub fn with_loss(mut self, name: impl Into<String>, value: f64) -> Self {
        self.losses.insert(name.into(), value);
        self
    }

    /// Sets the accuracy
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Receives metric records from the training loop
pub trait MetricsSink {
    /// Records one event. Failures are reported but never stop training.
    fn record(&mut self, record: &MetricRecord) -> Result<()>;

    /// Flushes buffered output
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs records through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&mut self, record: &MetricRecord) -> Result<()> {
        let losses = record
            .losses
            .iter()
            .map(|(name, value)| format!("{name}={value:.4}"))
            .collect::<Vec<_>>()
            .join(" ");
        match record.kind {
            MetricKind::Iteration => debug!(
                epoch = record.epoch,
                iteration = record.iteration,
                "{losses}"
            ),
            MetricKind::Epoch | MetricKind::Evaluation => {
                let accuracy = record
                    .accuracy
                    .map(|a| format!("{a:.4}"))
                    .unwrap_or_else(|| "-".to_string());
                info!(
                    kind = ?record.kind,
                    epoch = record.epoch,
                    accuracy = %accuracy,
                    "{losses}"
                )
            }
        }
        Ok(())
    }
}

/// Keeps every record in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    /// Records in arrival order
    pub records: Vec<MetricRecord>,
}

impl MemorySink {
    /// Records of a given kind
    pub fn of_kind(&self, kind: MetricKind) -> impl Iterator<Item = &MetricRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, record: &MetricRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per record to a file
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Opens (or creates) the file in append mode
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonLinesSink {
    fn record(&mut self, record: &MetricRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Fans records out to several sinks
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl CompositeSink {
    /// Creates an empty composite
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink
    pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl MetricsSink for CompositeSink {
    fn record(&mut self, record: &MetricRecord) -> Result<()> {
        for sink in &mut self.sinks {
            sink.record(record)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Summary of one training epoch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochSummary {
    /// Epoch (1-based)
    pub epoch: usize,
    /// Mean source classification loss
    pub classification_loss: f64,
    /// Mean alignment loss
    pub alignment_loss: f64,
    /// Source training accuracy
    pub source_accuracy: f64,
    /// Discriminator accuracy for adversarial aligners
    pub discriminator_accuracy: Option<f64>,
    /// Held-out target accuracy, `None` when evaluation was skipped
    pub target_accuracy: Option<f64>,
    /// Learning rate used during the epoch
    pub learning_rate: f64,
}

/// Per-epoch history of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Epoch summaries in order
    pub epochs: Vec<EpochSummary>,
}

impl TrainingHistory {
    /// Creates an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an epoch summary
    pub fn push(&mut self, summary: EpochSummary) {
        self.epochs.push(summary);
    }

    /// Best target accuracy and its epoch; later epochs win ties
    pub fn best(&self) -> Option<(usize, f64)> {
        self.epochs
            .iter()
            .filter_map(|e| e.target_accuracy.map(|acc| (e.epoch, acc)))
            .fold(None, |best, (epoch, acc)| match best {
                Some((_, best_acc)) if acc < best_acc => best,
                _ => Some((epoch, acc)),
            })
    }

    /// Most recent target accuracy
    pub fn last_accuracy(&self) -> Option<f64> {
        self.epochs.iter().rev().find_map(|e| e.target_accuracy)
    }

    /// Writes the history as CSV
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            "epoch,classification_loss,alignment_loss,source_accuracy,discriminator_accuracy,target_accuracy,learning_rate"
        )?;
        for e in &self.epochs {
            writeln!(
                writer,
                "{},{:.6},{:.6},{:.6},{},{},{:.8}",
                e.epoch,
                e.classification_loss,
                e.alignment_loss,
                e.source_accuracy,
                e.discriminator_accuracy
                    .map(|v| format!("{v:.6}"))
                    .unwrap_or_default(),
                e.target_accuracy
                    .map(|v| format!("{v:.6}"))
                    .unwrap_or_default(),
                e.learning_rate
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary(epoch: usize, target_accuracy: Option<f64>) -> EpochSummary {
        EpochSummary {
            epoch,
            classification_loss: 0.5,
            alignment_loss: 0.7,
            source_accuracy: 0.9,
            discriminator_accuracy: Some(0.5),
            target_accuracy,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_evaluation_metrics_creation() {
        let metrics = EvaluationMetrics::new(4);
        assert_eq!(metrics.num_classes(), 4);
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.num_samples, 0);
    }

    #[test]
    fn test_compute_from_confusion_matrix() {
        let mut metrics = EvaluationMetrics::new(2);
        metrics.confusion_matrix = vec![vec![2, 0], vec![1, 2]];
        metrics.compute_from_confusion_matrix();

        assert_eq!(metrics.num_samples, 5);
        assert!((metrics.accuracy - 0.8).abs() < 1e-12);
        assert_eq!(metrics.per_class_accuracy[0], Some(1.0));
        assert!((metrics.per_class_accuracy[1].unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.per_class_precision[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.balanced_accuracy() - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_absent_class_excluded_from_macro() {
        let mut metrics = EvaluationMetrics::new(3);
        metrics.update_confusion_matrix(0, 0);
        metrics.update_confusion_matrix(1, 1);
        metrics.update_confusion_matrix(7, 1);
        metrics.compute_from_confusion_matrix();

        assert_eq!(metrics.num_samples, 2);
        assert_eq!(metrics.per_class_accuracy[2], None);
        assert!((metrics.macro_f1() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_history_best_prefers_later_ties() {
        let mut history = TrainingHistory::new();
        history.push(summary(1, Some(0.6)));
        history.push(summary(2, Some(0.8)));
        history.push(summary(3, None));
        history.push(summary(4, Some(0.8)));

        assert_eq!(history.best(), Some((4, 0.8)));
        assert_eq!(history.last_accuracy(), Some(0.8));
    }

    #[test]
    fn test_memory_sink_filters_by_kind() {
        let mut sink = MemorySink::default();
        sink.record(&MetricRecord::new(MetricKind::Iteration, 1, 1).with_loss("total", 1.0))
            .unwrap();
        sink.record(&MetricRecord::new(MetricKind::Evaluation, 1, 1).with_accuracy(0.5))
            .unwrap();

        assert_eq!(sink.of_kind(MetricKind::Iteration).count(), 1);
        assert_eq!(
            sink.of_kind(MetricKind::Evaluation).next().unwrap().accuracy,
            Some(0.5)
        );
    }

    #[test]
    fn test_json_lines_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        {
            let mut sink = JsonLinesSink::open(&path).unwrap();
            sink.record(&MetricRecord::new(MetricKind::Epoch, 1, 10).with_loss("cls", 0.25))
                .unwrap();
            sink.record(&MetricRecord::new(MetricKind::Epoch, 2, 20).with_loss("cls", 0.125))
                .unwrap();
            sink.flush().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<MetricRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].losses["cls"], 0.125);
    }

    #[test]
    fn test_history_csv_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.csv");
        let mut history = TrainingHistory::new();
        history.push(summary(1, Some(0.75)));
        history.push(summary(2, None));
        history.export_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].ends_with(",,0.00100000"));
    }
}
