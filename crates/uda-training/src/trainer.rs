//! Adaptation training loop.
//!
//! [`TrainingOrchestrator`] owns the model, optimizer, sampler and aligner
//! of one run and moves through the phases
//! `Initializing -> EpochRunning -> Evaluating -> Checkpointing -> ...`
//! until it reaches `Completed` (epoch budget, early stopping or a stop
//! request) or `Failed` (a fatal error such as a diverging loss).
//!
//! Every iteration draws a paired source/target batch, runs one forward
//! pass over both, and minimizes
//! `cross_entropy(source) + adaptation_weight * alignment_loss` with a
//! single backward pass and optimizer step. Adversarial aligners reverse
//! the discriminator gradient inside the same graph.

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, GradientsParams,
        Optimizer, SgdConfig,
    },
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uda_core::{
    DivergedQuantity, DomainKind, Error, EpochSummary, MetricKind, MetricRecord, MetricsSink, OptimizerKind,
    Result, TrainingHistory, UdaConfig,
};
use uda_dataset::{
    apply_imbalance, check_class_sizes, load_source_store, stratified_split, BatchPairSampler,
    DatasetLoader,
    IndexBatchPair, SampleStore, WindowBatcher,
};

use crate::aligner::{AlignmentInputs, DomainAligner};
use crate::checkpoint::{epoch_tag, CheckpointMetadata, CheckpointStore, BEST_TAG, LATEST_TAG};
use crate::evaluator::Evaluator;
use crate::model::UdaModel;
use crate::schedule::{LearningRateScheduler, LossScheduler, LossWeights};
use crate::session::ComputeSession;

/// Phase of the orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Initializing,
    EpochRunning,
    Evaluating,
    Checkpointing,
    Completed,
    Failed,
}

/// Why a run completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionReason {
    /// All configured epochs ran
    EpochBudget,
    /// Target accuracy stopped improving
    EarlyStopping,
    /// A stop was requested through [`StopSignal`]
    Stopped,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::EpochBudget => write!(f, "epoch budget reached"),
            CompletionReason::EarlyStopping => write!(f, "early stopping"),
            CompletionReason::Stopped => write!(f, "stop requested"),
        }
    }
}

/// Terminal state of a run
#[derive(Debug)]
pub enum TerminalState {
    Completed { reason: CompletionReason },
    Failed { error: Error },
}

/// Cooperative cancellation flag, checked between iterations
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the run to stop at the next iteration boundary
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters and bookkeeping of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingContext {
    /// Last epoch started (1-based)
    pub epoch: usize,
    /// Optimizer steps taken
    pub global_iteration: usize,
    /// Planned optimizer steps for the whole run
    pub total_iterations: usize,
    pub best_accuracy: Option<f64>,
    pub best_epoch: Option<usize>,
    /// Epochs since the last improvement
    pub patience_counter: usize,
    pub history: TrainingHistory,
    /// Tag of the newest checkpoint written successfully
    pub last_good_checkpoint: Option<String>,
}

impl TrainingContext {
    /// Records a target accuracy. Returns true when it matches or beats the
    /// best so far; ties move the best epoch forward.
    pub fn observe_accuracy(&mut self, epoch: usize, accuracy: f64) -> bool {
        let improved = self.best_accuracy.map_or(true, |best| accuracy >= best);
        if improved {
            self.best_accuracy = Some(accuracy);
            self.best_epoch = Some(epoch);
            self.patience_counter = 0;
        } else {
            self.patience_counter += 1;
        }
        improved
    }

    pub fn final_accuracy(&self) -> Option<f64> {
        self.history.last_accuracy()
    }
}

/// Result of [`run_training`]
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub terminal: TerminalState,
    pub context: TrainingContext,
    /// Model state at the end of the run
    pub model: UdaModel<B>,
}

impl<B: AutodiffBackend> TrainingOutcome<B> {
    pub fn is_completed(&self) -> bool {
        matches!(self.terminal, TerminalState::Completed { .. })
    }

    /// Process exit code for the training binary
    pub fn exit_code(&self) -> i32 {
        if self.is_completed() {
            0
        } else {
            1
        }
    }
}

/// Source and target stores of one run
#[derive(Debug, Clone)]
pub struct TrainingData {
    /// Labeled source windows
    pub source: SampleStore,
    /// Target windows used for alignment; labels are stripped before batching
    pub target_train: SampleStore,
    /// Labeled held-out target windows, evaluated after every epoch
    pub target_eval: Option<SampleStore>,
}

impl TrainingData {
    /// Loads source and target conditions, splits the target into a
    /// training and a held-out part and applies the imbalance ratio to the
    /// training part
    pub fn prepare(config: &UdaConfig, loader: &dyn DatasetLoader) -> Result<Self> {
        let source = load_source_store(loader, &config.data.source, config.training.train_mode)?;
        let target = loader.load(&config.data.target, DomainKind::Target)?;
        info!(
            "Loaded {} source windows {:?} and {} target windows {:?}",
            source.len(),
            source.class_counts(),
            target.len(),
            target.class_counts()
        );

        let split = stratified_split(&target, config.data.test_fraction, config.seed)?;
        let target_train = match config.data.imbalance_ratio {
            Some(ratio) => apply_imbalance(&split.train, ratio, config.seed)?,
            None => split.train,
        };

        Ok(Self {
            source,
            target_train,
            target_eval: Some(split.test),
        })
    }
}

/// Per-epoch accumulators
#[derive(Debug, Default)]
struct EpochTotals {
    classification: f64,
    alignment: f64,
    discriminator_accuracy: f64,
    discriminator_batches: usize,
    correct: usize,
    seen: usize,
    iterations: usize,
}

struct IterationStats {
    classification: f64,
    alignment: f64,
    total: f64,
    discriminator_accuracy: Option<f64>,
    correct: usize,
    seen: usize,
}

/// Drives one adaptation run
pub struct TrainingOrchestrator<B, O, S>
where
    B: AutodiffBackend,
    O: Optimizer<UdaModel<B>, B>,
    S: CheckpointStore,
{
    config: UdaConfig,
    session: ComputeSession<B>,
    model: UdaModel<B>,
    optimizer: O,
    aligner: DomainAligner<B>,
    sampler: BatchPairSampler,
    batcher: WindowBatcher<B>,
    evaluator: Evaluator,
    loss_scheduler: LossScheduler,
    lr_scheduler: LearningRateScheduler,
    data: TrainingData,
    store: S,
    sink: Box<dyn MetricsSink>,
    stop: StopSignal,
    context: TrainingContext,
    phase: TrainingPhase,
}

impl<B, O, S> TrainingOrchestrator<B, O, S>
where
    B: AutodiffBackend,
    O: Optimizer<UdaModel<B>, B>,
    S: CheckpointStore,
{
    /// Initializing phase: validates the configuration and builds the
    /// sampler, model and aligner.
    ///
    /// Target training labels are dropped here; only the evaluation store
    /// keeps them.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: UdaConfig,
        data: TrainingData,
        optimizer: O,
        store: S,
        sink: Box<dyn MetricsSink>,
        stop: StopSignal,
        device: B::Device,
        initial_model: Option<UdaModel<B>>,
    ) -> Result<Self> {
        config.validate()?;
        let num_classes = config.model.num_classes;

        if data.source.is_empty() || data.target_train.is_empty() {
            return Err(Error::Dataset(format!(
                "both domains need windows (source {}, target {})",
                data.source.len(),
                data.target_train.len()
            )));
        }
        if !data.source.is_fully_labeled() {
            return Err(Error::Dataset("source windows must be labeled".to_string()));
        }
        let min_len = config.model.min_signal_len();
        for store in [&data.source, &data.target_train]
            .into_iter()
            .chain(data.target_eval.as_ref())
        {
            if store.num_classes() != num_classes {
                return Err(Error::dimension_mismatch(
                    "store class count",
                    num_classes,
                    store.num_classes(),
                ));
            }
            if let Some(len) = store.window_len().filter(|&len| len < min_len) {
                return Err(Error::Configuration(format!(
                    "{} windows have {} samples, the encoder needs at least {}",
                    store.domain(),
                    len,
                    min_len
                )));
            }
        }
        if let (Some(source_len), Some(target_len)) =
            (data.source.window_len(), data.target_train.window_len())
        {
            if source_len != target_len {
                return Err(Error::dimension_mismatch("window length", source_len, target_len));
            }
        }

        let batch_size = config.training.batch_size;
        let sampler = BatchPairSampler::new(
            data.source.len(),
            data.target_train.len(),
            batch_size,
            config.seed,
        )?;
        if config.training.allow_small_classes {
            debug!("Class sizes below batch_size are allowed");
        } else {
            check_class_sizes("source", &data.source.class_counts(), batch_size)?;
            check_class_sizes("target", &data.target_train.class_counts(), batch_size)?;
        }

        let session = ComputeSession::<B>::acquire(device, config.seed, config.model.model_name.to_string());
        let device = session.device().clone();
        let model = initial_model.unwrap_or_else(|| UdaModel::new(&config.model, &device));
        let aligner = DomainAligner::from_config(&config.model, config.seed, &device)?;

        let context = TrainingContext {
            total_iterations: sampler.iterations_per_epoch() * config.training.epoch_count,
            ..TrainingContext::default()
        };
        info!(
            "{}: {} source / {} target windows, {} iterations per epoch, {} epochs",
            config.model.model_name,
            data.source.len(),
            data.target_train.len(),
            sampler.iterations_per_epoch(),
            config.training.epoch_count
        );

        let data = TrainingData {
            target_train: data.target_train.without_labels(),
            ..data
        };

        Ok(Self {
            evaluator: Evaluator::new(config.eval_batch_size()),
            loss_scheduler: LossScheduler::new(
                config.training.tradeoff.clone(),
                config.training.reversal.clone(),
            ),
            lr_scheduler: LearningRateScheduler::new(
                config.training.lr_schedule.clone(),
                config.training.optimizer.learning_rate,
            ),
            config,
            session,
            model,
            optimizer,
            aligner,
            sampler,
            batcher: WindowBatcher::new(),
            data,
            store,
            sink,
            stop,
            context,
            phase: TrainingPhase::Initializing,
        })
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn context(&self) -> &TrainingContext {
        &self.context
    }

    fn transition(&mut self, next: TrainingPhase) {
        debug!("Phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Runs epochs until a terminal state is reached
    pub fn run(mut self) -> TrainingOutcome<B> {
        let terminal = match self.run_epochs() {
            Ok(reason) => {
                self.transition(TrainingPhase::Completed);
                info!(
                    "Training completed ({}): best accuracy {:?} at epoch {:?}",
                    reason, self.context.best_accuracy, self.context.best_epoch
                );
                TerminalState::Completed { reason }
            }
            Err(error) => {
                self.transition(TrainingPhase::Failed);
                error!(
                    "Training failed at epoch {}: {}; last good checkpoint: {}",
                    self.context.epoch,
                    error,
                    self.context
                        .last_good_checkpoint
                        .as_deref()
                        .unwrap_or("none")
                );
                TerminalState::Failed { error }
            }
        };

        if let Err(e) = self.sink.flush() {
            warn!("Failed to flush metrics: {}", e);
        }

        TrainingOutcome {
            terminal,
            context: self.context,
            model: self.model,
        }
    }

    fn run_epochs(&mut self) -> Result<CompletionReason> {
        let epochs = self.config.training.epoch_count;
        for epoch in 1..=epochs {
            self.context.epoch = epoch;
            self.transition(TrainingPhase::EpochRunning);
            let learning_rate = self.lr_scheduler.get_lr();

            let Some(totals) = self.run_epoch(epoch, learning_rate)? else {
                info!("Stop requested during epoch {}", epoch);
                self.transition(TrainingPhase::Checkpointing);
                self.save_checkpoint(LATEST_TAG, None)?;
                return Ok(CompletionReason::Stopped);
            };

            self.transition(TrainingPhase::Evaluating);
            let target_accuracy = self.evaluate_target()?;
            let improved = target_accuracy
                .map(|acc| self.context.observe_accuracy(epoch, acc))
                .unwrap_or(false);

            let summary = epoch_summary(epoch, &totals, target_accuracy, learning_rate);
            info!(
                "Epoch {}/{}: cls_loss={:.4}, align_loss={:.4}, source_acc={:.4}, target_acc={}",
                epoch,
                epochs,
                summary.classification_loss,
                summary.alignment_loss,
                summary.source_accuracy,
                target_accuracy.map_or_else(|| "n/a".to_string(), |a| format!("{a:.4}"))
            );
            self.record_epoch(&summary);
            self.context.history.push(summary);

            self.transition(TrainingPhase::Checkpointing);
            if improved {
                self.save_checkpoint(BEST_TAG, target_accuracy)?;
            }
            let mut latest_saved = false;
            let every = self.config.training.checkpoint_every.max(1);
            if epoch % every == 0 || epoch == epochs {
                let tag = epoch_tag(epoch);
                if self.save_checkpoint(&tag, target_accuracy)? {
                    latest_saved = self.save_checkpoint(LATEST_TAG, target_accuracy)?;
                }
            }

            self.lr_scheduler.step();

            let early_stop = self
                .config
                .training
                .early_stopping_patience
                .is_some_and(|patience| self.context.patience_counter >= patience);
            let reason = if early_stop {
                info!(
                    "Early stopping after {} epochs without improvement",
                    self.context.patience_counter
                );
                CompletionReason::EarlyStopping
            } else if self.stop.is_stopped() {
                info!("Stop requested after epoch {}", epoch);
                CompletionReason::Stopped
            } else {
                continue;
            };
            if !latest_saved {
                self.save_checkpoint(LATEST_TAG, target_accuracy)?;
            }
            return Ok(reason);
        }
        Ok(CompletionReason::EpochBudget)
    }

    /// Runs one epoch. `None` means a stop was requested part way.
    fn run_epoch(&mut self, epoch: usize, learning_rate: f64) -> Result<Option<EpochTotals>> {
        let pairs: Vec<IndexBatchPair> = self.sampler.epoch().collect();
        let mut totals = EpochTotals::default();

        for pair in &pairs {
            if self.stop.is_stopped() {
                return Ok(None);
            }
            let weights = self
                .loss_scheduler
                .weights(self.context.global_iteration, self.context.total_iterations);
            let stats = match self.run_iteration(epoch, pair, weights, learning_rate) {
                Ok(stats) => stats,
                Err(e) if !e.is_fatal() => {
                    warn!(
                        "Iteration {} skipped: {}",
                        self.context.global_iteration, e
                    );
                    self.context.global_iteration += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            totals.classification += stats.classification;
            totals.alignment += stats.alignment;
            if let Some(acc) = stats.discriminator_accuracy {
                totals.discriminator_accuracy += acc;
                totals.discriminator_batches += 1;
            }
            totals.correct += stats.correct;
            totals.seen += stats.seen;
            totals.iterations += 1;

            let mut record = MetricRecord::new(MetricKind::Iteration, epoch, self.context.global_iteration)
                .with_loss("classification", stats.classification)
                .with_loss("alignment", stats.alignment)
                .with_loss("total", stats.total)
                .with_loss("adaptation_weight", weights.adaptation)
                .with_loss("reversal", weights.reversal);
            if let Some(acc) = stats.discriminator_accuracy {
                record = record.with_loss("discriminator_accuracy", acc);
            }
            self.record(&record);
            self.context.global_iteration += 1;
        }
        Ok(Some(totals))
    }

    fn run_iteration(
        &mut self,
        epoch: usize,
        pair: &IndexBatchPair,
        weights: LossWeights,
        learning_rate: f64,
    ) -> Result<IterationStats> {
        let device = self.session.device().clone();
        let source = self
            .batcher
            .batch_indices(&self.data.source, &pair.source, &device);
        let target = self
            .batcher
            .batch_indices(&self.data.target_train, &pair.target, &device);
        let source_targets = source
            .labels
            .ok_or_else(|| Error::Dataset("source batch without labels".to_string()))?;
        let source_labels: Vec<usize> = pair
            .source
            .iter()
            .filter_map(|&i| self.data.source.window(i).and_then(|w| w.label))
            .collect();

        let n_s = pair.source.len();
        let n_t = pair.target.len();
        let output = self
            .model
            .forward(Tensor::cat(vec![source.signals, target.signals], 0));
        let source_embedding = output.embedding.clone().narrow(0, 0, n_s);
        let target_embedding = output.embedding.narrow(0, n_s, n_t);
        let source_logits = output.logits.clone().narrow(0, 0, n_s);
        let target_logits = output.logits.narrow(0, n_s, n_t);

        let correct: i64 = source_logits
            .clone()
            .detach()
            .argmax(1)
            .reshape([n_s])
            .equal(source_targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem();

        let classification = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(source_logits.clone(), source_targets);

        let alignment = self.aligner.compute(
            AlignmentInputs {
                source_embedding,
                target_embedding,
                source_logits,
                target_logits,
                source_labels,
                reversal: weights.reversal,
            },
            self.model.discriminator.as_ref(),
        )?;

        let total = classification.clone() + alignment.loss.clone().mul_scalar(weights.adaptation);

        let classification_value: f64 = classification.into_scalar().elem();
        let alignment_value: f64 = alignment.loss.into_scalar().elem();
        let total_value: f64 = total.clone().into_scalar().elem();
        let iteration = self.context.global_iteration;
        if !total_value.is_finite() {
            return Err(Error::NumericDivergence {
                epoch,
                iteration,
                quantity: DivergedQuantity::Loss,
                loss: total_value,
            });
        }

        let grads = total.backward();
        check_gradients(self.model.gradient_l1_norm(&grads), epoch, iteration, total_value)?;
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optimizer.step(learning_rate, self.model.clone(), grads);

        Ok(IterationStats {
            classification: classification_value,
            alignment: alignment_value,
            total: total_value,
            discriminator_accuracy: alignment.discriminator_accuracy,
            correct: correct as usize,
            seen: n_s,
        })
    }

    /// Evaluating phase. Recoverable failures are logged and the round is
    /// skipped.
    fn evaluate_target(&mut self) -> Result<Option<f64>> {
        let Some(eval_store) = self.data.target_eval.as_ref() else {
            return Ok(None);
        };
        let model = self.model.valid();
        let device = self.session.device().clone();

        match self.evaluator.evaluate(&model, eval_store, &device) {
            Ok(metrics) => {
                let record = MetricRecord::new(
                    MetricKind::Evaluation,
                    self.context.epoch,
                    self.context.global_iteration,
                )
                .with_loss("balanced_accuracy", metrics.balanced_accuracy())
                .with_loss("macro_f1", metrics.macro_f1())
                .with_accuracy(metrics.accuracy);
                self.record(&record);
                Ok(Some(metrics.accuracy))
            }
            Err(e) if !e.is_fatal() => {
                warn!("Evaluation skipped at epoch {}: {}", self.context.epoch, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Checkpointing phase for one tag. Returns `Ok(false)` when the cycle
    /// was skipped after a recoverable failure.
    fn save_checkpoint(&mut self, tag: &str, accuracy: Option<f64>) -> Result<bool> {
        if !self.config.output.save {
            return Ok(false);
        }
        let result = CheckpointMetadata::new(
            tag,
            self.context.epoch,
            self.context.global_iteration,
            accuracy,
            &self.config,
        )
        .map_err(|e| Error::Checkpoint(format!("metadata for {tag}: {e}")))
        .and_then(|metadata| self.store.save(tag, &self.model, &metadata));

        match result {
            Ok(()) => {
                self.context.last_good_checkpoint = Some(tag.to_string());
                Ok(true)
            }
            Err(e) if !e.is_fatal() => {
                warn!("Checkpoint {} skipped: {}", tag, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn record_epoch(&mut self, summary: &EpochSummary) {
        let mut record = MetricRecord::new(MetricKind::Epoch, summary.epoch, self.context.global_iteration)
            .with_loss("classification", summary.classification_loss)
            .with_loss("alignment", summary.alignment_loss)
            .with_loss("source_accuracy", summary.source_accuracy)
            .with_loss("learning_rate", summary.learning_rate);
        if let Some(acc) = summary.discriminator_accuracy {
            record = record.with_loss("discriminator_accuracy", acc);
        }
        if let Some(acc) = summary.target_accuracy {
            record = record.with_accuracy(acc);
        }
        self.record(&record);
    }

    fn record(&mut self, record: &MetricRecord) {
        if let Err(e) = self.sink.record(record) {
            warn!("Metrics sink rejected a record: {}", e);
        }
    }
}

/// Rejects an update whose parameter gradients are not all finite
fn check_gradients(
    l1_norm: Option<f64>,
    epoch: usize,
    iteration: usize,
    loss: f64,
) -> Result<()> {
    match l1_norm {
        Some(norm) if !norm.is_finite() => Err(Error::NumericDivergence {
            epoch,
            iteration,
            quantity: DivergedQuantity::Gradient,
            loss,
        }),
        _ => Ok(()),
    }
}

fn epoch_summary(
    epoch: usize,
    totals: &EpochTotals,
    target_accuracy: Option<f64>,
    learning_rate: f64,
) -> EpochSummary {
    let iterations = totals.iterations.max(1) as f64;
    EpochSummary {
        epoch,
        classification_loss: totals.classification / iterations,
        alignment_loss: totals.alignment / iterations,
        source_accuracy: totals.correct as f64 / totals.seen.max(1) as f64,
        discriminator_accuracy: (totals.discriminator_batches > 0)
            .then(|| totals.discriminator_accuracy / totals.discriminator_batches as f64),
        target_accuracy,
        learning_rate,
    }
}

/// Builds the configured optimizer and runs a full training session.
///
/// Returns `Err` only when initialization fails (invalid configuration,
/// mismatched data); failures during training are reported through
/// [`TerminalState::Failed`].
pub fn run_training<B, S>(
    config: UdaConfig,
    data: TrainingData,
    store: S,
    sink: Box<dyn MetricsSink>,
    stop: StopSignal,
    device: B::Device,
    initial_model: Option<UdaModel<B>>,
) -> Result<TrainingOutcome<B>>
where
    B: AutodiffBackend,
    S: CheckpointStore,
{
    let params = config.training.optimizer.clone();
    let weight_decay = (params.weight_decay > 0.0)
        .then(|| WeightDecayConfig::new(params.weight_decay as f32));

    let outcome = match params.kind {
        OptimizerKind::Adam => {
            let optimizer = AdamConfig::new()
                .with_beta_1(params.betas.0 as f32)
                .with_beta_2(params.betas.1 as f32)
                .with_weight_decay(weight_decay)
                .init::<B, UdaModel<B>>();
            TrainingOrchestrator::new(config, data, optimizer, store, sink, stop, device, initial_model)?
                .run()
        }
        OptimizerKind::Sgd => {
            let momentum = (params.momentum > 0.0)
                .then(|| MomentumConfig::new().with_momentum(params.momentum));
            let optimizer = SgdConfig::new()
                .with_momentum(momentum)
                .with_weight_decay(weight_decay)
                .init::<B, UdaModel<B>>();
            TrainingOrchestrator::new(config, data, optimizer, store, sink, stop, device, initial_model)?
                .run()
        }
    };
    Ok(outcome)
}
