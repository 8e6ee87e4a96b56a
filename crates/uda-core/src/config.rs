//! Configuration structures for domain adaptation training runs.
//!
//! Every section implements `Default`, and every struct is
//! `#[serde(default)]`, so a TOML file only needs the keys it changes.

use crate::backend::BackendConfig;
use crate::types::{ConditionId, ModelName, Normalization, TrainMode};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a domain adaptation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdaConfig {
    /// Network and aligner configuration
    pub model: ModelConfig,
    /// Data configuration
    pub data: DataConfig,
    /// Training hyperparameters
    pub training: TrainingParams,
    /// Compute device configuration
    pub device: BackendConfig,
    /// Checkpoint and report output
    pub output: OutputConfig,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for UdaConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            data: DataConfig::default(),
            training: TrainingParams::default(),
            device: BackendConfig::default(),
            output: OutputConfig::default(),
            seed: 128,
        }
    }
}

impl UdaConfig {
    /// Checks every section, failing on the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.data.validate()?;
        self.training.validate()?;
        self.output.validate()?;

        let min_len = self.model.min_signal_len();
        if self.data.signal_size < min_len {
            return Err(Error::Configuration(format!(
                "signal_size {} is shorter than the {} samples needed by {} pooling blocks",
                self.data.signal_size,
                min_len,
                self.model.channels.len()
            )));
        }

        if self.training.train_mode == TrainMode::MultiSource {
            return Err(Error::Configuration(format!(
                "{} cannot be trained in multi_source mode",
                self.model.model_name
            )));
        }
        Ok(())
    }

    /// Effective evaluation batch size.
    pub fn eval_batch_size(&self) -> usize {
        self.training
            .eval_batch_size
            .unwrap_or(self.training.batch_size)
    }
}

/// Network and aligner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Domain alignment algorithm
    pub model_name: ModelName,
    /// Number of fault classes
    pub num_classes: usize,
    /// Output channels of each convolution block
    pub channels: Vec<usize>,
    /// Kernel size of the first convolution (later blocks use 3)
    pub first_kernel: usize,
    /// Embedding width produced by the encoder
    pub feature_dim: usize,
    /// Hidden width of the domain discriminator
    pub discriminator_hidden: usize,
    /// Dropout rate
    pub dropout: f64,
    /// CDAN options
    pub cdan: CdanParams,
    /// ACDANN options
    pub acdann: AcdannParams,
    /// DDTLN options
    pub ddtln: DdtlnParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: ModelName::Dann,
            num_classes: 4,
            channels: vec![16, 32, 64, 64],
            first_kernel: 15,
            feature_dim: 256,
            discriminator_hidden: 1024,
            dropout: 0.2,
            cdan: CdanParams::default(),
            acdann: AcdannParams::default(),
            ddtln: DdtlnParams::default(),
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        if self.num_classes < 2 {
            return Err(Error::Configuration(format!(
                "num_classes must be at least 2, got {}",
                self.num_classes
            )));
        }
        if self.channels.is_empty() || self.channels.contains(&0) {
            return Err(Error::Configuration(
                "channels must be a non-empty list of positive widths".to_string(),
            ));
        }
        if self.first_kernel == 0 || self.feature_dim == 0 || self.discriminator_hidden == 0 {
            return Err(Error::Configuration(
                "first_kernel, feature_dim and discriminator_hidden must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Configuration(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.cdan.randomized && self.cdan.randomized_dim == 0 {
            return Err(Error::Configuration(
                "cdan.randomized_dim must be positive".to_string(),
            ));
        }
        check_probability("acdann.confidence_threshold", self.acdann.confidence_threshold)?;
        check_probability("ddtln.confidence_threshold", self.ddtln.confidence_threshold)?;
        if self.ddtln.kernel_multipliers.is_empty()
            || self.ddtln.kernel_multipliers.iter().any(|m| !(*m > 0.0))
        {
            return Err(Error::Configuration(
                "ddtln.kernel_multipliers must be a non-empty list of positive values".to_string(),
            ));
        }
        if !(self.ddtln.margin >= 0.0) || !(self.ddtln.margin_weight >= 0.0) {
            return Err(Error::Configuration(
                "ddtln.margin and ddtln.margin_weight must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Shortest window the encoder accepts. Every convolution block halves
    /// the temporal length, so the stack needs `2^blocks` samples.
    pub fn min_signal_len(&self) -> usize {
        u32::try_from(self.channels.len())
            .ok()
            .and_then(|blocks| 1usize.checked_shl(blocks))
            .unwrap_or(usize::MAX)
    }

    /// Width of the discriminator input for the configured algorithm.
    pub fn discriminator_input(&self) -> usize {
        match self.model_name {
            ModelName::Cdan if self.cdan.randomized => self.cdan.randomized_dim,
            ModelName::Cdan | ModelName::Acdann => self.feature_dim * self.num_classes,
            _ => self.feature_dim,
        }
    }
}

fn check_probability(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Configuration(format!(
            "{name} must be in [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// CDAN options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdanParams {
    /// Project the multilinear map through fixed random matrices
    pub randomized: bool,
    /// Output width of the randomized map
    pub randomized_dim: usize,
    /// Weight samples by `1 + exp(-entropy)`
    pub entropy_conditioning: bool,
}

impl Default for CdanParams {
    fn default() -> Self {
        Self {
            randomized: false,
            randomized_dim: 1024,
            entropy_conditioning: false,
        }
    }
}

/// ACDANN options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcdannParams {
    /// Target predictions at or above this confidence become one-hot pseudo-labels
    pub confidence_threshold: f64,
}

impl Default for AcdannParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.9,
        }
    }
}

/// DDTLN options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DdtlnParams {
    /// Gaussian kernel bandwidth multipliers for MK-MMD
    pub kernel_multipliers: Vec<f64>,
    /// Weight of the class-conditional MMD term
    pub conditional_weight: f64,
    /// Distance margin between different-class embeddings
    pub margin: f64,
    /// Weight of the margin term
    pub margin_weight: f64,
    /// Minimum confidence for a target pseudo-label to count
    pub confidence_threshold: f64,
}

impl Default for DdtlnParams {
    fn default() -> Self {
        Self {
            kernel_multipliers: vec![0.5, 1.0, 2.0],
            conditional_weight: 1.0,
            margin: 1.0,
            margin_weight: 0.1,
            confidence_threshold: 0.0,
        }
    }
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root directory holding one sub-directory per condition
    pub data_dir: PathBuf,
    /// Source conditions
    pub source: Vec<ConditionId>,
    /// Target condition
    pub target: ConditionId,
    /// Window length in samples
    pub signal_size: usize,
    /// Sliding window stride (defaults to `signal_size`)
    pub stride: Option<usize>,
    /// Per-window normalization
    pub normalization: Normalization,
    /// Target class-frequency decay, `None` keeps the target balanced
    pub imbalance_ratio: Option<f64>,
    /// Fraction of each target class held out for evaluation
    pub test_fraction: f64,
    /// Cap on windows per class and condition
    pub max_windows_per_class: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            source: vec![ConditionId::new("JNU", 0)],
            target: ConditionId::new("JNU", 1),
            signal_size: 2048,
            stride: None,
            normalization: Normalization::MeanStd,
            imbalance_ratio: None,
            test_fraction: 0.2,
            max_windows_per_class: None,
        }
    }
}

impl DataConfig {
    fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::Configuration(
                "at least one source condition is required".to_string(),
            ));
        }
        if self.signal_size == 0 {
            return Err(Error::Configuration("signal_size must be positive".to_string()));
        }
        if self.stride == Some(0) {
            return Err(Error::Configuration("stride must be positive".to_string()));
        }
        if let Some(ratio) = self.imbalance_ratio {
            validate_imbalance_ratio(ratio)?;
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(Error::Configuration(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        Ok(())
    }

    /// Effective sliding window stride.
    pub fn stride(&self) -> usize {
        self.stride.unwrap_or(self.signal_size)
    }
}

/// Rejects ratios outside `(0, 1]`, including NaN.
pub fn validate_imbalance_ratio(ratio: f64) -> Result<()> {
    if ratio.is_finite() && ratio > 0.0 && ratio <= 1.0 {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "imbalance ratio must be in (0, 1], got {ratio}"
        )))
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// How source conditions are combined
    pub train_mode: TrainMode,
    /// Windows per domain per iteration
    pub batch_size: usize,
    /// Accept a batch_size above the smallest (post-imbalance) class of a
    /// domain. Off by default: such a batch size is a configuration error.
    pub allow_small_classes: bool,
    /// Number of epochs
    pub epoch_count: usize,
    /// Optimizer settings
    pub optimizer: OptimizerConfig,
    /// Learning rate schedule, stepped once per epoch
    pub lr_schedule: LrScheduleConfig,
    /// Weight of the alignment loss
    pub tradeoff: WeightSchedule,
    /// Gradient reversal coefficient
    pub reversal: WeightSchedule,
    /// Stop after this many epochs without accuracy improvement
    pub early_stopping_patience: Option<usize>,
    /// Save a checkpoint every N epochs
    pub checkpoint_every: usize,
    /// Batch size used by the evaluator (defaults to `batch_size`)
    pub eval_batch_size: Option<usize>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            train_mode: TrainMode::SingleSource,
            batch_size: 32,
            allow_small_classes: false,
            epoch_count: 10,
            optimizer: OptimizerConfig::default(),
            lr_schedule: LrScheduleConfig::default(),
            tradeoff: WeightSchedule::default(),
            reversal: WeightSchedule::default(),
            early_stopping_patience: None,
            checkpoint_every: 1,
            eval_batch_size: None,
        }
    }
}

impl TrainingParams {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be positive".to_string()));
        }
        if self.epoch_count == 0 {
            return Err(Error::Configuration("epoch_count must be positive".to_string()));
        }
        if self.checkpoint_every == 0 {
            return Err(Error::Configuration(
                "checkpoint_every must be positive".to_string(),
            ));
        }
        if self.eval_batch_size == Some(0) {
            return Err(Error::Configuration(
                "eval_batch_size must be positive".to_string(),
            ));
        }
        self.optimizer.validate()?;
        self.lr_schedule.validate()?;
        self.tradeoff.validate("tradeoff")?;
        self.reversal.validate("reversal")?;
        Ok(())
    }
}

/// Optimizer family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam with decoupled betas
    #[default]
    Adam,
    /// SGD with momentum
    Sgd,
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Sgd => write!(f, "sgd"),
        }
    }
}

/// Optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Optimizer family
    pub kind: OptimizerKind,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Momentum for SGD
    pub momentum: f64,
    /// Betas for Adam
    pub betas: (f64, f64),
    /// Weight decay for both optimizers
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            learning_rate: 1e-3,
            momentum: 0.9,
            betas: (0.9, 0.999),
            weight_decay: 1e-3,
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(Error::Configuration(
                "weight_decay must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Learning rate schedule, stepped once per epoch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LrScheduleConfig {
    /// Constant learning rate
    Fix,
    /// Multiply by `gamma` at each listed epoch
    Step { milestones: Vec<usize>, gamma: f64 },
    /// Multiply by `gamma` every epoch
    Exp { gamma: f64 },
    /// Multiply by `gamma` every `step_size` epochs
    StepLr { step_size: usize, gamma: f64 },
}

impl Default for LrScheduleConfig {
    fn default() -> Self {
        LrScheduleConfig::StepLr {
            step_size: 20,
            gamma: 0.2,
        }
    }
}

impl LrScheduleConfig {
    fn validate(&self) -> Result<()> {
        let gamma = match self {
            LrScheduleConfig::Fix => return Ok(()),
            LrScheduleConfig::Step { gamma, .. } | LrScheduleConfig::Exp { gamma } => *gamma,
            LrScheduleConfig::StepLr { step_size, gamma } => {
                if *step_size == 0 {
                    return Err(Error::Configuration(
                        "lr_schedule.step_size must be positive".to_string(),
                    ));
                }
                *gamma
            }
        };
        if !(gamma > 0.0 && gamma.is_finite()) {
            return Err(Error::Configuration(format!(
                "lr_schedule.gamma must be positive, got {gamma}"
            )));
        }
        Ok(())
    }
}

/// Shape of a per-iteration loss weight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeightSchedule {
    /// Fixed weight
    Constant { value: f64 },
    /// `floor + (1 - floor) * (2 / (1 + exp(-gamma * p)) - 1)` with `p` the training progress
    Ramp { floor: f64, gamma: f64 },
}

impl Default for WeightSchedule {
    fn default() -> Self {
        WeightSchedule::Ramp {
            floor: 0.0,
            gamma: 10.0,
        }
    }
}

impl WeightSchedule {
    fn validate(&self, name: &str) -> Result<()> {
        match self {
            WeightSchedule::Constant { value } if !(value.is_finite() && *value >= 0.0) => Err(
                Error::Configuration(format!("{name} weight must be non-negative, got {value}")),
            ),
            WeightSchedule::Ramp { floor, gamma }
                if !((0.0..=1.0).contains(floor) && *gamma > 0.0 && gamma.is_finite()) =>
            {
                Err(Error::Configuration(format!(
                    "{name} ramp needs floor in [0, 1] and positive gamma"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Checkpoint and report output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving checkpoints and metrics
    pub save_dir: PathBuf,
    /// Whether checkpoints are written at all
    pub save: bool,
    /// Number of per-epoch checkpoints to retain
    pub keep_last_n: usize,
    /// Attempts per checkpoint write before the cycle is skipped
    pub max_retries: usize,
    /// Initial delay between attempts, doubled after each failure
    pub retry_backoff_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("ckpt"),
            save: true,
            keep_last_n: 3,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Configuration("max_retries must be at least 1".to_string()));
        }
        Ok(())
    }
}
