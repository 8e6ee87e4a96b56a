//! Training CLI Tool
//!
//! Trains one of the domain adaptation strategies on a source/target pair
//! of operating conditions, or evaluates a stored checkpoint with `--load`.

use anyhow::{Context, Result};
use burn::{backend::Autodiff, module::AutodiffModule, tensor::backend::Backend};
use chrono::{DateTime, Utc};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use uda_core::{
    init_backend, load_toml_config, save_toml_config, setup_cli_logging, CompositeSink,
    ConditionId, Device, JsonLinesSink, MetricKind, MetricRecord, MetricsSink, ModelName,
    TracingSink, UdaConfig,
};
use uda_dataset::{
    DatasetLoader, PreprocessConfig, SignalDirectoryLoader, SignalPreprocessor,
    SyntheticBearingLoader, SyntheticConfig,
};
use uda_training::{
    run_training, CheckpointStore, Evaluator, FileCheckpointStore, StopSignal, TerminalState,
    TrainingData, TrainingOutcome, UdaModel,
};

#[cfg(feature = "cuda")]
type TrainBackend = Autodiff<burn_cuda::Cuda>;
#[cfg(all(feature = "ndarray", not(feature = "cuda")))]
type TrainBackend = Autodiff<burn_ndarray::NdArray>;

/// Imbalanced Domain Adaptation Training Tool
#[derive(Parser, Debug)]
#[command(
    name = "uda-train",
    about = "Train imbalanced domain adaptation fault classifiers",
    long_about = "Train a vibration fault classifier on a labeled source condition while \
                  aligning it to an unlabeled, class-imbalanced target condition with \
                  CORAL, DANN, CDAN, ACDANN or DDTLN."
)]
struct Args {
    /// Path to training configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Alignment strategy (CORAL, DANN, CDAN, ACDANN, DDTLN)
    #[arg(short, long, value_name = "NAME")]
    model_name: Option<String>,

    /// Source conditions, comma separated (e.g. CWRU_0,CWRU_1)
    #[arg(short, long, value_name = "IDS")]
    source: Option<String>,

    /// Target condition (e.g. CWRU_3)
    #[arg(short, long, value_name = "ID")]
    target: Option<String>,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Target class imbalance ratio in (0, 1]
    #[arg(short, long, value_name = "R")]
    imbalance_ratio: Option<f64>,

    /// Allow a batch size above the smallest target class
    #[arg(long)]
    allow_small_classes: bool,

    /// Override checkpoint / output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Use generated bearing signals instead of files on disk
    #[arg(long)]
    synthetic: bool,

    /// Evaluate the stored checkpoint with this tag instead of training
    #[arg(long, value_name = "TAG")]
    load: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate configuration and data without training
    #[arg(long)]
    dry_run: bool,
}

/// Written to `summary.json` at the end of a run
#[derive(Debug, Serialize)]
struct RunSummary {
    model_name: ModelName,
    source: Vec<ConditionId>,
    target: ConditionId,
    imbalance_ratio: Option<f64>,
    status: String,
    epochs_run: usize,
    iterations: usize,
    best_accuracy: Option<f64>,
    best_epoch: Option<usize>,
    final_accuracy: Option<f64>,
    last_checkpoint: Option<String>,
    finished_at: DateTime<Utc>,
}

/// Advances the epoch progress bar
struct ProgressSink {
    bar: ProgressBar,
}

impl MetricsSink for ProgressSink {
    fn record(&mut self, record: &MetricRecord) -> uda_core::Result<()> {
        match record.kind {
            MetricKind::Iteration => {
                if let Some(total) = record.losses.get("total") {
                    self.bar.set_message(format!("loss {total:.4}"));
                }
            }
            MetricKind::Epoch => self.bar.inc(1),
            MetricKind::Evaluation => {}
        }
        Ok(())
    }

    fn flush(&mut self) -> uda_core::Result<()> {
        self.bar.finish_with_message("done");
        Ok(())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = setup_cli_logging(args.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    info!("Imbalanced Domain Adaptation - Training Tool");
    info!("============================================");

    let mut config = match &args.config {
        Some(path) => load_toml_config::<UdaConfig>(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => UdaConfig::default(),
    };
    apply_overrides(&mut config, &args)?;
    config.validate().context("Invalid configuration")?;

    let device = backend_device(init_backend(&config.device)?);
    let loader = build_loader(&config, args.synthetic)?;
    let data = TrainingData::prepare(&config, loader.as_ref()).context("Failed to prepare data")?;
    print_config_summary(&config, &data);

    if args.dry_run {
        info!("Configuration and data validated successfully (dry run)");
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(tag) = &args.load {
        evaluate_checkpoint(&config, &data, tag, &device)?;
        return Ok(ExitCode::SUCCESS);
    }

    std::fs::create_dir_all(&config.output.save_dir)
        .context("Failed to create output directory")?;
    let save_dir = config.output.save_dir.clone();
    save_toml_config(&config, &save_dir.join("config.toml"))?;

    let progress = ProgressBar::new(config.training.epoch_count as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );
    let sink = CompositeSink::new()
        .with(TracingSink)
        .with(JsonLinesSink::open(&save_dir.join("metrics.jsonl"))?)
        .with(ProgressSink { bar: progress });

    let store = FileCheckpointStore::from_config(&config.output);
    let outcome: TrainingOutcome<TrainBackend> = run_training(
        config.clone(),
        data,
        store,
        Box::new(sink),
        StopSignal::new(),
        device,
        None,
    )?;

    outcome
        .context
        .history
        .export_csv(&save_dir.join("history.csv"))
        .context("Failed to export training history")?;
    write_summary(&config, &outcome, &save_dir.join("summary.json"))?;

    match &outcome.terminal {
        TerminalState::Completed { reason } => {
            info!("Training completed: {}", reason);
            info!("  Best accuracy:  {:?} (epoch {:?})", outcome.context.best_accuracy, outcome.context.best_epoch);
            info!("  Final accuracy: {:?}", outcome.context.final_accuracy());
        }
        TerminalState::Failed { error } => {
            warn!("Training failed: {}", error);
            if let Some(tag) = &outcome.context.last_good_checkpoint {
                warn!("Last good checkpoint: {}", tag);
            }
        }
    }

    Ok(ExitCode::from(outcome.exit_code() as u8))
}

fn apply_overrides(config: &mut UdaConfig, args: &Args) -> Result<()> {
    if let Some(name) = &args.model_name {
        config.model.model_name = name.parse()?;
    }
    if let Some(source) = &args.source {
        config.data.source = ConditionId::parse_list(source)?;
    }
    if let Some(target) = &args.target {
        config.data.target = target.parse()?;
    }
    if let Some(epochs) = args.epochs {
        config.training.epoch_count = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(ratio) = args.imbalance_ratio {
        config.data.imbalance_ratio = Some(ratio);
    }
    if args.allow_small_classes {
        config.training.allow_small_classes = true;
    }
    if let Some(output) = &args.output {
        config.output.save_dir = output.clone();
    }
    Ok(())
}

fn build_loader(config: &UdaConfig, synthetic: bool) -> Result<Box<dyn DatasetLoader>> {
    if synthetic {
        let loader = SyntheticBearingLoader::new(SyntheticConfig {
            num_classes: config.model.num_classes,
            signal_len: config.data.signal_size,
            normalization: config.data.normalization,
            seed: config.seed,
            ..SyntheticConfig::default()
        })?;
        return Ok(Box::new(loader));
    }

    let preprocessor = SignalPreprocessor::new(PreprocessConfig::from(&config.data))?;
    Ok(Box::new(SignalDirectoryLoader::new(
        &config.data.data_dir,
        preprocessor,
        config.model.num_classes,
    )))
}

#[cfg(feature = "cuda")]
fn backend_device(device: Device) -> <TrainBackend as Backend>::Device {
    match device {
        Device::Gpu(id) => burn_cuda::CudaDevice::new(id),
        Device::Cpu => {
            warn!("CUDA build asked for CPU; using GPU 0");
            burn_cuda::CudaDevice::new(0)
        }
    }
}

#[cfg(all(feature = "ndarray", not(feature = "cuda")))]
fn backend_device(device: Device) -> <TrainBackend as Backend>::Device {
    if let Device::Gpu(id) = device {
        warn!("GPU:{} requested but this build only has the CPU backend", id);
    }
    burn_ndarray::NdArrayDevice::Cpu
}

fn evaluate_checkpoint(
    config: &UdaConfig,
    data: &TrainingData,
    tag: &str,
    device: &<TrainBackend as Backend>::Device,
) -> Result<()> {
    let eval_store = data
        .target_eval
        .as_ref()
        .context("No held-out target windows to evaluate on")?;

    let store = FileCheckpointStore::from_config(&config.output);
    let metadata = store.metadata(tag)?;
    info!(
        "Loading checkpoint {} (epoch {}, {}, saved {})",
        tag, metadata.epoch, metadata.model_name, metadata.timestamp
    );
    let template = UdaModel::<TrainBackend>::new(&config.model, device);
    let model = store
        .load(tag, template, device)
        .with_context(|| format!("Failed to load checkpoint {tag}"))?;

    let metrics = Evaluator::new(config.eval_batch_size()).evaluate(&model.valid(), eval_store, device)?;
    println!("{}", Evaluator::format_report(&metrics));

    let matrix_path = config.output.save_dir.join(format!("{tag}_confusion.csv"));
    Evaluator::export_confusion_matrix(&metrics, &matrix_path)?;
    Ok(())
}

fn print_config_summary(config: &UdaConfig, data: &TrainingData) {
    info!("");
    info!("Configuration Summary:");
    info!("  Model:           {}", config.model.model_name);
    info!("  Classes:         {}", config.model.num_classes);
    info!(
        "  Source:          {}",
        config
            .data
            .source
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("  Target:          {}", config.data.target);
    info!("  Train mode:      {:?}", config.training.train_mode);
    info!("  Imbalance ratio: {:?}", config.data.imbalance_ratio);
    info!("  Epochs:          {}", config.training.epoch_count);
    info!("  Batch size:      {}", config.training.batch_size);
    info!("  Learning rate:   {}", config.training.optimizer.learning_rate);
    info!("  Device:          {:?}", config.device.device);
    info!("  Output dir:      {}", config.output.save_dir.display());
    info!("  Source windows:  {:?}", data.source.class_counts());
    info!("  Target windows:  {:?}", data.target_train.class_counts());
    info!("");
}

fn write_summary(
    config: &UdaConfig,
    outcome: &TrainingOutcome<TrainBackend>,
    path: &Path,
) -> Result<()> {
    let status = match &outcome.terminal {
        TerminalState::Completed { reason } => format!("completed: {reason}"),
        TerminalState::Failed { error } => format!("failed: {error}"),
    };
    let summary = RunSummary {
        model_name: config.model.model_name,
        source: config.data.source.clone(),
        target: config.data.target.clone(),
        imbalance_ratio: config.data.imbalance_ratio,
        status,
        epochs_run: outcome.context.history.epochs.len(),
        iterations: outcome.context.global_iteration,
        best_accuracy: outcome.context.best_accuracy,
        best_epoch: outcome.context.best_epoch,
        final_accuracy: outcome.context.final_accuracy(),
        last_checkpoint: outcome.context.last_good_checkpoint.clone(),
        finished_at: Utc::now(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
