//! Full training runs on synthetic bearing signals.

use burn::module::AutodiffModule;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use tempfile::TempDir;
use uda_core::{
    ConditionId, DomainKind, Error, MemorySink, MetricKind, MetricRecord, MetricsSink, ModelConfig,
    ModelName, Normalization, Result, UdaConfig,
};
use uda_dataset::{apply_imbalance, DatasetLoader, SyntheticBearingLoader, SyntheticConfig};
use uda_training::{
    run_training, CheckpointStore, Evaluator, FileCheckpointStore, StopSignal, TerminalState,
    TrainingData, UdaModel, BEST_TAG,
};

type TrainBackend = Autodiff<NdArray>;

const SIGNAL_LEN: usize = 256;

fn loader(windows_per_class: usize) -> SyntheticBearingLoader {
    SyntheticBearingLoader::new(SyntheticConfig {
        num_classes: 4,
        windows_per_class,
        signal_len: SIGNAL_LEN,
        normalization: Normalization::MeanStd,
        ..SyntheticConfig::default()
    })
    .unwrap()
}

fn small_config(model_name: ModelName, save_dir: &std::path::Path) -> UdaConfig {
    let mut config = UdaConfig::default();
    config.model = ModelConfig {
        model_name,
        num_classes: 4,
        channels: vec![8, 16, 16],
        feature_dim: 32,
        first_kernel: 9,
        discriminator_hidden: 64,
        ..ModelConfig::default()
    };
    config.data.signal_size = SIGNAL_LEN;
    config.training.batch_size = 32;
    config.training.epoch_count = 1;
    config.output.save_dir = save_dir.to_path_buf();
    config
}

/// Forwards to a [`MemorySink`] the test can read after the run
#[derive(Clone, Default)]
struct SharedSink(std::sync::Arc<std::sync::Mutex<MemorySink>>);

impl MetricsSink for SharedSink {
    fn record(&mut self, record: &MetricRecord) -> Result<()> {
        match self.0.lock() {
            Ok(mut sink) => sink.record(record),
            Err(_) => Ok(()),
        }
    }
}

#[test]
fn dann_epoch_on_imbalanced_target() {
    let loader = loader(250);
    let source = loader
        .load(&ConditionId::new("CWRU", 0), DomainKind::Source)
        .unwrap();
    let target = loader
        .load(&ConditionId::new("CWRU", 3), DomainKind::Target)
        .unwrap();
    assert_eq!(source.class_counts(), vec![250; 4]);
    assert_eq!(target.len(), 1000);

    let imbalanced = apply_imbalance(&target, 0.3, 128).unwrap();
    let counts = imbalanced.class_counts();
    let mut sorted = counts.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(sorted[0], 250);
    let expected_lowest = 250.0 * 0.3f64.powi(3);
    assert!((sorted[3] as f64 - expected_lowest).abs() <= 1.0);
    assert!(sorted.windows(2).all(|w| w[0] >= w[1]));

    let dir = TempDir::new().unwrap();
    let mut config = small_config(ModelName::Dann, dir.path());
    let data = TrainingData {
        source,
        target_train: imbalanced.clone(),
        target_eval: Some(imbalanced),
    };

    // a batch may not exceed the smallest target class
    let rejected = run_training::<TrainBackend, _>(
        config.clone(),
        data.clone(),
        FileCheckpointStore::from_config(&config.output),
        Box::new(SharedSink::default()),
        StopSignal::new(),
        Default::default(),
        None,
    );
    assert!(matches!(rejected, Err(Error::Configuration(_))));

    let batch_size = sorted[3];
    config.training.batch_size = batch_size;
    let store = FileCheckpointStore::from_config(&config.output);
    let sink = SharedSink::default();
    let outcome = run_training::<TrainBackend, _>(
        config,
        data,
        store,
        Box::new(sink.clone()),
        StopSignal::new(),
        Default::default(),
        None,
    )
    .unwrap();

    match &outcome.terminal {
        TerminalState::Completed { .. } => {}
        TerminalState::Failed { error } => {
            assert!(!matches!(error, Error::NumericDivergence { .. }));
            panic!("training failed: {error}");
        }
    }
    // max(1000, 355) / batch_size
    assert_eq!(outcome.context.global_iteration, 1000 / batch_size);

    let accuracy = outcome.context.final_accuracy().unwrap();
    assert!((0.0..=1.0).contains(&accuracy));

    let sink = sink.0.lock().unwrap();
    let evaluations: Vec<_> = sink.of_kind(MetricKind::Evaluation).collect();
    assert_eq!(evaluations.len(), 1);
    assert_eq!(evaluations[0].accuracy, Some(accuracy));
    assert!(sink
        .of_kind(MetricKind::Iteration)
        .all(|r| r.losses["discriminator_accuracy"] >= 0.0));
}

#[test]
fn prepared_pipeline_trains_every_strategy() {
    for model_name in ModelName::ALL {
        let dir = TempDir::new().unwrap();
        let mut config = small_config(model_name, dir.path());
        config.data.source = vec![ConditionId::new("CWRU", 0)];
        config.data.target = ConditionId::new("CWRU", 2);
        config.data.imbalance_ratio = Some(0.5);
        config.training.batch_size = 4;

        let data = TrainingData::prepare(&config, &loader(40)).unwrap();
        let eval = data.target_eval.clone().unwrap();
        assert_eq!(eval.class_counts(), vec![8; 4]);
        let mut train_counts = data.target_train.class_counts();
        train_counts.sort_unstable();
        assert_eq!(train_counts, vec![4, 8, 16, 32]);

        let store = FileCheckpointStore::from_config(&config.output);
        let outcome = run_training::<TrainBackend, _>(
            config.clone(),
            data,
            store,
            Box::new(SharedSink::default()),
            StopSignal::new(),
            Default::default(),
            None,
        )
        .unwrap();
        assert!(outcome.is_completed(), "{model_name}: {:?}", outcome.terminal);

        // the stored best model evaluates deterministically
        let store = FileCheckpointStore::from_config(&config.output);
        let device = Default::default();
        let template = UdaModel::<TrainBackend>::new(&config.model, &device);
        let best = store.load(BEST_TAG, template, &device).unwrap();
        let evaluator = Evaluator::new(config.eval_batch_size());
        let first = evaluator.evaluate(&best.valid(), &eval, &device).unwrap();
        let second = evaluator.evaluate(&best.valid(), &eval, &device).unwrap();
        assert_eq!(first.confusion_matrix, second.confusion_matrix);
        assert!((0.0..=1.0).contains(&first.accuracy));
    }
}
