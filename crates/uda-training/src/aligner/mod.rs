//! Domain alignment strategies.
//!
//! [`DomainAligner`] is selected once from `model_name` and turns a pair of
//! source/target embeddings (plus classifier outputs and source labels)
//! into a scalar loss that is added, weighted, to the classification loss.
//! Adversarial strategies route their input through gradient reversal and
//! the model's [`DomainDiscriminator`]; the discriminator is updated by the
//! same optimizer step as the encoder and classifier.

mod acdann;
mod cdan;
mod coral;
mod dann;
mod ddtln;

pub use acdann::AcdannAligner;
pub use cdan::CdanAligner;
pub use coral::{coral_loss, CoralAligner};
pub use dann::DannAligner;
pub use ddtln::DdtlnAligner;

use burn::tensor::{activation::softmax, backend::Backend, ElementConversion, Tensor, TensorData};
use uda_core::{Error, ModelConfig, ModelName, Result};

use crate::model::DomainDiscriminator;

/// Everything an aligner may look at for one iteration
#[derive(Debug, Clone)]
pub struct AlignmentInputs<B: Backend> {
    /// Source embeddings `[n_s, d]`
    pub source_embedding: Tensor<B, 2>,
    /// Target embeddings `[n_t, d]`
    pub target_embedding: Tensor<B, 2>,
    /// Source class logits `[n_s, C]`
    pub source_logits: Tensor<B, 2>,
    /// Target class logits `[n_t, C]`
    pub target_logits: Tensor<B, 2>,
    /// Source ground-truth classes, one per source row
    pub source_labels: Vec<usize>,
    /// Gradient reversal coefficient for this iteration
    pub reversal: f64,
}

/// Alignment loss and diagnostics for one iteration
#[derive(Debug, Clone)]
pub struct AlignmentLoss<B: Backend> {
    /// Scalar loss, shape `[1]`
    pub loss: Tensor<B, 1>,
    /// Fraction of domains the discriminator got right (adversarial only)
    pub discriminator_accuracy: Option<f64>,
}

/// One of the five alignment strategies
#[derive(Debug)]
pub enum DomainAligner<B: Backend> {
    /// Covariance alignment
    Coral(CoralAligner),
    /// Domain-adversarial
    Dann(DannAligner),
    /// Conditional domain-adversarial
    Cdan(CdanAligner<B>),
    /// Label-conditioned adversarial with mixup
    Acdann(AcdannAligner),
    /// MK-MMD plus discriminative margin
    Ddtln(DdtlnAligner),
}

impl<B: Backend> DomainAligner<B> {
    /// Builds the aligner named by `config.model_name`
    pub fn from_config(config: &ModelConfig, seed: u64, device: &B::Device) -> Result<Self> {
        let aligner = match config.model_name {
            ModelName::Coral => DomainAligner::Coral(CoralAligner::new()),
            ModelName::Dann => DomainAligner::Dann(DannAligner::new()),
            ModelName::Cdan => DomainAligner::Cdan(CdanAligner::new(
                &config.cdan,
                config.feature_dim,
                config.num_classes,
                seed,
                device,
            )?),
            ModelName::Acdann => DomainAligner::Acdann(AcdannAligner::new(
                config.acdann.confidence_threshold,
                seed,
            )?),
            ModelName::Ddtln => DomainAligner::Ddtln(DdtlnAligner::new(config.ddtln.clone())),
        };
        Ok(aligner)
    }

    /// Strategy implemented by this aligner
    pub fn name(&self) -> ModelName {
        match self {
            DomainAligner::Coral(_) => ModelName::Coral,
            DomainAligner::Dann(_) => ModelName::Dann,
            DomainAligner::Cdan(_) => ModelName::Cdan,
            DomainAligner::Acdann(_) => ModelName::Acdann,
            DomainAligner::Ddtln(_) => ModelName::Ddtln,
        }
    }

    /// Whether a discriminator must be supplied to [`Self::compute`]
    pub fn needs_discriminator(&self) -> bool {
        self.name().is_adversarial()
    }

    /// Computes the alignment loss for one iteration
    pub fn compute(
        &mut self,
        inputs: AlignmentInputs<B>,
        discriminator: Option<&DomainDiscriminator<B>>,
    ) -> Result<AlignmentLoss<B>> {
        check_inputs(&inputs)?;

        match self {
            DomainAligner::Coral(aligner) => aligner.compute(inputs),
            DomainAligner::Dann(aligner) => aligner.compute(inputs, require(discriminator)?),
            DomainAligner::Cdan(aligner) => aligner.compute(inputs, require(discriminator)?),
            DomainAligner::Acdann(aligner) => aligner.compute(inputs, require(discriminator)?),
            DomainAligner::Ddtln(aligner) => aligner.compute(inputs),
        }
    }
}

fn require<B: Backend>(
    discriminator: Option<&DomainDiscriminator<B>>,
) -> Result<&DomainDiscriminator<B>> {
    discriminator.ok_or_else(|| {
        Error::Model("adversarial aligner called without a domain discriminator".to_string())
    })
}

/// Shape checks shared by every strategy
fn check_inputs<B: Backend>(inputs: &AlignmentInputs<B>) -> Result<()> {
    let [n_s, d_s] = inputs.source_embedding.dims();
    let [n_t, d_t] = inputs.target_embedding.dims();
    if d_s != d_t {
        return Err(Error::dimension_mismatch("embedding width", d_s, d_t));
    }
    if n_s == 0 || n_t == 0 {
        return Err(Error::dimension_mismatch(
            "alignment batch size",
            n_s.max(n_t).max(1),
            0,
        ));
    }
    let [ls, cs] = inputs.source_logits.dims();
    let [lt, ct] = inputs.target_logits.dims();
    if ls != n_s {
        return Err(Error::dimension_mismatch("source logits rows", n_s, ls));
    }
    if lt != n_t {
        return Err(Error::dimension_mismatch("target logits rows", n_t, lt));
    }
    if cs != ct {
        return Err(Error::dimension_mismatch("class count", cs, ct));
    }
    if inputs.source_labels.len() != n_s {
        return Err(Error::dimension_mismatch(
            "source labels",
            n_s,
            inputs.source_labels.len(),
        ));
    }
    if let Some(&label) = inputs.source_labels.iter().find(|&&l| l >= cs) {
        return Err(Error::dimension_mismatch("source label range", cs, label + 1));
    }
    Ok(())
}

fn check_discriminator<B: Backend>(
    discriminator: &DomainDiscriminator<B>,
    input_width: usize,
) -> Result<()> {
    if discriminator.input_dim() != input_width {
        return Err(Error::dimension_mismatch(
            "discriminator input",
            discriminator.input_dim(),
            input_width,
        ));
    }
    Ok(())
}

/// Mean binary cross-entropy on logits, computed as
/// `max(x, 0) - x * y + ln(1 + exp(-|x|))`. Optional weights should average
/// to one.
pub fn bce_with_logits<B: Backend>(
    logits: Tensor<B, 1>,
    targets: Tensor<B, 1>,
    weights: Option<Tensor<B, 1>>,
) -> Tensor<B, 1> {
    let loss = logits.clone().clamp_min(0.0) - logits.clone() * targets
        + logits.abs().neg().exp().log1p();
    match weights {
        Some(weights) => (loss * weights).mean(),
        None => loss.mean(),
    }
}

/// Domain labels: ones for `n_source` rows, zeros for `n_target` rows
fn domain_targets<B: Backend>(n_source: usize, n_target: usize, device: &B::Device) -> Tensor<B, 1> {
    Tensor::cat(
        vec![Tensor::ones([n_source], device), Tensor::zeros([n_target], device)],
        0,
    )
}

/// Accuracy of a single-logit discriminator (positive means source)
fn binary_accuracy<B: Backend>(logits: Tensor<B, 1>, targets: Tensor<B, 1>) -> f64 {
    let n = logits.dims()[0].max(1);
    let predicted = logits.detach().greater_elem(0.0).float();
    let correct: i64 = predicted
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as f64 / n as f64
}

/// `[n, C]` one-hot rows
fn one_hot<B: Backend>(labels: &[usize], num_classes: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; labels.len() * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        values[row * num_classes + label] = 1.0;
    }
    Tensor::from_floats(TensorData::new(values, [labels.len(), num_classes]), device)
}

/// Row-wise outer product `[n, C] x [n, d]` flattened to `[n, C * d]`
fn multilinear_map<B: Backend>(conditioning: Tensor<B, 2>, features: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, c] = conditioning.dims();
    let [_, d] = features.dims();
    let outer = conditioning.unsqueeze_dim::<3>(2) * features.unsqueeze_dim::<3>(1);
    outer.reshape([n, c * d])
}

/// Detached class probabilities copied to the host, one row per sample
fn host_probabilities<B: Backend>(logits: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, c] = logits.dims();
    let values = softmax(logits.detach(), 1)
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::Model(format!("failed to read probabilities: {e:?}")))?;
    Ok(values.chunks(c.max(1)).map(<[f32]>::to_vec).collect())
}

/// Most likely class and its probability
fn argmax_row(row: &[f32]) -> (usize, f32) {
    row.iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn config(model_name: ModelName) -> ModelConfig {
        ModelConfig {
            model_name,
            num_classes: 3,
            feature_dim: 6,
            discriminator_hidden: 8,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_bce_matches_naive_formula() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 1>::from_floats([2.0, -1.0, 0.0], &device);
        let targets = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 1.0], &device);
        let loss: f64 = bce_with_logits(logits, targets, None).into_scalar().elem();

        let sigmoid = |x: f64| 1.0 / (1.0 + (-x).exp());
        let expected = -((sigmoid(2.0)).ln() + (1.0 - sigmoid(-1.0)).ln() + (0.5f64).ln()) / 3.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_bce_stable_for_large_logits() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 1>::from_floats([500.0, -500.0], &device);
        let targets = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0], &device);
        let loss: f64 = bce_with_logits(logits, targets, None).into_scalar().elem();
        assert!(loss.is_finite());
        assert!((loss - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_multilinear_map_layout() {
        let device = Default::default();
        let g = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0]], &device);
        let f = Tensor::<TestBackend, 2>::from_floats([[3.0, 4.0, 5.0]], &device);
        let h = multilinear_map(g, f).into_data().to_vec::<f32>().unwrap();
        assert_eq!(h, vec![3.0, 4.0, 5.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_one_hot_rows() {
        let device = Default::default();
        let t = one_hot::<TestBackend>(&[2, 0], 3, &device)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(t, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_config_selects_strategy() {
        let device = Default::default();
        for name in ModelName::ALL {
            let aligner = DomainAligner::<TestBackend>::from_config(&config(name), 0, &device).unwrap();
            assert_eq!(aligner.name(), name);
            assert_eq!(aligner.needs_discriminator(), name.is_adversarial());
        }
    }

    #[test]
    fn test_embedding_width_mismatch() {
        let device = Default::default();
        let mut aligner =
            DomainAligner::<TestBackend>::from_config(&config(ModelName::Coral), 0, &device).unwrap();
        let mut inputs = inputs::<TestBackend>(4, 6, 3, 1.0, &device);
        inputs.target_embedding = Tensor::zeros([4, 5], &device);

        let err = aligner.compute(inputs, None).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_every_strategy_yields_finite_loss() {
        let device = Default::default();
        for name in ModelName::ALL {
            let cfg = config(name);
            let model = crate::model::UdaModel::<TestBackend>::new(&cfg, &device);
            let mut aligner = DomainAligner::<TestBackend>::from_config(&cfg, 1, &device).unwrap();
            let loss = aligner
                .compute(
                    inputs::<TestBackend>(6, 6, 3, 0.5, &device),
                    model.discriminator.as_ref(),
                )
                .unwrap();
            let value = scalar(&loss);
            assert!(value.is_finite(), "{name} produced {value}");
            assert!(value >= -1e-6, "{name} produced negative loss {value}");
            assert_eq!(loss.discriminator_accuracy.is_some(), name.is_adversarial());
        }
    }

    #[test]
    fn test_adversarial_without_discriminator() {
        let device = Default::default();
        let mut aligner =
            DomainAligner::<TestBackend>::from_config(&config(ModelName::Dann), 0, &device).unwrap();
        let result = aligner.compute(inputs::<TestBackend>(4, 6, 3, 1.0, &device), None);
        assert!(matches!(result, Err(Error::Model(_))));
    }
}
