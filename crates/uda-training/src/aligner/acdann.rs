//! ACDANN: label-conditioned adversarial alignment with in-domain mixup.
//!
//! Source rows are conditioned on their one-hot labels, target rows on the
//! classifier's softmax, sharpened to a one-hot pseudo-label when the top
//! probability reaches the confidence threshold. Each domain is then mixed
//! with a shuffled copy of itself, using one Beta(1, 1) coefficient per row
//! and one permutation shared by both domains, before the outer product is
//! fed to a two-way discriminator.

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor, TensorData},
};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution};
use uda_core::{Error, Result};

use super::{
    argmax_row, check_discriminator, host_probabilities, multilinear_map, one_hot,
    AlignmentInputs, AlignmentLoss,
};
use crate::grl::reverse_gradient;
use crate::model::DomainDiscriminator;

const SOURCE_CLASS: i64 = 1;
const TARGET_CLASS: i64 = 0;

/// Adversarial aligner conditioned on labels and pseudo-labels
#[derive(Debug)]
pub struct AcdannAligner {
    rng: ChaCha8Rng,
    mixing: Beta<f32>,
    confidence_threshold: f64,
}

impl AcdannAligner {
    pub fn new(confidence_threshold: f64, seed: u64) -> Result<Self> {
        let mixing = Beta::new(1.0, 1.0)
            .map_err(|e| Error::Configuration(format!("invalid mixup distribution: {e}")))?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            mixing,
            confidence_threshold,
        })
    }

    /// Softmax rows, replaced by one-hot rows when confident enough
    fn target_conditioning(&self, probabilities: Vec<Vec<f32>>) -> (Vec<f32>, usize) {
        let pseudo_labelled = probabilities
            .iter()
            .filter(|row| f64::from(argmax_row(row).1) >= self.confidence_threshold)
            .count();
        let values = probabilities
            .into_iter()
            .flat_map(|row| {
                let (class, confidence) = argmax_row(&row);
                if f64::from(confidence) >= self.confidence_threshold {
                    (0..row.len())
                        .map(|i| if i == class { 1.0 } else { 0.0 })
                        .collect::<Vec<f32>>()
                } else {
                    row
                }
            })
            .collect();
        (values, pseudo_labelled)
    }

    pub(super) fn compute<B: Backend>(
        &mut self,
        inputs: AlignmentInputs<B>,
        discriminator: &DomainDiscriminator<B>,
    ) -> Result<AlignmentLoss<B>> {
        let [n_s, d] = inputs.source_embedding.dims();
        let [n_t, _] = inputs.target_embedding.dims();
        let [_, c] = inputs.source_logits.dims();
        if n_s != n_t {
            return Err(Error::dimension_mismatch("ACDANN paired batch", n_s, n_t));
        }
        check_discriminator(discriminator, d * c)?;
        let n = n_s;
        let device = inputs.source_embedding.device();

        let source_condition = one_hot::<B>(&inputs.source_labels, c, &device);
        let (target_values, pseudo_labelled) =
            self.target_conditioning(host_probabilities(inputs.target_logits)?);
        let target_condition = Tensor::from_floats(TensorData::new(target_values, [n, c]), &device);
        tracing::trace!(pseudo_labelled, batch = n, "ACDANN target conditioning");

        let lambdas: Vec<f32> = (0..n).map(|_| self.mixing.sample(&mut self.rng)).collect();
        let lambda = Tensor::<B, 2>::from_floats(TensorData::new(lambdas, [n, 1]), &device);
        let mut order: Vec<i64> = (0..n as i64).collect();
        order.shuffle(&mut self.rng);
        let permutation = Tensor::<B, 1, Int>::from_data(TensorData::new(order, [n]), &device);

        let mix = |x: Tensor<B, 2>| {
            let shuffled = x.clone().select(0, permutation.clone());
            x * lambda.clone() + shuffled * lambda.clone().neg().add_scalar(1.0)
        };
        let source = multilinear_map(mix(source_condition), mix(inputs.source_embedding));
        let target = multilinear_map(mix(target_condition), mix(inputs.target_embedding));

        let joint = reverse_gradient(Tensor::cat(vec![source, target], 0), inputs.reversal);
        let logits = discriminator.forward(joint);

        let mut labels = vec![SOURCE_CLASS; n];
        labels.extend(std::iter::repeat(TARGET_CLASS).take(n));
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [2 * n]), &device);

        let correct: i64 = logits
            .clone()
            .detach()
            .argmax(1)
            .reshape([2 * n])
            .equal(targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem();
        let loss = CrossEntropyLossConfig::new().init(&device).forward(logits, targets);

        Ok(AlignmentLoss {
            loss,
            discriminator_accuracy: Some(correct as f64 / (2 * n) as f64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{inputs, scalar};
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_confident_rows_become_one_hot() {
        let aligner = AcdannAligner::new(0.9, 0).unwrap();
        let (values, count) =
            aligner.target_conditioning(vec![vec![0.95, 0.05], vec![0.6, 0.4]]);
        assert_eq!(count, 1);
        assert_eq!(values, vec![1.0, 0.0, 0.6, 0.4]);
    }

    #[test]
    fn test_loss_is_finite() {
        let device = Default::default();
        let discriminator = DomainDiscriminator::<TestBackend>::new(12, 16, 2, &device);
        let mut aligner = AcdannAligner::new(0.5, 3).unwrap();
        let loss = aligner
            .compute(inputs::<TestBackend>(6, 4, 3, 1.0, &device), &discriminator)
            .unwrap();
        assert!(scalar(&loss).is_finite());
        assert!((0.0..=1.0).contains(&loss.discriminator_accuracy.unwrap()));
    }

    #[test]
    fn test_unequal_batches_rejected() {
        let device = Default::default();
        let discriminator = DomainDiscriminator::<TestBackend>::new(12, 16, 2, &device);
        let mut batch = inputs::<TestBackend>(6, 4, 3, 1.0, &device);
        batch.target_embedding = batch.target_embedding.slice([0..4, 0..4]);
        batch.target_logits = batch.target_logits.slice([0..4, 0..3]);

        let mut aligner = AcdannAligner::new(0.9, 0).unwrap();
        assert!(matches!(
            aligner.compute(batch, &discriminator),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
