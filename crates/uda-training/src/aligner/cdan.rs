//! CDAN: adversarial alignment conditioned on classifier predictions.
//!
//! The discriminator sees the outer product of the (detached) softmax
//! prediction and the embedding, or its randomized low-rank projection
//! `(f R_f) * (g R_g) / sqrt(m)` when the full product would be too wide.
//! With entropy conditioning each sample is weighted by `1 + exp(-H(g))`,
//! rescaled so the weights average to one over the joint batch.

use burn::tensor::{activation::softmax, backend::Backend, Tensor, TensorData};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use uda_core::{CdanParams, Error, Result};

use super::{
    bce_with_logits, binary_accuracy, check_discriminator, domain_targets, multilinear_map,
    AlignmentInputs, AlignmentLoss,
};
use crate::grl::reverse_gradient;
use crate::model::DomainDiscriminator;

const ENTROPY_EPS: f64 = 1e-5;

/// Fixed random projections of the randomized multilinear map
#[derive(Debug, Clone)]
struct RandomProjection<B: Backend> {
    features: Tensor<B, 2>,
    predictions: Tensor<B, 2>,
    output_dim: usize,
}

impl<B: Backend> RandomProjection<B> {
    fn new(
        feature_dim: usize,
        num_classes: usize,
        output_dim: usize,
        seed: u64,
        device: &B::Device,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut draw = |rows: usize| -> Tensor<B, 2> {
            let values: Vec<f32> = (0..rows * output_dim)
                .map(|_| Distribution::<f32>::sample(&StandardNormal, &mut rng))
                .collect();
            Tensor::from_floats(TensorData::new(values, [rows, output_dim]), device)
        };
        let features = draw(feature_dim);
        let predictions = draw(num_classes);
        Self {
            features,
            predictions,
            output_dim,
        }
    }

    fn forward(&self, features: Tensor<B, 2>, predictions: Tensor<B, 2>) -> Tensor<B, 2> {
        let f = features.matmul(self.features.clone());
        let g = predictions.matmul(self.predictions.clone());
        (f * g).div_scalar((self.output_dim as f64).sqrt())
    }
}

/// Conditional adversarial aligner
#[derive(Debug)]
pub struct CdanAligner<B: Backend> {
    projection: Option<RandomProjection<B>>,
    entropy_conditioning: bool,
}

impl<B: Backend> CdanAligner<B> {
    pub fn new(
        params: &CdanParams,
        feature_dim: usize,
        num_classes: usize,
        seed: u64,
        device: &B::Device,
    ) -> Result<Self> {
        let projection = if params.randomized {
            if params.randomized_dim == 0 {
                return Err(Error::Configuration(
                    "cdan.randomized_dim must be positive".to_string(),
                ));
            }
            Some(RandomProjection::new(
                feature_dim,
                num_classes,
                params.randomized_dim,
                seed,
                device,
            ))
        } else {
            None
        };

        Ok(Self {
            projection,
            entropy_conditioning: params.entropy_conditioning,
        })
    }

    /// Width of the conditioned discriminator input
    pub fn conditioned_dim(&self, feature_dim: usize, num_classes: usize) -> usize {
        match &self.projection {
            Some(projection) => projection.output_dim,
            None => feature_dim * num_classes,
        }
    }

    pub(super) fn compute(
        &self,
        inputs: AlignmentInputs<B>,
        discriminator: &DomainDiscriminator<B>,
    ) -> Result<AlignmentLoss<B>> {
        let [n_s, d] = inputs.source_embedding.dims();
        let [n_t, _] = inputs.target_embedding.dims();
        let [_, c] = inputs.source_logits.dims();
        check_discriminator(discriminator, self.conditioned_dim(d, c))?;
        let device = inputs.source_embedding.device();

        let features = Tensor::cat(vec![inputs.source_embedding, inputs.target_embedding], 0);
        let logits = Tensor::cat(vec![inputs.source_logits, inputs.target_logits], 0);
        let predictions = softmax(logits, 1).detach();

        let conditioned = match &self.projection {
            Some(projection) => projection.forward(features, predictions.clone()),
            None => multilinear_map(predictions.clone(), features),
        };
        let reversed = reverse_gradient(conditioned, inputs.reversal);
        let domain_logits = discriminator.forward(reversed).reshape([n_s + n_t]);
        let targets = domain_targets::<B>(n_s, n_t, &device);

        let weights = self
            .entropy_conditioning
            .then(|| entropy_weights(predictions));

        let accuracy = binary_accuracy(domain_logits.clone(), targets.clone());
        Ok(AlignmentLoss {
            loss: bce_with_logits(domain_logits, targets, weights),
            discriminator_accuracy: Some(accuracy),
        })
    }
}

/// `1 + exp(-H)` per row, normalized to mean one
fn entropy_weights<B: Backend>(predictions: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, _] = predictions.dims();
    let entropy = (predictions.clone() * predictions.add_scalar(ENTROPY_EPS).log())
        .sum_dim(1)
        .neg()
        .reshape([n]);
    let weights = entropy.neg().exp().add_scalar(1.0);
    let total = weights.clone().sum();
    (weights / total).mul_scalar(n as f64).detach()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{inputs, scalar};
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn params(randomized: bool, entropy_conditioning: bool) -> CdanParams {
        CdanParams {
            randomized,
            randomized_dim: 32,
            entropy_conditioning,
        }
    }

    #[test]
    fn test_multilinear_conditioning() {
        let device = Default::default();
        let aligner = CdanAligner::<TestBackend>::new(&params(false, false), 6, 3, 0, &device).unwrap();
        assert_eq!(aligner.conditioned_dim(6, 3), 18);

        let discriminator = DomainDiscriminator::new(18, 16, 1, &device);
        let loss = aligner
            .compute(inputs::<TestBackend>(8, 6, 3, 1.0, &device), &discriminator)
            .unwrap();
        assert!(scalar(&loss).is_finite());
        assert!(scalar(&loss) > 0.0);
    }

    #[test]
    fn test_randomized_conditioning_with_entropy() {
        let device = Default::default();
        let aligner = CdanAligner::<TestBackend>::new(&params(true, true), 6, 3, 7, &device).unwrap();
        assert_eq!(aligner.conditioned_dim(6, 3), 32);

        let discriminator = DomainDiscriminator::new(32, 16, 1, &device);
        let loss = aligner
            .compute(inputs::<TestBackend>(8, 6, 3, 1.0, &device), &discriminator)
            .unwrap();
        assert!(scalar(&loss).is_finite());
        assert!((0.0..=1.0).contains(&loss.discriminator_accuracy.unwrap()));
    }

    #[test]
    fn test_random_projection_is_seeded() {
        let device = Default::default();
        let a = RandomProjection::<TestBackend>::new(4, 2, 8, 3, &device);
        let b = RandomProjection::<TestBackend>::new(4, 2, 8, 3, &device);
        let a = a.features.into_data().to_vec::<f32>().unwrap();
        let b = b.features.into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_entropy_weights_favor_confident_rows() {
        let device = Default::default();
        let predictions =
            Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [0.5, 0.5]], &device);
        let weights = entropy_weights(predictions).into_data().to_vec::<f32>().unwrap();
        assert!(weights[0] > weights[1]);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_random_dim_rejected() {
        let device = Default::default();
        let mut p = params(true, false);
        p.randomized_dim = 0;
        assert!(CdanAligner::<TestBackend>::new(&p, 4, 2, 0, &device).is_err());
    }
}
