//! DDTLN: non-adversarial transfer with multi-kernel MMD and a margin term.
//!
//! The loss has three parts:
//! - marginal MK-MMD between the source and target embeddings
//! - class-conditional MK-MMD using source labels and confident target
//!   pseudo-labels, averaged over classes seen in both domains
//! - a contrastive margin on L2-normalized embeddings that pulls together
//!   same-class source/target pairs and pushes apart different-class ones
//!
//! All MMD estimates are the biased (V-statistic) form `w^T K w`, which is
//! non-negative for the Gaussian kernels used here.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use uda_core::{DdtlnParams, Result};

use super::{argmax_row, host_probabilities, AlignmentInputs, AlignmentLoss};

const BANDWIDTH_EPS: f64 = 1e-6;
const NORM_EPS: f64 = 1e-8;

/// Discriminative transfer aligner
#[derive(Debug, Clone)]
pub struct DdtlnAligner {
    params: DdtlnParams,
}

impl DdtlnAligner {
    pub fn new(params: DdtlnParams) -> Self {
        Self { params }
    }

    pub(super) fn compute<B: Backend>(&self, inputs: AlignmentInputs<B>) -> Result<AlignmentLoss<B>> {
        let [n_s, _] = inputs.source_embedding.dims();
        let [n_t, _] = inputs.target_embedding.dims();
        let [_, c] = inputs.source_logits.dims();
        let device = inputs.source_embedding.device();

        let pseudo_labels: Vec<Option<usize>> = host_probabilities(inputs.target_logits)?
            .iter()
            .map(|row| {
                let (class, confidence) = argmax_row(row);
                (f64::from(confidence) >= self.params.confidence_threshold).then_some(class)
            })
            .collect();

        let joint = Tensor::cat(
            vec![inputs.source_embedding.clone(), inputs.target_embedding.clone()],
            0,
        );
        let kernel = self.kernel_matrix(joint);

        let marginal = mmd(kernel.clone(), marginal_weights(n_s, n_t), 1, &device);

        let mut loss = marginal;
        if let Some((weights, classes)) =
            conditional_weights(&inputs.source_labels, &pseudo_labels, c)
        {
            let conditional = mmd(kernel, weights, classes, &device).div_scalar(classes as f64);
            loss = loss + conditional.mul_scalar(self.params.conditional_weight);
        }

        if self.params.margin_weight > 0.0 {
            if let Some(margin) = self.margin_loss(
                inputs.source_embedding,
                inputs.target_embedding,
                &inputs.source_labels,
                &pseudo_labels,
            ) {
                loss = loss + margin.mul_scalar(self.params.margin_weight);
            }
        }

        Ok(AlignmentLoss {
            loss,
            discriminator_accuracy: None,
        })
    }

    /// Sum of Gaussian kernels whose bandwidths are multiples of the mean
    /// pairwise squared distance
    fn kernel_matrix<B: Backend>(&self, joint: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, _] = joint.dims();
        let distances = pairwise_sq_distances(joint.clone(), joint);
        let off_diagonal = (n * n - n).max(1) as f64;
        let bandwidth = distances
            .clone()
            .detach()
            .sum()
            .div_scalar(off_diagonal)
            .add_scalar(BANDWIDTH_EPS)
            .reshape([1, 1]);

        self.params
            .kernel_multipliers
            .iter()
            .map(|&m| {
                let scale = bandwidth.clone().mul_scalar(m);
                (distances.clone().neg() / scale).exp()
            })
            .reduce(|acc, k| acc + k)
            .unwrap_or_else(|| distances.zeros_like())
    }

    /// Mean squared distance of same-class pairs plus mean squared hinge
    /// `max(0, margin - dist)` of different-class pairs
    fn margin_loss<B: Backend>(
        &self,
        source: Tensor<B, 2>,
        target: Tensor<B, 2>,
        source_labels: &[usize],
        pseudo_labels: &[Option<usize>],
    ) -> Option<Tensor<B, 1>> {
        let n_s = source_labels.len();
        let n_t = pseudo_labels.len();
        let device = source.device();

        let mut same = vec![0.0f32; n_s * n_t];
        let mut different = vec![0.0f32; n_s * n_t];
        for (i, &label) in source_labels.iter().enumerate() {
            for (j, pseudo) in pseudo_labels.iter().enumerate() {
                match pseudo {
                    Some(class) if *class == label => same[i * n_t + j] = 1.0,
                    Some(_) => different[i * n_t + j] = 1.0,
                    None => {}
                }
            }
        }
        let same_count: f32 = same.iter().sum();
        let different_count: f32 = different.iter().sum();
        if same_count + different_count == 0.0 {
            return None;
        }

        let distances = pairwise_sq_distances(l2_normalize(source), l2_normalize(target))
            .add_scalar(NORM_EPS)
            .sqrt();
        let same = Tensor::<B, 2>::from_floats(TensorData::new(same, [n_s, n_t]), &device);
        let different = Tensor::<B, 2>::from_floats(TensorData::new(different, [n_s, n_t]), &device);

        let pull = (distances.clone().powf_scalar(2.0) * same).sum();
        let hinge = distances.neg().add_scalar(self.params.margin).clamp_min(0.0);
        let push = (hinge.powf_scalar(2.0) * different).sum();

        let mut loss = pull.div_scalar(f64::from(same_count.max(1.0)));
        loss = loss + push.div_scalar(f64::from(different_count.max(1.0)));
        Some(loss)
    }
}

/// `sum(W * (K W))`, i.e. `sum_k w_k^T K w_k` over the columns of `W`
fn mmd<B: Backend>(
    kernel: Tensor<B, 2>,
    weights: Vec<f32>,
    columns: usize,
    device: &B::Device,
) -> Tensor<B, 1> {
    let [n, _] = kernel.dims();
    let w = Tensor::<B, 2>::from_floats(TensorData::new(weights, [n, columns]), device);
    (w.clone() * kernel.matmul(w)).sum()
}

fn marginal_weights(n_s: usize, n_t: usize) -> Vec<f32> {
    let mut weights = vec![1.0 / n_s as f32; n_s];
    weights.extend(std::iter::repeat(-1.0 / n_t as f32).take(n_t));
    weights
}

/// Per-class weight columns over the joint batch, for classes present in
/// both the source labels and the target pseudo-labels
fn conditional_weights(
    source_labels: &[usize],
    pseudo_labels: &[Option<usize>],
    num_classes: usize,
) -> Option<(Vec<f32>, usize)> {
    let mut source_counts = vec![0usize; num_classes];
    let mut target_counts = vec![0usize; num_classes];
    for &label in source_labels {
        source_counts[label] += 1;
    }
    for &class in pseudo_labels.iter().flatten() {
        target_counts[class] += 1;
    }

    let shared: Vec<usize> = (0..num_classes)
        .filter(|&c| source_counts[c] > 0 && target_counts[c] > 0)
        .collect();
    if shared.is_empty() {
        return None;
    }

    let k = shared.len();
    let rows = source_labels.len() + pseudo_labels.len();
    let mut weights = vec![0.0f32; rows * k];
    for (column, &class) in shared.iter().enumerate() {
        for (i, &label) in source_labels.iter().enumerate() {
            if label == class {
                weights[i * k + column] = 1.0 / source_counts[class] as f32;
            }
        }
        for (j, pseudo) in pseudo_labels.iter().enumerate() {
            if *pseudo == Some(class) {
                let row = source_labels.len() + j;
                weights[row * k + column] = -1.0 / target_counts[class] as f32;
            }
        }
    }
    Some((weights, k))
}

fn pairwise_sq_distances<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 2> {
    let a_sq = a.clone().powf_scalar(2.0).sum_dim(1);
    let b_sq = b.clone().powf_scalar(2.0).sum_dim(1).transpose();
    let cross = a.matmul(b.transpose()).mul_scalar(2.0);
    (a_sq + b_sq - cross).clamp_min(0.0)
}

fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).add_scalar(NORM_EPS).sqrt();
    x / norm
}
