//! Deep CORAL: match second-order statistics of the two domains.

use burn::tensor::{backend::Backend, Tensor};
use uda_core::{Error, Result};

use super::{AlignmentInputs, AlignmentLoss};

/// Covariance alignment. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoralAligner;

impl CoralAligner {
    pub fn new() -> Self {
        Self
    }

    pub(super) fn compute<B: Backend>(&self, inputs: AlignmentInputs<B>) -> Result<AlignmentLoss<B>> {
        let loss = coral_loss(inputs.source_embedding, inputs.target_embedding)?;
        Ok(AlignmentLoss {
            loss,
            discriminator_accuracy: None,
        })
    }
}

/// `||C_s - C_t||_F^2 / (4 d^2)` with unbiased covariances
pub fn coral_loss<B: Backend>(source: Tensor<B, 2>, target: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
    let [n_s, d] = source.dims();
    let [n_t, d_t] = target.dims();
    if d != d_t {
        return Err(Error::dimension_mismatch("CORAL feature width", d, d_t));
    }
    if n_s < 2 || n_t < 2 {
        return Err(Error::dimension_mismatch("CORAL rows per domain", 2, n_s.min(n_t)));
    }

    let diff = covariance(source) - covariance(target);
    Ok((diff.clone() * diff).sum().div_scalar((4 * d * d) as f64))
}

fn covariance<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, _] = x.dims();
    let centered = x.clone() - x.mean_dim(0);
    centered
        .clone()
        .transpose()
        .matmul(centered)
        .div_scalar((n - 1) as f64)
}
