//! DANN: adversarial alignment of the marginal feature distributions.

use burn::tensor::{backend::Backend, Tensor};
use uda_core::Result;

use super::{
    bce_with_logits, binary_accuracy, check_discriminator, domain_targets, AlignmentInputs,
    AlignmentLoss,
};
use crate::grl::reverse_gradient;
use crate::model::DomainDiscriminator;

/// Domain-adversarial aligner. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct DannAligner;

impl DannAligner {
    pub fn new() -> Self {
        Self
    }

    /// Binary cross-entropy of the discriminator on reversed embeddings,
    /// source labelled 1, target labelled 0
    pub(super) fn compute<B: Backend>(
        &self,
        inputs: AlignmentInputs<B>,
        discriminator: &DomainDiscriminator<B>,
    ) -> Result<AlignmentLoss<B>> {
        let [n_s, d] = inputs.source_embedding.dims();
        let [n_t, _] = inputs.target_embedding.dims();
        check_discriminator(discriminator, d)?;
        let device = inputs.source_embedding.device();

        let features = Tensor::cat(vec![inputs.source_embedding, inputs.target_embedding], 0);
        let reversed = reverse_gradient(features, inputs.reversal);
        let logits = discriminator.forward(reversed).reshape([n_s + n_t]);
        let targets = domain_targets::<B>(n_s, n_t, &device);

        let accuracy = binary_accuracy(logits.clone(), targets.clone());
        Ok(AlignmentLoss {
            loss: bce_with_logits(logits, targets, None),
            discriminator_accuracy: Some(accuracy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{inputs, scalar};
    use super::*;
    use burn::tensor::ElementConversion;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use uda_core::Error;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_loss_and_accuracy_ranges() {
        let device = Default::default();
        let discriminator = DomainDiscriminator::<TestBackend>::new(8, 16, 1, &device);
        let loss = DannAligner::new()
            .compute(inputs::<TestBackend>(10, 8, 4, 1.0, &device), &discriminator)
            .unwrap();
        assert!(scalar(&loss) > 0.0);
        let acc = loss.discriminator_accuracy.unwrap();
        assert!((0.0..=1.0).contains(&acc));
    }

    #[test]
    fn test_encoder_gradient_is_reversed() {
        let device = Default::default();
        let discriminator = DomainDiscriminator::<TestBackend>::new(4, 8, 1, &device);
        let mut plain = inputs::<TestBackend>(6, 4, 3, 0.0, &device);
        plain.source_embedding = plain.source_embedding.require_grad();

        let mut reversed = plain.clone();
        reversed.reversal = 1.0;
        let source = plain.source_embedding.clone();

        // reversal 0 blocks the gradient entirely
        let grads = DannAligner::new()
            .compute(plain, &discriminator)
            .unwrap()
            .loss
            .backward();
        let blocked: f64 = source.grad(&grads).map(|g| g.abs().sum().into_scalar().elem()).unwrap_or(0.0);
        assert!(blocked.abs() < 1e-12);

        let grads = DannAligner::new()
            .compute(reversed, &discriminator)
            .unwrap()
            .loss
            .backward();
        let flowing: f64 = source.grad(&grads).map(|g| g.abs().sum().into_scalar().elem()).unwrap_or(0.0);
        assert!(flowing > 0.0);
    }

    #[test]
    fn test_discriminator_width_checked() {
        let device = Default::default();
        let discriminator = DomainDiscriminator::<TestBackend>::new(5, 8, 1, &device);
        let result = DannAligner::new().compute(inputs::<TestBackend>(4, 4, 2, 1.0, &device), &discriminator);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }
}
