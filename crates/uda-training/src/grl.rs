//! Gradient reversal.
//!
//! The forward pass is the identity; the backward pass multiplies the
//! incoming gradient by `-lambda`. It is built from a detached copy:
//! `detach(x) + (x - detach(x)) * -lambda`. Only the second term carries a
//! gradient, scaled by `-lambda`.
//!
//! For finite inputs the second term is exactly zero and the forward value
//! is `x` bit for bit. An infinite input yields NaN, since `inf - inf` is
//! NaN; a loss built on it is caught by the divergence check.

use burn::tensor::{backend::Backend, Tensor};

/// Applies gradient reversal with coefficient `lambda`
pub fn reverse_gradient<B: Backend, const D: usize>(input: Tensor<B, D>, lambda: f64) -> Tensor<B, D> {
    let detached = input.clone().detach();
    let routed = (input - detached.clone()).mul_scalar(-lambda);
    detached + routed
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_forward_is_identity() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 3>::random(
            [2, 3, 5],
            burn::tensor::Distribution::Normal(0.0, 10.0),
            &device,
        );
        let output = reverse_gradient(input.clone(), 0.7);

        let a = input.into_data().to_vec::<f32>().unwrap();
        let b = output.into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_forward_identity_for_any_rank() {
        let device = Default::default();
        let values = Tensor::<NdArray, 1>::from_floats([1.5, -3.25, 0.0, 1e-7], &device);
        let out = reverse_gradient(values.clone(), 3.0);
        assert_eq!(
            values.into_data().to_vec::<f32>().unwrap(),
            out.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_backward_is_negated_and_scaled() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, -1.0], &device).require_grad();
        let lambda = 0.5;

        // d/dx sum(3 * grl(x)) = -lambda * 3
        let loss = reverse_gradient(x.clone(), lambda).mul_scalar(3.0).sum();
        let grads = loss.backward();
        let grad = x.grad(&grads).unwrap().to_data().to_vec::<f32>().unwrap();

        for g in grad {
            assert!((g + 1.5).abs() < 1e-6, "unexpected gradient {g}");
        }
    }

    #[test]
    fn test_zero_lambda_blocks_gradient() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([4.0, 5.0], &device).require_grad();
        let loss = reverse_gradient(x.clone(), 0.0).sum();
        let grads = loss.backward();
        let grad = x.grad(&grads).unwrap().to_data().to_vec::<f32>().unwrap();
        assert_eq!(grad, vec![0.0, 0.0]);
    }

    #[test]
    fn test_infinite_input_becomes_nan() {
        let device = Default::default();
        let values = Tensor::<NdArray, 1>::from_floats([f32::INFINITY, 2.0], &device);
        let out = reverse_gradient(values, 1.0).into_data().to_vec::<f32>().unwrap();
        assert!(out[0].is_nan());
        assert_eq!(out[1], 2.0);
    }
}
