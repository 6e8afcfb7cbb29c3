//! Fully connected layer.
//!
//! Weights are stored `out_features x in_features`, bias `1 x out_features`.
//! `forward` computes `x * W^T + bias` (bias tiled down the batch) and
//! caches both operands for the backward pass; `backward` leaves the
//! parameter gradients cached for the optimizer and returns the derivative
//! with respect to the layer input.

use crate::math::Rng;
use crate::tensor::{DType, Tensor, Value};

/// Quantization steps for fan-in scaled random init
pub(crate) const INIT_MODULA: i32 = 100;

#[derive(Debug, Clone)]
pub struct Linear {
    weights: Tensor,
    bias: Tensor,
    input: Option<Tensor>,
    output: Option<Tensor>,
    weight_grad: Option<Tensor>,
    bias_grad: Option<Tensor>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, dtype: DType, rng: &mut Rng) -> Self {
        assert!(in_features > 0 && out_features > 0, "empty linear layer");
        let mut weights = Tensor::zeros(dtype, out_features, in_features);
        let mut bias = Tensor::zeros(dtype, 1, out_features);
        weights.set_random(rng, INIT_MODULA);
        bias.set_random(rng, INIT_MODULA);
        Self {
            weights,
            bias,
            input: None,
            output: None,
            weight_grad: None,
            bias_grad: None,
        }
    }

    #[inline(always)]
    pub fn in_features(&self) -> usize {
        self.weights.cols()
    }

    #[inline(always)]
    pub fn out_features(&self) -> usize {
        self.weights.rows()
    }

    #[inline(always)]
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    #[inline(always)]
    pub fn weights_mut(&mut self) -> &mut Tensor {
        &mut self.weights
    }

    #[inline(always)]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    #[inline(always)]
    pub fn bias_mut(&mut self) -> &mut Tensor {
        &mut self.bias
    }

    #[inline(always)]
    pub fn weight_grad(&self) -> Option<&Tensor> {
        self.weight_grad.as_ref()
    }

    #[inline(always)]
    pub fn bias_grad(&self) -> Option<&Tensor> {
        self.bias_grad.as_ref()
    }

    /// Replace the weight tensor, e.g. when loading saved parameters.
    pub fn set_weights(&mut self, weights: Tensor) {
        assert_eq!(
            (weights.rows(), weights.cols()),
            (self.weights.rows(), self.weights.cols()),
            "weight shape mismatch"
        );
        self.weights = weights;
    }

    /// Replace the bias tensor.
    pub fn set_bias(&mut self, bias: Tensor) {
        assert_eq!(
            (bias.rows(), bias.cols()),
            (self.bias.rows(), self.bias.cols()),
            "bias shape mismatch"
        );
        self.bias = bias;
    }

    pub fn forward(&mut self, x: &Tensor) -> Tensor {
        assert_eq!(x.cols(), self.in_features(), "input feature count mismatch");
        let wt = self.weights.transpose();
        let mut y = x.matmul(&wt);
        let tiled_bias = self.bias.repmat(y.rows(), 1);
        y.add_in_place(&tiled_bias);
        self.input = Some(x.clone());
        self.output = Some(y.clone());
        y
    }

    /// Consume the cumulative derivative from the next layer, cache the
    /// parameter gradients, and return the derivative w.r.t. the input.
    pub fn backward(&mut self, cumulative: &Tensor) -> Tensor {
        let input = match &self.input {
            Some(t) => t,
            None => panic!("linear backward before forward"),
        };
        assert_eq!(cumulative.cols(), self.out_features(), "derivative width mismatch");
        self.weight_grad = Some(cumulative.transpose().matmul(input));
        self.bias_grad = Some(cumulative.sum_cols());
        cumulative.matmul(&self.weights)
    }

    /// Drop the cached activation.
    pub fn cleanup(&mut self) {
        self.output = None;
    }

    /// Zero parameters and drop every cache. Retraining needs a fresh
    /// [`set_random`](Tensor::set_random) pass over the parameters.
    pub fn reset(&mut self) {
        self.weights.fill(Value::zero(self.weights.dtype()));
        self.bias.fill(Value::zero(self.bias.dtype()));
        self.input = None;
        self.output = None;
        self.weight_grad = None;
        self.bias_grad = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_linear() -> Linear {
        let mut rng = Rng::new(1);
        let mut layer = Linear::new(2, 2, DType::F32, &mut rng);
        layer.set_weights(Tensor::from_f32(2, 2, &[1.0, 2.0, 3.0, 4.0]));
        layer.set_bias(Tensor::from_f32(1, 2, &[0.5, -0.5]));
        layer
    }

    #[test]
    fn forward_is_affine() {
        let mut layer = fixed_linear();
        let x = Tensor::from_f32(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let y = layer.forward(&x);
        // Row i of y is x_i * W^T + b
        assert_eq!(y.f32_data(), &[1.5, 2.5, 2.5, 3.5]);
    }

    #[test]
    fn backward_produces_parameter_gradients() {
        let mut layer = fixed_linear();
        let x = Tensor::from_f32(1, 2, &[1.0, 2.0]);
        let _ = layer.forward(&x);
        let cum = Tensor::from_f32(1, 2, &[1.0, 1.0]);
        let upstream = layer.backward(&cum);
        // dL/dW = cum^T * x
        assert_eq!(layer.weight_grad().unwrap().f32_data(), &[1.0, 2.0, 1.0, 2.0]);
        // dL/db = column sums of cum
        assert_eq!(layer.bias_grad().unwrap().f32_data(), &[1.0, 1.0]);
        // dL/dx = cum * W
        assert_eq!(upstream.f32_data(), &[4.0, 6.0]);
    }

    #[test]
    #[should_panic(expected = "backward before forward")]
    fn backward_requires_cached_input() {
        let mut layer = fixed_linear();
        let cum = Tensor::from_f32(1, 2, &[1.0, 1.0]);
        let _ = layer.backward(&cum);
    }

    #[test]
    fn reset_zeroes_parameters_and_caches() {
        let mut rng = Rng::new(7);
        let mut layer = Linear::new(3, 2, DType::F32, &mut rng);
        let x = Tensor::from_f32(1, 3, &[0.1, 0.2, 0.3]);
        let _ = layer.forward(&x);
        layer.reset();
        assert!(layer.weight_grad().is_none());
        assert!(layer.weights().f32_data().iter().all(|&w| w == 0.0));
        assert!(layer.bias().f32_data().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn set_random_respects_fan_in_range() {
        let mut rng = Rng::new(7);
        let mut layer = Linear::new(3, 2, DType::F32, &mut rng);
        layer.reset();
        layer.weights_mut().set_random(&mut rng, INIT_MODULA);
        let range = crate::math::fast_sqrt_f32(1.0 / 2.0);
        assert!(layer.weights().f32_data().iter().any(|&w| w != 0.0));
        for &w in layer.weights().f32_data() {
            assert!(w >= -range && w < range);
        }
    }
}
