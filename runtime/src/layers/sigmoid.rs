//! Elementwise logistic activation.

use crate::math;
use crate::tensor::{Storage, Tensor};

#[derive(Debug, Clone, Default)]
pub struct Sigmoid {
    input: Option<Tensor>,
    output: Option<Tensor>,
    gradient: Option<Tensor>,
}

fn logistic_tensor(x: &Tensor) -> Tensor {
    let data = match x.storage() {
        Storage::F32(v) => Storage::F32(v.iter().map(|&e| math::logistic_f32(e)).collect()),
        Storage::F64(v) => Storage::F64(v.iter().map(|&e| math::logistic_f64(e)).collect()),
        Storage::I32(_) => panic!("sigmoid of integer tensor"),
    };
    Tensor::from_storage(x.rows(), x.cols(), data)
}

impl Sigmoid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: &Tensor) -> Tensor {
        let y = logistic_tensor(x);
        self.input = Some(x.clone());
        self.output = Some(y.clone());
        y
    }

    /// `sigma(in) * (1 - sigma(in))`, recomputed from the cached input,
    /// multiplied elementwise into the cumulative derivative.
    pub fn backward(&mut self, cumulative: &Tensor) -> Tensor {
        let input = match &self.input {
            Some(t) => t,
            None => panic!("sigmoid backward before forward"),
        };
        let sig = logistic_tensor(input);
        let local = match sig.storage() {
            Storage::F32(v) => Tensor::from_storage(
                sig.rows(),
                sig.cols(),
                Storage::F32(v.iter().map(|&s| s * (1.0 - s)).collect()),
            ),
            Storage::F64(v) => Tensor::from_storage(
                sig.rows(),
                sig.cols(),
                Storage::F64(v.iter().map(|&s| s * (1.0 - s)).collect()),
            ),
            Storage::I32(_) => unreachable!(),
        };
        self.gradient = Some(local.clone());
        local.mul_elem(cumulative)
    }

    pub fn gradient(&self) -> Option<&Tensor> {
        self.gradient.as_ref()
    }

    pub fn cleanup(&mut self) {
        self.output = None;
    }

    pub fn reset(&mut self) {
        self.input = None;
        self.output = None;
        self.gradient = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use approx::assert_abs_diff_eq;

    #[test]
    fn forward_maps_through_logistic() {
        let mut layer = Sigmoid::new();
        let x = Tensor::from_f32(1, 3, &[0.0, 2.0, -2.0]);
        let y = layer.forward(&x);
        assert_abs_diff_eq!(y.get(0, 0).as_f32(), 0.5, epsilon = 1.0e-6);
        assert_abs_diff_eq!(y.get(0, 1).as_f32(), 0.880797, epsilon = 1.0e-4);
        assert_abs_diff_eq!(y.get(0, 2).as_f32(), 0.119203, epsilon = 1.0e-4);
    }

    #[test]
    fn backward_scales_cumulative_derivative() {
        let mut layer = Sigmoid::new();
        let x = Tensor::from_f32(1, 2, &[0.0, 0.0]);
        let _ = layer.forward(&x);
        let cum = Tensor::from_f32(1, 2, &[1.0, 2.0]);
        let up = layer.backward(&cum);
        // sigma'(0) = 0.25
        assert_abs_diff_eq!(up.get(0, 0).as_f32(), 0.25, epsilon = 1.0e-5);
        assert_abs_diff_eq!(up.get(0, 1).as_f32(), 0.5, epsilon = 1.0e-5);
        assert!(layer.gradient().is_some());
    }
}
