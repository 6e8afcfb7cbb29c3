//! Sum-of-squares loss.
//!
//! `compute` sums squared differences down column 0, the regression head.
//! The derivative covers the whole prediction tensor: `2 * diff / batch`.

use crate::tensor::{DType, Tensor, Value};

#[derive(Debug, Clone, Default)]
pub struct SquareLoss {
    derivative: Option<Tensor>,
}

impl SquareLoss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&self, pred: &Tensor, target: &Tensor) -> f32 {
        assert_eq!(pred.rows(), target.rows(), "batch size mismatch");
        let mut total = 0.0f64;
        for r in 0..pred.rows() {
            let d = pred.get(r, 0).to_f64() - target.get(r, 0).to_f64();
            total += d * d;
        }
        total as f32
    }

    pub fn derivative(&mut self, pred: &Tensor, target: &Tensor) -> &Tensor {
        let batch = target.rows();
        let mut diff = pred.sub(target);
        let inv = 2.0 / batch as f64;
        match pred.dtype() {
            DType::F32 => diff.scale_in_place(Value::F32(inv as f32)),
            DType::F64 => diff.scale_in_place(Value::F64(inv)),
            DType::I32 => panic!("square loss over integer predictions"),
        }
        &*self.derivative.insert(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn compute_sums_squared_column_zero() {
        let loss = SquareLoss::new();
        let pred = Tensor::from_f32(3, 1, &[1.0, 2.0, 3.0]);
        let target = Tensor::from_f32(3, 1, &[0.0, 2.0, 5.0]);
        // 1 + 0 + 4
        assert_abs_diff_eq!(loss.compute(&pred, &target), 5.0, epsilon = 1.0e-6);
    }

    #[test]
    fn derivative_is_scaled_difference() {
        let mut loss = SquareLoss::new();
        let pred = Tensor::from_f32(2, 1, &[1.0, 0.0]);
        let target = Tensor::from_f32(2, 1, &[0.0, 1.0]);
        let d = loss.derivative(&pred, &target);
        // 2 * diff / batch with batch = 2
        assert_eq!(d.f32_data(), &[1.0, -1.0]);
    }

    #[test]
    fn f64_path() {
        let mut loss = SquareLoss::new();
        let pred = Tensor::from_f64(2, 1, &[0.5, 0.5]);
        let target = Tensor::from_f64(2, 1, &[0.0, 1.0]);
        assert_abs_diff_eq!(loss.compute(&pred, &target), 0.5, epsilon = 1.0e-6);
        let d = loss.derivative(&pred, &target);
        assert_eq!(d.f64_data(), &[0.5, -0.5]);
    }
}
