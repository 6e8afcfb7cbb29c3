//! Multiclass cross-entropy with integer class targets.
//!
//! Targets are an `I32` column of class indices. The loss uses the
//! logsumexp form `-pred[class] + logsumexp(row)`, so no explicit softmax
//! runs in the forward direction; the derivative is the classic
//! `softmax(row) - onehot(class)`.

use crate::math;
use crate::tensor::{DType, Storage, Tensor};

use alloc::vec;

#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss {
    derivative: Option<Tensor>,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }

    fn class_of(target: &Tensor, row: usize) -> usize {
        let class = target.get(row, 0).as_i32();
        assert!(class >= 0, "negative class index");
        class as usize
    }

    pub fn compute(&self, pred: &Tensor, target: &Tensor) -> f32 {
        assert_eq!(pred.rows(), target.rows(), "batch size mismatch");
        assert_eq!(target.dtype(), DType::I32, "class targets must be i32");
        let cols = pred.cols();
        let mut total = 0.0f64;
        match pred.storage() {
            Storage::F32(data) => {
                for r in 0..pred.rows() {
                    let class = Self::class_of(target, r);
                    assert!(class < cols, "class index out of range");
                    let row = &data[r * cols..(r + 1) * cols];
                    total += (-row[class] + math::log_sum_exp_f32(row)) as f64;
                }
            }
            Storage::F64(data) => {
                for r in 0..pred.rows() {
                    let class = Self::class_of(target, r);
                    assert!(class < cols, "class index out of range");
                    let row = &data[r * cols..(r + 1) * cols];
                    total += -row[class] + math::log_sum_exp_f64(row);
                }
            }
            Storage::I32(_) => panic!("cross-entropy over integer predictions"),
        }
        total as f32
    }

    pub fn derivative(&mut self, pred: &Tensor, target: &Tensor) -> &Tensor {
        assert_eq!(target.dtype(), DType::I32, "class targets must be i32");
        let (rows, cols) = (pred.rows(), pred.cols());
        let d = match pred.storage() {
            Storage::F32(data) => {
                let mut out = vec![0.0f32; rows * cols];
                for r in 0..rows {
                    let class = Self::class_of(target, r);
                    let span = r * cols..(r + 1) * cols;
                    math::softmax_row_f32(&data[span.clone()], &mut out[span]);
                    out[r * cols + class] -= 1.0;
                }
                Tensor::from_storage(rows, cols, Storage::F32(out))
            }
            Storage::F64(data) => {
                let mut out = vec![0.0f64; rows * cols];
                for r in 0..rows {
                    let class = Self::class_of(target, r);
                    let span = r * cols..(r + 1) * cols;
                    math::softmax_row_f64(&data[span.clone()], &mut out[span]);
                    out[r * cols + class] -= 1.0;
                }
                Tensor::from_storage(rows, cols, Storage::F64(out))
            }
            Storage::I32(_) => panic!("cross-entropy over integer predictions"),
        };
        &*self.derivative.insert(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn uniform_logits_cost_ln_k() {
        let loss = CrossEntropyLoss::new();
        let pred = Tensor::from_f32(1, 4, &[0.0, 0.0, 0.0, 0.0]);
        let target = Tensor::from_i32(1, 1, &[2]);
        assert_abs_diff_eq!(loss.compute(&pred, &target), libm::logf(4.0), epsilon = 1.0e-4);
    }

    #[test]
    fn batch_sums_per_row_losses() {
        let loss = CrossEntropyLoss::new();
        let pred = Tensor::from_f32(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        let target = Tensor::from_i32(2, 1, &[0, 1]);
        let per_row = libm::logf(1.0 + libm::expf(-2.0));
        assert_abs_diff_eq!(loss.compute(&pred, &target), 2.0 * per_row, epsilon = 1.0e-3);
    }

    #[test]
    fn derivative_is_softmax_minus_onehot() {
        let mut loss = CrossEntropyLoss::new();
        let pred = Tensor::from_f32(1, 3, &[1.0, 2.0, 3.0]);
        let target = Tensor::from_i32(1, 1, &[2]);
        let d = loss.derivative(&pred, &target).clone();
        assert_abs_diff_eq!(d.get(0, 0).as_f32(), 0.09003057, epsilon = 1.0e-4);
        assert_abs_diff_eq!(d.get(0, 1).as_f32(), 0.24472847, epsilon = 1.0e-4);
        assert_abs_diff_eq!(d.get(0, 2).as_f32(), 0.66524096 - 1.0, epsilon = 1.0e-4);
        // Rows of the derivative sum to zero
        let sum: f32 = d.f32_data().iter().sum();
        assert_abs_diff_eq!(sum, 0.0, epsilon = 1.0e-5);
    }

    #[test]
    #[should_panic(expected = "class targets must be i32")]
    fn float_targets_are_rejected() {
        let loss = CrossEntropyLoss::new();
        let pred = Tensor::from_f32(1, 2, &[0.0, 0.0]);
        let target = Tensor::from_f32(1, 1, &[1.0]);
        let _ = loss.compute(&pred, &target);
    }
}
