//! Binary cross-entropy over column 0.
//!
//! Log arguments are shifted by a small epsilon so labels of exactly 0 or 1
//! never reach `ln(0)`. The derivative is the logistic-shaped
//! `pred * (1 - pred)`, an approximation kept for parity with the
//! established training behavior.

use crate::math;
use crate::tensor::{DType, Tensor, Value};

/// Guard against ln(0); the decimal value of the historical `10e-7` literal.
const EPSILON: f64 = 1.0e-6;

#[derive(Debug, Clone, Default)]
pub struct BinaryCrossEntropyLoss {
    derivative: Option<Tensor>,
}

impl BinaryCrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&self, pred: &Tensor, target: &Tensor) -> f32 {
        assert_eq!(pred.rows(), target.rows(), "batch size mismatch");
        let mut total = 0.0f64;
        for r in 0..pred.rows() {
            let p = pred.get(r, 0).to_f64();
            let t = target.get(r, 0).to_f64();
            total -= p * math::ln_f64(t + EPSILON) + (1.0 - p) * math::ln_f64(1.0 - t + EPSILON);
        }
        total as f32
    }

    /// Writes `pred * (1 - pred)` down column 0 of the cached derivative;
    /// remaining columns stay zero.
    pub fn derivative(&mut self, pred: &Tensor, _target: &Tensor) -> &Tensor {
        let mut d = Tensor::zeros(pred.dtype(), pred.rows(), pred.cols());
        for r in 0..pred.rows() {
            let p = pred.get(r, 0).to_f64();
            let v = p * (1.0 - p);
            match pred.dtype() {
                DType::F32 => d.set(r, 0, Value::F32(v as f32)),
                DType::F64 => d.set(r, 0, Value::F64(v)),
                DType::I32 => panic!("binary cross-entropy over integer predictions"),
            }
        }
        &*self.derivative.insert(d)
    }
}
