//! # Loss Functions
//!
//! Training objectives with cached derivative tensors. `compute` returns
//! the scalar loss over a batch; `derivative` produces the gradient w.r.t.
//! the prediction that seeds the backward pass, cached inside the loss so
//! repeated steps reuse the allocation.

use crate::tensor::Tensor;

mod binary_cross_entropy;
mod cross_entropy;
mod square;

pub use binary_cross_entropy::BinaryCrossEntropyLoss;
pub use cross_entropy::CrossEntropyLoss;
pub use square::SquareLoss;

/// A training objective, dispatched by variant
#[derive(Debug, Clone)]
pub enum Loss {
    Square(SquareLoss),
    BinaryCrossEntropy(BinaryCrossEntropyLoss),
    CrossEntropy(CrossEntropyLoss),
}

impl Loss {
    pub fn square() -> Self {
        Self::Square(SquareLoss::new())
    }

    pub fn binary_cross_entropy() -> Self {
        Self::BinaryCrossEntropy(BinaryCrossEntropyLoss::new())
    }

    pub fn cross_entropy() -> Self {
        Self::CrossEntropy(CrossEntropyLoss::new())
    }

    /// Scalar batch loss.
    pub fn compute(&self, pred: &Tensor, target: &Tensor) -> f32 {
        match self {
            Self::Square(l) => l.compute(pred, target),
            Self::BinaryCrossEntropy(l) => l.compute(pred, target),
            Self::CrossEntropy(l) => l.compute(pred, target),
        }
    }

    /// Gradient of the loss w.r.t. `pred`, cached until the next call.
    pub fn derivative(&mut self, pred: &Tensor, target: &Tensor) -> &Tensor {
        match self {
            Self::Square(l) => l.derivative(pred, target),
            Self::BinaryCrossEntropy(l) => l.derivative(pred, target),
            Self::CrossEntropy(l) => l.derivative(pred, target),
        }
    }

    /// Square loss drives the optimizer's loss tracking; the others do not.
    pub fn tracks_loss(&self) -> bool {
        matches!(self, Self::Square(_))
    }
}
