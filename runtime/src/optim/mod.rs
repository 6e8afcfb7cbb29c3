//! # Optimizers

mod sgd;

pub use sgd::{LayerUpdate, SgdOptimizer};
