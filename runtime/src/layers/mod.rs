//! # Network Layers
//!
//! Layer implementations and the stack that orders them. [`LayerStack`]
//! inserts at the head, so networks are assembled from the output layer
//! back to the input layer and iterate head to tail in execution order.

use alloc::vec::Vec;

use crate::tensor::Tensor;

mod linear;
mod sigmoid;

pub use linear::Linear;
pub use sigmoid::Sigmoid;

// ============================================================================
// Layer
// ============================================================================

/// A network layer, dispatched by variant
#[derive(Debug, Clone)]
pub enum Layer {
    Linear(Linear),
    Sigmoid(Sigmoid),
}

impl Layer {
    pub fn forward(&mut self, x: &Tensor) -> Tensor {
        match self {
            Self::Linear(l) => l.forward(x),
            Self::Sigmoid(s) => s.forward(x),
        }
    }

    pub fn backward(&mut self, cumulative: &Tensor) -> Tensor {
        match self {
            Self::Linear(l) => l.backward(cumulative),
            Self::Sigmoid(s) => s.backward(cumulative),
        }
    }

    pub fn cleanup(&mut self) {
        match self {
            Self::Linear(l) => l.cleanup(),
            Self::Sigmoid(s) => s.cleanup(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Linear(l) => l.reset(),
            Self::Sigmoid(s) => s.reset(),
        }
    }

    /// Layers with parameters the optimizer updates
    #[inline(always)]
    pub fn is_trainable(&self) -> bool {
        matches!(self, Self::Linear(_))
    }

    pub fn as_linear(&self) -> Option<&Linear> {
        match self {
            Self::Linear(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_linear_mut(&mut self) -> Option<&mut Linear> {
        match self {
            Self::Linear(l) => Some(l),
            _ => None,
        }
    }
}

// ============================================================================
// LayerStack
// ============================================================================

/// Ordered collection of layers, head first.
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Insert at the head. Building a network therefore adds its layers in
    /// reverse execution order.
    pub fn push_front(&mut self, layer: Layer) {
        self.layers.insert(0, layer);
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Layer> {
        self.layers.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Layer> {
        self.layers.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// The `index`-th trainable layer, head to tail.
    pub fn linear(&self, index: usize) -> Option<&Linear> {
        self.layers.iter().filter_map(Layer::as_linear).nth(index)
    }

    /// Mutable access to the `index`-th trainable layer.
    pub fn linear_mut(&mut self, index: usize) -> Option<&mut Linear> {
        self.layers
            .iter_mut()
            .filter_map(Layer::as_linear_mut)
            .nth(index)
    }

    pub fn trainable_count(&self) -> usize {
        self.layers.iter().filter(|l| l.is_trainable()).count()
    }
}
