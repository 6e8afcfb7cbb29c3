//! # Layer-Graph Autodiff
//!
//! Reverse-mode differentiation over a [`LayerStack`]. The forward pass
//! threads one activation head to tail while each layer caches what its
//! backward pass needs; the backward pass threads a single cumulative
//! derivative tail to head, leaving parameter gradients cached inside the
//! trainable layers for the optimizer to consume.

use crate::layers::LayerStack;
use crate::tensor::Tensor;

/// Run the network on `input`, returning the final activation.
pub fn forward(stack: &mut LayerStack, input: &Tensor) -> Tensor {
    assert!(!stack.is_empty(), "forward through empty layer stack");
    let mut current = input.clone();
    for layer in stack.iter_mut() {
        current = layer.forward(&current);
    }
    current
}

/// Propagate the loss derivative back through every layer.
pub fn backward(stack: &mut LayerStack, loss_derivative: &Tensor) {
    let mut cumulative = loss_derivative.clone();
    for layer in stack.iter_mut().rev() {
        cumulative = layer.backward(&cumulative);
    }
}

/// Drop cached layer outputs after an optimizer step.
pub fn cleanup(stack: &mut LayerStack) {
    for layer in stack.iter_mut() {
        layer.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Layer, Linear, Sigmoid};
    use crate::math::Rng;
    use crate::tensor::{DType, Tensor, Value};
    use approx::assert_abs_diff_eq;

    fn tiny_net(rng: &mut Rng) -> LayerStack {
        let mut stack = LayerStack::new();
        stack.push_front(Layer::Sigmoid(Sigmoid::new()));
        stack.push_front(Layer::Linear(Linear::new(3, 2, DType::F32, rng)));
        stack.push_front(Layer::Sigmoid(Sigmoid::new()));
        stack.push_front(Layer::Linear(Linear::new(2, 3, DType::F32, rng)));
        stack
    }

    /// Scalar objective 0.5 * sum((pred - target)^2) and its derivative.
    fn objective(pred: &Tensor, target: &Tensor) -> (f32, Tensor) {
        let diff = pred.sub(target);
        let loss = 0.5
            * diff
                .f32_data()
                .iter()
                .map(|&d| d * d)
                .sum::<f32>();
        (loss, diff)
    }

    #[test]
    fn forward_composes_layers() {
        let mut rng = Rng::new(11);
        let mut stack = tiny_net(&mut rng);
        let x = Tensor::from_f32(1, 2, &[0.3, -0.7]);
        let y = forward(&mut stack, &x);
        assert_eq!((y.rows(), y.cols()), (1, 2));
        // Final activation is a sigmoid output
        assert!(y.f32_data().iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = Rng::new(21);
        let mut stack = tiny_net(&mut rng);
        let x = Tensor::from_f32(1, 2, &[0.8, -0.4]);
        let target = Tensor::from_f32(1, 2, &[1.0, 0.0]);

        let pred = forward(&mut stack, &x);
        let (_, dloss) = objective(&pred, &target);
        backward(&mut stack, &dloss);

        // Perturb each weight of the first linear layer and compare the
        // analytic gradient against a central difference.
        let eps = 1.0e-3f32;
        let grads = stack.linear(0).unwrap().weight_grad().unwrap().clone();
        for r in 0..3 {
            for c in 0..2 {
                let w0 = stack.linear(0).unwrap().weights().get(r, c).as_f32();

                let mut eval_at = |w: f32, stack: &mut LayerStack| {
                    stack
                        .linear_mut(0)
                        .unwrap()
                        .weights_mut()
                        .set(r, c, Value::F32(w));
                    let p = forward(stack, &x);
                    objective(&p, &target).0
                };
                let plus = eval_at(w0 + eps, &mut stack);
                let minus = eval_at(w0 - eps, &mut stack);
                eval_at(w0, &mut stack);

                let numeric = (plus - minus) / (2.0 * eps);
                assert_abs_diff_eq!(grads.get(r, c).as_f32(), numeric, epsilon = 2.0e-3);
            }
        }
    }

    #[test]
    fn cleanup_drops_cached_outputs_but_backward_still_works() {
        let mut rng = Rng::new(5);
        let mut stack = tiny_net(&mut rng);
        let x = Tensor::from_f32(2, 2, &[0.1, 0.2, 0.3, 0.4]);
        let pred = forward(&mut stack, &x);
        cleanup(&mut stack);
        // Backward reads cached inputs, which cleanup leaves in place.
        let dloss = Tensor::from_f32(2, 2, &[0.5; 4]);
        backward(&mut stack, &dloss);
        assert!(stack.linear(0).unwrap().weight_grad().is_some());
        assert_eq!(pred.rows(), 2);
    }

    #[test]
    #[should_panic(expected = "empty layer stack")]
    fn forward_rejects_empty_stack() {
        let mut stack = LayerStack::new();
        let x = Tensor::from_f32(1, 1, &[1.0]);
        let _ = forward(&mut stack, &x);
    }
}
