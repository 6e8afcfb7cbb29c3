//! # Model Facade
//!
//! Owns the layer stack, loss, optimizer, and pipeline, and exposes the
//! operational surface: build from a config, feed samples, toggle between
//! training and inference, drain, reset, and persist weights. The
//! trainable state lives behind a spin mutex shared with the worker, so
//! control operations stay safe while batches are in flight.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::autodiff;
use crate::error::{SynapseError, SynapseResult};
use crate::layers::{Layer, LayerStack, Linear, Sigmoid};
use crate::loss::Loss;
use crate::math::Rng;
use crate::optim::SgdOptimizer;
use crate::pipeline::{BatchPair, ModelState, Pipeline};
use crate::tensor::{DType, Tensor, Value};
use crate::textio;

// ============================================================================
// Configuration
// ============================================================================

/// Decides whether one prediction/target pair counts as accurate during
/// inference.
pub type CorrectnessFn = fn(f32, f32) -> bool;

/// Accept predictions within 0.5 of the target, the natural predicate for
/// binary sigmoid outputs.
pub fn within_half(pred: f32, target: f32) -> bool {
    let d = pred - target;
    d < 0.5 && d > -0.5
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Feature widths, input first: `[in, hidden.., out]`. Every linear
    /// layer is followed by a sigmoid.
    pub layer_dims: Vec<usize>,
    pub learning_rate: f32,
    pub momentum: f32,
    pub batch_size: usize,
    pub objective: Loss,
    pub seed: u64,
    pub correctness: CorrectnessFn,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            layer_dims: vec![2, 3, 1],
            learning_rate: 0.1,
            momentum: 0.9,
            batch_size: 4,
            objective: Loss::square(),
            seed: 0x5eed,
            correctness: within_half,
        }
    }
}

impl ModelConfig {
    #[inline(always)]
    pub fn in_features(&self) -> usize {
        self.layer_dims[0]
    }

    #[inline(always)]
    pub fn out_features(&self) -> usize {
        self.layer_dims[self.layer_dims.len() - 1]
    }

    /// Batch buffers shaped for this network. Cross-entropy wants integer
    /// class targets; every other objective trains on f32 targets.
    fn batch_template(&self) -> BatchPair {
        let input = Tensor::zeros(DType::F32, self.batch_size, self.in_features());
        let target = match self.objective {
            Loss::CrossEntropy(_) => Tensor::zeros(DType::I32, self.batch_size, 1),
            _ => Tensor::zeros(DType::F32, self.batch_size, self.out_features()),
        };
        BatchPair::new(input, target)
    }
}

// ============================================================================
// Trainer
// ============================================================================

/// Trainable state driven by the worker
struct Trainer {
    stack: LayerStack,
    loss: Loss,
    sgd: SgdOptimizer,
    rng: Rng,
    correctness: CorrectnessFn,
}

impl Trainer {
    fn build(config: &ModelConfig) -> Self {
        assert!(config.layer_dims.len() >= 2, "network needs input and output widths");
        assert!(config.batch_size > 0, "zero batch size");
        let mut rng = Rng::new(config.seed);
        let mut stack = LayerStack::new();
        // Head insertion: assemble from the output pair backwards.
        for dims in config.layer_dims.windows(2).rev() {
            stack.push_front(Layer::Sigmoid(Sigmoid::new()));
            stack.push_front(Layer::Linear(Linear::new(dims[0], dims[1], DType::F32, &mut rng)));
        }
        let sgd = SgdOptimizer::new(config.learning_rate, config.momentum, &stack);
        Self {
            stack,
            loss: config.objective.clone(),
            sgd,
            rng,
            correctness: config.correctness,
        }
    }

    fn train_step(&mut self, input: &Tensor, target: &Tensor) {
        let pred = autodiff::forward(&mut self.stack, input);
        let deriv = self.loss.derivative(&pred, target);
        autodiff::backward(&mut self.stack, deriv);
        self.sgd.step(&mut self.stack, &mut self.loss, &pred, target);
        autodiff::cleanup(&mut self.stack);
    }

    fn infer_step(&mut self, input: &Tensor, target: &Tensor, state: &ModelState) {
        let pred = autodiff::forward(&mut self.stack, input);
        let mut accurate = 0u32;
        let mut observed = 0u32;
        for r in 0..pred.rows() {
            for c in 0..pred.cols() {
                let t = if target.cols() > c { target.get(r, c).to_f32() } else { target.get(r, 0).to_f32() };
                if (self.correctness)(pred.get(r, c).to_f32(), t) {
                    accurate += 1;
                }
                observed += 1;
            }
        }
        autodiff::cleanup(&mut self.stack);
        state.record_inference(accurate, observed);
    }

    fn reset(&mut self) {
        for layer in self.stack.iter_mut() {
            layer.reset();
        }
        self.sgd.reset();
    }
}

// ============================================================================
// Model
// ============================================================================

pub struct Model {
    config: ModelConfig,
    staged: BatchPair,
    filled_rows: usize,
    pipeline: Arc<Pipeline>,
    state: Arc<ModelState>,
    trainer: Arc<Mutex<Trainer>>,
    #[cfg(feature = "std")]
    worker: Option<std::thread::JoinHandle<()>>,
}

impl core::fmt::Debug for Model {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Model")
            .field("config", &self.config)
            .field("filled_rows", &self.filled_rows)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl Model {
    /// Build the network and start it in training mode. On std hosts this
    /// spawns the worker thread; elsewhere the host drives
    /// [`run_worker`](Self::run_worker) from a thread of its own.
    pub fn build(config: ModelConfig) -> SynapseResult<Self> {
        let template = config.batch_template();
        let trainer = Arc::new(Mutex::new(Trainer::build(&config)));
        let pipeline = Arc::new(Pipeline::new(&template));
        let state = Arc::new(ModelState::new(true));
        log::info!(
            "model built: dims {:?}, batch {}, lr {}",
            config.layer_dims,
            config.batch_size,
            config.learning_rate
        );

        #[cfg(feature = "std")]
        let worker = {
            let pipeline = Arc::clone(&pipeline);
            let trainer = Arc::clone(&trainer);
            let state = Arc::clone(&state);
            Some(
                std::thread::Builder::new()
                    .name("synapse-worker".into())
                    .spawn(move || Self::drive(&pipeline, &trainer, &state))?,
            )
        };

        Ok(Self {
            config,
            staged: template,
            filled_rows: 0,
            pipeline,
            state,
            trainer,
            #[cfg(feature = "std")]
            worker,
        })
    }

    fn drive(pipeline: &Pipeline, trainer: &Mutex<Trainer>, state: &ModelState) {
        pipeline.worker_loop(|batch| {
            let mut t = trainer.lock();
            if state.is_training() {
                t.train_step(&batch.input, &batch.target);
            } else {
                t.infer_step(&batch.input, &batch.target, state);
            }
        });
    }

    /// Consume batches on the calling thread until the model is dropped.
    /// The no_std entry point for host-managed worker threads.
    pub fn run_worker(&self) {
        Self::drive(&self.pipeline, &self.trainer, &self.state);
    }

    #[inline(always)]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Stage one sample; submits the batch once `batch_size` rows are
    /// filled. Returns true when a batch went out.
    pub fn push_sample(&mut self, features: &[f32], targets: &[f32]) -> bool {
        self.staged.input.write_row_f32(self.filled_rows, features);
        self.staged.target.write_row_f32(self.filled_rows, targets);
        self.advance_fill()
    }

    /// Stage one classification sample with an integer class target.
    pub fn push_sample_class(&mut self, features: &[f32], class: i32) -> bool {
        self.staged.input.write_row_f32(self.filled_rows, features);
        self.staged.target.set(self.filled_rows, 0, Value::I32(class));
        self.advance_fill()
    }

    fn advance_fill(&mut self) -> bool {
        self.filled_rows += 1;
        if self.filled_rows == self.config.batch_size {
            self.pipeline.submit(&mut self.staged);
            self.filled_rows = 0;
            true
        } else {
            false
        }
    }

    /// Submit a caller-assembled batch directly, swapping buffers.
    pub fn submit_batch(&mut self, batch: &mut BatchPair) {
        self.pipeline.submit(batch);
    }

    /// Block until every submitted batch has been processed.
    pub fn wait_for_drain(&self) {
        self.pipeline.wait_for_drain();
    }

    /// Switch between training and inference. Drains first so the toggle
    /// never lands mid-stream.
    pub fn set_training(&self, training: bool) {
        self.pipeline.wait_for_drain();
        self.state.set_training(training);
        log::debug!("model mode: {}", if training { "training" } else { "inference" });
    }

    #[inline(always)]
    pub fn is_training(&self) -> bool {
        self.state.is_training()
    }

    /// Inference accuracy since the counters were last reset.
    pub fn accuracy(&self) -> f32 {
        self.state.accuracy()
    }

    pub fn reset_accuracy(&self) {
        self.state.reset_counters();
    }

    /// `(previous, current)` square-loss values from the optimizer.
    pub fn loss_history(&self) -> (f32, f32) {
        let t = self.trainer.lock();
        (t.sgd.prev_loss(), t.sgd.current_loss())
    }

    /// Synchronous forward pass outside the pipeline.
    pub fn predict(&self, input: &Tensor) -> Tensor {
        let mut t = self.trainer.lock();
        let pred = autodiff::forward(&mut t.stack, input);
        autodiff::cleanup(&mut t.stack);
        pred
    }

    /// Drain, zero every layer's parameters, clear optimizer and
    /// accuracy state, and return to training mode. Call
    /// [`set_random_weights`](Self::set_random_weights) afterwards to
    /// seed a fresh training run.
    pub fn reset(&mut self) {
        self.pipeline.wait_for_drain();
        self.filled_rows = 0;
        self.trainer.lock().reset();
        self.state.reset_counters();
        self.state.set_training(true);
        log::debug!("model reset");
    }

    /// Re-randomize every linear layer with an explicit quantization
    /// modulus. Coarser moduli give reproducibly few distinct initial
    /// values, which is useful when diffing runs.
    pub fn set_random_weights(&self, modula: i32) {
        let mut guard = self.trainer.lock();
        let t = &mut *guard;
        for layer in t.stack.iter_mut() {
            if let Some(linear) = layer.as_linear_mut() {
                linear.weights_mut().set_random(&mut t.rng, modula);
                linear.bias_mut().set_random(&mut t.rng, modula);
            }
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Serialized `(weights, bias)` of the `index`-th linear layer.
    pub fn layer_weights_text(&self, index: usize) -> SynapseResult<(String, String)> {
        let t = self.trainer.lock();
        let linear = t
            .stack
            .linear(index)
            .ok_or(SynapseError::NoSuchLayer { index })?;
        Ok((
            textio::encode_matrix(linear.weights()),
            textio::encode_matrix(linear.bias()),
        ))
    }

    /// Load serialized parameters into the `index`-th linear layer.
    pub fn load_layer_weights_text(
        &self,
        index: usize,
        weights: &str,
        bias: &str,
    ) -> SynapseResult<()> {
        let mut t = self.trainer.lock();
        let linear = t
            .stack
            .linear_mut(index)
            .ok_or(SynapseError::NoSuchLayer { index })?;
        let mut w = Tensor::zeros(DType::F32, linear.out_features(), linear.in_features());
        let mut b = Tensor::zeros(DType::F32, 1, linear.out_features());
        textio::decode_matrix(weights, &mut w)?;
        textio::decode_matrix(bias, &mut b)?;
        linear.set_weights(w);
        linear.set_bias(b);
        Ok(())
    }

    /// Write the `index`-th linear layer to a pair of files.
    #[cfg(feature = "std")]
    pub fn save_layer<P: AsRef<std::path::Path>>(
        &self,
        index: usize,
        weights_path: P,
        bias_path: P,
    ) -> SynapseResult<()> {
        let (w, b) = self.layer_weights_text(index)?;
        std::fs::write(weights_path, w)?;
        std::fs::write(bias_path, b)?;
        Ok(())
    }

    /// Load the `index`-th linear layer from a pair of files.
    #[cfg(feature = "std")]
    pub fn load_layer<P: AsRef<std::path::Path>>(
        &self,
        index: usize,
        weights_path: P,
        bias_path: P,
    ) -> SynapseResult<()> {
        let w = std::fs::read_to_string(weights_path)?;
        let b = std::fs::read_to_string(bias_path)?;
        self.load_layer_weights_text(index, &w, &b)
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        self.pipeline.request_stop();
        #[cfg(feature = "std")]
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
