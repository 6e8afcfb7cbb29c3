//! # Lock-Free Training Pipeline
//!
//! A fixed ring of [`RING_SLOTS`] batch slots connects data producers to
//! the single worker that runs training or inference steps. Producers
//! reserve capacity on an in-flight counter, CAS-claim a produce index,
//! pointer-swap their staged buffers into the slot, and publish with the
//! slot's ready flag. The worker CAS-claims the consume index, waits on
//! the ready flag, runs the step, clears the flag, and releases capacity.
//! All cross-thread handoff uses acquire/release ordering; the only unsafe
//! code is the slot buffer access, justified by the claim-plus-flag
//! protocol.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use cfg_if::cfg_if;
use static_assertions::const_assert;

use crate::tensor::{DType, Tensor};

// ============================================================================
// Constants
// ============================================================================

/// Number of batch slots in the ring
pub const RING_SLOTS: usize = 32;

/// Idle polls before the worker yields the CPU (std hosts)
const IDLE_SPINS_BEFORE_YIELD: u32 = 64;

const_assert!(RING_SLOTS.is_power_of_two());

// ============================================================================
// BatchPair
// ============================================================================

/// One batch of inputs with its matching targets
#[derive(Debug, Clone)]
pub struct BatchPair {
    pub input: Tensor,
    pub target: Tensor,
}

impl BatchPair {
    pub fn new(input: Tensor, target: Tensor) -> Self {
        assert_eq!(input.rows(), target.rows(), "batch size mismatch");
        Self { input, target }
    }

    /// Zeroed f32 buffers for `batch` rows of `features` inputs and
    /// `targets` outputs.
    pub fn zeros(batch: usize, features: usize, targets: usize) -> Self {
        Self {
            input: Tensor::zeros(DType::F32, batch, features),
            target: Tensor::zeros(DType::F32, batch, targets),
        }
    }

    #[inline(always)]
    pub fn batch_size(&self) -> usize {
        self.input.rows()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

struct Slot {
    ready: AtomicBool,
    buffers: UnsafeCell<BatchPair>,
}

/// The slot ring plus its cursors
pub struct Pipeline {
    slots: [Slot; RING_SLOTS],
    produce_idx: AtomicUsize,
    consume_idx: AtomicUsize,
    in_flight: AtomicUsize,
    stop: AtomicBool,
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("produce_idx", &self.produce_idx.load(Ordering::Relaxed))
            .field("consume_idx", &self.consume_idx.load(Ordering::Relaxed))
            .finish()
    }
}

// SAFETY: a slot's buffers are touched only between claiming its ring index
// and flipping its ready flag, which hands exclusive access back and forth
// between exactly one producer and the worker.
unsafe impl Send for Pipeline {}
unsafe impl Sync for Pipeline {}

impl Pipeline {
    /// Ring whose slots all start as clones of `template`.
    pub fn new(template: &BatchPair) -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                ready: AtomicBool::new(false),
                buffers: UnsafeCell::new(template.clone()),
            }),
            produce_idx: AtomicUsize::new(0),
            consume_idx: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        }
    }

    /// Batches submitted but not yet consumed.
    #[inline(always)]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Swap `staged` into the next free slot, spinning while the ring is
    /// full. On return `staged` holds the slot's previous buffers, ready
    /// to be refilled.
    pub fn submit(&self, staged: &mut BatchPair) {
        // Reserve capacity
        loop {
            let q = self.in_flight.load(Ordering::Acquire);
            if q == RING_SLOTS {
                core::hint::spin_loop();
                continue;
            }
            if self
                .in_flight
                .compare_exchange(q, q + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        // Claim a slot index
        let idx = loop {
            let p = self.produce_idx.load(Ordering::Acquire);
            if self
                .produce_idx
                .compare_exchange(p, (p + 1) % RING_SLOTS, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break p;
            }
        };

        let slot = &self.slots[idx];
        // A consumer one lap behind may still hold this slot
        while slot.ready.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        // SAFETY: the claimed index plus the clear ready flag make this the
        // only thread touching the slot's buffers.
        unsafe {
            core::mem::swap(&mut *slot.buffers.get(), staged);
        }
        slot.ready.store(true, Ordering::Release);
    }

    /// Consume batches until [`request_stop`](Self::request_stop) is seen
    /// during an idle poll. `step` runs once per batch and may mutate the
    /// buffers in place.
    pub fn worker_loop<F: FnMut(&mut BatchPair)>(&self, mut step: F) {
        log::debug!("pipeline worker started");
        let mut idle_spins = 0u32;
        loop {
            if self.in_flight.load(Ordering::Acquire) == 0 {
                if self.stop.load(Ordering::Acquire) {
                    break;
                }
                idle_spins += 1;
                if idle_spins >= IDLE_SPINS_BEFORE_YIELD {
                    idle_spins = 0;
                    cfg_if! {
                        if #[cfg(feature = "std")] {
                            std::thread::yield_now();
                        } else {
                            core::hint::spin_loop();
                        }
                    }
                } else {
                    core::hint::spin_loop();
                }
                continue;
            }
            idle_spins = 0;

            let idx = loop {
                let c = self.consume_idx.load(Ordering::Acquire);
                if self
                    .consume_idx
                    .compare_exchange(c, (c + 1) % RING_SLOTS, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break c;
                }
            };

            let slot = &self.slots[idx];
            // The producer may still be filling the claimed slot
            while !slot.ready.load(Ordering::Acquire) {
                core::hint::spin_loop();
            }
            // SAFETY: the consume claim plus the set ready flag make this
            // the only thread touching the slot's buffers.
            let batch = unsafe { &mut *slot.buffers.get() };
            step(batch);
            slot.ready.store(false, Ordering::Release);

            let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
            assert!(prev > 0, "pipeline in-flight underflow");
        }
        log::debug!("pipeline worker stopped");
    }

    /// Ask the worker to exit at its next idle poll.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Spin until every submitted batch has been consumed and the cursors
    /// agree, then clear all ready flags.
    pub fn wait_for_drain(&self) {
        loop {
            let q = self.in_flight.load(Ordering::Acquire);
            let p = self.produce_idx.load(Ordering::Acquire);
            let c = self.consume_idx.load(Ordering::Acquire);
            if q == 0 && p == c {
                break;
            }
            core::hint::spin_loop();
        }
        for slot in &self.slots {
            slot.ready.store(false, Ordering::Release);
        }
    }
}

// ============================================================================
// ModelState
// ============================================================================

/// Mode flag and inference accounting shared between the model handle and
/// the worker.
#[derive(Debug, Default)]
pub struct ModelState {
    training: AtomicBool,
    accurate: AtomicU32,
    observed: AtomicU32,
}

impl ModelState {
    pub fn new(training: bool) -> Self {
        Self {
            training: AtomicBool::new(training),
            accurate: AtomicU32::new(0),
            observed: AtomicU32::new(0),
        }
    }

    #[inline(always)]
    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Acquire)
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Release);
    }

    /// Fold one inference batch into the accuracy counters.
    pub fn record_inference(&self, accurate: u32, observed: u32) {
        self.accurate.fetch_add(accurate, Ordering::AcqRel);
        self.observed.fetch_add(observed, Ordering::AcqRel);
    }

    /// Fraction of observed predictions the correctness predicate accepted.
    pub fn accuracy(&self) -> f32 {
        let observed = self.observed.load(Ordering::Acquire);
        if observed == 0 {
            return 0.0;
        }
        self.accurate.load(Ordering::Acquire) as f32 / observed as f32
    }

    pub fn reset_counters(&self) {
        self.accurate.store(0, Ordering::Release);
        self.observed.store(0, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicU64;
    use std::thread;

    fn stamped(value: f32) -> BatchPair {
        let mut b = BatchPair::zeros(1, 1, 1);
        b.input.set(0, 0, crate::tensor::Value::F32(value));
        b
    }

    #[test]
    fn drains_every_submission_in_order() {
        let pipeline = Arc::new(Pipeline::new(&BatchPair::zeros(1, 1, 1)));
        let seen = Arc::new(AtomicU64::new(0));
        let monotonic = Arc::new(AtomicBool::new(true));

        let worker = {
            let pipeline = Arc::clone(&pipeline);
            let seen = Arc::clone(&seen);
            let monotonic = Arc::clone(&monotonic);
            thread::spawn(move || {
                let mut last = 0.0f32;
                pipeline.worker_loop(|batch| {
                    let v = batch.input.get(0, 0).as_f32();
                    if v <= last {
                        monotonic.store(false, Ordering::Release);
                    }
                    last = v;
                    seen.fetch_add(1, Ordering::AcqRel);
                });
            })
        };

        let mut staged = BatchPair::zeros(1, 1, 1);
        for i in 1..=100 {
            staged.input.set(0, 0, crate::tensor::Value::F32(i as f32));
            pipeline.submit(&mut staged);
        }
        pipeline.wait_for_drain();
        assert_eq!(seen.load(Ordering::Acquire), 100);
        assert!(monotonic.load(Ordering::Acquire));
        assert_eq!(pipeline.in_flight(), 0);

        pipeline.request_stop();
        worker.join().unwrap();
    }

    #[test]
    fn multiple_producers_lose_nothing() {
        let pipeline = Arc::new(Pipeline::new(&BatchPair::zeros(1, 1, 1)));
        let checksum = Arc::new(AtomicU64::new(0));

        let worker = {
            let pipeline = Arc::clone(&pipeline);
            let checksum = Arc::clone(&checksum);
            thread::spawn(move || {
                pipeline.worker_loop(|batch| {
                    let v = batch.input.get(0, 0).as_f32() as u64;
                    checksum.fetch_add(v, Ordering::AcqRel);
                });
            })
        };

        let producers: alloc::vec::Vec<_> = (0..4)
            .map(|p| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    let mut staged = BatchPair::zeros(1, 1, 1);
                    for i in 0..50u64 {
                        let v = (p * 1000 + i) as f32;
                        staged.input.set(0, 0, crate::tensor::Value::F32(v));
                        pipeline.submit(&mut staged);
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }
        pipeline.wait_for_drain();

        let expected: u64 = (0..4u64)
            .flat_map(|p| (0..50u64).map(move |i| p * 1000 + i))
            .sum();
        assert_eq!(checksum.load(Ordering::Acquire), expected);

        pipeline.request_stop();
        worker.join().unwrap();
    }

    #[test]
    fn ring_backpressure_caps_in_flight() {
        let pipeline = Arc::new(Pipeline::new(&BatchPair::zeros(1, 1, 1)));
        let mut staged = stamped(1.0);
        // No consumer yet: the ring fills to capacity exactly.
        for _ in 0..RING_SLOTS {
            pipeline.submit(&mut staged);
        }
        assert_eq!(pipeline.in_flight(), RING_SLOTS);

        let worker = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.worker_loop(|_| {}))
        };
        // This submission must block until the worker frees a slot.
        pipeline.submit(&mut staged);
        pipeline.wait_for_drain();
        assert_eq!(pipeline.in_flight(), 0);

        pipeline.request_stop();
        worker.join().unwrap();
    }

    #[test]
    fn swap_returns_previous_buffers() {
        let pipeline = Pipeline::new(&stamped(7.0));
        let mut staged = stamped(1.0);
        pipeline.submit(&mut staged);
        // The staged pair now holds the slot's template buffers.
        assert_eq!(staged.input.get(0, 0).as_f32(), 7.0);
    }

    #[test]
    fn model_state_accounting() {
        let state = ModelState::new(true);
        assert!(state.is_training());
        state.set_training(false);
        assert!(!state.is_training());

        assert_eq!(state.accuracy(), 0.0);
        state.record_inference(3, 4);
        state.record_inference(1, 4);
        assert!((state.accuracy() - 0.5).abs() < 1.0e-6);
        state.reset_counters();
        assert_eq!(state.accuracy(), 0.0);
    }
}
