//! # Synapse Runtime
//!
//! Minimal machine-learning runtime for kernel-resident and hosted use.
//!
//! The crate trains and runs small feed-forward networks without any host
//! math library: [`math`] provides software `sqrt`/`exp`/`ln`/`softmax`,
//! [`tensor`] a dtype-polymorphic dense matrix, [`layers`] + [`autodiff`]
//! a cached forward/backward pass, [`loss`] and [`optim`] the training
//! objective and momentum SGD, and [`pipeline`] + [`model`] a lock-free
//! producer/consumer loop that decouples data sources from the single
//! training worker. [`textio`] persists tensors as fixed-width text.
//!
//! With the default `std` feature the model spawns its worker thread and
//! weights can be saved to files. Without it the crate is `no_std` + `alloc`;
//! the `pool-alloc` feature routes the global allocator through the
//! [`synapse_memory`] pool for hosts with no heap of their own.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(dead_code)]

extern crate alloc;

pub mod autodiff;
pub mod error;
pub mod layers;
pub mod loss;
pub mod math;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod tensor;
pub mod textio;

pub use synapse_memory as memory;

pub use error::{SynapseError, SynapseResult};
pub use loss::Loss;
pub use model::{Model, ModelConfig};
pub use tensor::{DType, Tensor, Value};

/// Global allocator backed by the synapse-memory pool.
///
/// Call [`init_pool`] with a reserved region before the first allocation.
#[cfg(feature = "pool-alloc")]
#[global_allocator]
static POOL_ALLOCATOR: synapse_memory::PoolAllocator = synapse_memory::PoolAllocator::new();

/// Point the pool-backed global allocator at its region.
///
/// # Safety
///
/// Same contract as [`synapse_memory::PoolAllocator::init`]. Must run
/// before anything allocates.
#[cfg(feature = "pool-alloc")]
pub unsafe fn init_pool(base: *mut u8, pool_size: usize) {
    unsafe { POOL_ALLOCATOR.init(base, pool_size) }
}
