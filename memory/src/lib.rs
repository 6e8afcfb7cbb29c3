//! # Synapse Memory
//!
//! Pool-backed arena allocator for restricted hosts.
//!
//! A [`MemoryPool`] carves one caller-provided region into blocks addressed
//! by byte offsets. Allocation is first-fit over an intrusive free list;
//! release coalesces with address-adjacent free neighbors. [`PoolAllocator`]
//! wraps a pool behind a spin lock so it can serve as `#[global_allocator]`
//! on targets without a system heap.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod global;
pub mod pool;

pub use global::PoolAllocator;
pub use pool::{MemoryPool, OwnedPool, HEADER_SIZE, MIN_ALIGN};
