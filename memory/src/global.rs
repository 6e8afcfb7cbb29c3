//! `GlobalAlloc` adapter over a spin-guarded [`MemoryPool`].
//!
//! Targets without a system heap install a static [`PoolAllocator`] as
//! `#[global_allocator]` and point it at a reserved region during early
//! init. Alignments above [`MIN_ALIGN`] are refused; the pool never hands
//! out payloads with weaker alignment than that.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::Mutex;

use crate::pool::{MemoryPool, MIN_ALIGN};

/// Lock-protected pool usable as the global allocator.
#[derive(Debug)]
pub struct PoolAllocator {
    pool: Mutex<Option<MemoryPool>>,
}

impl PoolAllocator {
    /// An uninitialized allocator; every request fails until [`init`](Self::init).
    pub const fn new() -> Self {
        Self {
            pool: Mutex::new(None),
        }
    }

    /// Hand the allocator its backing region.
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryPool::from_raw`]; additionally the region
    /// must outlive every allocation served from it.
    pub unsafe fn init(&self, base: *mut u8, pool_size: usize) {
        let pool = unsafe { MemoryPool::from_raw(base, pool_size) };
        *self.pool.lock() = Some(pool);
    }

    /// Free payload bytes, or 0 before [`init`](Self::init).
    pub fn free_space(&self) -> usize {
        self.pool.lock().as_ref().map_or(0, MemoryPool::free_space)
    }
}

unsafe impl GlobalAlloc for PoolAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MIN_ALIGN {
            return ptr::null_mut();
        }
        let mut guard = self.pool.lock();
        let Some(pool) = guard.as_mut() else {
            return ptr::null_mut();
        };
        match pool.alloc(layout.size().max(1)) {
            Some(payload) => pool.payload_ptr(payload),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let mut guard = self.pool.lock();
        if let Some(pool) = guard.as_mut() {
            let payload = ptr as usize - pool.base_ptr() as usize;
            pool.free(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn serves_and_reclaims() {
        let mut backing = vec![0u64; 512];
        let alloc = PoolAllocator::new();
        unsafe {
            alloc.init(backing.as_mut_ptr().cast::<u8>(), 4096);
        }
        let full = alloc.free_space();

        let layout = Layout::from_size_align(64, 8).unwrap();
        let p = unsafe { GlobalAlloc::alloc(&alloc, layout) };
        assert!(!p.is_null());
        unsafe {
            ptr::write_bytes(p, 0x5A, 64);
            GlobalAlloc::dealloc(&alloc, p, layout);
        }
        assert_eq!(alloc.free_space(), full);
    }

    #[test]
    fn refuses_wide_alignment() {
        let mut backing = vec![0u64; 512];
        let alloc = PoolAllocator::new();
        unsafe {
            alloc.init(backing.as_mut_ptr().cast::<u8>(), 4096);
        }
        let layout = Layout::from_size_align(64, 64).unwrap();
        assert!(unsafe { GlobalAlloc::alloc(&alloc, layout) }.is_null());
    }

    #[test]
    fn uninitialized_allocator_fails() {
        let alloc = PoolAllocator::new();
        let layout = Layout::from_size_align(16, 8).unwrap();
        assert!(unsafe { GlobalAlloc::alloc(&alloc, layout) }.is_null());
    }
}
