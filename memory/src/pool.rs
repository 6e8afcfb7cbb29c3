//! Fixed-size pool allocator with offset-addressed blocks.
//!
//! The pool owns no memory itself; it manages a region handed to
//! [`MemoryPool::from_raw`]. Every block starts with a [`BlockHeader`]
//! holding its payload size and its links in either the free list or the
//! allocation list. Links and returned handles are byte offsets into the
//! region, never pointers, so the bookkeeping can be inspected and tested
//! without touching payload memory.

use alloc::vec;
use alloc::vec::Vec;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr;

use static_assertions::const_assert_eq;

// =============================================================================
// Constants
// =============================================================================

/// Per-block bookkeeping overhead in bytes.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Alignment of every payload the pool hands out.
pub const MIN_ALIGN: usize = 8;

/// Offset sentinel for "no block".
const NIL: u64 = u64::MAX;

const HDR: u64 = HEADER_SIZE as u64;

const_assert_eq!(HEADER_SIZE, 24);
const_assert_eq!(HEADER_SIZE % MIN_ALIGN, 0);

// =============================================================================
// Block metadata
// =============================================================================

/// Intrusive block header stored at the start of every block.
///
/// `next`/`prev` are offsets of neighboring headers in whichever list the
/// block currently belongs to, or [`NIL`].
#[repr(C)]
struct BlockHeader {
    size: u64,
    next: u64,
    prev: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ListKind {
    Free,
    Alloc,
}

/// True when `left`'s payload ends exactly where `right`'s header begins.
/// Spans are `(header_offset, payload_size)` pairs.
pub(crate) const fn blocks_adjacent(left: (u64, u64), right: (u64, u64)) -> bool {
    left.0 + HDR + left.1 == right.0
}

/// Merge two adjacent spans into one; `right`'s header is absorbed into
/// `left`'s payload.
pub(crate) const fn merge_spans(left: (u64, u64), right: (u64, u64)) -> (u64, u64) {
    (left.0, left.1 + HDR + right.1)
}

#[inline]
const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

// =============================================================================
// MemoryPool
// =============================================================================

/// First-fit pool allocator over a single contiguous region.
#[derive(Debug)]
pub struct MemoryPool {
    base: *mut u8,
    pool_size: usize,
    free_head: u64,
    alloc_head: u64,
}

// SAFETY: the pool has exclusive ownership of its region; `&mut self` is
// required for every mutation, so moving it across threads is sound.
unsafe impl Send for MemoryPool {}

impl MemoryPool {
    /// Build a pool over `pool_size` bytes at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `pool_size` bytes,
    /// aligned to [`MIN_ALIGN`], and exclusively owned by the pool for its
    /// whole lifetime.
    pub unsafe fn from_raw(base: *mut u8, pool_size: usize) -> Self {
        assert!(!base.is_null(), "pool region is null");
        assert_eq!(base as usize % MIN_ALIGN, 0, "pool region misaligned");
        assert!(pool_size > HEADER_SIZE, "pool smaller than one header");
        assert_eq!(pool_size % MIN_ALIGN, 0, "pool size not a multiple of {MIN_ALIGN}");

        let mut pool = Self {
            base,
            pool_size,
            free_head: NIL,
            alloc_head: NIL,
        };
        // One free block spanning the whole region.
        unsafe {
            let h = pool.hdr(0);
            (*h).size = (pool_size - HEADER_SIZE) as u64;
            (*h).next = NIL;
            (*h).prev = NIL;
        }
        pool.free_head = 0;
        log::debug!("pool initialized: {} bytes, {} usable", pool_size, pool_size - HEADER_SIZE);
        pool
    }

    /// Total size of the managed region.
    #[inline(always)]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate `size` bytes, returning the payload offset.
    ///
    /// The request is rounded up to [`MIN_ALIGN`]. A free block is taken
    /// whole when it fits exactly, split otherwise. Returns `None` when no
    /// block can satisfy the request.
    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        assert!(size > 0, "zero-size pool allocation");
        let size = round_up(size, MIN_ALIGN) as u64;

        let mut cur = self.free_head;
        while cur != NIL {
            let bsize = self.blk_size(cur);
            if bsize == size {
                self.detach(ListKind::Free, cur);
                self.push_front(ListKind::Alloc, cur);
                return Some((cur + HDR) as usize);
            }
            if bsize > size + HDR {
                // Split: the claimed block keeps the front, the remainder
                // becomes a new free block spliced into the old position.
                let rem_off = cur + HDR + size;
                let rem_size = bsize - size - HDR;
                unsafe {
                    (*self.hdr(rem_off)).size = rem_size;
                }
                self.splice_replace(ListKind::Free, cur, rem_off);
                unsafe {
                    (*self.hdr(cur)).size = size;
                }
                self.push_front(ListKind::Alloc, cur);
                return Some((cur + HDR) as usize);
            }
            cur = self.blk_next(cur);
        }

        log::error!(
            "pool exhausted: {} bytes requested, {} bytes free",
            size,
            self.free_space()
        );
        None
    }

    /// Allocate and zero-fill `size` bytes.
    pub fn alloc_zeroed(&mut self, size: usize) -> Option<usize> {
        let payload = self.alloc(size)?;
        let len = self.payload_size(payload);
        unsafe {
            ptr::write_bytes(self.base.add(payload), 0, len);
        }
        Some(payload)
    }

    /// Release the block behind `payload` and coalesce with free neighbors.
    pub fn free(&mut self, payload: usize) {
        assert!(payload >= HEADER_SIZE && payload < self.pool_size, "payload offset out of pool");
        let off = payload as u64 - HDR;
        assert!(
            self.contains(ListKind::Alloc, off),
            "free of offset {payload} not allocated from this pool"
        );
        self.detach(ListKind::Alloc, off);
        self.push_front(ListKind::Free, off);
        self.coalesce(off);
    }

    /// Payload size recorded for a live allocation.
    #[inline]
    pub fn payload_size(&self, payload: usize) -> usize {
        self.blk_size(payload as u64 - HDR) as usize
    }

    /// Raw pointer to a payload offset returned by [`alloc`](Self::alloc).
    #[inline]
    pub fn payload_ptr(&self, payload: usize) -> *mut u8 {
        debug_assert!(payload < self.pool_size);
        // SAFETY: payload offsets always fall inside the managed region.
        unsafe { self.base.add(payload) }
    }

    /// Base address of the managed region.
    #[inline(always)]
    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Sum of free payload bytes.
    pub fn free_space(&self) -> usize {
        self.sum_sizes(self.free_head)
    }

    /// Sum of live payload bytes.
    pub fn used_space(&self) -> usize {
        self.sum_sizes(self.alloc_head)
    }

    /// Number of blocks on the (free, allocation) lists.
    pub fn block_counts(&self) -> (usize, usize) {
        (self.count(self.free_head), self.count(self.alloc_head))
    }

    /// Trace-log both lists block by block, for allocator debugging.
    pub fn dump_lists(&self) {
        let mut cur = self.free_head;
        while cur != NIL {
            log::trace!("free block @{cur}: {} bytes", self.blk_size(cur));
            cur = self.blk_next(cur);
        }
        let mut cur = self.alloc_head;
        while cur != NIL {
            log::trace!("alloc block @{cur}: {} bytes", self.blk_size(cur));
            cur = self.blk_next(cur);
        }
    }

    // =========================================================================
    // Coalescing
    // =========================================================================

    fn coalesce(&mut self, off: u64) {
        // Absorb the free block starting exactly at our end, then let a free
        // block ending exactly at our start absorb us.
        if let Some(right) = self.find_right_neighbor(off) {
            self.detach(ListKind::Free, right);
            let merged = merge_spans(
                (off, self.blk_size(off)),
                (right, self.blk_size(right)),
            );
            unsafe {
                (*self.hdr(off)).size = merged.1;
            }
        }
        if let Some(left) = self.find_left_neighbor(off) {
            self.detach(ListKind::Free, off);
            let merged = merge_spans(
                (left, self.blk_size(left)),
                (off, self.blk_size(off)),
            );
            unsafe {
                (*self.hdr(left)).size = merged.1;
            }
        }
    }

    fn find_right_neighbor(&self, off: u64) -> Option<u64> {
        let span = (off, self.blk_size(off));
        let mut cur = self.free_head;
        while cur != NIL {
            if cur != off && blocks_adjacent(span, (cur, self.blk_size(cur))) {
                return Some(cur);
            }
            cur = self.blk_next(cur);
        }
        None
    }

    fn find_left_neighbor(&self, off: u64) -> Option<u64> {
        let mut cur = self.free_head;
        while cur != NIL {
            if cur != off && blocks_adjacent((cur, self.blk_size(cur)), (off, self.blk_size(off))) {
                return Some(cur);
            }
            cur = self.blk_next(cur);
        }
        None
    }

    // =========================================================================
    // Header access
    // =========================================================================

    #[inline]
    fn hdr(&self, off: u64) -> *mut BlockHeader {
        debug_assert!((off as usize) + HEADER_SIZE <= self.pool_size);
        // SAFETY: list offsets only ever reference headers inside the region.
        unsafe { self.base.add(off as usize).cast::<BlockHeader>() }
    }

    #[inline]
    fn blk_size(&self, off: u64) -> u64 {
        unsafe { (*self.hdr(off)).size }
    }

    #[inline]
    fn blk_next(&self, off: u64) -> u64 {
        unsafe { (*self.hdr(off)).next }
    }

    // =========================================================================
    // Intrusive list operations
    // =========================================================================

    #[inline]
    fn head(&self, kind: ListKind) -> u64 {
        match kind {
            ListKind::Free => self.free_head,
            ListKind::Alloc => self.alloc_head,
        }
    }

    #[inline]
    fn set_head(&mut self, kind: ListKind, off: u64) {
        match kind {
            ListKind::Free => self.free_head = off,
            ListKind::Alloc => self.alloc_head = off,
        }
    }

    fn push_front(&mut self, kind: ListKind, off: u64) {
        let old = self.head(kind);
        unsafe {
            let h = self.hdr(off);
            (*h).prev = NIL;
            (*h).next = old;
        }
        if old != NIL {
            unsafe {
                (*self.hdr(old)).prev = off;
            }
        }
        self.set_head(kind, off);
    }

    fn detach(&mut self, kind: ListKind, off: u64) {
        let (prev, next) = unsafe {
            let h = self.hdr(off);
            ((*h).prev, (*h).next)
        };
        if prev != NIL {
            unsafe {
                (*self.hdr(prev)).next = next;
            }
        } else {
            debug_assert_eq!(self.head(kind), off);
            self.set_head(kind, next);
        }
        if next != NIL {
            unsafe {
                (*self.hdr(next)).prev = prev;
            }
        }
        unsafe {
            let h = self.hdr(off);
            (*h).next = NIL;
            (*h).prev = NIL;
        }
    }

    /// Put `new` into `old`'s list position. `old` leaves the list.
    fn splice_replace(&mut self, kind: ListKind, old: u64, new: u64) {
        let (prev, next) = unsafe {
            let h = self.hdr(old);
            ((*h).prev, (*h).next)
        };
        unsafe {
            let h = self.hdr(new);
            (*h).prev = prev;
            (*h).next = next;
        }
        if prev != NIL {
            unsafe {
                (*self.hdr(prev)).next = new;
            }
        } else {
            self.set_head(kind, new);
        }
        if next != NIL {
            unsafe {
                (*self.hdr(next)).prev = new;
            }
        }
        unsafe {
            let h = self.hdr(old);
            (*h).next = NIL;
            (*h).prev = NIL;
        }
    }

    fn contains(&self, kind: ListKind, off: u64) -> bool {
        let mut cur = self.head(kind);
        while cur != NIL {
            if cur == off {
                return true;
            }
            cur = self.blk_next(cur);
        }
        false
    }

    fn sum_sizes(&self, head: u64) -> usize {
        let mut total = 0usize;
        let mut cur = head;
        while cur != NIL {
            total += self.blk_size(cur) as usize;
            cur = self.blk_next(cur);
        }
        total
    }

    fn count(&self, head: u64) -> usize {
        let mut n = 0usize;
        let mut cur = head;
        while cur != NIL {
            n += 1;
            cur = self.blk_next(cur);
        }
        n
    }
}

// =============================================================================
// OwnedPool
// =============================================================================

/// A [`MemoryPool`] over a heap-backed region, for hosted use and tests.
///
/// The backing buffer is a `Vec<u64>` so the region satisfies [`MIN_ALIGN`]
/// and stays put when the owner moves.
#[derive(Debug)]
pub struct OwnedPool {
    pool: MemoryPool,
    _storage: Vec<u64>,
}

impl OwnedPool {
    pub fn new(pool_size: usize) -> Self {
        assert_eq!(pool_size % MIN_ALIGN, 0, "pool size not a multiple of {MIN_ALIGN}");
        let mut storage = vec![0u64; pool_size / MIN_ALIGN];
        // SAFETY: the vec's heap buffer is 8-aligned, lives as long as the
        // pool, and is never touched through the vec again.
        let pool = unsafe { MemoryPool::from_raw(storage.as_mut_ptr().cast::<u8>(), pool_size) };
        Self { pool, _storage: storage }
    }
}

impl Deref for OwnedPool {
    type Target = MemoryPool;

    fn deref(&self) -> &MemoryPool {
        &self.pool
    }
}

impl DerefMut for OwnedPool {
    fn deref_mut(&mut self) -> &mut MemoryPool {
        &mut self.pool
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: usize = 4096;

    fn usable(pool: &MemoryPool) -> usize {
        pool.pool_size() - HEADER_SIZE
    }

    /// free + used + per-block headers always account for the whole region.
    fn assert_accounting(pool: &MemoryPool) {
        let (free_blocks, alloc_blocks) = pool.block_counts();
        let headers = (free_blocks + alloc_blocks) * HEADER_SIZE;
        assert_eq!(pool.free_space() + pool.used_space() + headers, pool.pool_size());
    }

    #[test]
    fn fresh_pool_is_one_free_block() {
        let pool = OwnedPool::new(POOL);
        assert_eq!(pool.free_space(), usable(&pool));
        assert_eq!(pool.block_counts(), (1, 0));
        assert_accounting(&pool);
    }

    #[test]
    fn alloc_rounds_and_charges_header() {
        let mut pool = OwnedPool::new(POOL);
        let before = pool.free_space();
        let p = pool.alloc(100).unwrap();
        assert_eq!(p % MIN_ALIGN, 0);
        // 100 rounds to 104, plus one header for the split remainder.
        assert_eq!(pool.free_space(), before - 104 - HEADER_SIZE);
        assert_eq!(pool.used_space(), 104);
        assert_accounting(&pool);
    }

    #[test]
    fn free_restores_single_block() {
        let mut pool = OwnedPool::new(POOL);
        let p = pool.alloc(256).unwrap();
        pool.free(p);
        assert_eq!(pool.free_space(), usable(&pool));
        assert_eq!(pool.block_counts(), (1, 0));
    }

    #[test]
    fn exact_fit_reuses_block() {
        let mut pool = OwnedPool::new(POOL);
        let a = pool.alloc(64).unwrap();
        let _b = pool.alloc(64).unwrap();
        pool.free(a);
        // The freed 64-byte block is an exact fit for the next request.
        let c = pool.alloc(64).unwrap();
        assert_eq!(a, c);
        assert_accounting(&pool);
    }

    #[test]
    fn adjacent_frees_coalesce() {
        let mut pool = OwnedPool::new(POOL);
        let a = pool.alloc(64).unwrap();
        let b = pool.alloc(64).unwrap();
        let c = pool.alloc(64).unwrap();
        // Free the middle, then its neighbors; all holes must merge back.
        pool.free(b);
        assert_eq!(pool.block_counts().0, 2);
        pool.free(a);
        assert_eq!(pool.block_counts().0, 2);
        pool.free(c);
        assert_eq!(pool.block_counts(), (1, 0));
        assert_eq!(pool.free_space(), usable(&pool));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = OwnedPool::new(POOL);
        assert!(pool.alloc(POOL).is_none());
        let p = pool.alloc(1024).unwrap();
        assert!(pool.alloc(POOL - 1024).is_none());
        pool.free(p);
        assert_eq!(pool.free_space(), usable(&pool));
    }

    #[test]
    fn alloc_zeroed_clears_payload() {
        let mut pool = OwnedPool::new(POOL);
        let p = pool.alloc(128).unwrap();
        unsafe {
            core::ptr::write_bytes(pool.payload_ptr(p), 0xAB, 128);
        }
        pool.free(p);
        let q = pool.alloc_zeroed(128).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(pool.payload_ptr(q), 128) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn span_adjacency_and_merge() {
        let left = (0u64, 40u64);
        let right = (HEADER_SIZE as u64 + 40, 64u64);
        assert!(blocks_adjacent(left, right));
        assert!(!blocks_adjacent(right, left));
        let merged = merge_spans(left, right);
        assert_eq!(merged, (0, 40 + HEADER_SIZE as u64 + 64));
    }

    #[test]
    fn churn_preserves_accounting() {
        let mut pool = OwnedPool::new(POOL);
        let mut live = alloc::vec::Vec::new();
        for size in [24usize, 120, 64, 8, 200, 56] {
            live.push(pool.alloc(size).unwrap());
            assert_accounting(&pool);
        }
        for p in [live[1], live[4], live[0], live[5], live[2], live[3]] {
            pool.free(p);
            assert_accounting(&pool);
        }
        assert_eq!(pool.block_counts(), (1, 0));
        assert_eq!(pool.free_space(), usable(&pool));
    }

    #[test]
    #[should_panic(expected = "not allocated from this pool")]
    fn double_free_panics() {
        let mut pool = OwnedPool::new(POOL);
        let p = pool.alloc(64).unwrap();
        pool.free(p);
        pool.free(p);
    }
}
