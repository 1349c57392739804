//! Pooled allocator for small requests.
//!
//! Requests up to [`MAX_SMALL_SIZE`] bytes are rounded to a multiple of
//! [`ALIGN`] and served from one of [`NUM_SIZE_CLASSES`] intrusive free lists.
//! Empty lists are refilled in batches carved from a contiguous uncommitted
//! range (the pool). When the pool runs dry it grows from the system heap,
//! falls back to cannibalizing idle larger blocks, and as a last resort asks
//! the primary allocator, whose OOM policy decides what happens next.
//!
//! Larger requests are forwarded untouched to the [`PrimaryAllocator`].

#![allow(unsafe_code)]

use std::ptr::NonNull;

use crate::config::{MAX_REFILL_BATCH, OomPolicy, PoolConfig};
use crate::error::AllocError;
use crate::free_list::FreeList;
use crate::heap::{LibcHeap, SystemHeap};
use crate::log::{AllocatorLogLevel, AllocatorLogRecord};
use crate::primary::PrimaryAllocator;
use crate::raw::RawAlloc;
use crate::size_class::{ALIGN, MAX_SMALL_SIZE, NUM_SIZE_CLASSES, class_size, classify, round_up};

/// A region acquired from the system heap on behalf of the pool.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    ptr: NonNull<u8>,
    bytes: usize,
}

/// Point-in-time view of the allocator's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Cumulative bytes acquired from the system heap for the pool.
    pub heap_size: usize,
    /// Uncommitted bytes left in the current pool range.
    pub pool_bytes_left: usize,
    /// Chunks acquired for the pool.
    pub chunk_count: usize,
    /// Free blocks per size class.
    pub free_blocks: [usize; NUM_SIZE_CLASSES],
    pub refills: u64,
    pub growth_events: u64,
    pub cannibalizations: u64,
    pub donations: u64,
    pub large_forwards: u64,
    /// Times the fatal path was reached (only observable under
    /// [`OomPolicy::Report`]).
    pub fatal_fallbacks: u64,
}

impl PoolStats {
    /// Bytes parked on free lists.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_blocks
            .iter()
            .enumerate()
            .map(|(class, &count)| count * class_size(class))
            .sum()
    }

    #[must_use]
    pub fn free_blocks_total(&self) -> usize {
        self.free_blocks.iter().sum()
    }
}

/// Size-class pool allocator instance.
///
/// Not thread-safe; wrap in [`LockedPool`](crate::LockedPool) to share.
/// Blocks must not outlive the allocator that produced them: dropping the
/// allocator releases every chunk the pool acquired.
pub struct PoolAllocator<H: SystemHeap = LibcHeap> {
    primary: PrimaryAllocator<H>,
    free_lists: [FreeList; NUM_SIZE_CLASSES],
    /// Uncommitted range `[pool_start, pool_end)`.
    pool_start: NonNull<u8>,
    pool_end: NonNull<u8>,
    heap_size: usize,
    chunks: Vec<Chunk>,
    config: PoolConfig,
    refills: u64,
    growth_events: u64,
    cannibalizations: u64,
    donations: u64,
    large_forwards: u64,
    fatal_fallbacks: u64,
    next_decision_id: u64,
    lifecycle_logs: Vec<AllocatorLogRecord>,
}

// SAFETY: the allocator exclusively owns its chunks and free-list nodes; no
// pointer it holds is shared with another instance.
unsafe impl<H: SystemHeap + Send> Send for PoolAllocator<H> {}

impl PoolAllocator<LibcHeap> {
    /// Pool over the C library heap with the reference policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Pool over the C library heap.
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_heap(LibcHeap, config)
    }
}

impl Default for PoolAllocator<LibcHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SystemHeap> PoolAllocator<H> {
    /// Pool over an arbitrary heap backend.
    #[must_use]
    pub fn with_heap(heap: H, config: PoolConfig) -> Self {
        Self {
            primary: PrimaryAllocator::new(heap, config.oom_policy),
            free_lists: std::array::from_fn(|_| FreeList::new()),
            pool_start: NonNull::dangling(),
            pool_end: NonNull::dangling(),
            heap_size: 0,
            chunks: Vec::new(),
            config,
            refills: 0,
            growth_events: 0,
            cannibalizations: 0,
            donations: 0,
            large_forwards: 0,
            fatal_fallbacks: 0,
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn set_oom_policy(&mut self, policy: OomPolicy) {
        self.config.oom_policy = policy;
        self.primary.set_policy(policy);
    }

    #[must_use]
    pub fn heap(&self) -> &H {
        self.primary.heap()
    }

    /// Mutable access to the backend, e.g. to simulate exhaustion.
    pub fn heap_mut(&mut self) -> &mut H {
        self.primary.heap_mut()
    }

    /// Cumulative bytes acquired from the system heap for the pool.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    /// Uncommitted bytes left in the current pool range.
    #[must_use]
    pub fn pool_bytes_left(&self) -> usize {
        self.pool_end.as_ptr() as usize - self.pool_start.as_ptr() as usize
    }

    /// Free blocks currently parked on list `class`.
    #[must_use]
    pub fn free_count(&self, class: usize) -> usize {
        self.free_lists.get(class).map_or(0, FreeList::len)
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            heap_size: self.heap_size,
            pool_bytes_left: self.pool_bytes_left(),
            chunk_count: self.chunks.len(),
            free_blocks: std::array::from_fn(|class| self.free_lists[class].len()),
            refills: self.refills,
            growth_events: self.growth_events,
            cannibalizations: self.cannibalizations,
            donations: self.donations,
            large_forwards: self.large_forwards,
            fatal_fallbacks: self.fatal_fallbacks,
        }
    }

    /// Returns true if `ptr` currently sits on a free list.
    ///
    /// Walks every list; meant for diagnostics and tests.
    #[must_use]
    pub fn is_free(&self, ptr: NonNull<u8>) -> bool {
        self.free_lists
            .iter()
            .any(|list| list.iter().any(|block| block == ptr))
    }

    /// Returns true if `ptr` lies inside memory acquired for the pool.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        self.chunks.iter().any(|chunk| {
            let start = chunk.ptr.as_ptr() as usize;
            addr >= start && addr < start + chunk.bytes
        })
    }

    /// Structured lifecycle records gathered so far.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &[AllocatorLogRecord] {
        &self.lifecycle_logs
    }

    /// Takes the gathered lifecycle records, leaving the buffer empty.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }

    /// Allocates `bytes` bytes.
    ///
    /// Small requests pop from their class list or trigger a refill; large
    /// ones go straight to the primary allocator.
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        if bytes > MAX_SMALL_SIZE {
            self.large_forwards += 1;
            self.record(
                AllocatorLogLevel::Trace,
                "allocate",
                "large_forward",
                "forwarded",
                Some(bytes),
                None,
                || "path=primary".to_string(),
            );
            return self.primary.allocate(bytes);
        }

        if let Some(block) = self.free_lists[classify(bytes)].pop() {
            return Ok(block);
        }
        self.refill(block_size(bytes))
    }

    /// Returns a block to its class list, or to the primary allocator for
    /// large sizes.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator with exactly `bytes` as its
    /// size and must not be used afterwards. A mismatched size silently
    /// corrupts the size-class bucketing.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
        if bytes > MAX_SMALL_SIZE {
            // SAFETY: forwarded caller contract.
            unsafe { self.primary.deallocate(ptr, bytes) };
            return;
        }
        // SAFETY: the block was carved for class `classify(bytes)`, so it is
        // aligned and at least `ALIGN` bytes; the caller gave up ownership.
        unsafe { self.free_lists[classify(bytes)].push(ptr) };
    }

    /// Resizes a block.
    ///
    /// Both sizes large: system resize. Same rounded class: `ptr` is returned
    /// unchanged. Otherwise allocate, copy `min(old, new)` bytes, free.
    ///
    /// # Safety
    ///
    /// Same contract as [`deallocate`](Self::deallocate) for `ptr` and
    /// `old_bytes`. On `Ok` the old pointer must not be used again.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if old_bytes > MAX_SMALL_SIZE && new_bytes > MAX_SMALL_SIZE {
            // SAFETY: forwarded caller contract.
            return unsafe { self.primary.reallocate(ptr, old_bytes, new_bytes) };
        }
        if block_size(old_bytes) == block_size(new_bytes) {
            return Ok(ptr);
        }

        let moved = self.allocate(new_bytes)?;
        // SAFETY: `moved` is a fresh block distinct from the live `ptr`; both
        // span at least `min(old, new)` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), old_bytes.min(new_bytes));
            self.deallocate(ptr, old_bytes);
        }
        Ok(moved)
    }

    /// Produces one block of `size` bytes and stocks the class list with the
    /// rest of the batch.
    fn refill(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let mut objs = self.config.refill_batch.clamp(1, MAX_REFILL_BATCH);
        let chunk = self.chunk_alloc(size, &mut objs)?;
        self.refills += 1;

        if objs > 1 {
            // SAFETY: `chunk_alloc` carved `objs * size` uncommitted bytes
            // starting at `chunk`; everything past the first block is ours to
            // link.
            unsafe {
                let rest = NonNull::new_unchecked(chunk.as_ptr().add(size));
                self.free_lists[classify(size)].thread(rest, size, objs - 1);
            }
        }
        self.record(
            AllocatorLogLevel::Trace,
            "allocate",
            "refill",
            "success",
            Some(size),
            Some(classify(size)),
            || format!("objs={objs}"),
        );
        Ok(chunk)
    }

    /// Carves storage for up to `*objs` blocks of `size` bytes from the pool,
    /// growing it as needed. On return `*objs` holds the count actually
    /// provided (at least one).
    fn chunk_alloc(&mut self, size: usize, objs: &mut usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(size >= ALIGN && size <= MAX_SMALL_SIZE && size % ALIGN == 0);

        loop {
            let total = size.saturating_mul(*objs);
            let left = self.pool_bytes_left();

            if left >= total {
                return Ok(self.carve(total));
            }
            if left >= size {
                *objs = left / size;
                return Ok(self.carve(size * *objs));
            }

            let bytes_to_get = self.growth_request(size, total);
            self.donate_remainder();

            if let Some(chunk) = self.primary.try_acquire(bytes_to_get) {
                self.adopt_chunk(chunk, bytes_to_get, "pool_grow");
                continue;
            }
            self.record(
                AllocatorLogLevel::Warn,
                "allocate",
                "heap_grow_failed",
                "retry",
                Some(bytes_to_get),
                Some(classify(size)),
                || "next=cannibalize".to_string(),
            );

            if self.cannibalize(size) {
                continue;
            }

            self.fatal_fallbacks += 1;
            self.record(
                AllocatorLogLevel::Error,
                "allocate",
                "fatal_oom",
                if self.config.oom_policy.terminates() {
                    "terminate"
                } else {
                    "report"
                },
                Some(bytes_to_get),
                Some(classify(size)),
                || "free_lists_exhausted".to_string(),
            );
            let chunk = self.primary.allocate(bytes_to_get)?;
            self.adopt_chunk(chunk, bytes_to_get, "pool_grow_fallback");
        }
    }

    /// `2 * demand + round_up(heap_size / 16)`, optionally capped but never
    /// below one object.
    fn growth_request(&self, size: usize, total: usize) -> usize {
        let bytes = total
            .saturating_mul(2)
            .saturating_add(round_up(self.heap_size >> 4));
        match self.config.max_growth_bytes {
            Some(cap) => bytes.min((cap & !(ALIGN - 1)).max(size)),
            None => bytes,
        }
    }

    /// Takes `bytes` off the front of the uncommitted range.
    fn carve(&mut self, bytes: usize) -> NonNull<u8> {
        debug_assert!(bytes <= self.pool_bytes_left());
        let block = self.pool_start;
        // SAFETY: `bytes` fits in the current range, so the result stays
        // within (or one past) the chunk.
        self.pool_start = unsafe { NonNull::new_unchecked(block.as_ptr().add(bytes)) };
        block
    }

    /// Moves a sub-object leftover onto the list of its own size and empties
    /// the pool range.
    fn donate_remainder(&mut self) {
        let left = self.pool_bytes_left();
        if left > 0 {
            debug_assert!(left % ALIGN == 0 && left < MAX_SMALL_SIZE);
            let class = classify(left);
            let block = self.pool_start;
            // SAFETY: the remainder is uncommitted, aligned, and exactly
            // `class_size(class)` bytes.
            unsafe { self.free_lists[class].push(block) };
            self.donations += 1;
            self.record(
                AllocatorLogLevel::Debug,
                "allocate",
                "remainder_donated",
                "success",
                Some(left),
                Some(class),
                || format!("addr={:#x}", block.as_ptr() as usize),
            );
        }
        self.pool_start = self.pool_end;
    }

    /// Pops an idle block of class `>= classify(size)` and makes it the new
    /// pool range.
    fn cannibalize(&mut self, size: usize) -> bool {
        for class in classify(size)..NUM_SIZE_CLASSES {
            let Some(block) = self.free_lists[class].pop() else {
                continue;
            };
            let bytes = class_size(class);
            self.pool_start = block;
            // SAFETY: the block spans exactly `class_size(class)` bytes.
            self.pool_end = unsafe { NonNull::new_unchecked(block.as_ptr().add(bytes)) };
            self.cannibalizations += 1;
            self.record(
                AllocatorLogLevel::Warn,
                "allocate",
                "cannibalize",
                "success",
                Some(size),
                Some(class),
                || format!("reclaimed_bytes={bytes}"),
            );
            return true;
        }
        false
    }

    fn adopt_chunk(&mut self, ptr: NonNull<u8>, bytes: usize, event: &'static str) {
        debug_assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
        self.chunks.push(Chunk { ptr, bytes });
        self.pool_start = ptr;
        // SAFETY: the heap handed us `bytes` bytes at `ptr`.
        self.pool_end = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(bytes)) };
        self.heap_size += bytes;
        self.growth_events += 1;
        let chunks = self.chunks.len();
        self.record(
            AllocatorLogLevel::Debug,
            "allocate",
            event,
            "success",
            Some(bytes),
            None,
            || format!("chunks={chunks}"),
        );
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
        size: Option<usize>,
        class: Option<usize>,
        details: impl FnOnce() -> String,
    ) {
        if !self.config.lifecycle_logging {
            return;
        }
        let details = details();
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("tieralloc::pool::{symbol}::{decision_id:016x}");
        let free_blocks_total = self.free_lists.iter().map(FreeList::len).sum();
        self.lifecycle_logs.push(AllocatorLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            size,
            class,
            outcome,
            details,
            heap_size: self.heap_size,
            pool_bytes_left: self.pool_bytes_left(),
            growth_events: self.growth_events,
            cannibalizations: self.cannibalizations,
            free_blocks_total,
        });
    }
}

impl<H: SystemHeap> RawAlloc for PoolAllocator<H> {
    fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        PoolAllocator::allocate(self, bytes)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { PoolAllocator::deallocate(self, ptr, bytes) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { PoolAllocator::reallocate(self, ptr, old_bytes, new_bytes) }
    }
}

impl<H: SystemHeap> Drop for PoolAllocator<H> {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            // SAFETY: each chunk was acquired from this heap exactly once and
            // no block carved from it may outlive the allocator.
            unsafe { self.primary.release(chunk.ptr, chunk.bytes) };
        }
    }
}

impl<H: SystemHeap + std::fmt::Debug> std::fmt::Debug for PoolAllocator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("heap", self.primary.heap())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Rounded block size for a small request; zero-byte requests take the
/// smallest class.
#[inline]
fn block_size(bytes: usize) -> usize {
    round_up(bytes).max(ALIGN)
}
