//! System heap backends.
//!
//! [`SystemHeap`] is the seam between the allocator tiers and whatever actually
//! owns process memory. [`LibcHeap`] forwards to `malloc`/`realloc`/`free`;
//! [`LimitedHeap`] wraps another backend with a byte budget so exhaustion can
//! be simulated without starving the host.

use std::ptr::NonNull;

/// Raw acquire/resize/release primitives.
///
/// Returned blocks must be aligned to at least
/// [`ALIGN`](crate::size_class::ALIGN) bytes. Failure is reported as `None`;
/// the OOM policy is applied by the caller, never by the backend.
pub trait SystemHeap {
    /// Acquires `bytes` bytes.
    fn acquire(&mut self, bytes: usize) -> Option<NonNull<u8>>;

    /// Resizes a block, possibly moving it. On failure the original block is
    /// left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this backend and currently span
    /// `old_bytes` bytes.
    unsafe fn resize(
        &mut self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this backend, span `bytes` bytes, and
    /// not be used afterwards.
    unsafe fn release(&mut self, ptr: NonNull<u8>, bytes: usize);
}

/// The C library heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcHeap;

impl SystemHeap for LibcHeap {
    fn acquire(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: malloc has no preconditions; a zero-size request is bumped
        // to one byte so success always yields a unique pointer.
        let raw = unsafe { libc::malloc(bytes.max(1)) };
        NonNull::new(raw.cast::<u8>())
    }

    unsafe fn resize(
        &mut self,
        ptr: NonNull<u8>,
        _old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: caller guarantees `ptr` came from this heap's malloc/realloc.
        let raw = unsafe { libc::realloc(ptr.as_ptr().cast(), new_bytes.max(1)) };
        NonNull::new(raw.cast::<u8>())
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, _bytes: usize) {
        // SAFETY: caller guarantees `ptr` came from this heap and is dead.
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }
}

/// A heap that refuses requests once `budget` bytes are outstanding.
#[derive(Debug)]
pub struct LimitedHeap<H = LibcHeap> {
    inner: H,
    budget: usize,
    in_use: usize,
    exhausted: bool,
    failed_requests: u64,
}

impl LimitedHeap<LibcHeap> {
    /// Budgeted wrapper around the C library heap.
    #[must_use]
    pub fn with_budget(budget: usize) -> Self {
        Self::new(LibcHeap, budget)
    }
}

impl<H: SystemHeap> LimitedHeap<H> {
    #[must_use]
    pub fn new(inner: H, budget: usize) -> Self {
        Self {
            inner,
            budget,
            in_use: 0,
            exhausted: false,
            failed_requests: 0,
        }
    }

    /// Makes every subsequent acquire or growing resize fail.
    pub fn exhaust(&mut self) {
        self.exhausted = true;
    }

    /// Undoes [`exhaust`](Self::exhaust).
    pub fn restore(&mut self) {
        self.exhausted = false;
    }

    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Bytes currently handed out and not yet released.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Requests refused so far.
    #[must_use]
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    fn admits(&self, extra: usize) -> bool {
        !self.exhausted
            && self
                .in_use
                .checked_add(extra)
                .is_some_and(|total| total <= self.budget)
    }
}

impl<H: SystemHeap> SystemHeap for LimitedHeap<H> {
    fn acquire(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        if !self.admits(bytes) {
            self.failed_requests += 1;
            return None;
        }
        let ptr = self.inner.acquire(bytes)?;
        self.in_use += bytes;
        Some(ptr)
    }

    unsafe fn resize(
        &mut self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        if new_bytes > old_bytes && !self.admits(new_bytes - old_bytes) {
            self.failed_requests += 1;
            return None;
        }
        // SAFETY: forwarded caller contract.
        let moved = unsafe { self.inner.resize(ptr, old_bytes, new_bytes) }?;
        self.in_use = self.in_use.saturating_sub(old_bytes) + new_bytes;
        Some(moved)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.release(ptr, bytes) };
        self.in_use = self.in_use.saturating_sub(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_libc_heap_roundtrip() {
        let mut heap = LibcHeap;
        let ptr = heap.acquire(64).unwrap();
        assert_eq!(ptr.as_ptr() as usize % crate::size_class::ALIGN, 0);
        unsafe {
            ptr.as_ptr().write_bytes(0xAB, 64);
            let grown = heap.resize(ptr, 64, 4096).unwrap();
            assert_eq!(*grown.as_ptr(), 0xAB);
            assert_eq!(*grown.as_ptr().add(63), 0xAB);
            heap.release(grown, 4096);
        }
    }

    #[test]
    fn test_libc_heap_zero_bytes() {
        let mut heap = LibcHeap;
        let ptr = heap.acquire(0).unwrap();
        unsafe { heap.release(ptr, 0) };
    }

    #[test]
    fn test_limited_heap_enforces_budget() {
        let mut heap = LimitedHeap::with_budget(100);
        let a = heap.acquire(60).unwrap();
        assert!(heap.acquire(60).is_none());
        assert_eq!(heap.failed_requests(), 1);
        assert_eq!(heap.in_use(), 60);
        unsafe { heap.release(a, 60) };
        assert_eq!(heap.in_use(), 0);
        let b = heap.acquire(100).unwrap();
        unsafe { heap.release(b, 100) };
    }

    #[test]
    fn test_limited_heap_exhaust_and_restore() {
        let mut heap = LimitedHeap::with_budget(usize::MAX);
        heap.exhaust();
        assert!(heap.acquire(8).is_none());
        heap.restore();
        let ptr = heap.acquire(8).unwrap();
        unsafe { heap.release(ptr, 8) };
    }

    #[test]
    fn test_limited_heap_resize_accounting() {
        let mut heap = LimitedHeap::with_budget(256);
        let ptr = heap.acquire(128).unwrap();
        unsafe {
            assert!(heap.resize(ptr, 128, 512).is_none());
            assert_eq!(heap.in_use(), 128);
            let grown = heap.resize(ptr, 128, 256).unwrap();
            assert_eq!(heap.in_use(), 256);
            let shrunk = heap.resize(grown, 256, 32).unwrap();
            assert_eq!(heap.in_use(), 32);
            heap.release(shrunk, 32);
        }
        assert_eq!(heap.in_use(), 0);
    }
}
