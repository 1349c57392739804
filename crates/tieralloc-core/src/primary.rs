//! Primary allocator: direct pass-through to the system heap.
//!
//! Serves every request above the small-object ceiling and is the supplier of
//! last resort for the pool. Holds no allocation state of its own; a failed
//! request is routed through the configured [`OomPolicy`].

use std::ptr::NonNull;

use crate::config::OomPolicy;
use crate::error::AllocError;
use crate::heap::{LibcHeap, SystemHeap};
use crate::raw::RawAlloc;

/// Diagnostic printed before the process exits on heap exhaustion.
pub const OOM_MESSAGE: &str = "out of memory";

/// Exit status used by [`terminate_out_of_memory`].
pub const OOM_EXIT_CODE: i32 = 1;

/// Reports heap exhaustion and ends the process.
pub fn terminate_out_of_memory() -> ! {
    eprintln!("{OOM_MESSAGE}");
    std::process::exit(OOM_EXIT_CODE)
}

/// Thin wrapper over a [`SystemHeap`] plus the fatal-path policy.
#[derive(Debug, Default)]
pub struct PrimaryAllocator<H = LibcHeap> {
    heap: H,
    policy: OomPolicy,
}

impl PrimaryAllocator<LibcHeap> {
    /// Primary allocator over the C library heap with the given policy.
    #[must_use]
    pub fn libc(policy: OomPolicy) -> Self {
        Self::new(LibcHeap, policy)
    }
}

impl<H: SystemHeap> PrimaryAllocator<H> {
    #[must_use]
    pub fn new(heap: H, policy: OomPolicy) -> Self {
        Self { heap, policy }
    }

    #[must_use]
    pub fn policy(&self) -> OomPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: OomPolicy) {
        self.policy = policy;
    }

    #[must_use]
    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut H {
        &mut self.heap
    }

    /// Acquire without applying the OOM policy. Used by pool growth, where a
    /// failure is recoverable by cannibalization.
    pub(crate) fn try_acquire(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        self.heap.acquire(bytes)
    }

    /// Release without size bookkeeping beyond what the heap wants.
    ///
    /// # Safety
    ///
    /// See [`SystemHeap::release`].
    pub(crate) unsafe fn release(&mut self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.heap.release(ptr, bytes) }
    }

    /// Applies the OOM policy. Returns only under [`OomPolicy::Report`].
    pub(crate) fn out_of_memory(&self, requested: usize) -> AllocError {
        if self.policy.terminates() {
            terminate_out_of_memory();
        }
        AllocError::OutOfMemory { requested }
    }
}

impl<H: SystemHeap> RawAlloc for PrimaryAllocator<H> {
    fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        match self.heap.acquire(bytes) {
            Some(ptr) => Ok(ptr),
            None => Err(self.out_of_memory(bytes)),
        }
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.heap.release(ptr, bytes) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        match unsafe { self.heap.resize(ptr, old_bytes, new_bytes) } {
            Some(moved) => Ok(moved),
            None => Err(self.out_of_memory(new_bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::LimitedHeap;

    #[test]
    fn test_allocate_and_deallocate() {
        let mut primary = PrimaryAllocator::libc(OomPolicy::Report);
        let ptr = primary.allocate(200).unwrap();
        unsafe {
            ptr.as_ptr().write_bytes(7, 200);
            primary.deallocate(ptr, 200);
        }
    }

    #[test]
    fn test_reallocate_preserves_prefix() {
        let mut primary = PrimaryAllocator::libc(OomPolicy::Report);
        let ptr = primary.allocate(256).unwrap();
        unsafe {
            for i in 0..256 {
                *ptr.as_ptr().add(i) = i as u8;
            }
            let grown = primary.reallocate(ptr, 256, 8192).unwrap();
            for i in 0..256 {
                assert_eq!(*grown.as_ptr().add(i), i as u8);
            }
            primary.deallocate(grown, 8192);
        }
    }

    #[test]
    fn test_report_policy_returns_out_of_memory() {
        let mut primary = PrimaryAllocator::new(LimitedHeap::with_budget(0), OomPolicy::Report);
        assert_eq!(
            primary.allocate(512),
            Err(AllocError::OutOfMemory { requested: 512 })
        );
    }

    #[test]
    fn test_report_policy_on_failed_resize_keeps_block() {
        let mut primary =
            PrimaryAllocator::new(LimitedHeap::with_budget(1024), OomPolicy::Report);
        let ptr = primary.allocate(512).unwrap();
        unsafe {
            *ptr.as_ptr() = 42;
            let err = primary.reallocate(ptr, 512, 4096).unwrap_err();
            assert!(err.is_out_of_memory());
            assert_eq!(*ptr.as_ptr(), 42);
            primary.deallocate(ptr, 512);
        }
        assert_eq!(primary.heap().in_use(), 0);
    }

    #[test]
    fn test_default_policy_terminates() {
        let primary = PrimaryAllocator::<LibcHeap>::default();
        assert!(primary.policy().terminates());
    }
}
