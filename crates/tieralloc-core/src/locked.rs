//! Mutex-guarded pool for use from several threads.
//!
//! The pool itself has no synchronization. `LockedPool` serializes every
//! operation on one instance behind a single `parking_lot::Mutex`, which also
//! keeps pool growth (the only writer of the uncommitted range) mutually
//! exclusive. Workloads that contend on it should shard instead: one
//! `PoolAllocator` per worker, no shared state.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::AllocError;
use crate::heap::{LibcHeap, SystemHeap};
use crate::pool::{PoolAllocator, PoolStats};

pub struct LockedPool<H: SystemHeap = LibcHeap> {
    inner: Mutex<PoolAllocator<H>>,
}

impl LockedPool<LibcHeap> {
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        Self::new(PoolAllocator::with_config(config))
    }
}

impl<H: SystemHeap> LockedPool<H> {
    #[must_use]
    pub fn new(pool: PoolAllocator<H>) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    pub fn allocate(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.lock().allocate(bytes)
    }

    /// # Safety
    ///
    /// See [`PoolAllocator::deallocate`].
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().deallocate(ptr, bytes) }
    }

    /// # Safety
    ///
    /// See [`PoolAllocator::reallocate`].
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().reallocate(ptr, old_bytes, new_bytes) }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    /// Runs `f` with the lock held, for multi-step sequences that must not
    /// interleave with other threads.
    pub fn with<R>(&self, f: impl FnOnce(&mut PoolAllocator<H>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> PoolAllocator<H> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OomPolicy;
    use std::collections::HashSet;

    #[test]
    fn test_concurrent_allocations_never_alias() {
        let pool = LockedPool::with_config(
            PoolConfig::default().with_oom_policy(OomPolicy::Report),
        );

        let per_thread: Vec<Vec<usize>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let pool = &pool;
                    scope.spawn(move || {
                        let size = 8 * (t + 1);
                        let mut live = Vec::new();
                        for i in 0..200 {
                            let ptr = pool.allocate(size).unwrap();
                            if i % 3 == 0 {
                                unsafe { pool.deallocate(ptr, size) };
                            } else {
                                live.push(ptr.as_ptr() as usize);
                            }
                        }
                        live
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut seen = HashSet::new();
        for addr in per_thread.iter().flatten() {
            assert!(seen.insert(*addr), "block {addr:#x} handed out twice");
        }
        assert!(pool.stats().heap_size > 0);
    }

    #[test]
    fn test_with_runs_under_lock() {
        let pool = LockedPool::with_config(PoolConfig::default());
        let (ptr, free_after) = pool.with(|inner| {
            let ptr = inner.allocate(32).unwrap();
            (ptr, inner.free_count(3))
        });
        assert_eq!(free_after, 19);
        unsafe { pool.deallocate(ptr, 32) };
        assert_eq!(pool.into_inner().free_count(3), 20);
    }
}
