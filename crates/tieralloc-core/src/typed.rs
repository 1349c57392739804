//! Element-count adapter over a byte allocator.
//!
//! Container code thinks in "n values of `T`"; the allocators think in bytes.
//! [`TypedAlloc`] does the multiplication, refuses types the allocators cannot
//! align, and treats zero-length requests as free.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::raw::RawAlloc;
use crate::size_class::ALIGN;

/// Allocates arrays of `T` from a borrowed [`RawAlloc`].
pub struct TypedAlloc<'a, T, A: RawAlloc + ?Sized> {
    alloc: &'a mut A,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, A: RawAlloc + ?Sized> TypedAlloc<'a, T, A> {
    pub fn new(alloc: &'a mut A) -> Self {
        Self {
            alloc,
            _marker: PhantomData,
        }
    }

    /// Byte size of `count` values, or the reason it cannot be served.
    pub fn layout_bytes(count: usize) -> Result<usize, AllocError> {
        if align_of::<T>() > ALIGN {
            return Err(AllocError::UnsupportedAlignment {
                align: align_of::<T>(),
            });
        }
        count
            .checked_mul(size_of::<T>())
            .ok_or(AllocError::SizeOverflow {
                count,
                elem_size: size_of::<T>(),
            })
    }

    /// Uninitialized storage for `count` values. Zero bytes yields a dangling
    /// pointer without touching the allocator.
    pub fn allocate(&mut self, count: usize) -> Result<NonNull<T>, AllocError> {
        let bytes = Self::layout_bytes(count)?;
        if bytes == 0 {
            return Ok(NonNull::dangling());
        }
        self.alloc.allocate(bytes).map(NonNull::cast)
    }

    pub fn allocate_one(&mut self) -> Result<NonNull<T>, AllocError> {
        self.allocate(1)
    }

    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on the same
    /// underlying allocator with the same `count`. Values are not dropped.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>, count: usize) {
        let bytes = count * size_of::<T>();
        if bytes == 0 {
            return;
        }
        // SAFETY: forwarded caller contract; `bytes` matches the allocation.
        unsafe { self.alloc.deallocate(ptr.cast(), bytes) }
    }

    /// # Safety
    ///
    /// See [`deallocate`](Self::deallocate).
    pub unsafe fn deallocate_one(&mut self, ptr: NonNull<T>) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate(ptr, 1) }
    }

    /// Resizes storage from `old_count` to `new_count` values, preserving the
    /// common prefix.
    ///
    /// # Safety
    ///
    /// See [`deallocate`](Self::deallocate) for `ptr` and `old_count`.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<T>,
        old_count: usize,
        new_count: usize,
    ) -> Result<NonNull<T>, AllocError> {
        let old_bytes = old_count * size_of::<T>();
        let new_bytes = Self::layout_bytes(new_count)?;
        if old_bytes == 0 {
            return self.allocate(new_count);
        }
        if new_bytes == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.deallocate(ptr, old_count) };
            return Ok(NonNull::dangling());
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.alloc.reallocate(ptr.cast(), old_bytes, new_bytes) }.map(NonNull::cast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OomPolicy, PoolConfig};
    use crate::pool::PoolAllocator;
    use crate::primary::PrimaryAllocator;
    use crate::size_class::classify;

    #[allow(dead_code)]
    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Record {
        id: u32,
        weight: f64,
    }

    #[allow(dead_code)]
    #[repr(align(16))]
    struct Wide([u8; 16]);

    fn pool() -> PoolAllocator {
        PoolAllocator::with_config(PoolConfig::default().with_oom_policy(OomPolicy::Report))
    }

    #[test]
    fn test_zero_count_does_not_touch_allocator() {
        let mut pool = pool();
        let mut typed = TypedAlloc::<u64, _>::new(&mut pool);
        let ptr = typed.allocate(0).unwrap();
        assert_eq!(ptr, NonNull::dangling());
        unsafe { typed.deallocate(ptr, 0) };
        assert_eq!(pool.heap_size(), 0);
    }

    #[test]
    fn test_small_array_goes_to_matching_class() {
        let mut pool = pool();
        let ptr = {
            let mut typed = TypedAlloc::<Record, _>::new(&mut pool);
            let ptr = typed.allocate(3).unwrap();
            unsafe {
                for i in 0..3 {
                    ptr.as_ptr().add(i).write(Record {
                        id: i as u32,
                        weight: i as f64 * 0.5,
                    });
                }
                assert_eq!((*ptr.as_ptr().add(2)).id, 2);
            }
            ptr
        };
        let bytes = 3 * size_of::<Record>();
        assert!(pool.owns(ptr.cast()));
        assert_eq!(pool.free_count(classify(bytes)), 19);

        let mut typed = TypedAlloc::<Record, _>::new(&mut pool);
        unsafe { typed.deallocate(ptr, 3) };
        assert_eq!(pool.free_count(classify(bytes)), 20);
    }

    #[test]
    fn test_large_array_forwards_to_primary() {
        let mut primary = PrimaryAllocator::libc(OomPolicy::Report);
        let mut typed = TypedAlloc::<u32, _>::new(&mut primary);
        let ptr = typed.allocate(1000).unwrap();
        unsafe {
            ptr.as_ptr().add(999).write(7);
            let grown = typed.reallocate(ptr, 1000, 4000).unwrap();
            assert_eq!(*grown.as_ptr().add(999), 7);
            typed.deallocate(grown, 4000);
        }
    }

    #[test]
    fn test_reallocate_grows_from_small_to_large() {
        let mut pool = pool();
        let mut typed = TypedAlloc::<u64, _>::new(&mut pool);
        let ptr = typed.allocate(4).unwrap();
        unsafe {
            for i in 0..4 {
                ptr.as_ptr().add(i).write(i as u64 * 11);
            }
            let grown = typed.reallocate(ptr, 4, 64).unwrap();
            for i in 0..4 {
                assert_eq!(*grown.as_ptr().add(i), i as u64 * 11);
            }
            let gone = typed.reallocate(grown, 64, 0).unwrap();
            assert_eq!(gone, NonNull::dangling());
        }
    }

    #[test]
    fn test_overflow_and_alignment_are_rejected() {
        let mut pool = pool();
        {
            let mut typed = TypedAlloc::<u64, _>::new(&mut pool);
            assert_eq!(
                typed.allocate(usize::MAX),
                Err(AllocError::SizeOverflow {
                    count: usize::MAX,
                    elem_size: 8
                })
            );
        }
        let mut typed = TypedAlloc::<Wide, _>::new(&mut pool);
        assert_eq!(
            typed.allocate_one().map(|_| ()),
            Err(AllocError::UnsupportedAlignment { align: 16 })
        );
    }
}
