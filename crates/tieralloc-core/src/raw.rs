//! The untyped allocation boundary consumed by higher layers.

use std::ptr::NonNull;

use crate::error::AllocError;

/// Byte-granular allocate/deallocate/reallocate.
///
/// Implemented by both tiers so callers (and [`TypedAlloc`](crate::TypedAlloc))
/// can be written once against either.
pub trait RawAlloc {
    /// Allocates `bytes` bytes, aligned to at least 8.
    fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocError>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate`/`reallocate` on this allocator with
    /// exactly `bytes` as its size, and must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize);

    /// Resizes a block, preserving `min(old_bytes, new_bytes)` bytes of
    /// content. The old pointer is dead once this returns `Ok`.
    ///
    /// # Safety
    ///
    /// Same contract as [`deallocate`](Self::deallocate) for `ptr` and
    /// `old_bytes`.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, AllocError>;
}
