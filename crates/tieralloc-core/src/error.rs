//! Allocator error type.

use thiserror::Error;

/// Failures that can cross the allocator boundary.
///
/// Under the default [`OomPolicy::Terminate`](crate::OomPolicy::Terminate)
/// `OutOfMemory` never reaches the caller: the process exits at the point
/// where it would have been returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The system heap could not supply `requested` bytes and no pooled
    /// memory could be reused instead.
    #[error("out of memory (requested {requested} bytes)")]
    OutOfMemory { requested: usize },
    /// `count * elem_size` does not fit in `usize`.
    #[error("allocation size overflow: {count} x {elem_size} bytes")]
    SizeOverflow { count: usize, elem_size: usize },
    /// The element type needs stronger alignment than the allocator provides.
    #[error("alignment {align} exceeds the allocator's 8-byte boundary")]
    UnsupportedAlignment { align: usize },
}

impl AllocError {
    /// Returns true for the terminal heap-exhaustion result.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
