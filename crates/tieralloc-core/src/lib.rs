//! # tieralloc-core
//!
//! Two-tier memory allocator.
//!
//! The primary tier ([`PrimaryAllocator`]) wraps the system heap and never
//! hands back a null pointer: on exhaustion it either terminates the process
//! with "out of memory" (the default) or reports [`AllocError::OutOfMemory`].
//!
//! The pooled tier ([`PoolAllocator`]) serves requests of at most 128 bytes
//! from sixteen 8-byte-granular free lists, refilled in batches from a
//! growable pool. Everything larger goes straight to the primary tier.

pub mod config;
pub mod error;
mod free_list;
pub mod heap;
pub mod locked;
pub mod log;
pub mod pool;
pub mod primary;
pub mod raw;
pub mod size_class;
pub mod typed;

pub use config::{OomPolicy, PoolConfig};
pub use error::AllocError;
pub use heap::{LibcHeap, LimitedHeap, SystemHeap};
pub use locked::LockedPool;
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
pub use pool::{PoolAllocator, PoolStats};
pub use primary::{PrimaryAllocator, terminate_out_of_memory};
pub use raw::RawAlloc;
pub use typed::TypedAlloc;
