//! Structured lifecycle records for the allocator's slow paths.
//!
//! Fast-path pops and pushes are never recorded. Refills, pool growth,
//! remainder donation, cannibalization, large forwards and the fatal path are,
//! when [`PoolConfig::lifecycle_logging`](crate::PoolConfig) is enabled.

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorLogRecord {
    /// Monotonic event id, unique per allocator instance.
    pub decision_id: u64,
    /// Correlation id (`tieralloc::pool::<symbol>::<decision_id>`).
    pub trace_id: String,
    pub level: AllocatorLogLevel,
    /// API symbol that triggered the event (`allocate`, `reallocate`, ...).
    pub symbol: &'static str,
    /// Event kind (`refill`, `pool_grow`, `cannibalize`, ...).
    pub event: &'static str,
    /// Byte count involved in the event.
    pub size: Option<usize>,
    /// Size class involved in the event.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: cumulative bytes acquired for the pool.
    pub heap_size: usize,
    /// Snapshot: uncommitted bytes in the pool range.
    pub pool_bytes_left: usize,
    /// Snapshot: pool growth count.
    pub growth_events: u64,
    /// Snapshot: cannibalization count.
    pub cannibalizations: u64,
    /// Snapshot: blocks sitting on all free lists.
    pub free_blocks_total: usize,
}
