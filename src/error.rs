//! Kernel-wide error types: a plain enum plus `Display`, matching the
//! lightweight error style used across the allocator, task table, and
//! work queue boundaries.

use core::fmt;

/// Errors surfaced at the allocator, task-table, and work-queue boundaries.
///
/// Per the propagation policy: the fault sensor, profiler, and adaptive
/// controller never return any of these upward — they log and continue.
/// Only allocation and task creation propagate a `KernelError` to their
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The bump arena or a slab cache is exhausted.
    OutOfMemory,
    /// A bounded work queue was full at enqueue time.
    QueueFull,
    /// A fixed-capacity table (task table, adaptive target map) has no
    /// free slot.
    TableFull,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::QueueFull => write!(f, "queue full"),
            KernelError::TableFull => write!(f, "table full"),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
