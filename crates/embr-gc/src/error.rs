//! Collector-level errors.

use thiserror::Error;

/// Errors the collector can report to its caller. Allocation failure is
/// never retried internally — the caller decides whether to surface it as
/// a memory error to the host.
#[derive(Debug, Error)]
pub enum GcError {
    /// The heap could not satisfy an allocation after a minor collection,
    /// growth, and (if configured) a full collection all failed to free
    /// enough room.
    #[error("out of memory: failed to allocate {requested} bytes ({used}/{limit} bytes in use)")]
    OutOfMemory {
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// Bytes currently retained across both generations.
        used: usize,
        /// The heap's current ceiling.
        limit: usize,
    },
}

/// Result type for collector operations.
pub type GcResult<T> = std::result::Result<T, GcError>;
