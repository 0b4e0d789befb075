//! Read-only memory observability.

/// Cumulative collector statistics, exposed to the host as read-only
/// observables.
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collection cycles run (minor, full, and completed
    /// incremental cycles each count once).
    pub collections: u64,
    /// Total number of allocations ever made through this heap.
    pub allocations: u64,
    /// Total number of allocations ever reclaimed by the sweeper.
    pub deallocations: u64,
    /// Total bytes ever allocated.
    pub bytes_allocated: u64,
    /// Total bytes ever freed by the sweeper.
    pub bytes_freed: u64,
    /// Cumulative wall-clock time spent inside the collector, in
    /// microseconds.
    pub total_collection_time_us: u64,
    /// Peak bytes retained across both generations, observed at the end of
    /// any collection cycle.
    pub peak_usage: usize,
}

/// Outcome of one mark-sweep pass (minor, full, or one incremental run to
/// completion), used to update `GcStats` and returned directly to callers
/// that want to assert on objects/bytes reclaimed by a single cycle.
#[derive(Debug, Clone, Default)]
pub struct GcCycleReport {
    /// Objects reclaimed this cycle.
    pub reclaimed_count: usize,
    /// Bytes reclaimed this cycle.
    pub reclaimed_bytes: usize,
    /// Objects marked reachable this cycle.
    pub marked_count: usize,
}
