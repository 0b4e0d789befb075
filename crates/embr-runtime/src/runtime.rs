//! `Runtime`: the top-level container owning a GC instance and the
//! runtime-scoped interned-string table. One or more [`crate::Context`]s
//! run against it; the host is responsible for serializing access if more
//! than one context shares a runtime, since neither the heap nor the
//! string table is re-entrant.

use embr_gc::{GcCycleReport, GcStats, Heap};
use embr_value::StringTable;

use crate::config::RuntimeConfig;

/// Owns the heap and the interned-string table. Created once per
/// embedding; any number of [`crate::Context`]s may be built against it.
pub struct Runtime {
    heap: Heap,
    strings: StringTable,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a runtime with default tuning.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with explicit tuning (GC thresholds, instruction
    /// limit, tracing toggle).
    pub fn with_config(config: RuntimeConfig) -> Self {
        let heap = Heap::with_config(config.gc_config());
        Self {
            heap,
            strings: StringTable::new(),
            config,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Force a full collection. The embedding API's `gc()`.
    pub fn gc(&self) -> GcCycleReport {
        tracing::debug!("forcing full gc");
        self.heap.collect_full()
    }

    /// Bytes currently retained across both generations. The embedding
    /// API's `memory_usage()`.
    pub fn memory_usage(&self) -> usize {
        self.heap.allocated_bytes()
    }

    /// Read-only snapshot of cumulative collector statistics
    /// (collections, allocations/deallocations, bytes allocated/freed,
    /// collection time, peak usage).
    pub fn stats(&self) -> GcStats {
        self.heap.stats()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
