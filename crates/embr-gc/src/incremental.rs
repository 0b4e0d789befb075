//! Incremental collection: the same mark-sweep pass as `collect_full`, but
//! time-sliced across multiple calls so a host can bound how long any one
//! `collect_incremental` call may run.

use std::collections::VecDeque;

use crate::header::RawGcPtr;

/// Phase the incremental collector is currently in. `Idle` means no cycle
/// is in progress; a fresh `collect_incremental` call starts one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    /// No incremental cycle in progress.
    Idle,
    /// Tracing from roots, building the black set.
    Marking,
    /// Reclaiming white objects in both generations.
    Sweeping,
    /// Reserved for a future moving/compacting pass. This collector never
    /// relocates objects, so this phase is a single no-op step back to
    /// `Idle`.
    Compacting,
}

/// Up to this many grey nodes are processed per `collect_incremental` call,
/// regardless of remaining time budget — bounds the worst case where the
/// wall-clock check itself (`Instant::now()`) becomes the dominant cost for
/// a workload of many tiny objects.
pub const INCREMENTAL_STEP: usize = 256;

pub(crate) enum IncrementalState {
    Idle,
    Marking { worklist: VecDeque<RawGcPtr> },
    Sweeping,
    Compacting,
}

impl Default for IncrementalState {
    fn default() -> Self {
        IncrementalState::Idle
    }
}

impl IncrementalState {
    pub(crate) fn phase(&self) -> GcPhase {
        match self {
            IncrementalState::Idle => GcPhase::Idle,
            IncrementalState::Marking { .. } => GcPhase::Marking,
            IncrementalState::Sweeping => GcPhase::Sweeping,
            IncrementalState::Compacting => GcPhase::Compacting,
        }
    }
}

/// Result of one `collect_incremental` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalProgress {
    /// Phase the collector is in after this call returned.
    pub phase: GcPhase,
    /// Whether the whole cycle (marking through sweeping) finished during
    /// this call.
    pub cycle_completed: bool,
}
