//! The managed heap: allocation, rooting, and the three collection modes
//! (`collect_young`, `collect_full`, `collect_incremental`).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use crate::error::{GcError, GcResult};
use crate::generation::GenList;
use crate::header::{GcBox, GcHeader, GcRef, Generation, MarkColor, RawGcPtr};
use crate::incremental::{GcPhase, IncrementalProgress, IncrementalState, INCREMENTAL_STEP};
use crate::stats::{GcCycleReport, GcStats};
use crate::trace::Trace;
use crate::weak::{WeakRef, WeakRegistry};

/// Survivors are promoted from young to old after surviving this many
/// minor collections.
pub const PROMOTION_THRESHOLD: u8 = 2;

/// Tunables for a [`Heap`].
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Bytes the young generation may hold before a minor collection is
    /// triggered by `alloc`.
    pub young_threshold: usize,
    /// Initial ceiling on total bytes retained across both generations.
    /// Grown geometrically (x2) when a collection can't make room, up to
    /// `max_heap_size`.
    pub initial_heap_size: usize,
    /// Hard ceiling the heap will never grow past. `None` means unbounded.
    pub max_heap_size: Option<usize>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            young_threshold: 256 * 1024,
            initial_heap_size: 4 * 1024 * 1024,
            max_heap_size: None,
        }
    }
}

/// The managed heap. Owns both generations, the root set, the weak
/// reference registry, and the incremental collector's state machine.
///
/// Single-threaded and not re-entrant: one heap is driven by exactly one
/// mutator thread, matching the VM's cooperative scheduling model.
pub struct Heap {
    config: GcConfig,
    young: GenList,
    old: GenList,
    roots: RefCell<Vec<RawGcPtr>>,
    weak: WeakRegistry,
    stats: RefCell<GcStats>,
    heap_limit: Cell<usize>,
    incremental: RefCell<IncrementalState>,
}

impl Heap {
    /// Create a heap with default tuning.
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create a heap with custom tuning.
    pub fn with_config(config: GcConfig) -> Self {
        let heap_limit = Cell::new(config.initial_heap_size);
        Self {
            config,
            young: GenList::default(),
            old: GenList::default(),
            roots: RefCell::new(Vec::new()),
            weak: WeakRegistry::default(),
            stats: RefCell::new(GcStats::default()),
            heap_limit,
            incremental: RefCell::new(IncrementalState::Idle),
        }
    }

    /// Bytes currently retained across both generations.
    pub fn allocated_bytes(&self) -> usize {
        self.young.bytes() + self.old.bytes()
    }

    /// Read-only snapshot of cumulative collector statistics.
    pub fn stats(&self) -> GcStats {
        self.stats.borrow().clone()
    }

    /// Configured tunables.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Pin `ptr` as a strong root. The same pointer may be added more than
    /// once; it must be removed the same number of times before the object
    /// becomes collectible again (mirrors the host's "push/pop" usage
    /// pattern across nested allocations).
    pub fn add_root(&self, ptr: RawGcPtr) {
        self.roots.borrow_mut().push(ptr);
    }

    /// Remove one pinned instance of `ptr` from the root set.
    pub fn remove_root(&self, ptr: RawGcPtr) {
        let mut roots = self.roots.borrow_mut();
        if let Some(pos) = roots.iter().rposition(|r| *r == ptr) {
            roots.remove(pos);
        }
    }

    /// Allocate a new `T`, triggering a minor collection first if the
    /// young generation is over threshold, and growing (or failing) if
    /// that isn't enough room.
    pub fn alloc<T: Trace>(&self, value: T) -> GcResult<GcRef<T>> {
        let size = std::mem::size_of::<GcBox<T>>() as u32;

        if self.young.bytes() + size as usize > self.config.young_threshold {
            self.collect_young();
        }

        if self.allocated_bytes() + size as usize > self.heap_limit.get() && !self.grow(size as usize)
        {
            self.collect_full();
            if self.allocated_bytes() + size as usize > self.heap_limit.get()
                && !self.grow(size as usize)
            {
                return Err(GcError::OutOfMemory {
                    requested: size as usize,
                    used: self.allocated_bytes(),
                    limit: self.heap_limit.get(),
                });
            }
        }

        let boxed = Box::new(GcBox {
            header: GcHeader::new::<T>(size),
            value,
        });
        let raw = NonNull::new(Box::into_raw(boxed)).expect("Box::into_raw is never null");
        let header_ptr = unsafe { NonNull::new_unchecked(raw.as_ptr() as *mut GcHeader) };
        self.young.push_front(header_ptr);

        let mut stats = self.stats.borrow_mut();
        stats.allocations += 1;
        stats.bytes_allocated += size as u64;
        drop(stats);

        // A mid-cycle allocation must not slip a white object past a
        // Marking-phase sweep: conservatively mark it Black so the
        // incremental sweeper, which only walks generation lists taken
        // before marking began plus whatever is reachable, never treats it
        // as unreached. See `collect_incremental`.
        if matches!(
            *self.incremental.borrow(),
            IncrementalState::Marking { .. } | IncrementalState::Sweeping
        ) {
            unsafe { header_ptr.as_ref() }.mark.set(MarkColor::Black);
        }

        Ok(GcRef::from_box(raw))
    }

    fn grow(&self, needed: usize) -> bool {
        let mut limit = self.heap_limit.get();
        while self.allocated_bytes() + needed > limit {
            let grown = limit.saturating_mul(2).max(limit + needed);
            match self.config.max_heap_size {
                Some(max) if grown > max => {
                    if limit >= max {
                        return false;
                    }
                    limit = max;
                    break;
                }
                _ => limit = grown,
            }
        }
        self.heap_limit.set(limit);
        self.allocated_bytes() + needed <= limit
    }

    /// Write barrier: call whenever a heap reference is stored into an
    /// already-allocated object, array element, or closure scope. If the
    /// container is Black (fully scanned) and the new child is White, the
    /// child must be conservatively greyed so an in-progress collection
    /// doesn't miss it.
    pub fn write_barrier(&self, container: &GcHeader, child: Option<RawGcPtr>) {
        if container.mark() != MarkColor::Black {
            return;
        }
        let Some(child) = child else { return };
        if child.is_null() {
            return;
        }
        let child_header = unsafe { &*child };
        if child_header.mark() == MarkColor::White {
            child_header.mark.set(MarkColor::Grey);
            if let IncrementalState::Marking { worklist } = &mut *self.incremental.borrow_mut() {
                worklist.push_back(child);
            }
        }
    }

    /// Register a weak reference to `target`. `callback` fires exactly
    /// once, during the sweep that proves `target` unreachable.
    pub fn create_weak_ref<T: Trace>(
        &self,
        target: GcRef<T>,
        callback: impl FnOnce() + 'static,
    ) -> WeakRef<T> {
        self.weak.register(target, Box::new(callback))
    }

    fn mark_from(&self, roots: impl Iterator<Item = RawGcPtr>) -> usize {
        let mut worklist: VecDeque<RawGcPtr> = VecDeque::new();
        for root in roots {
            if root.is_null() {
                continue;
            }
            let header = unsafe { &*root };
            if header.mark() == MarkColor::White {
                header.mark.set(MarkColor::Grey);
                worklist.push_back(root);
            }
        }
        let mut marked = 0usize;
        while let Some(ptr) = worklist.pop_front() {
            let header = unsafe { &*ptr };
            {
                let worklist_ref = &mut worklist;
                unsafe {
                    (header.trace_fn)(ptr, &mut |child: RawGcPtr| {
                        if child.is_null() {
                            return;
                        }
                        let child_header = unsafe { &*child };
                        if child_header.mark() == MarkColor::White {
                            child_header.mark.set(MarkColor::Grey);
                            worklist_ref.push_back(child);
                        }
                    });
                }
            }
            header.mark.set(MarkColor::Black);
            marked += 1;
        }
        marked
    }

    fn sweep_generation(
        &self,
        gen: &GenList,
        promote_to: Option<&GenList>,
        report: &mut GcCycleReport,
    ) {
        let mut new_head: Option<NonNull<GcHeader>> = None;
        let mut kept_bytes = 0usize;
        let mut kept_count = 0usize;
        let mut promoted = Vec::new();

        let mut cur = gen.head();
        while let Some(node) = cur {
            let header = unsafe { node.as_ref() };
            let next = header.next.get();
            match header.mark.get() {
                MarkColor::White => {
                    self.weak.notify_collected(node.as_ptr() as RawGcPtr);
                    report.reclaimed_count += 1;
                    report.reclaimed_bytes += header.size as usize;
                    let mut stats = self.stats.borrow_mut();
                    stats.deallocations += 1;
                    stats.bytes_freed += header.size as u64;
                    drop(stats);
                    unsafe { (header.drop_fn)(node.as_ptr()) };
                }
                _ => {
                    header.mark.set(MarkColor::White);
                    let age = header.generation_age.get();
                    if promote_to.is_some() && age + 1 >= PROMOTION_THRESHOLD {
                        header.generation_age.set(0);
                        header.generation.set(Generation::Old);
                        promoted.push(node);
                    } else {
                        header.generation_age.set(age.saturating_add(1));
                        header.next.set(new_head);
                        new_head = Some(node);
                        kept_bytes += header.size as usize;
                        kept_count += 1;
                    }
                }
            }
            cur = next;
        }
        gen.rebuild(new_head, kept_bytes, kept_count);

        if let Some(old) = promote_to {
            for node in promoted {
                old.push_front(node);
            }
        }
    }

    /// Reset every object in `gen` back to White without sweeping. Used
    /// after a minor collection to undo the conservative "every old object
    /// is a root" marking applied to the remembered set, so the invariant
    /// that all marks are White between cycles holds for old objects too.
    fn reset_marks(&self, gen: &GenList) {
        for node in gen.iter() {
            unsafe { node.as_ref() }.mark.set(MarkColor::White);
        }
    }

    /// Minor collection: mark from strong roots, plus — standing in for a
    /// full remembered set — every object currently in the old generation,
    /// since any of them may hold the only reference to a young survivor.
    /// Sweeps the young generation only; survivors past
    /// `PROMOTION_THRESHOLD` migrate to old.
    pub fn collect_young(&self) -> GcCycleReport {
        let start = Instant::now();
        let roots = self.roots.borrow().clone();
        let old_as_roots = self.old.iter().map(|n| n.as_ptr() as RawGcPtr);
        let marked = self.mark_from(roots.into_iter().chain(old_as_roots));

        let mut report = GcCycleReport {
            marked_count: marked,
            ..Default::default()
        };
        self.sweep_generation(&self.young, Some(&self.old), &mut report);
        self.reset_marks(&self.old);

        self.finish_cycle(start, &report);
        report
    }

    /// Full collection: mark from strong roots across both generations,
    /// sweep both.
    pub fn collect_full(&self) -> GcCycleReport {
        let start = Instant::now();
        let roots = self.roots.borrow().clone();
        let marked = self.mark_from(roots.into_iter());

        let mut report = GcCycleReport {
            marked_count: marked,
            ..Default::default()
        };
        self.sweep_generation(&self.young, Some(&self.old), &mut report);
        self.sweep_generation(&self.old, None, &mut report);

        self.finish_cycle(start, &report);
        report
    }

    fn finish_cycle(&self, start: Instant, report: &GcCycleReport) {
        let mut stats = self.stats.borrow_mut();
        stats.collections += 1;
        stats.total_collection_time_us += start.elapsed().as_micros() as u64;
        stats.peak_usage = stats.peak_usage.max(self.allocated_bytes());
        drop(stats);
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            reclaimed = report.reclaimed_count,
            marked = report.marked_count,
            "gc cycle complete"
        );
    }

    /// Advance the collector by one phase step, bounded by `time_budget`.
    /// Phases progress `idle -> marking -> sweeping -> compacting -> idle`.
    /// Marking processes up to [`INCREMENTAL_STEP`] grey nodes per call (or
    /// fewer, if the time budget runs out first). A cycle run to
    /// completion across any number of calls reclaims exactly what
    /// `collect_full` would from the same starting state, since both trace
    /// from the same roots and sweep both generations the same way.
    pub fn collect_incremental(&self, time_budget: Duration) -> IncrementalProgress {
        let deadline = Instant::now() + time_budget;
        let start = Instant::now();

        if matches!(*self.incremental.borrow(), IncrementalState::Idle) {
            let roots = self.roots.borrow().clone();
            let mut worklist = VecDeque::new();
            for root in roots {
                if root.is_null() {
                    continue;
                }
                let header = unsafe { &*root };
                if header.mark() == MarkColor::White {
                    header.mark.set(MarkColor::Grey);
                    worklist.push_back(root);
                }
            }
            *self.incremental.borrow_mut() = IncrementalState::Marking { worklist };
        }

        loop {
            let phase = self.incremental.borrow().phase();
            match phase {
                GcPhase::Idle => unreachable!("handled above"),
                GcPhase::Marking => {
                    let mut done = false;
                    {
                        let mut state = self.incremental.borrow_mut();
                        if let IncrementalState::Marking { worklist } = &mut *state {
                            let mut processed = 0;
                            while processed < INCREMENTAL_STEP && Instant::now() < deadline {
                                let Some(ptr) = worklist.pop_front() else {
                                    done = true;
                                    break;
                                };
                                let header = unsafe { &*ptr };
                                {
                                    let worklist_ref = &mut *worklist;
                                    unsafe {
                                        (header.trace_fn)(ptr, &mut |child: RawGcPtr| {
                                            if child.is_null() {
                                                return;
                                            }
                                            let child_header = unsafe { &*child };
                                            if child_header.mark() == MarkColor::White {
                                                child_header.mark.set(MarkColor::Grey);
                                                worklist_ref.push_back(child);
                                            }
                                        });
                                    }
                                }
                                header.mark.set(MarkColor::Black);
                                processed += 1;
                            }
                            if worklist.is_empty() {
                                done = true;
                            }
                        }
                    }
                    if done {
                        *self.incremental.borrow_mut() = IncrementalState::Sweeping;
                    } else if Instant::now() >= deadline {
                        return IncrementalProgress {
                            phase: GcPhase::Marking,
                            cycle_completed: false,
                        };
                    }
                }
                GcPhase::Sweeping => {
                    let mut report = GcCycleReport::default();
                    self.sweep_generation(&self.young, Some(&self.old), &mut report);
                    self.sweep_generation(&self.old, None, &mut report);
                    self.finish_cycle(start, &report);
                    *self.incremental.borrow_mut() = IncrementalState::Compacting;
                    if Instant::now() >= deadline {
                        return IncrementalProgress {
                            phase: GcPhase::Sweeping,
                            cycle_completed: false,
                        };
                    }
                }
                GcPhase::Compacting => {
                    // Non-moving collector: nothing to relocate.
                    *self.incremental.borrow_mut() = IncrementalState::Idle;
                    return IncrementalProgress {
                        phase: GcPhase::Idle,
                        cycle_completed: true,
                    };
                }
            }
        }
    }

    /// Current incremental-collector phase.
    pub fn incremental_phase(&self) -> GcPhase {
        self.incremental.borrow().phase()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::TypeTag;

    struct Leaf(u32);
    impl Trace for Leaf {
        const TAG: TypeTag = TypeTag::String;
        fn trace(&self, _mark: &mut dyn FnMut(RawGcPtr)) {}
    }

    #[test]
    fn alloc_and_collect_reclaims_unrooted() {
        let heap = Heap::new();
        for _ in 0..10 {
            heap.alloc(Leaf(0)).unwrap();
        }
        let report = heap.collect_full();
        assert_eq!(report.reclaimed_count, 10);
        assert_eq!(heap.allocated_bytes(), 0);
    }

    #[test]
    fn rooted_objects_survive_collection() {
        let heap = Heap::new();
        let mut rooted = Vec::new();
        for i in 0..10 {
            let r = heap.alloc(Leaf(i)).unwrap();
            heap.add_root(r.as_raw());
            rooted.push(r);
        }
        for _ in 0..90 {
            heap.alloc(Leaf(0)).unwrap();
        }
        let report = heap.collect_full();
        assert_eq!(report.reclaimed_count, 90);
        assert_eq!(heap.allocated_bytes(), rooted.len() * std::mem::size_of::<GcBox<Leaf>>());
    }

    #[test]
    fn weak_ref_clears_and_fires_once() {
        use std::cell::Cell;
        use std::rc::Rc;

        let heap = Heap::new();
        let obj = heap.alloc(Leaf(1)).unwrap();
        heap.add_root(obj.as_raw());

        let fired = Rc::new(Cell::new(0));
        let fired_cb = fired.clone();
        let weak = heap.create_weak_ref(obj, move || fired_cb.set(fired_cb.get() + 1));
        assert!(weak.get().is_some());

        heap.remove_root(obj.as_raw());
        heap.collect_full();

        assert!(weak.get().is_none());
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn incremental_cycle_matches_full_collection() {
        let heap = Heap::new();
        let mut rooted = Vec::new();
        for i in 0..5 {
            let r = heap.alloc(Leaf(i)).unwrap();
            heap.add_root(r.as_raw());
            rooted.push(r);
        }
        for _ in 0..20 {
            heap.alloc(Leaf(0)).unwrap();
        }

        loop {
            let progress = heap.collect_incremental(Duration::from_micros(50));
            if progress.cycle_completed {
                break;
            }
        }

        assert_eq!(heap.allocated_bytes(), rooted.len() * std::mem::size_of::<GcBox<Leaf>>());
    }

    #[test]
    fn minor_collection_promotes_survivors() {
        let heap = Heap::new();
        let r = heap.alloc(Leaf(7)).unwrap();
        heap.add_root(r.as_raw());

        assert_eq!(r.header().generation(), Generation::Young);
        heap.collect_young();
        assert_eq!(r.header().generation(), Generation::Young);
        heap.collect_young();
        assert_eq!(r.header().generation(), Generation::Old);
    }
}
