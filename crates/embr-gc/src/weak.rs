//! Weak references: observe a heap object without keeping it alive.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::header::{GcRef, RawGcPtr};
use crate::trace::Trace;

struct WeakSlot {
    target: Cell<Option<RawGcPtr>>,
}

/// A handle that yields its target while the target is reachable by other
/// means, and clears to null the moment the collector proves it isn't.
pub struct WeakRef<T> {
    slot: Rc<WeakSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Trace> WeakRef<T> {
    /// The target, if it is still alive.
    pub fn get(&self) -> Option<GcRef<T>> {
        self.slot
            .target
            .get()
            // SAFETY: a non-null slot always points at a live `T`
            // allocation — the collector clears it to `None` in the same
            // sweep pass that reclaims the target, before this could
            // observe a dangling pointer.
            .map(|raw| unsafe { GcRef::from_raw(raw) })
    }

    /// Whether the target has already been cleared.
    pub fn is_cleared(&self) -> bool {
        self.slot.target.get().is_none()
    }
}

pub(crate) struct WeakEntry {
    slot: Rc<WeakSlot>,
    target: RawGcPtr,
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// Registry of live weak references, consulted once per sweep.
#[derive(Default)]
pub(crate) struct WeakRegistry {
    entries: RefCell<Vec<WeakEntry>>,
}

impl WeakRegistry {
    pub(crate) fn register<T: Trace>(
        &self,
        target: GcRef<T>,
        callback: Box<dyn FnOnce()>,
    ) -> WeakRef<T> {
        let slot = Rc::new(WeakSlot {
            target: Cell::new(Some(target.as_raw())),
        });
        self.entries.borrow_mut().push(WeakEntry {
            slot: slot.clone(),
            target: target.as_raw(),
            callback: RefCell::new(Some(callback)),
        });
        WeakRef {
            slot,
            _marker: PhantomData,
        }
    }

    /// Called by the sweeper for every header it is about to reclaim.
    /// Clears any weak slot pointing at it and fires its callback exactly
    /// once.
    pub(crate) fn notify_collected(&self, reclaimed: RawGcPtr) {
        let mut entries = self.entries.borrow_mut();
        for entry in entries.iter() {
            if entry.target == reclaimed {
                entry.slot.target.set(None);
                if let Some(cb) = entry.callback.borrow_mut().take() {
                    cb();
                }
            }
        }
        entries.retain(|e| e.slot.target.get().is_some());
    }
}
