//! The tracing contract every heap-allocated payload must implement.

use crate::header::{RawGcPtr, TypeTag};

/// Implemented by each of the four concrete payload types (string, object,
/// array, function). `trace` reports every child reference the marker must
/// visit; it must report exactly the children named in the tracing
/// contract — no more, no less, or the collector either leaks or corrupts
/// the heap.
pub trait Trace: 'static {
    /// The type tag stamped into this payload's header.
    const TAG: TypeTag;

    /// Report every heap reference reachable directly from `self` to
    /// `mark`. Implementations call `mark` once per child; `mark` handles
    /// deduplication and the grey/black bookkeeping.
    fn trace(&self, mark: &mut dyn FnMut(RawGcPtr));
}
