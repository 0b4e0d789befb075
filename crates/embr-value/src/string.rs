//! Heap-allocated strings and the runtime-scoped intern table.

use std::cell::RefCell;

use embr_gc::{GcRef, GcResult, Heap, RawGcPtr, Trace, TypeTag, WeakRef};

/// A heap-allocated string payload. `length`/`capacity` are exposed as a
/// byte count; this implementation keeps strings immutable once
/// allocated, so capacity always equals length.
pub struct JsString {
    data: Box<str>,
    interned: bool,
}

impl JsString {
    pub fn new(data: impl Into<Box<str>>) -> Self {
        Self {
            data: data.into(),
            interned: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_interned(&self) -> bool {
        self.interned
    }
}

impl Trace for JsString {
    const TAG: TypeTag = TypeTag::String;
    fn trace(&self, _mark: &mut dyn FnMut(RawGcPtr)) {
        // Strings carry no heap references.
    }
}

/// The runtime-scoped table of interned strings. A new intern request
/// performs a byte-equality linear scan; on a hit it returns the existing
/// handle, on a miss it allocates and remembers a weak reference.
///
/// Entries are held weakly rather than strongly, and stale (collected)
/// entries are pruned lazily on the next `intern` call — this plays the
/// role the data model's informal "chain the sweeper prunes" describes,
/// without requiring the collector to know about the string table
/// directly.
#[derive(Default)]
pub struct StringTable {
    entries: RefCell<Vec<WeakRef<JsString>>>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live interned strings, after pruning stale entries.
    pub fn live_count(&self) -> usize {
        self.prune();
        self.entries.borrow().len()
    }

    fn prune(&self) {
        self.entries.borrow_mut().retain(|w| !w.is_cleared());
    }

    /// Intern `s` against `heap`, returning the canonical handle. Propagates
    /// the allocator's `GcError` on a miss rather than panicking — an
    /// interned string is requested by ordinary bytecode dispatch (variable
    /// stores, property names, ...), so an out-of-memory condition here must
    /// surface as the same `memory-error` every other allocation site
    /// reports, not abort the process.
    pub fn intern(&self, heap: &Heap, s: &str) -> GcResult<GcRef<JsString>> {
        self.prune();
        {
            let entries = self.entries.borrow();
            for weak in entries.iter() {
                if let Some(existing) = weak.get() {
                    if existing.as_str() == s {
                        return Ok(existing);
                    }
                }
            }
        }
        let mut js_string = JsString::new(s);
        js_string.interned = true;
        let handle = heap.alloc(js_string)?;
        let weak = heap.create_weak_ref(handle, || {});
        self.entries.borrow_mut().push(weak);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_returns_same_handle_for_equal_bytes() {
        let heap = Heap::new();
        let table = StringTable::new();
        let a = table.intern(&heap, "hello").unwrap();
        heap.add_root(a.as_raw());
        let b = table.intern(&heap, "hello").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn intern_distinguishes_different_bytes() {
        let heap = Heap::new();
        let table = StringTable::new();
        let a = table.intern(&heap, "hello").unwrap();
        heap.add_root(a.as_raw());
        let b = table.intern(&heap, "world").unwrap();
        heap.add_root(b.as_raw());
        assert_ne!(a, b);
    }
}
