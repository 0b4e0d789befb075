//! Plain objects: a singly-linked property chain plus a prototype slot.

use std::cell::{Cell, RefCell};

use embr_gc::{GcRef, RawGcPtr, Trace, TypeTag};

use crate::string::JsString;
use crate::value::Value;

/// One property entry. Chains are prepended on insert, so the physical
/// list order is newest-first; enumeration reverses it to recover
/// insertion order.
pub struct Property {
    pub key: GcRef<JsString>,
    pub value: Value,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
    next: Option<Box<Property>>,
}

/// A plain object: property chain, prototype slot, extensibility flag.
pub struct JsObject {
    properties: RefCell<Option<Box<Property>>>,
    prototype: Cell<Option<GcRef<JsObject>>>,
    extensible: Cell<bool>,
    property_count: Cell<usize>,
}

impl JsObject {
    pub fn new() -> Self {
        Self {
            properties: RefCell::new(None),
            prototype: Cell::new(None),
            extensible: Cell::new(true),
            property_count: Cell::new(0),
        }
    }

    pub fn with_prototype(prototype: Option<GcRef<JsObject>>) -> Self {
        let obj = Self::new();
        obj.prototype.set(prototype);
        obj
    }

    pub fn prototype(&self) -> Option<GcRef<JsObject>> {
        self.prototype.get()
    }

    pub fn set_prototype(&self, proto: Option<GcRef<JsObject>>) {
        self.prototype.set(proto);
    }

    pub fn is_extensible(&self) -> bool {
        self.extensible.get()
    }

    pub fn property_count(&self) -> usize {
        self.property_count.get()
    }

    fn find(&self, key: &str) -> Option<*const Property> {
        let guard = self.properties.borrow();
        let mut cur = guard.as_deref();
        while let Some(prop) = cur {
            if prop.key.as_str() == key {
                return Some(prop as *const Property);
            }
            cur = prop.next.as_deref();
        }
        None
    }

    /// Own-chain lookup (no prototype traversal — that is a caller-level
    /// choice per the design notes on prototype chains).
    pub fn get(&self, key: &str) -> Option<Value> {
        // SAFETY: the pointer is read immediately, within the lifetime of
        // the borrow taken by `find`'s internal traversal; we re-borrow
        // here rather than return a reference out of the RefCell.
        self.find(key).map(|ptr| unsafe { (*ptr).value })
    }

    pub fn has(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Set a property value. Creates the property (writable/enumerable/
    /// configurable = true) if absent and the object is extensible;
    /// updates in place if present and writable. Returns whether the
    /// write took effect.
    pub fn set(&self, key: GcRef<JsString>, value: Value) -> bool {
        if let Some(ptr) = self.find(key.as_str()) {
            // SAFETY: `find`'s borrow of `properties` has already ended;
            // the node itself stays at a stable address until removed from
            // the chain, and nothing else touches it while we hold this
            // pointer.
            let prop = unsafe { &mut *(ptr as *mut Property) };
            if !prop.writable {
                return false;
            }
            prop.value = value;
            return true;
        }
        if !self.extensible.get() {
            return false;
        }
        self.define(key, value, true, true, true);
        true
    }

    /// Define a property with an explicit descriptor, overwriting any
    /// existing entry with the same key regardless of its `writable` flag
    /// (matches `Object.defineProperty` semantics, not plain assignment).
    pub fn define(
        &self,
        key: GcRef<JsString>,
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    ) {
        self.delete_unchecked(key.as_str());
        let head = self.properties.borrow_mut().take();
        *self.properties.borrow_mut() = Some(Box::new(Property {
            key,
            value,
            writable,
            enumerable,
            configurable,
            next: head,
        }));
        self.property_count.set(self.property_count.get() + 1);
    }

    fn delete_unchecked(&self, key: &str) {
        let mut guard = self.properties.borrow_mut();
        let mut cur = guard.take();
        let mut kept: Vec<Box<Property>> = Vec::new();
        while let Some(mut node) = cur {
            cur = node.next.take();
            if node.key.as_str() != key {
                kept.push(node);
            } else {
                self.property_count.set(self.property_count.get().saturating_sub(1));
            }
        }
        let mut head = None;
        for mut node in kept.into_iter().rev() {
            node.next = head;
            head = Some(node);
        }
        *guard = head;
    }

    /// Delete a property. Fails only when the property exists and is
    /// non-configurable.
    pub fn delete(&self, key: &str) -> bool {
        if let Some(ptr) = self.find(key) {
            // SAFETY: see `set` — the node is still attached to the chain.
            let configurable = unsafe { (*ptr).configurable };
            if !configurable {
                return false;
            }
        } else {
            return true;
        }
        self.delete_unchecked(key);
        true
    }

    /// Enumerable own property names, in insertion order.
    pub fn own_enumerable_keys(&self) -> Vec<String> {
        let guard = self.properties.borrow();
        let mut reversed = Vec::new();
        let mut cur = guard.as_deref();
        while let Some(prop) = cur {
            if prop.enumerable {
                reversed.push(prop.key.as_str().to_string());
            }
            cur = prop.next.as_deref();
        }
        reversed.reverse();
        reversed
    }

    /// One-way extensibility transition: true -> false only.
    pub fn prevent_extensions(&self) {
        self.extensible.set(false);
    }

    /// Sealed: not extensible, and every property non-configurable.
    pub fn seal(&self) {
        self.prevent_extensions();
        self.for_each_property_mut(|p| p.configurable = false);
    }

    /// Frozen: sealed, and every property also non-writable.
    pub fn freeze(&self) {
        self.prevent_extensions();
        self.for_each_property_mut(|p| {
            p.configurable = false;
            p.writable = false;
        });
    }

    pub fn is_sealed(&self) -> bool {
        if self.extensible.get() {
            return false;
        }
        self.all_properties(|p| !p.configurable)
    }

    pub fn is_frozen(&self) -> bool {
        if self.extensible.get() {
            return false;
        }
        self.all_properties(|p| !p.configurable && !p.writable)
    }

    fn for_each_property_mut(&self, mut f: impl FnMut(&mut Property)) {
        let mut guard = self.properties.borrow_mut();
        let mut cur = guard.as_deref_mut();
        while let Some(prop) = cur {
            f(prop);
            cur = prop.next.as_deref_mut();
        }
    }

    fn all_properties(&self, mut f: impl FnMut(&Property) -> bool) -> bool {
        let guard = self.properties.borrow();
        let mut cur = guard.as_deref();
        while let Some(prop) = cur {
            if !f(prop) {
                return false;
            }
            cur = prop.next.as_deref();
        }
        true
    }
}

impl Default for JsObject {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace for JsObject {
    const TAG: TypeTag = TypeTag::Object;

    fn trace(&self, mark: &mut dyn FnMut(RawGcPtr)) {
        if let Some(proto) = self.prototype.get() {
            mark(proto.as_raw());
        }
        let guard = self.properties.borrow();
        let mut cur = guard.as_deref();
        while let Some(prop) = cur {
            mark(prop.key.as_raw());
            if let Some(raw) = prop.value.heap_ptr() {
                mark(raw);
            }
            cur = prop.next.as_deref();
        }
    }
}
