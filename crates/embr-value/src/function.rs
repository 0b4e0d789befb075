//! Function objects: native callbacks or bytecode-backed closures.

use std::rc::Rc;

use embr_gc::{GcRef, Heap, RawGcPtr, Trace, TypeTag};

use crate::object::JsObject;
use crate::string::{JsString, StringTable};
use crate::value::Value;

/// Everything a native callback needs beyond its arguments: the heap to
/// allocate new strings/objects/arrays through, and the interned-string
/// table, so a callback can build a real `Value::String` result instead of
/// being limited to immediates.
pub struct NativeContext<'a> {
    pub heap: &'a Heap,
    pub strings: &'a StringTable,
}

/// A host-registered callback. Receives the calling context, the bound
/// `this` value, and the call arguments; returns the call's result.
pub type NativeFn = Rc<dyn Fn(&NativeContext, Value, &[Value]) -> Value>;

pub enum FunctionKind {
    Native(NativeFn),
    Bytecode {
        module: Rc<embr_bytecode::Module>,
        parameter_names: Vec<String>,
        closure_scope: Option<GcRef<JsObject>>,
    },
}

pub struct JsFunction {
    pub name: Option<GcRef<JsString>>,
    pub kind: FunctionKind,
}

impl JsFunction {
    pub fn native(name: Option<GcRef<JsString>>, f: NativeFn) -> Self {
        Self {
            name,
            kind: FunctionKind::Native(f),
        }
    }

    pub fn from_bytecode(
        name: Option<GcRef<JsString>>,
        module: Rc<embr_bytecode::Module>,
        parameter_names: Vec<String>,
        closure_scope: Option<GcRef<JsObject>>,
    ) -> Self {
        Self {
            name,
            kind: FunctionKind::Bytecode {
                module,
                parameter_names,
                closure_scope,
            },
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native(_))
    }
}

impl Trace for JsFunction {
    const TAG: TypeTag = TypeTag::Function;

    fn trace(&self, mark: &mut dyn FnMut(RawGcPtr)) {
        if let Some(name) = self.name {
            mark(name.as_raw());
        }
        // A module's constant pool never holds live GC pointers itself
        // (numbers are inline, string/function constants are resolved
        // against the pools at LOAD_CONST time), so the only heap child to
        // report for a bytecode function is its closure scope.
        if let FunctionKind::Bytecode { closure_scope, .. } = &self.kind {
            if let Some(scope) = closure_scope {
                mark(scope.as_raw());
            }
        }
    }
}
