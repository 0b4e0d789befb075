//! `Context`: a VM plus a global object, layered on a shared [`Runtime`].
//! This is the embedding API surface hosts actually call against —
//! `eval`, host-initiated function calls, native-callback registration,
//! and single-slot error inspection.

use std::cell::RefCell;
use std::rc::Rc;

use embr_ast::Parser;
use embr_compiler::Compiler;
use embr_gc::GcRef;
use embr_value::{JsFunction, JsObject, JsString, NativeFn, Value};

use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;

/// A VM plus the global object it reads and writes `var`/function-
/// declaration bindings on. Context is not `Send`/`Sync` — it borrows the
/// runtime's heap and interned-string table, neither of which is
/// re-entrant, matching the single-threaded, cooperatively-scheduled
/// model the VM itself assumes.
pub struct Context {
    runtime: Rc<Runtime>,
    vm: embr_vm::Vm,
    global: GcRef<JsObject>,
    last_error: RefCell<Option<EngineError>>,
}

impl Context {
    /// Create a context against `runtime`, with a freshly allocated,
    /// rooted global object.
    pub fn new(runtime: Rc<Runtime>) -> EngineResult<Self> {
        let global = runtime.heap().alloc(JsObject::new())?;
        runtime.heap().add_root(global.as_raw());
        let instruction_limit = runtime.config().instruction_limit;
        Ok(Self {
            runtime,
            vm: embr_vm::Vm::with_instruction_limit(instruction_limit),
            global,
            last_error: RefCell::new(None),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn global(&self) -> GcRef<JsObject> {
        self.global
    }

    /// Parse, compile, and execute `source`, returning the top-of-stack
    /// result. `filename` is folded into error messages for diagnostics;
    /// it plays no role in execution since modules are in-memory only.
    pub fn eval(&mut self, source: &str, filename: &str) -> EngineResult<Value> {
        tracing::debug!(filename, len = source.len(), "eval");
        let result = self.eval_inner(source, filename);
        if let Err(ref err) = result {
            *self.last_error.borrow_mut() = Some(err.clone());
        }
        result
    }

    fn eval_inner(&mut self, source: &str, filename: &str) -> EngineResult<Value> {
        let program = Parser::parse_program(source)
            .map_err(|e| EngineError::SyntaxError(format!("{filename}: {e}")))?;
        let module = Compiler::compile_program(&program)
            .map_err(|e| EngineError::SyntaxError(format!("{filename}: {e}")))?;
        module
            .validate()
            .map_err(|e| EngineError::SyntaxError(format!("{filename}: {e}")))?;
        self.vm
            .run(
                Rc::new(module),
                self.runtime.heap(),
                self.runtime.strings(),
                self.global,
            )
            .map_err(EngineError::from)
    }

    /// Host-initiated call entry point: invoke `callee` directly with a
    /// bound `this` and argument list, without going through `eval`.
    pub fn call(&mut self, callee: Value, this: Value, args: &[Value]) -> EngineResult<Value> {
        self.vm
            .call_value(
                self.runtime.heap(),
                self.runtime.strings(),
                self.global,
                callee,
                this,
                args,
            )
            .map_err(EngineError::from)
    }

    // ---- value constructors (§6 embedding API) ----

    pub fn undefined(&self) -> Value {
        Value::Undefined
    }

    pub fn null(&self) -> Value {
        Value::Null
    }

    pub fn boolean(&self, value: bool) -> Value {
        Value::Boolean(value)
    }

    pub fn number(&self, value: f64) -> Value {
        Value::Number(value)
    }

    pub fn string(&self, value: impl Into<String>) -> EngineResult<Value> {
        let handle = self.runtime.heap().alloc(JsString::new(value.into()))?;
        Ok(Value::String(handle))
    }

    pub fn object(&self) -> EngineResult<Value> {
        let handle = self.runtime.heap().alloc(JsObject::new())?;
        Ok(Value::Object(handle))
    }

    pub fn array(&self) -> EngineResult<Value> {
        let handle = self
            .runtime
            .heap()
            .alloc(embr_value::JsArray::new())?;
        Ok(Value::Array(handle))
    }

    // ---- native-callback registration ----

    /// Register a native callback as a property of `target`.
    pub fn define_native(
        &self,
        target: GcRef<JsObject>,
        name: &str,
        f: NativeFn,
    ) -> EngineResult<()> {
        let heap = self.runtime.heap();
        let strings = self.runtime.strings();
        let fn_name = strings.intern(heap, name)?;
        let function = heap.alloc(JsFunction::native(Some(fn_name), f))?;
        heap.add_root(function.as_raw());
        let key = strings.intern(heap, name)?;
        target.set(key, Value::Function(function));
        Ok(())
    }

    /// Register a native callback on the global object.
    pub fn define_global_native(&self, name: &str, f: NativeFn) -> EngineResult<()> {
        self.define_native(self.global, name, f)
    }

    // ---- global bindings ----

    pub fn get_global(&self, name: &str) -> Value {
        self.global.get(name).unwrap_or(Value::Undefined)
    }

    pub fn set_global(&self, name: &str, value: Value) -> EngineResult<()> {
        let key = self.runtime.strings().intern(self.runtime.heap(), name)?;
        self.global.set(key, value);
        Ok(())
    }

    // ---- error inspection (§6/§7) ----

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().as_ref().map(|e| e.to_string())
    }

    pub fn clear_error(&self) {
        *self.last_error.borrow_mut() = None;
    }

    // ---- memory observability ----

    pub fn gc(&self) -> embr_gc::GcCycleReport {
        self.runtime.gc()
    }

    pub fn memory_usage(&self) -> usize {
        self.runtime.memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_context() -> Context {
        Context::new(Rc::new(Runtime::new())).expect("context creation")
    }

    #[test]
    fn eval_arithmetic_returns_number() {
        let mut ctx = new_context();
        let result = ctx.eval("var x = 2 + 3 * 4; x", "<test>").unwrap();
        assert_eq!(result, Value::Number(14.0));
    }

    #[test]
    fn eval_string_concat_via_add() {
        let mut ctx = new_context();
        let result = ctx.eval(r#"var s = "hi"; s + " there""#, "<test>").unwrap();
        assert_eq!(result.to_rust_string(), "hi there");
    }

    #[test]
    fn string_then_number_add_sub_scenarios() {
        let mut ctx = new_context();
        let concat = ctx.eval(r#""5" + 1"#, "<test>").unwrap();
        assert_eq!(concat.to_rust_string(), "51");

        let sub = ctx.eval(r#""5" - 1"#, "<test>").unwrap();
        assert_eq!(sub, Value::Number(4.0));
    }

    #[test]
    fn user_defined_function_call_round_trips() {
        let mut ctx = new_context();
        let result = ctx
            .eval(
                "function add(a, b) { return a + b; } add(2, 3);",
                "<test>",
            )
            .unwrap();
        assert_eq!(result, Value::Number(5.0));
    }

    #[test]
    fn native_callback_registered_on_global_is_callable() {
        let mut ctx = new_context();
        ctx.define_global_native(
            "double",
            std::rc::Rc::new(|_ctx, _this, args: &[Value]| {
                Value::Number(args.first().map(|v| v.to_number()).unwrap_or(0.0) * 2.0)
            }),
        )
        .unwrap();
        let result = ctx.eval("double(21);", "<test>").unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn syntax_error_sets_last_error_with_syntax_code() {
        let mut ctx = new_context();
        let err = ctx.eval("var = ;", "<test>").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::SyntaxError);
        assert!(ctx.last_error().is_some());
        ctx.clear_error();
        assert!(ctx.last_error().is_none());
    }

    #[test]
    fn gc_and_memory_usage_are_observable() {
        let ctx = new_context();
        ctx.object().unwrap();
        assert!(ctx.memory_usage() > 0);
        ctx.gc();
    }
}
