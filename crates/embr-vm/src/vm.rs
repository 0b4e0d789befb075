//! The dispatch loop: fetch-decode-execute over the operand stack and
//! call-frame stack described in the VM state section.

use std::rc::Rc;

use embr_bytecode::{Constant, Module, Opcode};
use embr_gc::{GcRef, Heap};
use embr_value::{JsArray, JsFunction, JsObject, JsString, NativeContext, StringTable, Value};

use crate::error::{VmError, VmResult};
use crate::frame::{
    CallFrame, ExceptionHandler, CALL_FRAME_CAPACITY, EXCEPTION_HANDLER_CAPACITY, MAX_CALL_DEPTH,
    OPERAND_STACK_CAPACITY,
};

/// Lifecycle state of a [`Vm`]. A VM that has faulted stays in `Error`
/// until a fresh `run` call resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Ready,
    Running,
    Error,
}

/// What happened while executing one instruction: either dispatch keeps
/// going, or the current bytecode block is finished (`RETURN`/fell off the
/// end), or the whole run should stop (`HALT`).
enum Flow {
    Continue,
    Return(Value),
    Halt,
}

/// A single-threaded, cooperatively-scheduled bytecode interpreter. One
/// `Vm` is never entered concurrently, and it borrows the heap, the
/// interned-string table, and the global object it runs against for the
/// duration of each `run` call rather than owning them — those are the
/// runtime/context layer's responsibility.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    handlers: Vec<ExceptionHandler>,
    state: VmState,
    instruction_limit: Option<u64>,
    instructions_run: u64,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(OPERAND_STACK_CAPACITY),
            frames: Vec::with_capacity(CALL_FRAME_CAPACITY),
            handlers: Vec::with_capacity(EXCEPTION_HANDLER_CAPACITY),
            state: VmState::Ready,
            instruction_limit: None,
            instructions_run: 0,
        }
    }

    /// Bound the total number of instructions a single `run` call may
    /// execute — the "external instruction-count limit" hosts that need to
    /// interrupt execution are expected to impose, since the VM exposes no
    /// other cancellation mechanism.
    pub fn with_instruction_limit(limit: Option<u64>) -> Self {
        Self {
            instruction_limit: limit,
            ..Self::new()
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Total instructions executed across every `run` call made on this VM.
    pub fn instructions_run(&self) -> u64 {
        self.instructions_run
    }

    /// Run `module` to completion against `heap`/`strings`/`global`. On
    /// normal exit, returns the topmost operand-stack value (or
    /// `undefined` if the stack is empty) — the outermost frame's
    /// completion value.
    pub fn run(
        &mut self,
        module: Rc<Module>,
        heap: &Heap,
        strings: &StringTable,
        global: GcRef<JsObject>,
    ) -> VmResult<Value> {
        tracing::trace!(instructions = module.instruction_count(), "vm run");
        self.state = VmState::Running;
        self.frames.clear();
        self.frames.push(CallFrame::new(module, 0, Value::Undefined));

        let result = self.dispatch(heap, strings, global);
        self.state = match &result {
            Ok(_) => VmState::Ready,
            Err(_) => VmState::Error,
        };
        result
    }

    /// Host-initiated call entry point: invoke `callee` directly with a
    /// bound `this` and argument list, without compiling a wrapping
    /// script. Mirrors `CALL`'s own semantics (native callbacks run
    /// directly; bytecode callees get a fresh frame) so a host-initiated
    /// call and a VM-internal `CALL` of the same function behave
    /// identically.
    ///
    /// Only valid when the VM is not already mid-dispatch (the frame
    /// stack is empty) — this is the embedding API's call entry point,
    /// not a re-entrant call from inside a running script.
    pub fn call_value(
        &mut self,
        heap: &Heap,
        strings: &StringTable,
        global: GcRef<JsObject>,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        if !self.frames.is_empty() {
            return Err(VmError::runtime_error(
                "call_value cannot re-enter a VM that is already dispatching",
            ));
        }

        let Value::Function(func) = callee else {
            return Err(VmError::type_error("value is not callable"));
        };

        match &func.kind {
            embr_value::FunctionKind::Native(native_fn) => {
                let ctx = NativeContext { heap, strings };
                Ok(native_fn(&ctx, this, args))
            }
            embr_value::FunctionKind::Bytecode {
                module,
                parameter_names,
                ..
            } => {
                for (i, name) in parameter_names.iter().enumerate() {
                    let value = args.get(i).copied().unwrap_or(Value::Undefined);
                    let key = strings.intern(heap, name)?;
                    global.set(key, value);
                }
                self.state = VmState::Running;
                self.frames
                    .push(CallFrame::new(module.clone(), self.stack.len(), this));
                let result = self.dispatch(heap, strings, global);
                self.state = match &result {
                    Ok(_) => VmState::Ready,
                    Err(_) => VmState::Error,
                };
                result
            }
        }
    }

    fn dispatch(
        &mut self,
        heap: &Heap,
        strings: &StringTable,
        global: GcRef<JsObject>,
    ) -> VmResult<Value> {
        loop {
            if self.state != VmState::Running {
                return Ok(self.stack.last().copied().unwrap_or(Value::Undefined));
            }
            if let Some(limit) = self.instruction_limit {
                if self.instructions_run >= limit {
                    return Err(VmError::InstructionLimitExceeded);
                }
            }

            let Some(frame) = self.frames.last() else {
                return Ok(self.stack.last().copied().unwrap_or(Value::Undefined));
            };
            let module = frame.module.clone();
            let pc = frame.pc;

            if pc >= module.instruction_count() {
                // A frame falling off the end without an explicit RETURN
                // completes with `undefined` — the root frame just ends
                // the program.
                match self.return_from_frame(heap, Value::Undefined) {
                    Some(final_value) => return Ok(final_value),
                    None => continue,
                }
            }

            let instr = module
                .instruction_at(pc)
                .expect("pc bounds already checked above");
            self.frames.last_mut().expect("frame present").pc += 1;
            self.instructions_run += 1;

            match self.execute(instr, &module, heap, strings, global)? {
                Flow::Continue => {}
                Flow::Return(value) => match self.return_from_frame(heap, value) {
                    Some(final_value) => return Ok(final_value),
                    None => {}
                },
                Flow::Halt => {
                    self.state = VmState::Ready;
                    return Ok(self.stack.last().copied().unwrap_or(Value::Undefined));
                }
            }
        }
    }

    /// Pop the current frame, restoring the operand stack to the depth it
    /// had when that frame was entered, then hand `value` to the caller.
    /// Returns `Some` with the program's final value once the outermost
    /// frame has returned.
    fn return_from_frame(&mut self, heap: &Heap, value: Value) -> Option<Value> {
        let frame = self.frames.pop().expect("called only with an active frame");
        self.truncate_stack(heap, frame.locals_base);
        if self.frames.is_empty() {
            Some(value)
        } else {
            self.push_value(heap, value);
            None
        }
    }

    fn execute(
        &mut self,
        instr: embr_bytecode::Instruction,
        module: &Module,
        heap: &Heap,
        strings: &StringTable,
        global: GcRef<JsObject>,
    ) -> VmResult<Flow> {
        use Opcode::*;

        match instr.opcode {
            PushUndefined => self.push_value(heap, Value::Undefined),
            PushNull => self.push_value(heap, Value::Null),
            PushTrue => self.push_value(heap, Value::Boolean(true)),
            PushFalse => self.push_value(heap, Value::Boolean(false)),
            LoadConst => self.exec_load_const(instr.operand, module, heap, strings)?,
            LoadVar => {
                let name = self.operand_string(instr.operand, module)?;
                let value = global.get(name).unwrap_or(Value::Undefined);
                self.push_value(heap, value);
            }
            StoreVar => {
                let name = self.operand_string(instr.operand, module)?;
                let value = *self.stack.last().ok_or(VmError::StackUnderflow)?;
                let key = strings.intern(heap, name)?;
                global.set(key, value);
            }
            Pop => {
                self.pop_value(heap)?;
            }
            Dup => {
                let top = *self.stack.last().ok_or(VmError::StackUnderflow)?;
                self.push_value(heap, top);
            }
            Swap => {
                let b = self.pop_value(heap)?;
                let a = self.pop_value(heap)?;
                self.push_value(heap, b);
                self.push_value(heap, a);
            }

            Add => self.exec_add(heap)?,
            Sub => self.exec_numeric(heap, |a, b| a - b)?,
            Mul => self.exec_numeric(heap, |a, b| a * b)?,
            Div => self.exec_numeric(heap, |a, b| a / b)?,
            Mod => self.exec_numeric(heap, |a, b| a % b)?,
            Neg => {
                let v = self.pop_value(heap)?;
                self.push_value(heap, Value::Number(-v.to_number()));
            }
            Plus => {
                let v = self.pop_value(heap)?;
                self.push_value(heap, Value::Number(v.to_number()));
            }

            Eq => self.exec_compare(heap, |a, b| a.strict_eq(b))?,
            Ne => self.exec_compare(heap, |a, b| !a.strict_eq(b))?,
            Lt => self.exec_relational(heap, |a, b| a < b)?,
            Le => self.exec_relational(heap, |a, b| a <= b)?,
            Gt => self.exec_relational(heap, |a, b| a > b)?,
            Ge => self.exec_relational(heap, |a, b| a >= b)?,

            And => self.exec_logical(heap, |a, b| a && b)?,
            Or => self.exec_logical(heap, |a, b| a || b)?,
            Not => {
                let v = self.pop_value(heap)?;
                self.push_value(heap, Value::Boolean(!v.to_boolean()));
            }

            BitAnd => self.exec_bitwise(heap, |a, b| a & b)?,
            BitOr => self.exec_bitwise(heap, |a, b| a | b)?,
            BitXor => self.exec_bitwise(heap, |a, b| a ^ b)?,
            Shl => self.exec_shift(heap, |a, b| a.wrapping_shl(b))?,
            Shr => self.exec_shift(heap, |a, b| a.wrapping_shr(b))?,
            BitNot => {
                let v = self.pop_value(heap)?;
                self.push_value(heap, Value::Number(!to_int32(v.to_number()) as f64));
            }

            NewObject => {
                let obj = heap.alloc(JsObject::new())?;
                self.push_value(heap, Value::Object(obj));
            }
            GetProp => self.exec_get_prop(instr.operand, module, heap)?,
            SetProp => self.exec_set_prop(instr.operand, module, heap, strings)?,
            GetPropComputed => self.exec_get_prop_computed(heap)?,
            SetPropComputed => self.exec_set_prop_computed(heap, strings)?,
            Typeof => {
                let v = self.pop_value(heap)?;
                let s = strings.intern(heap, v.type_of())?;
                self.push_value(heap, Value::String(s));
            }

            NewArray => {
                let arr = heap.alloc(JsArray::new())?;
                self.push_value(heap, Value::Array(arr));
            }
            ArrayPush => self.exec_array_push(heap)?,
            ArrayPop => self.exec_array_pop(heap)?,
            ArrayGet => self.exec_array_get(heap)?,
            ArraySet => self.exec_array_set(heap)?,

            Jump => self.do_jump(instr.operand, module)?,
            JumpIfTrue => {
                let v = self.pop_value(heap)?;
                if v.to_boolean() {
                    self.do_jump(instr.operand, module)?;
                }
            }
            JumpIfFalse => {
                let v = self.pop_value(heap)?;
                if !v.to_boolean() {
                    self.do_jump(instr.operand, module)?;
                }
            }

            Call => return self.exec_call(instr.operand, heap, strings, global),
            Return => {
                let v = self.pop_value(heap)?;
                return Ok(Flow::Return(v));
            }
            Halt => return Ok(Flow::Halt),

            Throw | TryBegin | TryEnd | CatchBegin | FinallyBegin | New | Instanceof
            | GetPrototype | SetPrototype => {
                return Err(VmError::runtime_error(format!(
                    "{:?} is reserved and not implemented",
                    instr.opcode
                )));
            }
        }

        Ok(Flow::Continue)
    }

    // ---- stack helpers (keep the GC root set in sync with live values) ----

    fn push_value(&mut self, heap: &Heap, value: Value) {
        if let Some(ptr) = value.heap_ptr() {
            heap.add_root(ptr);
        }
        self.stack.push(value);
    }

    fn pop_value(&mut self, heap: &Heap) -> VmResult<Value> {
        let value = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        if let Some(ptr) = value.heap_ptr() {
            heap.remove_root(ptr);
        }
        Ok(value)
    }

    fn truncate_stack(&mut self, heap: &Heap, new_len: usize) {
        while self.stack.len() > new_len {
            let value = self.stack.pop().expect("len checked above");
            if let Some(ptr) = value.heap_ptr() {
                heap.remove_root(ptr);
            }
        }
    }

    fn operand_string<'m>(&self, operand: u32, module: &'m Module) -> VmResult<&'m str> {
        module
            .string(operand)
            .ok_or_else(|| VmError::RuntimeError(format!("string-pool index {operand} out of bounds")))
    }

    fn do_jump(&mut self, target: u32, module: &Module) -> VmResult<()> {
        if target as usize > module.instruction_count() {
            return Err(VmError::range_error(format!(
                "jump target {target} out of bounds for {} instructions",
                module.instruction_count()
            )));
        }
        self.frames.last_mut().expect("frame present").pc = target as usize;
        Ok(())
    }

    // ---- opcode groups ----

    fn exec_load_const(
        &mut self,
        operand: u32,
        module: &Module,
        heap: &Heap,
        strings: &StringTable,
    ) -> VmResult<()> {
        let constant = module
            .constant(operand)
            .ok_or_else(|| VmError::RuntimeError(format!("constant-pool index {operand} out of bounds")))?;
        let value = match constant {
            Constant::Number(n) => Value::Number(n),
            Constant::String(str_idx) => {
                let s = self.operand_string(str_idx, module)?;
                Value::String(heap.alloc(JsString::new(s.to_string()))?)
            }
            Constant::Function(template) => {
                let name = template
                    .name
                    .as_deref()
                    .map(|n| strings.intern(heap, n))
                    .transpose()?;
                let func = JsFunction::from_bytecode(
                    name,
                    template.module.clone(),
                    template.params.clone(),
                    None,
                );
                Value::Function(heap.alloc(func)?)
            }
        };
        self.push_value(heap, value);
        Ok(())
    }

    fn exec_add(&mut self, heap: &Heap) -> VmResult<()> {
        let right = self.pop_value(heap)?;
        let left = self.pop_value(heap)?;
        let result = if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
            let mut s = left.to_rust_string();
            s.push_str(&right.to_rust_string());
            Value::String(heap.alloc(JsString::new(s))?)
        } else {
            Value::Number(left.to_number() + right.to_number())
        };
        self.push_value(heap, result);
        Ok(())
    }

    fn exec_numeric(&mut self, heap: &Heap, op: impl Fn(f64, f64) -> f64) -> VmResult<()> {
        let right = self.pop_value(heap)?;
        let left = self.pop_value(heap)?;
        self.push_value(heap, Value::Number(op(left.to_number(), right.to_number())));
        Ok(())
    }

    fn exec_compare(&mut self, heap: &Heap, op: impl Fn(&Value, &Value) -> bool) -> VmResult<()> {
        let right = self.pop_value(heap)?;
        let left = self.pop_value(heap)?;
        self.push_value(heap, Value::Boolean(op(&left, &right)));
        Ok(())
    }

    fn exec_relational(&mut self, heap: &Heap, op: impl Fn(f64, f64) -> bool) -> VmResult<()> {
        let right = self.pop_value(heap)?;
        let left = self.pop_value(heap)?;
        self.push_value(heap, Value::Boolean(op(left.to_number(), right.to_number())));
        Ok(())
    }

    fn exec_logical(&mut self, heap: &Heap, op: impl Fn(bool, bool) -> bool) -> VmResult<()> {
        let right = self.pop_value(heap)?;
        let left = self.pop_value(heap)?;
        self.push_value(
            heap,
            Value::Boolean(op(left.to_boolean(), right.to_boolean())),
        );
        Ok(())
    }

    fn exec_bitwise(&mut self, heap: &Heap, op: impl Fn(i32, i32) -> i32) -> VmResult<()> {
        let right = self.pop_value(heap)?;
        let left = self.pop_value(heap)?;
        let result = op(to_int32(left.to_number()), to_int32(right.to_number()));
        self.push_value(heap, Value::Number(result as f64));
        Ok(())
    }

    fn exec_shift(&mut self, heap: &Heap, op: impl Fn(i32, u32) -> i32) -> VmResult<()> {
        let right = self.pop_value(heap)?;
        let left = self.pop_value(heap)?;
        let shift = (to_int32(right.to_number()) as u32) & 0x1F;
        let result = op(to_int32(left.to_number()), shift);
        self.push_value(heap, Value::Number(result as f64));
        Ok(())
    }

    fn exec_get_prop(&mut self, operand: u32, module: &Module, heap: &Heap) -> VmResult<()> {
        let name = self.operand_string(operand, module)?.to_string();
        let object = self.pop_value(heap)?;
        let value = property_read(&object, &name);
        self.push_value(heap, value);
        Ok(())
    }

    fn exec_set_prop(
        &mut self,
        operand: u32,
        module: &Module,
        heap: &Heap,
        strings: &StringTable,
    ) -> VmResult<()> {
        let name = self.operand_string(operand, module)?.to_string();
        let object = self.pop_value(heap)?;
        let value = self.pop_value(heap)?;
        if let Value::Object(o) = object {
            let key = strings.intern(heap, &name)?;
            o.set(key, value);
        }
        self.push_value(heap, value);
        Ok(())
    }

    fn exec_get_prop_computed(&mut self, heap: &Heap) -> VmResult<()> {
        let prop = self.pop_value(heap)?;
        let object = self.pop_value(heap)?;
        let value = match object {
            Value::Array(a) => match array_index(&prop) {
                Some(idx) => a.get(idx),
                None if prop.to_rust_string() == "length" => Value::Number(a.length() as f64),
                None => Value::Undefined,
            },
            other => property_read(&other, &prop.to_rust_string()),
        };
        self.push_value(heap, value);
        Ok(())
    }

    fn exec_set_prop_computed(&mut self, heap: &Heap, strings: &StringTable) -> VmResult<()> {
        let prop = self.pop_value(heap)?;
        let object = self.pop_value(heap)?;
        let value = self.pop_value(heap)?;
        match object {
            Value::Array(a) => {
                if let Some(idx) = array_index(&prop) {
                    a.set(idx, value);
                }
            }
            Value::Object(o) => {
                let key = strings.intern(heap, &prop.to_rust_string())?;
                o.set(key, value);
            }
            _ => {}
        }
        self.push_value(heap, value);
        Ok(())
    }

    fn exec_array_push(&mut self, heap: &Heap) -> VmResult<()> {
        let elem = self.pop_value(heap)?;
        match self.stack.last() {
            Some(Value::Array(a)) => {
                a.push(elem);
                Ok(())
            }
            _ => Err(VmError::type_error("ARRAY_PUSH receiver is not an array")),
        }
    }

    fn exec_array_pop(&mut self, heap: &Heap) -> VmResult<()> {
        let receiver = self.pop_value(heap)?;
        let Value::Array(a) = receiver else {
            return Err(VmError::type_error("ARRAY_POP receiver is not an array"));
        };
        let popped = a.pop();
        self.push_value(heap, popped);
        Ok(())
    }

    fn exec_array_get(&mut self, heap: &Heap) -> VmResult<()> {
        let index = self.pop_value(heap)?;
        let receiver = self.pop_value(heap)?;
        let value = match receiver {
            Value::Array(a) => array_index(&index).map(|i| a.get(i)).unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        };
        self.push_value(heap, value);
        Ok(())
    }

    fn exec_array_set(&mut self, heap: &Heap) -> VmResult<()> {
        let value = self.pop_value(heap)?;
        let index = self.pop_value(heap)?;
        match self.stack.last() {
            Some(Value::Array(a)) => {
                let idx = array_index(&index)
                    .ok_or_else(|| VmError::range_error("array index must be a non-negative integer"))?;
                a.set(idx, value);
                Ok(())
            }
            _ => Err(VmError::type_error("ARRAY_SET receiver is not an array")),
        }
    }

    fn exec_call(
        &mut self,
        argc: u32,
        heap: &Heap,
        strings: &StringTable,
        global: GcRef<JsObject>,
    ) -> VmResult<Flow> {
        let argc = argc as usize;
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop_value(heap)?);
        }
        args.reverse();
        let callee = self.pop_value(heap)?;

        let Value::Function(func) = callee else {
            return Err(VmError::type_error("value is not callable"));
        };

        match &func.kind {
            embr_value::FunctionKind::Native(native_fn) => {
                let ctx = NativeContext { heap, strings };
                let result = native_fn(&ctx, Value::Undefined, &args);
                self.push_value(heap, result);
                Ok(Flow::Continue)
            }
            embr_value::FunctionKind::Bytecode {
                module,
                parameter_names,
                ..
            } => {
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(VmError::StackOverflow);
                }
                // Parameters are bound onto the global object by name —
                // this VM has no lexical scoping (see the design notes on
                // closures being an extension point, not mandatory
                // semantics), so a parameter binding is observably the
                // same kind of variable a `var` declaration creates.
                for (i, name) in parameter_names.iter().enumerate() {
                    let value = args.get(i).copied().unwrap_or(Value::Undefined);
                    let key = strings.intern(heap, name)?;
                    global.set(key, value);
                }
                let locals_base = self.stack.len();
                self.frames
                    .push(CallFrame::new(module.clone(), locals_base, Value::Undefined));
                Ok(Flow::Continue)
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Own-chain property read. Non-object receivers read as `undefined`
/// rather than aborting.
fn property_read(object: &Value, name: &str) -> Value {
    match object {
        Value::Object(o) => o.get(name).unwrap_or(Value::Undefined),
        Value::Array(a) if name == "length" => Value::Number(a.length() as f64),
        _ => Value::Undefined,
    }
}

/// Interpret a value as an array index: a finite, non-negative integer.
fn array_index(value: &Value) -> Option<usize> {
    let n = value.to_number();
    if !n.is_finite() || n < 0.0 || n.fract() != 0.0 {
        return None;
    }
    Some(n as usize)
}

/// `ToInt32` bitwise-operand coercion: non-finite inputs become 0,
/// everything else wraps modulo 2^32 into a signed 32-bit range.
fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    let modulo = truncated.rem_euclid(4294967296.0);
    if modulo >= 2147483648.0 {
        (modulo - 4294967296.0) as i32
    } else {
        modulo as i32
    }
}
