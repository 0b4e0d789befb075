//! The operand-stack bytecode interpreter: call frames, the dispatch
//! loop, and the opcode semantics table described in the engine's
//! interpreter component.

mod error;
mod frame;
mod vm;

pub use error::{VmError, VmResult};
pub use frame::{CallFrame, ExceptionHandler, CALL_FRAME_CAPACITY, EXCEPTION_HANDLER_CAPACITY, MAX_CALL_DEPTH, OPERAND_STACK_CAPACITY};
pub use vm::{Vm, VmState};
