//! Runtime faults the dispatch loop can raise. Every variant maps onto one
//! of the error codes (`type-error`, `reference-error`, `range-error`,
//! `runtime-error`, `memory-error`) the host-facing layer above exposes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("TypeError: {0}")]
    TypeError(String),

    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    #[error("RangeError: {0}")]
    RangeError(String),

    #[error("RangeError: call stack size exceeded")]
    StackOverflow,

    #[error("RuntimeError: operand stack underflow")]
    StackUnderflow,

    #[error("RuntimeError: {0}")]
    RuntimeError(String),

    #[error("RuntimeError: execution halted after reaching the configured instruction limit")]
    InstructionLimitExceeded,

    #[error(transparent)]
    OutOfMemory(#[from] embr_gc::GcError),

    #[error(transparent)]
    Bytecode(#[from] embr_bytecode::BytecodeError),
}

impl VmError {
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    pub fn runtime_error(msg: impl Into<String>) -> Self {
        Self::RuntimeError(msg.into())
    }
}

pub type VmResult<T> = std::result::Result<T, VmError>;
