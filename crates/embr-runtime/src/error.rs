//! The seven error codes the embedding API exposes (`ok` plus the six
//! failure kinds), unifying GC, bytecode, compiler, parser, and VM
//! failures behind a single enum so the host never has to match on an
//! inner crate's error type.

use thiserror::Error;

/// A unified engine failure. Every variant corresponds to one of the
/// non-`ok` error codes the embedding API reports.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    #[error("RuntimeError: {0}")]
    RuntimeError(String),

    #[error("MemoryError: {0}")]
    MemoryError(String),

    #[error("TypeError: {0}")]
    TypeError(String),

    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    #[error("RangeError: {0}")]
    RangeError(String),
}

/// The error-code enumeration from the embedding API's external surface.
/// `Ok` has no corresponding `EngineError` variant — success is plain
/// `Result::Ok` throughout this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    SyntaxError,
    RuntimeError,
    MemoryError,
    TypeError,
    ReferenceError,
    RangeError,
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::SyntaxError(_) => ErrorCode::SyntaxError,
            EngineError::RuntimeError(_) => ErrorCode::RuntimeError,
            EngineError::MemoryError(_) => ErrorCode::MemoryError,
            EngineError::TypeError(_) => ErrorCode::TypeError,
            EngineError::ReferenceError(_) => ErrorCode::ReferenceError,
            EngineError::RangeError(_) => ErrorCode::RangeError,
        }
    }
}

impl From<embr_gc::GcError> for EngineError {
    fn from(e: embr_gc::GcError) -> Self {
        EngineError::MemoryError(e.to_string())
    }
}

impl From<embr_bytecode::BytecodeError> for EngineError {
    fn from(e: embr_bytecode::BytecodeError) -> Self {
        EngineError::SyntaxError(e.to_string())
    }
}

impl From<embr_compiler::CompileError> for EngineError {
    fn from(e: embr_compiler::CompileError) -> Self {
        EngineError::SyntaxError(e.to_string())
    }
}

impl From<embr_ast::ParseError> for EngineError {
    fn from(e: embr_ast::ParseError) -> Self {
        EngineError::SyntaxError(e.to_string())
    }
}

impl From<embr_vm::VmError> for EngineError {
    fn from(e: embr_vm::VmError) -> Self {
        use embr_vm::VmError::*;
        let message = e.to_string();
        match e {
            TypeError(msg) => EngineError::TypeError(msg),
            ReferenceError(msg) => EngineError::ReferenceError(msg),
            RangeError(_) | StackOverflow => EngineError::RangeError(message),
            StackUnderflow | RuntimeError(_) | InstructionLimitExceeded => {
                EngineError::RuntimeError(message)
            }
            OutOfMemory(inner) => EngineError::MemoryError(inner.to_string()),
            Bytecode(inner) => EngineError::SyntaxError(inner.to_string()),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
