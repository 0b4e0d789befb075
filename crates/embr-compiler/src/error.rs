//! Compile-time failures: unknown node kinds and invalid assignment
//! targets surface here rather than panicking the compiler.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unsupported syntax node: {0}")]
    UnsupportedNode(&'static str),

    #[error("invalid assignment target")]
    InvalidAssignmentTarget,

    #[error("break used outside of a loop")]
    BreakOutsideLoop,

    #[error("continue used outside of a loop")]
    ContinueOutsideLoop,

    #[error(transparent)]
    Bytecode(#[from] embr_bytecode::BytecodeError),
}

pub type CompileResult<T> = std::result::Result<T, CompileError>;
