//! Errors raised while building or decoding a bytecode module.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("invalid opcode byte: {0}")]
    InvalidOpcode(u8),

    #[error("operand {operand} out of bounds for pool of length {pool_len}")]
    OperandOutOfBounds { operand: u32, pool_len: usize },

    #[error("jump target {target} out of bounds for {instruction_count} instructions")]
    InvalidJumpTarget { target: u32, instruction_count: usize },

    #[error("attempted to patch a jump at instruction index {0} but no such instruction exists")]
    InvalidPatchSite(usize),
}

pub type BytecodeResult<T> = std::result::Result<T, BytecodeError>;
