//! Lexer and parser errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{line}:{col}: unexpected character {ch:?}")]
    UnexpectedChar { ch: char, line: u32, col: u32 },

    #[error("{line}:{col}: unterminated string literal")]
    UnterminatedString { line: u32, col: u32 },

    #[error("{line}:{col}: unexpected token {found}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        line: u32,
        col: u32,
    },

    #[error("{line}:{col}: invalid assignment target")]
    InvalidAssignmentTarget { line: u32, col: u32 },

    #[error("{line}:{col}: unexpected end of input")]
    UnexpectedEof { line: u32, col: u32 },
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;
