//! Lowers `embr-ast` syntax trees into `embr-bytecode` modules: literal and
//! identifier loads, arithmetic/comparison/logical/bitwise operators,
//! control flow (`if`/`while`/`break`/`continue`), object and array
//! literals, member access and assignment, function declarations and
//! expressions (compiled to nested bytecode modules embedded as
//! constant-pool function templates), and calls.

mod compiler;
mod error;

pub use compiler::Compiler;
pub use error::{CompileError, CompileResult};
