//! Stack-based bytecode format for the Embr VM: instructions, the
//! append-only constant and string pools they index into, and the
//! [`Module`] that ties a compiled function or script body together.

mod error;
mod module;
mod opcode;
mod pool;

pub use error::{BytecodeError, BytecodeResult};
pub use module::{Module, ModuleBuilder, ModuleFlags};
pub use opcode::{Instruction, Opcode};
pub use pool::{Constant, ConstantPool, FunctionTemplate, StringPool};
