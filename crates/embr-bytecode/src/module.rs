//! A compiled bytecode block: an instruction sequence plus its constant
//! and string pools, debug info, and calling-convention metadata.

use crate::error::{BytecodeError, BytecodeResult};
use crate::opcode::{Instruction, Opcode};
use crate::pool::{Constant, ConstantPool, StringPool};

bitflags::bitflags! {
    /// Bit flags recorded alongside a compiled module. Only `STRICT` is
    /// ever set by the compiler today; the rest are reserved for
    /// generator/async functions, which are not yet implemented.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleFlags: u32 {
        const STRICT = 0b0000_0001;
        const IS_GENERATOR = 0b0000_0010;
        const IS_ASYNC = 0b0000_0100;
    }
}

/// A compiled function or top-level script body.
#[derive(Debug, Clone)]
pub struct Module {
    pub instructions: Vec<Instruction>,
    pub constants: ConstantPool,
    pub strings: StringPool,
    /// `(line, column)` per instruction, parallel to `instructions`.
    pub debug_info: Vec<(u32, u32)>,
    pub name: Option<String>,
    pub parameter_count: u32,
    pub local_count: u32,
    pub flags: ModuleFlags,
}

impl Module {
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn instruction_at(&self, pc: usize) -> Option<Instruction> {
        self.instructions.get(pc).copied()
    }

    pub fn constant(&self, index: u32) -> Option<Constant> {
        self.constants.get(index)
    }

    pub fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index)
    }

    /// Validate that every operand interpreted as a pool index or jump
    /// target stays within bounds, per the cross-component invariant that
    /// every operand an instruction references is within its pool's
    /// bounds.
    pub fn validate(&self) -> BytecodeResult<()> {
        let count = self.instructions.len();
        for instr in &self.instructions {
            match instr.opcode {
                Opcode::LoadConst => {
                    if instr.operand as usize >= self.constants.len() {
                        return Err(BytecodeError::OperandOutOfBounds {
                            operand: instr.operand,
                            pool_len: self.constants.len(),
                        });
                    }
                    if let Some(Constant::String(str_idx)) = self.constants.get(instr.operand) {
                        if str_idx as usize >= self.strings.len() {
                            return Err(BytecodeError::OperandOutOfBounds {
                                operand: str_idx,
                                pool_len: self.strings.len(),
                            });
                        }
                    }
                }
                Opcode::LoadVar | Opcode::StoreVar | Opcode::GetProp | Opcode::SetProp => {
                    if instr.operand as usize >= self.strings.len() {
                        return Err(BytecodeError::OperandOutOfBounds {
                            operand: instr.operand,
                            pool_len: self.strings.len(),
                        });
                    }
                }
                Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                    if instr.operand as usize > count {
                        return Err(BytecodeError::InvalidJumpTarget {
                            target: instr.operand,
                            instruction_count: count,
                        });
                    }
                }
                _ => {}
            }
        }
        for index in 0..self.constants.len() {
            if let Some(Constant::Function(template)) = self.constants.get(index as u32) {
                template.module.validate()?;
            }
        }
        Ok(())
    }
}

/// Incrementally builds a [`Module`], tracking jump sites for back-patching.
#[derive(Debug, Clone, Default)]
pub struct ModuleBuilder {
    instructions: Vec<Instruction>,
    constants: ConstantPool,
    strings: StringPool,
    debug_info: Vec<(u32, u32)>,
    name: Option<String>,
    parameter_count: u32,
    local_count: u32,
    flags: ModuleFlags,
    current_line: u32,
    current_col: u32,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_parameter_count(&mut self, n: u32) {
        self.parameter_count = n;
    }

    pub fn set_local_count(&mut self, n: u32) {
        self.local_count = n;
    }

    pub fn set_flags(&mut self, flags: ModuleFlags) {
        self.flags = flags;
    }

    /// Update the source position attributed to subsequently emitted
    /// instructions.
    pub fn set_position(&mut self, line: u32, col: u32) {
        self.current_line = line;
        self.current_col = col;
    }

    pub fn add_constant(&mut self, value: Constant) -> u32 {
        self.constants.add_constant(value)
    }

    pub fn add_string(&mut self, s: impl Into<String>) -> u32 {
        self.strings.add_string(s)
    }

    /// Current instruction count — the absolute offset the next emitted
    /// instruction will occupy.
    pub fn offset(&self) -> usize {
        self.instructions.len()
    }

    /// Emit an instruction, returning the index it was placed at (useful
    /// as a jump back-patch site).
    pub fn emit(&mut self, opcode: Opcode, operand: u32) -> usize {
        let idx = self.instructions.len();
        self.instructions.push(Instruction::new(opcode, operand));
        self.debug_info.push((self.current_line, self.current_col));
        idx
    }

    pub fn emit_bare(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, 0)
    }

    /// Emit a jump with a placeholder operand, to be filled in later via
    /// [`ModuleBuilder::patch_jump`].
    pub fn emit_jump_placeholder(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, u32::MAX)
    }

    /// Replace the operand of the jump instruction at `site` (as returned
    /// by `emit_jump_placeholder`) with the current instruction count —
    /// jump targets are absolute instruction indices.
    pub fn patch_jump(&mut self, site: usize) -> BytecodeResult<()> {
        self.patch_jump_to(site, self.instructions.len() as u32)
    }

    /// Like `patch_jump`, but to an explicit target offset (used by loop
    /// back-edges, which jump to a remembered start offset rather than
    /// "here").
    pub fn patch_jump_to(&mut self, site: usize, target: u32) -> BytecodeResult<()> {
        let instr = self
            .instructions
            .get_mut(site)
            .ok_or(BytecodeError::InvalidPatchSite(site))?;
        instr.operand = target;
        Ok(())
    }

    pub fn build(self) -> Module {
        Module {
            instructions: self.instructions,
            constants: self.constants,
            strings: self.strings,
            debug_info: self.debug_info,
            name: self.name,
            parameter_count: self.parameter_count,
            local_count: self.local_count,
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_back_patching_fills_absolute_target() {
        let mut b = ModuleBuilder::new();
        let site = b.emit_jump_placeholder(Opcode::JumpIfFalse);
        b.emit_bare(Opcode::PushTrue);
        b.patch_jump(site).unwrap();
        let module = b.build();
        assert_eq!(module.instructions[site].operand, 2);
    }

    #[test]
    fn validate_rejects_out_of_bounds_constant_index() {
        let mut b = ModuleBuilder::new();
        b.emit(Opcode::LoadConst, 5);
        let module = b.build();
        assert!(module.validate().is_err());
    }

    #[test]
    fn validate_accepts_jump_target_equal_to_instruction_count() {
        let mut b = ModuleBuilder::new();
        b.emit(Opcode::Jump, 1);
        b.emit_bare(Opcode::Halt);
        let module = b.build();
        assert!(module.validate().is_ok());
    }
}
