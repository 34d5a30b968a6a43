//! Bytecode instruction decoder
//!
//! Decodes raw bytecode bytes into typed instruction structs with parsed operands.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::opcode::{OperandKind, Opcode};

/// A decoded bytecode instruction with typed operands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstr {
    /// Byte offset in the function's code array
    pub offset: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Decoded operands
    pub operands: Operands,
    /// Total size in bytes (opcode + operands)
    pub size: usize,
}

/// Typed operands for each instruction format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    /// No operands
    None,
    /// Single u16 (local, field, static slot, trap code)
    U16(u16),
    /// Single u32 constant index
    U32(u32),
    /// Single i32 (immediate or jump offset)
    I32(i32),
    /// NewArray: element type index + dimension count
    Array { type_index: u32, dims: u8 },
}

impl DecodedInstr {
    /// Absolute target of a jump, relative to the end of this instruction
    pub fn jump_target(&self) -> Option<i64> {
        match (self.opcode.is_jump(), self.operands) {
            (true, Operands::I32(rel)) => Some((self.offset + self.size) as i64 + rel as i64),
            _ => None,
        }
    }

    /// Offset of the following instruction
    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }

    /// The u16 operand, or 0
    pub fn u16_operand(&self) -> u16 {
        match self.operands {
            Operands::U16(v) => v,
            _ => 0,
        }
    }

    /// The constant-index operand, or 0
    pub fn index_operand(&self) -> u32 {
        match self.operands {
            Operands::U32(v) => v,
            Operands::Array { type_index, .. } => type_index,
            _ => 0,
        }
    }
}

/// Decode all instructions in a function's bytecode
pub fn decode_function(code: &[u8]) -> Result<Vec<DecodedInstr>, DecodeError> {
    let mut reader = BytecodeReader::new(code);
    let mut instrs = Vec::new();

    while reader.has_more() {
        let offset = reader.position();
        let opcode = reader.read_opcode()?;
        let operands = match opcode.operand_kind() {
            OperandKind::None => Operands::None,
            OperandKind::U16 => Operands::U16(reader.read_u16()?),
            OperandKind::U32 => Operands::U32(reader.read_u32()?),
            OperandKind::I32 => Operands::I32(reader.read_i32()?),
            OperandKind::U32U8 => Operands::Array {
                type_index: reader.read_u32()?,
                dims: reader.read_u8()?,
            },
        };
        let size = reader.position() - offset;
        instrs.push(DecodedInstr {
            offset,
            opcode,
            operands,
            size,
        });
    }

    Ok(instrs)
}
