//! Bytecode opcodes for generated proxy types
//!
//! The instruction set is deliberately small: generated bodies only load
//! arguments, bridge them, dispatch to one target member, and bridge the
//! result back.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Local variables
//! - 0x90-0x9F: Control flow
//! - 0xA0-0xAF: Dispatch to target members
//! - 0xB0-0xBF: Own fields, static slots, target fields
//! - 0xC0-0xCF: Array construction
//! - 0xE0-0xEF: Error handling
//! - 0xF0-0xFD: Proxy bridging and identity operations

use crate::module::FormatVersion;

/// Bytecode opcode enumeration
///
/// All opcodes are single-byte instructions. Operands follow the opcode byte
/// in little-endian order; see [`Opcode::operand_kind`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x09,
    /// Push the host class object named by a type constant (operand: u32 index)
    ConstClass = 0x0B,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 slot)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 slot)
    StoreLocal = 0x11,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 relative offset)
    Jmp = 0x90,
    /// Pop boolean, jump if false
    JmpIfFalse = 0x91,
    /// Pop boolean, jump if true
    JmpIfTrue = 0x92,
    /// Pop reference, jump if null
    JmpIfNull = 0x93,
    /// Pop reference, jump if not null
    JmpIfNotNull = 0x94,

    // ===== Dispatch (0xA0-0xAF) =====
    /// Direct call of an instance method (operand: u32 member index)
    InvokeVirtual = 0xA0,
    /// Return top of stack
    Return = 0xA2,
    /// Return without a value
    ReturnVoid = 0xA3,
    /// Direct construction through a target constructor (operand: u32 member index)
    NewTarget = 0xA4,
    /// Direct call of a static method (operand: u32 member index)
    InvokeStatic = 0xA6,
    /// Invoke a member handle (operand: u32 call-site descriptor index)
    InvokeHandle = 0xA8,

    // ===== Fields & Slots (0xB0-0xBF) =====
    /// Load an instance field of the generated type (operand: u16 field index)
    LoadField = 0xB1,
    /// Load a static slot of the generated type (operand: u16 slot)
    LoadStatic = 0xB8,
    /// Store into a static slot of the generated type (operand: u16 slot)
    StoreStatic = 0xB9,
    /// Direct read of a target instance field (operand: u32 member index)
    GetTargetField = 0xBA,
    /// Direct write of a target instance field (operand: u32 member index)
    PutTargetField = 0xBB,
    /// Direct read of a target static field (operand: u32 member index)
    GetStaticTarget = 0xBC,
    /// Direct write of a target static field (operand: u32 member index)
    PutStaticTarget = 0xBD,

    // ===== Arrays (0xC0-0xCF) =====
    /// Allocate a (multi-dimensional) array (operands: u32 element type, u8 dims)
    NewArray = 0xC0,
    /// Allocate an array from an int array of dimensions (operand: u32 element type)
    NewArrayDyn = 0xC1,

    // ===== Error Handling (0xE0-0xEF) =====
    /// Pop a message string and fail with a trap code (operand: u16 code)
    Trap = 0xE4,

    // ===== Bridging & Identity (0xF0-0xFD) =====
    /// Wrap a raw value into a new bound proxy (operand: u32 generated type)
    Wrap = 0xF0,
    /// Extract the raw value from a proxy (operand: u32 generated type)
    Unwrap = 0xF1,
    /// Checked reference cast (operand: u32 type index)
    CheckCast = 0xF2,
    /// Push whether a reference is an instance of a type (operand: u32 type index)
    InstanceOf = 0xF3,
    /// Pop two references, push identity equality
    RefEq = 0xF4,
    /// Pop a reference, push its identity hash
    IdentityHash = 0xF5,
    /// Pop a reference, push its host-defined hash code
    HashCode = 0xF6,
    /// Pop a value, push its diagnostic string
    ToStr = 0xF7,
    /// Resolve a member handle with access override (operand: u32 member index)
    ResolveHandle = 0xF8,
    /// Load the wrapped target instance of local 0 (format v2+)
    LoadTarget = 0xF9,
    /// Trap unless local 0 is unbound (operand: u32 message string, format v3+)
    GuardUnbound = 0xFA,
}

/// Operand layout following an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operands
    None,
    /// One u16
    U16,
    /// One u32 constant index
    U32,
    /// One i32 (immediate or jump offset)
    I32,
    /// u32 constant index followed by a u8 count
    U32U8,
}

impl OperandKind {
    /// Size of the operands in bytes
    pub fn size(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::U16 => 2,
            OperandKind::U32 | OperandKind::I32 => 4,
            OperandKind::U32U8 => 5,
        }
    }
}

/// Trap code for operations the receiver's state does not allow
pub const TRAP_UNSUPPORTED: u16 = 1;

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstI32),
            0x09 => Some(Self::ConstStr),
            0x0B => Some(Self::ConstClass),

            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),

            0x90 => Some(Self::Jmp),
            0x91 => Some(Self::JmpIfFalse),
            0x92 => Some(Self::JmpIfTrue),
            0x93 => Some(Self::JmpIfNull),
            0x94 => Some(Self::JmpIfNotNull),

            0xA0 => Some(Self::InvokeVirtual),
            0xA2 => Some(Self::Return),
            0xA3 => Some(Self::ReturnVoid),
            0xA4 => Some(Self::NewTarget),
            0xA6 => Some(Self::InvokeStatic),
            0xA8 => Some(Self::InvokeHandle),

            0xB1 => Some(Self::LoadField),
            0xB8 => Some(Self::LoadStatic),
            0xB9 => Some(Self::StoreStatic),
            0xBA => Some(Self::GetTargetField),
            0xBB => Some(Self::PutTargetField),
            0xBC => Some(Self::GetStaticTarget),
            0xBD => Some(Self::PutStaticTarget),

            0xC0 => Some(Self::NewArray),
            0xC1 => Some(Self::NewArrayDyn),

            0xE4 => Some(Self::Trap),

            0xF0 => Some(Self::Wrap),
            0xF1 => Some(Self::Unwrap),
            0xF2 => Some(Self::CheckCast),
            0xF3 => Some(Self::InstanceOf),
            0xF4 => Some(Self::RefEq),
            0xF5 => Some(Self::IdentityHash),
            0xF6 => Some(Self::HashCode),
            0xF7 => Some(Self::ToStr),
            0xF8 => Some(Self::ResolveHandle),
            0xF9 => Some(Self::LoadTarget),
            0xFA => Some(Self::GuardUnbound),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstTrue => "CONST_TRUE",
            Self::ConstFalse => "CONST_FALSE",
            Self::ConstI32 => "CONST_I32",
            Self::ConstStr => "CONST_STR",
            Self::ConstClass => "CONST_CLASS",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::JmpIfTrue => "JMP_IF_TRUE",
            Self::JmpIfNull => "JMP_IF_NULL",
            Self::JmpIfNotNull => "JMP_IF_NOT_NULL",
            Self::InvokeVirtual => "INVOKE_VIRTUAL",
            Self::Return => "RETURN",
            Self::ReturnVoid => "RETURN_VOID",
            Self::NewTarget => "NEW_TARGET",
            Self::InvokeStatic => "INVOKE_STATIC",
            Self::InvokeHandle => "INVOKE_HANDLE",
            Self::LoadField => "LOAD_FIELD",
            Self::LoadStatic => "LOAD_STATIC",
            Self::StoreStatic => "STORE_STATIC",
            Self::GetTargetField => "GET_TARGET_FIELD",
            Self::PutTargetField => "PUT_TARGET_FIELD",
            Self::GetStaticTarget => "GET_STATIC_TARGET",
            Self::PutStaticTarget => "PUT_STATIC_TARGET",
            Self::NewArray => "NEW_ARRAY",
            Self::NewArrayDyn => "NEW_ARRAY_DYN",
            Self::Trap => "TRAP",
            Self::Wrap => "WRAP",
            Self::Unwrap => "UNWRAP",
            Self::CheckCast => "CHECK_CAST",
            Self::InstanceOf => "INSTANCE_OF",
            Self::RefEq => "REF_EQ",
            Self::IdentityHash => "IDENTITY_HASH",
            Self::HashCode => "HASH_CODE",
            Self::ToStr => "TO_STR",
            Self::ResolveHandle => "RESOLVE_HANDLE",
            Self::LoadTarget => "LOAD_TARGET",
            Self::GuardUnbound => "GUARD_UNBOUND",
        }
    }

    /// Operand layout of this opcode
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::LoadLocal
            | Self::StoreLocal
            | Self::LoadField
            | Self::LoadStatic
            | Self::StoreStatic
            | Self::Trap => OperandKind::U16,

            Self::ConstI32
            | Self::Jmp
            | Self::JmpIfFalse
            | Self::JmpIfTrue
            | Self::JmpIfNull
            | Self::JmpIfNotNull => OperandKind::I32,

            Self::ConstStr
            | Self::ConstClass
            | Self::InvokeVirtual
            | Self::NewTarget
            | Self::InvokeStatic
            | Self::InvokeHandle
            | Self::GetTargetField
            | Self::PutTargetField
            | Self::GetStaticTarget
            | Self::PutStaticTarget
            | Self::NewArrayDyn
            | Self::Wrap
            | Self::Unwrap
            | Self::CheckCast
            | Self::InstanceOf
            | Self::ResolveHandle
            | Self::GuardUnbound => OperandKind::U32,

            Self::NewArray => OperandKind::U32U8,

            _ => OperandKind::None,
        }
    }

    /// Oldest format version that may contain this opcode
    pub fn min_format(self) -> FormatVersion {
        match self {
            Self::LoadTarget => FormatVersion::V2,
            Self::GuardUnbound => FormatVersion::V3,
            _ => FormatVersion::V1,
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp | Self::JmpIfFalse | Self::JmpIfTrue | Self::JmpIfNull | Self::JmpIfNotNull
        )
    }

    /// Check if this opcode is a direct member reference
    pub fn is_member_ref(self) -> bool {
        matches!(
            self,
            Self::InvokeVirtual
                | Self::InvokeStatic
                | Self::NewTarget
                | Self::GetTargetField
                | Self::PutTargetField
                | Self::GetStaticTarget
                | Self::PutStaticTarget
                | Self::ResolveHandle
        )
    }

    /// Check if this opcode is a return instruction
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return() || matches!(self, Self::Jmp | Self::Trap)
    }
}
