//! Proxy bytecode
//!
//! Binary format for generated proxy types:
//! - Opcode definitions and operand layouts
//! - Bytecode encoding/decoding
//! - Type and method descriptors
//! - Constant pool and module format with checksum
//! - Typed dataflow verifier
//! - Disassembler

#![warn(rust_2018_idioms)]

pub mod constants;
pub mod decoder;
pub mod descriptor;
pub mod disasm;
pub mod encoder;
pub mod module;
pub mod opcode;
pub mod verify;

pub use constants::{ConstantPool, MemberKind, MemberRef};
pub use decoder::{decode_function, DecodedInstr, Operands};
pub use descriptor::{MethodDesc, TypeDesc};
pub use disasm::{disassemble_function, disassemble_module};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError, Label};
pub use module::{
    flags, function_flags, Annotation, ClassDef, FeatureLevel, FieldDef, FormatVersion, Function,
    Module, ModuleError, INITIALIZER_NAME,
};
pub use opcode::{Opcode, TRAP_UNSUPPORTED};
pub use verify::{verify_module, NoClasses, TypeOracle, VerifyContext, VerifyError};
