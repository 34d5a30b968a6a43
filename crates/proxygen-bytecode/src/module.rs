//! Proxy module format
//!
//! A module carries exactly one generated class: its layout, its functions
//! and the constant pool they reference.

use std::fmt;

use crate::constants::ConstantPool;
use crate::descriptor::{MethodDesc, TypeDesc};
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use thiserror::Error;

/// Magic number for proxy modules: "PXGN"
pub const MAGIC: [u8; 4] = *b"PXGN";

/// Size of the fixed header preceding the checksummed payload
pub const HEADER_SIZE: usize = 16;

/// Name of the one-time initializer function
pub const INITIALIZER_NAME: &str = "<clinit>";

/// Binary format version
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatVersion {
    /// Plain instruction sequences only
    V1 = 1,
    /// Adds `LOAD_TARGET`
    V2 = 2,
    /// Adds `GUARD_UNBOUND`
    V3 = 3,
}

impl FormatVersion {
    /// Newest version this crate reads and writes
    pub const LATEST: FormatVersion = FormatVersion::V3;

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Highest generator feature level expressible in this format
    pub fn max_feature_level(self) -> FeatureLevel {
        match self {
            Self::V1 => FeatureLevel::Baseline,
            Self::V2 => FeatureLevel::FusedTarget,
            Self::V3 => FeatureLevel::Guarded,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.to_u16())
    }
}

/// Code generator feature level
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    Baseline = 1,
    FusedTarget = 2,
    Guarded = 3,
}

impl FeatureLevel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Baseline),
            2 => Some(Self::FusedTarget),
            3 => Some(Self::Guarded),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Oldest format able to carry code emitted at this level
    pub fn required_format(self) -> FormatVersion {
        match self {
            Self::Baseline => FormatVersion::V1,
            Self::FusedTarget => FormatVersion::V2,
            Self::Guarded => FormatVersion::V3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::FusedTarget => "fused-target",
            Self::Guarded => "guarded",
        }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected PXGN, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported format version: {0} (latest: {})", FormatVersion::LATEST)]
    UnsupportedVersion(u16),

    /// Feature level missing or too new for the format version
    #[error("Feature level {level} is not valid for format {version}")]
    InvalidFeatureLevel { level: u8, version: FormatVersion },

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Module flags
pub mod flags {
    /// Module has a one-time initializer
    pub const HAS_INITIALIZER: u32 = 1 << 0;
    /// At least one member is dispatched through a handle
    pub const USES_HANDLES: u32 = 1 << 1;
}

/// Function flags
pub mod function_flags {
    /// No receiver in local 0
    pub const STATIC: u8 = 1 << 0;
    /// Structural method rather than a template method
    pub const SYNTHETIC: u8 = 1 << 1;
}

/// An annotation carried on a class or function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub name: String,
    pub args: Vec<String>,
}

impl Annotation {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_u16(self.args.len() as u16);
        for arg in &self.args {
            writer.emit_string(arg);
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let count = reader.read_u16()?;
        let mut args = Vec::with_capacity(count as usize);
        for _ in 0..count {
            args.push(reader.read_string()?);
        }
        Ok(Self { name, args })
    }
}

fn encode_annotations(annotations: &[Annotation], writer: &mut BytecodeWriter) {
    writer.emit_u16(annotations.len() as u16);
    for a in annotations {
        a.encode(writer);
    }
}

fn decode_annotations(reader: &mut BytecodeReader) -> Result<Vec<Annotation>, DecodeError> {
    let count = reader.read_u16()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(Annotation::decode(reader)?);
    }
    Ok(out)
}

/// A named, typed slot (instance field or static slot)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeDesc,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeDesc) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.ty.to_string());
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let ty = TypeDesc::parse(&reader.read_string()?)?;
        Ok(Self { name, ty })
    }
}

/// The generated class described by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    /// Generated type name
    pub name: String,
    /// Template the class implements
    pub template: String,
    /// Host class the class forwards to
    pub target: String,
    /// Instance fields
    pub fields: Vec<FieldDef>,
    /// Static slots
    pub statics: Vec<FieldDef>,
    pub annotations: Vec<Annotation>,
}

impl ClassDef {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.template);
        writer.emit_string(&self.target);
        writer.emit_u16(self.fields.len() as u16);
        for field in &self.fields {
            field.encode(writer);
        }
        writer.emit_u16(self.statics.len() as u16);
        for slot in &self.statics {
            slot.encode(writer);
        }
        encode_annotations(&self.annotations, writer);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let template = reader.read_string()?;
        let target = reader.read_string()?;
        let count = reader.read_u16()?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            fields.push(FieldDef::decode(reader)?);
        }
        let count = reader.read_u16()?;
        let mut statics = Vec::with_capacity(count as usize);
        for _ in 0..count {
            statics.push(FieldDef::decode(reader)?);
        }
        let annotations = decode_annotations(reader)?;
        Ok(Self {
            name,
            template,
            target,
            fields,
            statics,
            annotations,
        })
    }

    /// Type of the generated class itself
    pub fn self_type(&self) -> TypeDesc {
        TypeDesc::object(self.name.clone())
    }
}

/// Function definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Parameters (excluding the receiver) and return type
    pub descriptor: MethodDesc,
    pub flags: u8,
    /// Maximum operand stack depth in slots
    pub max_stack: u16,
    /// Number of local slots, receiver included
    pub max_locals: u16,
    /// Bytecode instructions
    pub code: Vec<u8>,
    pub annotations: Vec<Annotation>,
}

impl Function {
    pub fn is_static(&self) -> bool {
        self.flags & function_flags::STATIC != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.flags & function_flags::SYNTHETIC != 0
    }

    /// Slots taken by receiver plus parameters
    pub fn arg_slots(&self) -> u16 {
        let receiver = if self.is_static() { 0 } else { 1 };
        receiver + self.descriptor.param_slots()
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor.to_string());
        writer.emit_u8(self.flags);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);
        writer.emit_u32(self.code.len() as u32);
        writer.emit_bytes(&self.code);
        encode_annotations(&self.annotations, writer);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let descriptor = MethodDesc::parse(&reader.read_string()?)?;
        let flags = reader.read_u8()?;
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;
        let annotations = decode_annotations(reader)?;
        Ok(Self {
            name,
            descriptor,
            flags,
            max_stack,
            max_locals,
            code,
            annotations,
        })
    }
}

/// Module metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Producer of the module
    pub generator: String,
}

/// An encoded-or-decodable proxy module
#[derive(Debug, Clone)]
pub struct Module {
    /// Magic number (must be "PXGN")
    pub magic: [u8; 4],
    pub version: FormatVersion,
    pub level: FeatureLevel,
    /// Module flags
    pub flags: u32,
    /// Constant pool
    pub constants: ConstantPool,
    /// The generated class
    pub class: ClassDef,
    /// Function definitions
    pub functions: Vec<Function>,
    pub metadata: Metadata,
}

impl Module {
    /// Create an empty module for a class
    pub fn new(class: ClassDef, version: FormatVersion, level: FeatureLevel) -> Self {
        Self {
            magic: MAGIC,
            version,
            level,
            flags: 0,
            constants: ConstantPool::new(),
            class,
            functions: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    /// Validate header-level invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.magic != MAGIC {
            return Err("Invalid magic number".to_string());
        }
        if self.level > self.version.max_feature_level() {
            return Err(format!(
                "Feature level {} requires format {}, module is {}",
                self.level,
                self.level.required_format(),
                self.version
            ));
        }
        let init_count = self
            .functions
            .iter()
            .filter(|f| f.name == INITIALIZER_NAME)
            .count();
        if init_count > 1 {
            return Err("Multiple initializers".to_string());
        }
        if (init_count == 1) != (self.flags & flags::HAS_INITIALIZER != 0) {
            return Err("HAS_INITIALIZER flag does not match functions".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for func in &self.functions {
            if !seen.insert((func.name.as_str(), &func.descriptor)) {
                return Err(format!(
                    "Duplicate function {}{}",
                    func.name, func.descriptor
                ));
            }
        }
        Ok(())
    }

    /// Index of the one-time initializer, if any
    pub fn initializer(&self) -> Option<usize> {
        self.functions
            .iter()
            .position(|f| f.name == INITIALIZER_NAME && f.is_static())
    }

    /// Find a function by name and descriptor
    pub fn find_function(&self, name: &str, desc: &MethodDesc) -> Option<usize> {
        self.functions
            .iter()
            .position(|f| f.name == name && &f.descriptor == desc)
    }

    /// Encode module to bytes
    ///
    /// Format:
    /// - Header: magic (4) + version (u16) + feature level (u8) + reserved (u8)
    ///   + flags (u32) + checksum (u32)
    /// - Constant pool
    /// - Class definition
    /// - Function table
    /// - Metadata
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.emit_bytes(&self.magic);
        writer.emit_u16(self.version.to_u16());
        writer.emit_u8(self.level.to_u8());
        writer.emit_u8(0);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.reserve_u32();

        self.constants.encode(&mut writer);
        self.class.encode(&mut writer);

        writer.emit_u32(self.functions.len() as u32);
        for func in &self.functions {
            func.encode(&mut writer);
        }

        writer.emit_string(&self.metadata.generator);

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer()[HEADER_SIZE..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode module from bytes
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = BytecodeReader::new(data);

        let magic_bytes = reader.read_bytes(4)?;
        let magic = [magic_bytes[0], magic_bytes[1], magic_bytes[2], magic_bytes[3]];
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let raw_version = reader.read_u16()?;
        let version = FormatVersion::from_u16(raw_version)
            .ok_or(ModuleError::UnsupportedVersion(raw_version))?;

        let raw_level = reader.read_u8()?;
        let level = FeatureLevel::from_u8(raw_level)
            .filter(|l| *l <= version.max_feature_level())
            .ok_or(ModuleError::InvalidFeatureLevel {
                level: raw_level,
                version,
            })?;
        let _reserved = reader.read_u8()?;

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let calculated_checksum = crc32fast::hash(&data[HEADER_SIZE..]);
        if stored_checksum != calculated_checksum {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let constants = ConstantPool::decode(&mut reader)?;
        let class = ClassDef::decode(&mut reader)?;

        let func_count = reader.read_u32()?;
        let mut functions = Vec::new();
        for _ in 0..func_count {
            functions.push(Function::decode(&mut reader)?);
        }

        let generator = reader.read_string()?;

        Ok(Self {
            magic,
            version,
            level,
            flags,
            constants,
            class,
            functions,
            metadata: Metadata { generator },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn sample_module() -> Module {
        let class = ClassDef {
            name: "Counter$Proxy".to_string(),
            template: "Counter".to_string(),
            target: "game.Counter".to_string(),
            fields: vec![FieldDef::new("instance", TypeDesc::object("game.Counter"))],
            statics: vec![FieldDef::new("h0", TypeDesc::Handle)],
            annotations: vec![Annotation {
                name: "Deprecated".to_string(),
                args: vec![],
            }],
        };
        let mut module = Module::new(class, FormatVersion::V3, FeatureLevel::Guarded);
        module.functions.push(Function {
            name: "noop".to_string(),
            descriptor: MethodDesc::new(vec![], TypeDesc::Void),
            flags: 0,
            max_stack: 0,
            max_locals: 1,
            code: vec![Opcode::ReturnVoid.to_u8()],
            annotations: vec![],
        });
        module.metadata.generator = "test".to_string();
        module
    }

    #[test]
    fn test_module_encode_decode() {
        let module = sample_module();
        let bytes = module.encode();
        assert_eq!(&bytes[0..4], b"PXGN");

        let decoded = Module::decode(&bytes).unwrap();
        assert_eq!(decoded.version, FormatVersion::V3);
        assert_eq!(decoded.level, FeatureLevel::Guarded);
        assert_eq!(decoded.class, module.class);
        assert_eq!(decoded.functions, module.functions);
        assert_eq!(decoded.metadata.generator, "test");
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = sample_module().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_module().encode();
        bytes[0] = b'X';
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample_module().encode();
        bytes[4] = 9;
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_level_too_new_for_format() {
        let mut bytes = sample_module().encode();
        bytes[4] = 1; // V1 cannot carry Guarded
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::InvalidFeatureLevel { level: 3, .. })
        ));
    }

    #[test]
    fn test_validate_initializer_flag() {
        let mut module = sample_module();
        assert!(module.validate().is_ok());
        module.flags |= flags::HAS_INITIALIZER;
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_feature_level_formats() {
        assert_eq!(FeatureLevel::Baseline.required_format(), FormatVersion::V1);
        assert_eq!(FormatVersion::V2.max_feature_level(), FeatureLevel::FusedTarget);
        assert!(FeatureLevel::Guarded > FeatureLevel::FusedTarget);
    }
}
