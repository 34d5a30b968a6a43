//! Constant pool for proxy modules
//!
//! Holds string literals, type descriptors, member references and call-site
//! descriptors. Every `add_*` deduplicates, so the same constant always gets
//! the same index within one module.

use rustc_hash::FxHashMap;

use crate::descriptor::{MethodDesc, TypeDesc};
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};

/// What a member reference points at on the target class
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKind {
    Method = 0,
    StaticMethod = 1,
    Field = 2,
    StaticField = 3,
    Constructor = 4,
}

impl MemberKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Method),
            1 => Some(Self::StaticMethod),
            2 => Some(Self::Field),
            3 => Some(Self::StaticField),
            4 => Some(Self::Constructor),
            _ => None,
        }
    }

    pub fn is_static(self) -> bool {
        matches!(self, Self::StaticMethod | Self::StaticField)
    }

    pub fn is_field(self) -> bool {
        matches!(self, Self::Field | Self::StaticField)
    }
}

/// A symbolic reference to a member of a host class
///
/// For fields, `desc` has no parameters and `desc.ret` is the field type.
/// For constructors, `desc.ret` is the owner type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub desc: MethodDesc,
    pub kind: MemberKind,
}

impl MemberRef {
    /// Type of the field this reference names
    pub fn field_type(&self) -> &TypeDesc {
        &self.desc.ret
    }
}

impl std::fmt::Display for MemberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind.is_field() {
            write!(f, "{}.{}:{}", self.owner, self.name, self.desc.ret)
        } else {
            write!(f, "{}.{}{}", self.owner, self.name, self.desc)
        }
    }
}

/// Constant pool containing literal values and symbolic references
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// String constants
    pub strings: Vec<String>,
    /// Type constants
    pub types: Vec<TypeDesc>,
    /// Member references
    pub members: Vec<MemberRef>,
    /// Call-site descriptors for handle invocation
    pub descriptors: Vec<MethodDesc>,

    string_index: FxHashMap<String, u32>,
    type_index: FxHashMap<TypeDesc, u32>,
    member_index: FxHashMap<MemberRef, u32>,
    descriptor_index: FxHashMap<MethodDesc, u32>,
}

fn intern<T: Clone + Eq + std::hash::Hash>(
    items: &mut Vec<T>,
    index: &mut FxHashMap<T, u32>,
    value: T,
) -> u32 {
    if let Some(&idx) = index.get(&value) {
        return idx;
    }
    let idx = items.len() as u32;
    items.push(value.clone());
    index.insert(value, idx);
    idx
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string constant and return its index
    pub fn add_string(&mut self, s: impl Into<String>) -> u32 {
        intern(&mut self.strings, &mut self.string_index, s.into())
    }

    /// Add a type constant and return its index
    pub fn add_type(&mut self, ty: TypeDesc) -> u32 {
        intern(&mut self.types, &mut self.type_index, ty)
    }

    /// Add a member reference and return its index
    pub fn add_member(&mut self, member: MemberRef) -> u32 {
        intern(&mut self.members, &mut self.member_index, member)
    }

    /// Add a call-site descriptor and return its index
    pub fn add_descriptor(&mut self, desc: MethodDesc) -> u32 {
        intern(&mut self.descriptors, &mut self.descriptor_index, desc)
    }

    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    pub fn get_type(&self, index: u32) -> Option<&TypeDesc> {
        self.types.get(index as usize)
    }

    pub fn get_member(&self, index: u32) -> Option<&MemberRef> {
        self.members.get(index as usize)
    }

    pub fn get_descriptor(&self, index: u32) -> Option<&MethodDesc> {
        self.descriptors.get(index as usize)
    }

    /// Encode the constant pool to binary format
    ///
    /// Format, each section prefixed by a u32 count:
    /// - strings: length-prefixed UTF-8
    /// - types: descriptor text
    /// - members: kind (u8), owner, name, method descriptor text
    /// - descriptors: method descriptor text
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }

        writer.emit_u32(self.types.len() as u32);
        for ty in &self.types {
            writer.emit_string(&ty.to_string());
        }

        writer.emit_u32(self.members.len() as u32);
        for member in &self.members {
            writer.emit_u8(member.kind as u8);
            writer.emit_string(&member.owner);
            writer.emit_string(&member.name);
            writer.emit_string(&member.desc.to_string());
        }

        writer.emit_u32(self.descriptors.len() as u32);
        for desc in &self.descriptors {
            writer.emit_string(&desc.to_string());
        }
    }

    /// Decode the constant pool from binary format
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let mut pool = ConstantPool::new();

        let count = reader.read_u32()?;
        for _ in 0..count {
            let s = reader.read_string()?;
            pool.strings.push(s);
        }

        let count = reader.read_u32()?;
        for _ in 0..count {
            let ty = TypeDesc::parse(&reader.read_string()?)?;
            pool.types.push(ty);
        }

        let count = reader.read_u32()?;
        for _ in 0..count {
            let at = reader.position();
            let tag = reader.read_u8()?;
            let kind = MemberKind::from_u8(tag).ok_or(DecodeError::InvalidTag(tag, at))?;
            let owner = reader.read_string()?;
            let name = reader.read_string()?;
            let desc = MethodDesc::parse(&reader.read_string()?)?;
            pool.members.push(MemberRef {
                owner,
                name,
                desc,
                kind,
            });
        }

        let count = reader.read_u32()?;
        for _ in 0..count {
            let desc = MethodDesc::parse(&reader.read_string()?)?;
            pool.descriptors.push(desc);
        }

        pool.rebuild_index();
        Ok(pool)
    }

    fn rebuild_index(&mut self) {
        for (i, s) in self.strings.iter().enumerate() {
            self.string_index.entry(s.clone()).or_insert(i as u32);
        }
        for (i, t) in self.types.iter().enumerate() {
            self.type_index.entry(t.clone()).or_insert(i as u32);
        }
        for (i, m) in self.members.iter().enumerate() {
            self.member_index.entry(m.clone()).or_insert(i as u32);
        }
        for (i, d) in self.descriptors.iter().enumerate() {
            self.descriptor_index.entry(d.clone()).or_insert(i as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_member() -> MemberRef {
        MemberRef {
            owner: "game.Entity".to_string(),
            name: "x".to_string(),
            desc: MethodDesc::new(vec![], TypeDesc::Int),
            kind: MemberKind::Field,
        }
    }

    #[test]
    fn test_constant_pool_dedup() {
        let mut pool = ConstantPool::new();

        let a = pool.add_string("hello");
        let b = pool.add_string("world");
        let c = pool.add_string("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);

        let m1 = pool.add_member(sample_member());
        let m2 = pool.add_member(sample_member());
        assert_eq!(m1, m2);
        assert_eq!(pool.members.len(), 1);
    }

    #[test]
    fn test_constant_pool_encoding() {
        let mut pool = ConstantPool::new();
        pool.add_string("hello");
        pool.add_type(TypeDesc::array_of(TypeDesc::object("game.Entity")));
        pool.add_member(sample_member());
        pool.add_descriptor(MethodDesc::parse("(LAny;II)I").unwrap());

        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        let mut decoded = ConstantPool::decode(&mut reader).unwrap();

        assert_eq!(decoded.strings, pool.strings);
        assert_eq!(decoded.types, pool.types);
        assert_eq!(decoded.members, pool.members);
        assert_eq!(decoded.descriptors, pool.descriptors);
        // Index survives decoding, so re-adding does not grow the pool.
        assert_eq!(decoded.add_member(sample_member()), 0);
    }

    #[test]
    fn test_member_display() {
        assert_eq!(sample_member().to_string(), "game.Entity.x:I");
    }
}
