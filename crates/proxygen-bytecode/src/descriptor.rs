//! Type and method descriptors
//!
//! Descriptor text is the canonical, comparable spelling of a type:
//!
//! | Text       | Type                              |
//! |------------|-----------------------------------|
//! | `V`        | void (returns only)               |
//! | `Z`        | boolean                           |
//! | `I` / `J`  | 32-bit / 64-bit integer           |
//! | `F` / `D`  | 32-bit / 64-bit float             |
//! | `T`        | string                            |
//! | `A`        | any object reference              |
//! | `M`        | host class object                 |
//! | `H`        | member handle                     |
//! | `L<name>;` | instance of a class or proxy type |
//! | `[<elem>`  | array of `<elem>`                 |
//!
//! Method descriptors are `(<params>)<ret>`. `J` and `D` occupy two slots.

use std::fmt;

use crate::encoder::DecodeError;

/// A value type as seen by bytecode
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeDesc {
    Void,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Str,
    Any,
    ClassObj,
    Handle,
    /// A host class or generated proxy type, by name
    Object(String),
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Convenience constructor for `L<name>;`
    pub fn object(name: impl Into<String>) -> Self {
        TypeDesc::Object(name.into())
    }

    /// Convenience constructor for `[<elem>`
    pub fn array_of(elem: TypeDesc) -> Self {
        TypeDesc::Array(Box::new(elem))
    }

    /// Number of stack/local slots a value of this type occupies
    pub fn slots(&self) -> u16 {
        match self {
            TypeDesc::Void => 0,
            TypeDesc::Long | TypeDesc::Double => 2,
            _ => 1,
        }
    }

    pub fn is_wide(&self) -> bool {
        self.slots() == 2
    }

    /// Reference types accept null
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TypeDesc::Str
                | TypeDesc::Any
                | TypeDesc::ClassObj
                | TypeDesc::Handle
                | TypeDesc::Object(_)
                | TypeDesc::Array(_)
        )
    }

    pub fn is_primitive(&self) -> bool {
        !self.is_reference() && *self != TypeDesc::Void
    }

    /// Class name for `L<name>;`
    pub fn class_name(&self) -> Option<&str> {
        match self {
            TypeDesc::Object(name) => Some(name),
            _ => None,
        }
    }

    /// Parse a complete field descriptor
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let bytes = text.as_bytes();
        let (desc, end) = parse_at(bytes, 0, text)?;
        if end != bytes.len() {
            return Err(DecodeError::InvalidDescriptor(text.to_string()));
        }
        Ok(desc)
    }
}

fn parse_at(bytes: &[u8], pos: usize, text: &str) -> Result<(TypeDesc, usize), DecodeError> {
    let bad = || DecodeError::InvalidDescriptor(text.to_string());
    let tag = *bytes.get(pos).ok_or_else(bad)?;
    let simple = match tag {
        b'V' => Some(TypeDesc::Void),
        b'Z' => Some(TypeDesc::Boolean),
        b'I' => Some(TypeDesc::Int),
        b'J' => Some(TypeDesc::Long),
        b'F' => Some(TypeDesc::Float),
        b'D' => Some(TypeDesc::Double),
        b'T' => Some(TypeDesc::Str),
        b'A' => Some(TypeDesc::Any),
        b'M' => Some(TypeDesc::ClassObj),
        b'H' => Some(TypeDesc::Handle),
        _ => None,
    };
    if let Some(desc) = simple {
        return Ok((desc, pos + 1));
    }
    match tag {
        b'L' => {
            let rest = &bytes[pos + 1..];
            let semi = rest.iter().position(|&b| b == b';').ok_or_else(bad)?;
            if semi == 0 {
                return Err(bad());
            }
            let name = std::str::from_utf8(&rest[..semi]).map_err(|_| bad())?;
            Ok((TypeDesc::Object(name.to_string()), pos + 1 + semi + 1))
        }
        b'[' => {
            let (elem, end) = parse_at(bytes, pos + 1, text)?;
            if elem == TypeDesc::Void {
                return Err(bad());
            }
            Ok((TypeDesc::array_of(elem), end))
        }
        _ => Err(bad()),
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => f.write_str("V"),
            TypeDesc::Boolean => f.write_str("Z"),
            TypeDesc::Int => f.write_str("I"),
            TypeDesc::Long => f.write_str("J"),
            TypeDesc::Float => f.write_str("F"),
            TypeDesc::Double => f.write_str("D"),
            TypeDesc::Str => f.write_str("T"),
            TypeDesc::Any => f.write_str("A"),
            TypeDesc::ClassObj => f.write_str("M"),
            TypeDesc::Handle => f.write_str("H"),
            TypeDesc::Object(name) => write!(f, "L{};", name),
            TypeDesc::Array(elem) => write!(f, "[{}", elem),
        }
    }
}

/// A method signature: parameter types and return type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodDesc {
    pub params: Vec<TypeDesc>,
    pub ret: TypeDesc,
}

impl MethodDesc {
    pub fn new(params: Vec<TypeDesc>, ret: TypeDesc) -> Self {
        Self { params, ret }
    }

    /// Total slots taken by the parameters
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(TypeDesc::slots).sum()
    }

    /// Parse `(<params>)<ret>`
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let bad = || DecodeError::InvalidDescriptor(text.to_string());
        let bytes = text.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(bad());
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while bytes.get(pos).ok_or_else(bad)? != &b')' {
            let (param, end) = parse_at(bytes, pos, text)?;
            if param == TypeDesc::Void {
                return Err(bad());
            }
            params.push(param);
            pos = end;
        }
        let (ret, end) = parse_at(bytes, pos + 1, text)?;
        if end != bytes.len() {
            return Err(bad());
        }
        Ok(Self { params, ret })
    }
}

impl fmt::Display for MethodDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        write!(f, "){}", self.ret)
    }
}
