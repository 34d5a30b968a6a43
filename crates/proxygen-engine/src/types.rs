//! Template-facing types

use std::fmt;
use std::sync::Arc;

use proxygen_bytecode::TypeDesc;

/// Suffix appended to a template id to name its generated type
pub const PROXY_SUFFIX: &str = "$Proxy";

/// Identity of a template
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(Arc<str>);

impl TemplateId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the generated type implementing this template
    pub fn proxy_type_name(&self) -> String {
        format!("{}{}", self.0, PROXY_SUFFIX)
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TemplateId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A parameter or return type as declared by a template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Void,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Any object reference
    Object,
    /// A host class by name
    Class(String),
    /// The generated proxy type of another (or the same) template
    Proxy(TemplateId),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn class(name: impl Into<String>) -> Self {
        TypeRef::Class(name.into())
    }

    pub fn proxy(id: impl Into<TemplateId>) -> Self {
        TypeRef::Proxy(id.into())
    }

    pub fn array_of(elem: TypeRef) -> Self {
        TypeRef::Array(Box::new(elem))
    }

    /// Bytecode spelling of this type
    pub fn to_desc(&self) -> TypeDesc {
        match self {
            TypeRef::Void => TypeDesc::Void,
            TypeRef::Boolean => TypeDesc::Boolean,
            TypeRef::Int => TypeDesc::Int,
            TypeRef::Long => TypeDesc::Long,
            TypeRef::Float => TypeDesc::Float,
            TypeRef::Double => TypeDesc::Double,
            TypeRef::String => TypeDesc::Str,
            TypeRef::Object => TypeDesc::Any,
            TypeRef::Class(name) => TypeDesc::object(name.clone()),
            TypeRef::Proxy(id) => TypeDesc::object(id.proxy_type_name()),
            TypeRef::Array(elem) => TypeDesc::array_of(elem.to_desc()),
        }
    }

    /// Stack/local slots (wide types count two)
    pub fn slots(&self) -> u16 {
        self.to_desc().slots()
    }

    /// Template referenced by this type, if it is a proxy
    pub fn proxy_template(&self) -> Option<&TemplateId> {
        match self {
            TypeRef::Proxy(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => f.write_str("void"),
            TypeRef::Boolean => f.write_str("boolean"),
            TypeRef::Int => f.write_str("int"),
            TypeRef::Long => f.write_str("long"),
            TypeRef::Float => f.write_str("float"),
            TypeRef::Double => f.write_str("double"),
            TypeRef::String => f.write_str("String"),
            TypeRef::Object => f.write_str("Object"),
            TypeRef::Class(name) => f.write_str(name),
            TypeRef::Proxy(id) => write!(f, "{}", id),
            TypeRef::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_type_name() {
        assert_eq!(TemplateId::from("Entity").proxy_type_name(), "Entity$Proxy");
    }

    #[test]
    fn test_to_desc() {
        assert_eq!(TypeRef::proxy("Chunk").to_desc().to_string(), "LChunk$Proxy;");
        assert_eq!(TypeRef::array_of(TypeRef::Double).to_desc().to_string(), "[D");
        assert_eq!(TypeRef::Object.to_desc(), TypeDesc::Any);
        assert_eq!(TypeRef::Long.slots(), 2);
        assert_eq!(TypeRef::Void.slots(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(TypeRef::array_of(TypeRef::class("game.Entity")).to_string(), "game.Entity[]");
    }
}
