//! Runtime values and host objects

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use proxygen_bytecode::{MethodDesc, TypeDesc};
use rustc_hash::{FxHashMap, FxHasher};

use super::class::HostClass;
use super::handle::MemberHandle;
use crate::error::CallError;
use crate::loader::ProxyInstance;

/// A value flowing through host code and generated proxy bodies
///
/// Reference variants compare by identity; strings compare by content.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Object(Arc<HostObject>),
    Array(Arc<HostArray>),
    Class(Arc<HostClass>),
    Proxy(Arc<ProxyInstance>),
    Handle(Arc<MemberHandle>),
}

fn addr_hash<T: ?Sized>(ptr: *const T) -> i32 {
    let addr = ptr as *const u8 as usize as u64;
    (addr ^ (addr >> 32)) as i32
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Zero value for a field or array element of this type
    pub fn default_for(ty: &TypeDesc) -> Self {
        match ty {
            TypeDesc::Boolean => Value::Bool(false),
            TypeDesc::Int => Value::Int(0),
            TypeDesc::Long => Value::Long(0),
            TypeDesc::Float => Value::Float(0.0),
            TypeDesc::Double => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<HostObject>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<HostArray>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Arc<ProxyInstance>> {
        match self {
            Value::Proxy(p) => Some(p),
            _ => None,
        }
    }

    /// The receiver as a host object, for use inside native methods
    pub fn expect_object(&self) -> Result<&Arc<HostObject>, CallError> {
        self.as_object().ok_or_else(|| CallError::ClassCast {
            expected: "object".to_string(),
            found: self.type_name(),
        })
    }

    /// The value as an int, for use inside native methods
    pub fn expect_int(&self) -> Result<i32, CallError> {
        self.as_int().ok_or_else(|| CallError::ClassCast {
            expected: "int".to_string(),
            found: self.type_name(),
        })
    }

    /// The value as a double, for use inside native methods
    pub fn expect_double(&self) -> Result<f64, CallError> {
        self.as_double().ok_or_else(|| CallError::ClassCast {
            expected: "double".to_string(),
            found: self.type_name(),
        })
    }

    pub fn is_reference(&self) -> bool {
        !matches!(
            self,
            Value::Bool(_)
                | Value::Int(_)
                | Value::Long(_)
                | Value::Float(_)
                | Value::Double(_)
        )
    }

    /// Runtime type name used in diagnostics
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Long(_) => "long".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Double(_) => "double".to_string(),
            Value::Str(_) => "String".to_string(),
            Value::Object(o) => o.class().name().to_string(),
            Value::Array(a) => format!("{}", TypeDesc::array_of(a.elem().clone())),
            Value::Class(_) => "Class".to_string(),
            Value::Proxy(p) => p.class().name().to_string(),
            Value::Handle(_) => "MemberHandle".to_string(),
        }
    }

    /// Identity comparison
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Proxy(a), Value::Proxy(b)) => Arc::ptr_eq(a, b),
            (Value::Handle(a), Value::Handle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Hash consistent with [`Value::same_as`]
    pub fn identity_hash(&self) -> i32 {
        match self {
            Value::Null => 0,
            Value::Bool(b) => *b as i32,
            Value::Int(i) => *i,
            Value::Long(l) => (*l ^ (*l >> 32)) as i32,
            Value::Float(f) => f.to_bits() as i32,
            Value::Double(d) => {
                let bits = d.to_bits();
                (bits ^ (bits >> 32)) as i32
            }
            Value::Str(s) => {
                let mut hasher = FxHasher::default();
                s.hash(&mut hasher);
                hasher.finish() as i32
            }
            Value::Object(o) => addr_hash(Arc::as_ptr(o)),
            Value::Array(a) => addr_hash(Arc::as_ptr(a)),
            Value::Class(c) => addr_hash(Arc::as_ptr(c)),
            Value::Proxy(p) => addr_hash(Arc::as_ptr(p)),
            Value::Handle(h) => addr_hash(Arc::as_ptr(h)),
        }
    }

    /// Host-defined hash code
    ///
    /// Objects whose class chain has a public `hashCode()I` use it; everything
    /// else falls back to the identity hash.
    pub fn hash_code(&self) -> Result<i32, CallError> {
        if let Value::Object(o) = self {
            if let Some(method) = o.class().find_virtual("hashCode", &hash_code_desc()) {
                if method.access().is_public() {
                    return method.invoke(self, &[])?.expect_int();
                }
            }
        }
        Ok(self.identity_hash())
    }

    /// Host-defined diagnostic string
    ///
    /// Objects whose class chain has a public `toString()T` use it.
    pub fn to_display(&self) -> Result<String, CallError> {
        Ok(match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Long(l) => l.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Object(o) => {
                if let Some(method) = o.class().find_virtual("toString", &to_string_desc()) {
                    if method.access().is_public() {
                        let text = method.invoke(self, &[])?;
                        return Ok(text.as_str().unwrap_or("null").to_string());
                    }
                }
                format!("{}@{:08x}", o.class().name(), self.identity_hash())
            }
            Value::Class(c) => format!("class {}", c.name()),
            other => format!("{}@{:08x}", other.type_name(), other.identity_hash()),
        })
    }
}

fn hash_code_desc() -> MethodDesc {
    MethodDesc::new(vec![], TypeDesc::Int)
}

fn to_string_desc() -> MethodDesc {
    MethodDesc::new(vec![], TypeDesc::Str)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Long(l) => write!(f, "Long({})", l),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Double(x) => write!(f, "Double({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            other => write!(f, "{}@{:08x}", other.type_name(), other.identity_hash()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

/// An instance of a host class
pub struct HostObject {
    class: Arc<HostClass>,
    fields: RwLock<FxHashMap<String, Value>>,
}

impl HostObject {
    /// Allocate with every instance field of the class chain at its initial value
    pub(crate) fn new(class: Arc<HostClass>) -> Self {
        let fields = class
            .instance_fields()
            .map(|f| (f.name().to_string(), f.initial().clone()))
            .collect();
        Self {
            class,
            fields: RwLock::new(fields),
        }
    }

    pub fn class(&self) -> &Arc<HostClass> {
        &self.class
    }

    /// Read a field by name
    pub fn field(&self, name: &str) -> Result<Value, CallError> {
        self.fields
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CallError::NoSuchMember(format!("{}.{}", self.class.name(), name)))
    }

    /// Write a field by name
    pub fn set_field(&self, name: &str, value: Value) -> Result<(), CallError> {
        match self.fields.write().get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CallError::NoSuchMember(format!(
                "{}.{}",
                self.class.name(),
                name
            ))),
        }
    }
}

/// A host array
pub struct HostArray {
    elem: TypeDesc,
    items: RwLock<Vec<Value>>,
}

impl HostArray {
    /// Allocate `len` zero-valued elements
    ///
    /// Fails with [`CallError::OutOfMemory`] instead of aborting when the
    /// allocator refuses the request.
    pub fn try_new(elem: TypeDesc, len: usize) -> Result<Self, CallError> {
        let zero = Value::default_for(&elem);
        let mut items = Vec::new();
        items
            .try_reserve_exact(len)
            .map_err(|_| CallError::OutOfMemory { requested: len as u64 })?;
        items.resize(len, zero);
        Ok(Self {
            elem,
            items: RwLock::new(items),
        })
    }

    pub fn from_values(elem: TypeDesc, items: Vec<Value>) -> Self {
        Self {
            elem,
            items: RwLock::new(items),
        }
    }

    pub fn elem(&self) -> &TypeDesc {
        &self.elem
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.read().get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.items.write().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
