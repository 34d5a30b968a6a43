//! Caller-facing proxy handle
//!
//! Every operation, structural ones included, runs the generated code of the
//! proxy's type.

use std::fmt;
use std::sync::Arc;

use proxygen_bytecode::{MethodDesc, TypeDesc};

use crate::codegen::structural;
use crate::error::CallError;
use crate::host::{HostArray, HostClass, Value};
use crate::loader::{ProxyClass, ProxyInstance};

/// A bound or unbound instance of a generated type
#[derive(Clone)]
pub struct Proxy {
    instance: Arc<ProxyInstance>,
}

impl Proxy {
    pub(crate) fn unbound(class: Arc<ProxyClass>) -> Self {
        Self {
            instance: Arc::new(ProxyInstance::new(class, Value::Null)),
        }
    }

    /// View a proxy value returned by a call
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_proxy().map(|instance| Self {
            instance: Arc::clone(instance),
        })
    }

    pub fn as_value(&self) -> Value {
        Value::Proxy(Arc::clone(&self.instance))
    }

    pub fn proxy_class(&self) -> &Arc<ProxyClass> {
        self.instance.class()
    }

    pub fn is_bound(&self) -> bool {
        self.instance.is_bound()
    }

    /// Whether both handles are the same proxy object
    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }

    /// Call a template method, picking the overload that accepts `args`
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, CallError> {
        let class = self.proxy_class();
        let matching: Vec<usize> = class
            .overloads(name)
            .iter()
            .copied()
            .filter(|&index| class.accepts_args(index, args))
            .collect();
        match matching.as_slice() {
            [index] => class.call(*index, &self.as_value(), args),
            [] => Err(CallError::NoSuchMethod {
                name: format!("{}.{}", class.name(), name),
                args: args.iter().map(Value::type_name).collect::<Vec<_>>().join(", "),
            }),
            _ => Err(CallError::AmbiguousOverload {
                name: format!("{}.{}", class.name(), name),
                candidates: matching
                    .iter()
                    .filter_map(|&index| class.function(index))
                    .map(|f| format!("{}{}", f.name, f.desc))
                    .collect(),
            }),
        }
    }

    /// Call the function with exactly this name and descriptor
    pub fn invoke_exact(&self, name: &str, desc: &MethodDesc, args: &[Value]) -> Result<Value, CallError> {
        let class = self.proxy_class();
        let index = class
            .find_function(name, desc)
            .ok_or_else(|| CallError::NoSuchMethod {
                name: format!("{}.{}", class.name(), name),
                args: desc.params.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            })?;
        class.call(index, &self.as_value(), args)
    }

    fn structural(&self, name: &str, params: Vec<TypeDesc>, ret: TypeDesc, args: &[Value]) -> Result<Value, CallError> {
        self.invoke_exact(name, &MethodDesc::new(params, ret), args)
    }

    fn expect_proxy(&self, value: Value, method: &str) -> Result<Proxy, CallError> {
        Proxy::from_value(&value).ok_or_else(|| {
            CallError::Internal(format!(
                "{}.{} returned {}",
                self.proxy_class().name(),
                method,
                value.type_name()
            ))
        })
    }

    /// Construct a new target through its no-argument constructor (unbound only)
    pub fn create(&self) -> Result<Proxy, CallError> {
        let self_ty = self.proxy_class().self_type();
        let value = self.structural(structural::CREATE, vec![], self_ty, &[])?;
        self.expect_proxy(value, structural::CREATE)
    }

    /// Wrap an existing target instance (unbound only)
    pub fn bind_to(&self, raw: &Value) -> Result<Proxy, CallError> {
        if raw.is_null() {
            return Err(CallError::NullTarget(format!(
                "{}.{}",
                self.proxy_class().name(),
                structural::BIND_TO
            )));
        }
        let self_ty = self.proxy_class().self_type();
        let value = self.structural(structural::BIND_TO, vec![TypeDesc::Any], self_ty, std::slice::from_ref(raw))?;
        self.expect_proxy(value, structural::BIND_TO)
    }

    /// Whether `raw` is an instance of the target class
    pub fn is_instance(&self, raw: &Value) -> Result<bool, CallError> {
        let result = self.structural(
            structural::IS_INSTANCE,
            vec![TypeDesc::Any],
            TypeDesc::Boolean,
            std::slice::from_ref(raw),
        )?;
        expect_bool(result)
    }

    /// Allocate a target-typed array with one entry per dimension
    pub fn new_array(&self, dims: &[i32]) -> Result<Value, CallError> {
        let mut ret = TypeDesc::object(self.proxy_class().target().name());
        match dims.len() {
            1..=3 => {
                for _ in dims {
                    ret = TypeDesc::array_of(ret);
                }
                let args: Vec<Value> = dims.iter().map(|&d| Value::Int(d)).collect();
                self.structural(structural::NEW_ARRAY, vec![TypeDesc::Int; dims.len()], ret, &args)
            }
            _ => {
                let dims = dims.iter().map(|&d| Value::Int(d)).collect();
                let dims = Value::Array(Arc::new(HostArray::from_values(TypeDesc::Int, dims)));
                self.structural(
                    structural::NEW_ARRAY,
                    vec![TypeDesc::array_of(TypeDesc::Int)],
                    TypeDesc::Any,
                    &[dims],
                )
            }
        }
    }

    pub fn target_class(&self) -> Result<Arc<HostClass>, CallError> {
        match self.structural(structural::GET_TARGET_CLASS, vec![], TypeDesc::ClassObj, &[])? {
            Value::Class(class) => Ok(class),
            other => Err(CallError::Internal(format!(
                "{} returned {}",
                structural::GET_TARGET_CLASS,
                other.type_name()
            ))),
        }
    }

    /// The wrapped target instance, `Value::Null` when unbound
    pub fn instance(&self) -> Result<Value, CallError> {
        self.structural(structural::INSTANCE, vec![], TypeDesc::Any, &[])
    }

    pub fn equals(&self, other: &Value) -> Result<bool, CallError> {
        let result = self.structural(
            structural::EQUALS,
            vec![TypeDesc::Any],
            TypeDesc::Boolean,
            std::slice::from_ref(other),
        )?;
        expect_bool(result)
    }

    pub fn hash_code(&self) -> Result<i32, CallError> {
        self.structural(structural::HASH_CODE, vec![], TypeDesc::Int, &[])?
            .expect_int()
    }

    /// Diagnostic string of the target, or of the proxy when unbound
    pub fn to_string(&self) -> Result<String, CallError> {
        let value = self.structural(structural::TO_STRING, vec![], TypeDesc::Str, &[])?;
        Ok(value.as_str().unwrap_or("null").to_string())
    }
}

fn expect_bool(value: Value) -> Result<bool, CallError> {
    value.as_bool().ok_or_else(|| CallError::ClassCast {
        expected: "boolean".to_string(),
        found: value.type_name(),
    })
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.instance)
    }
}
