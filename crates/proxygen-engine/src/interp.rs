//! Interpreter for linked proxy functions
//!
//! Executes one function of a generated type on an operand stack of
//! [`Value`]s. A wide value (`J`/`D`) occupies a single `Value` on the stack
//! and in the local at its first slot index.

use std::sync::Arc;

use proxygen_bytecode::{TypeDesc, TRAP_UNSUPPORTED};

use crate::error::CallError;
use crate::host::{HostArray, MemberHandle, ReflectionProvider, Value};
use crate::link::{Instr, LinkedFunction};
use crate::loader::{ProxyClass, ProxyInstance, RuntimeInner};

/// Whether `value` can be stored where `ty` is expected; null fits every reference
pub fn accepts(ty: &TypeDesc, value: &Value, provider: &dyn ReflectionProvider) -> bool {
    match (ty, value) {
        (TypeDesc::Boolean, Value::Bool(_))
        | (TypeDesc::Int, Value::Int(_))
        | (TypeDesc::Long, Value::Long(_))
        | (TypeDesc::Float, Value::Float(_))
        | (TypeDesc::Double, Value::Double(_)) => true,
        (ty, Value::Null) => ty.is_reference(),
        (ty, value) => instance_of(value, ty, provider),
    }
}

/// Runtime type test; null is never an instance
pub fn instance_of(value: &Value, ty: &TypeDesc, provider: &dyn ReflectionProvider) -> bool {
    match (ty, value) {
        (_, Value::Null) => false,
        (TypeDesc::Any, v) => v.is_reference(),
        (TypeDesc::Str, Value::Str(_)) => true,
        (TypeDesc::ClassObj, Value::Class(_)) => true,
        (TypeDesc::Handle, Value::Handle(_)) => true,
        (TypeDesc::Object(name), Value::Object(o)) => o.class().is_subclass_of(name),
        (TypeDesc::Object(name), Value::Proxy(p)) => p.class().name() == name,
        (TypeDesc::Array(elem), Value::Array(a)) => element_assignable(a.elem(), elem, provider),
        _ => false,
    }
}

fn element_assignable(from: &TypeDesc, to: &TypeDesc, provider: &dyn ReflectionProvider) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (f, TypeDesc::Any) => f.is_reference(),
        (TypeDesc::Object(a), TypeDesc::Object(b)) => provider.is_subclass(a, b),
        (TypeDesc::Array(a), TypeDesc::Array(b)) => {
            a.is_reference() && b.is_reference() && element_assignable(a, b, provider)
        }
        _ => false,
    }
}

/// Execution context of one generated type
pub(crate) struct Interpreter<'a> {
    class: &'a ProxyClass,
    runtime: Arc<RuntimeInner>,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(class: &'a ProxyClass) -> Result<Self, CallError> {
        let runtime = class
            .runtime()
            .ok_or_else(|| CallError::Internal(format!("runtime of {} was dropped", class.name())))?;
        Ok(Self { class, runtime })
    }

    fn provider(&self) -> &dyn ReflectionProvider {
        self.runtime.provider()
    }

    /// Run `func` with its receiver (if any) followed by its arguments
    pub(crate) fn execute(&self, func: &LinkedFunction, args: Vec<Value>) -> Result<Value, CallError> {
        let mut locals = vec![Value::Null; func.max_locals as usize];
        let mut slot = 0usize;
        let mut widths = func.desc.params.iter().map(TypeDesc::slots);
        for (i, arg) in args.into_iter().enumerate() {
            let width = if i == 0 && !func.is_static {
                1
            } else {
                widths.next().unwrap_or(1) as usize
            };
            match locals.get_mut(slot) {
                Some(local) => *local = arg,
                None => return Err(internal(func, "too many arguments")),
            }
            slot += width;
        }

        let mut stack: Vec<Value> = Vec::with_capacity(func.max_stack as usize);
        let mut pc = 0usize;
        while let Some(instr) = func.code.get(pc) {
            pc += 1;
            match instr {
                Instr::Nop => {}
                Instr::Pop => {
                    pop(&mut stack, func)?;
                }
                Instr::Dup => {
                    let top = stack.last().cloned().ok_or_else(|| underflow(func))?;
                    stack.push(top);
                }
                Instr::ConstNull => stack.push(Value::Null),
                Instr::ConstBool(b) => stack.push(Value::Bool(*b)),
                Instr::ConstInt(i) => stack.push(Value::Int(*i)),
                Instr::ConstStr(s) => stack.push(Value::Str(Arc::clone(s))),
                Instr::ConstClass(c) => stack.push(Value::Class(Arc::clone(c))),
                Instr::LoadLocal(i) => {
                    let value = locals
                        .get(*i as usize)
                        .cloned()
                        .ok_or_else(|| internal(func, "local out of range"))?;
                    stack.push(value);
                }
                Instr::StoreLocal(i) => {
                    let value = pop(&mut stack, func)?;
                    match locals.get_mut(*i as usize) {
                        Some(local) => *local = value,
                        None => return Err(internal(func, "local out of range")),
                    }
                }
                Instr::Jmp(target) => pc = *target,
                Instr::JmpIfFalse(target) | Instr::JmpIfTrue(target) => {
                    let cond = pop(&mut stack, func)?
                        .as_bool()
                        .ok_or_else(|| internal(func, "branch on non-boolean"))?;
                    if cond == matches!(instr, Instr::JmpIfTrue(_)) {
                        pc = *target;
                    }
                }
                Instr::JmpIfNull(target) | Instr::JmpIfNotNull(target) => {
                    let is_null = pop(&mut stack, func)?.is_null();
                    if is_null == matches!(instr, Instr::JmpIfNull(_)) {
                        pc = *target;
                    }
                }
                Instr::InvokeVirtual(method) => {
                    let args = pop_n(&mut stack, method.desc().params.len(), func)?;
                    let receiver = pop(&mut stack, func)?;
                    // Dispatch on the receiver's runtime class.
                    let resolved = match &receiver {
                        Value::Object(o) => o
                            .class()
                            .find_virtual(method.name(), method.desc())
                            .cloned()
                            .unwrap_or_else(|| Arc::clone(method)),
                        _ => Arc::clone(method),
                    };
                    let result = resolved.invoke(&receiver, &args)?;
                    if method.desc().ret != TypeDesc::Void {
                        stack.push(result);
                    }
                }
                Instr::InvokeStatic(method) => {
                    let args = pop_n(&mut stack, method.desc().params.len(), func)?;
                    let result = method.invoke(&Value::Null, &args)?;
                    if method.desc().ret != TypeDesc::Void {
                        stack.push(result);
                    }
                }
                Instr::NewTarget(ctor) => {
                    let args = pop_n(&mut stack, ctor.params().len(), func)?;
                    stack.push(ctor.new_instance(&args)?);
                }
                Instr::InvokeHandle { argc, returns } => {
                    let args = pop_n(&mut stack, *argc, func)?;
                    let handle = match pop(&mut stack, func)? {
                        Value::Handle(h) => h,
                        other => {
                            return Err(CallError::Internal(format!(
                                "{}: expected a handle, found {}",
                                func.name,
                                other.type_name()
                            )))
                        }
                    };
                    let result = handle.invoke(&args)?;
                    if *returns {
                        stack.push(result);
                    }
                }
                Instr::Return => return pop(&mut stack, func),
                Instr::ReturnVoid => return Ok(Value::Null),
                Instr::LoadField(_) => {
                    let receiver = pop(&mut stack, func)?;
                    stack.push(target_of(&receiver, func)?);
                }
                Instr::LoadStatic(slot) => stack.push(self.class.load_static(*slot)?),
                Instr::StoreStatic(slot) => {
                    let value = pop(&mut stack, func)?;
                    self.class.store_static(*slot, value)?;
                }
                Instr::GetField(field) => {
                    let receiver = pop(&mut stack, func)?;
                    stack.push(field.get(&receiver)?);
                }
                Instr::PutField(field) => {
                    let value = pop(&mut stack, func)?;
                    let receiver = pop(&mut stack, func)?;
                    field.set(&receiver, value)?;
                }
                Instr::GetStatic(field) => stack.push(field.get(&Value::Null)?),
                Instr::PutStatic(field) => {
                    let value = pop(&mut stack, func)?;
                    field.set(&Value::Null, value)?;
                }
                Instr::NewArray { elem, dims } => {
                    let sizes = pop_n(&mut stack, *dims as usize, func)?
                        .iter()
                        .map(|v| v.as_int().ok_or_else(|| internal(func, "non-int dimension")))
                        .collect::<Result<Vec<i32>, _>>()?;
                    stack.push(allocate(elem, &sizes)?);
                }
                Instr::NewArrayDyn(elem) => {
                    let dims = match pop(&mut stack, func)? {
                        Value::Array(a) => (0..a.len())
                            .filter_map(|i| a.get(i))
                            .map(|v| v.expect_int())
                            .collect::<Result<Vec<i32>, _>>()?,
                        Value::Null => return Err(CallError::NullTarget("newArray dimensions".to_string())),
                        other => {
                            return Err(CallError::ClassCast {
                                expected: "[I".to_string(),
                                found: other.type_name(),
                            })
                        }
                    };
                    if dims.is_empty() {
                        return Err(CallError::Unsupported(
                            "newArray requires at least one dimension".to_string(),
                        ));
                    }
                    stack.push(allocate(elem, &dims)?);
                }
                Instr::Trap(code) => {
                    let message = pop(&mut stack, func)?.as_str().unwrap_or_default().to_string();
                    return Err(if *code == TRAP_UNSUPPORTED {
                        CallError::Unsupported(message)
                    } else {
                        CallError::Trap {
                            code: *code,
                            message,
                        }
                    });
                }
                Instr::Wrap(type_name) => {
                    let raw = pop(&mut stack, func)?;
                    stack.push(self.wrap(type_name, raw)?);
                }
                Instr::Unwrap(type_name) => {
                    let value = pop(&mut stack, func)?;
                    stack.push(unwrap(type_name, value)?);
                }
                Instr::CheckCast(ty) => {
                    let value = stack.last().ok_or_else(|| underflow(func))?;
                    if !value.is_null() && !instance_of(value, ty, self.provider()) {
                        return Err(CallError::ClassCast {
                            expected: ty.to_string(),
                            found: value.type_name(),
                        });
                    }
                }
                Instr::InstanceOf(ty) => {
                    let value = pop(&mut stack, func)?;
                    stack.push(Value::Bool(instance_of(&value, ty, self.provider())));
                }
                Instr::RefEq => {
                    let b = pop(&mut stack, func)?;
                    let a = pop(&mut stack, func)?;
                    stack.push(Value::Bool(a.same_as(&b)));
                }
                Instr::IdentityHash => {
                    let value = pop(&mut stack, func)?;
                    stack.push(Value::Int(value.identity_hash()));
                }
                Instr::HashCode => {
                    let value = pop(&mut stack, func)?;
                    stack.push(Value::Int(value.hash_code()?));
                }
                Instr::ToStr => {
                    let value = pop(&mut stack, func)?;
                    stack.push(Value::str(value.to_display()?));
                }
                Instr::ResolveHandle(member) => {
                    let handle = self.resolve_handle(member)?;
                    stack.push(Value::Handle(Arc::new(handle)));
                }
                Instr::LoadTarget => {
                    let receiver = locals.first().ok_or_else(|| internal(func, "no receiver"))?;
                    stack.push(target_of(receiver, func)?);
                }
                Instr::GuardUnbound(message) => {
                    let receiver = locals.first().ok_or_else(|| internal(func, "no receiver"))?;
                    if !target_of(receiver, func)?.is_null() {
                        return Err(CallError::Unsupported(message.to_string()));
                    }
                }
            }
        }
        Err(internal(func, "fell off the end of the code"))
    }

    /// Bind a raw value into a new proxy of the named generated type
    fn wrap(&self, type_name: &str, raw: Value) -> Result<Value, CallError> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let class = self
            .runtime
            .class_by_name(type_name)
            .ok_or_else(|| CallError::Internal(format!("generated type {} is not defined", type_name)))?;
        class.ensure_initialized()?;
        let target = TypeDesc::object(class.target().name());
        if !instance_of(&raw, &target, self.provider()) {
            return Err(CallError::ClassCast {
                expected: target.to_string(),
                found: raw.type_name(),
            });
        }
        Ok(Value::Proxy(Arc::new(ProxyInstance::new(class, raw))))
    }

    fn resolve_handle(&self, member: &proxygen_bytecode::MemberRef) -> Result<MemberHandle, CallError> {
        let provider = self.provider();
        let class = provider
            .find_class(&member.owner)
            .ok_or_else(|| CallError::NoSuchMember(format!("class {}", member.owner)))?;
        let resolved = class
            .declared_member(member)
            .ok_or_else(|| CallError::NoSuchMember(member.to_string()))?;
        let public = class.is_public() && resolved.access().is_public();
        if !public && !provider.allows_private_access() {
            return Err(CallError::IllegalAccess(member.to_string()));
        }
        log::trace!("{}: resolved handle {}", self.class.name(), member);
        Ok(MemberHandle::new(resolved))
    }
}

fn internal(func: &LinkedFunction, what: &str) -> CallError {
    CallError::Internal(format!("{}{}: {}", func.name, func.desc, what))
}

fn underflow(func: &LinkedFunction) -> CallError {
    internal(func, "stack underflow")
}

fn pop(stack: &mut Vec<Value>, func: &LinkedFunction) -> Result<Value, CallError> {
    stack.pop().ok_or_else(|| underflow(func))
}

/// Pop `n` values, returned in push order
fn pop_n(stack: &mut Vec<Value>, n: usize, func: &LinkedFunction) -> Result<Vec<Value>, CallError> {
    let at = stack.len().checked_sub(n).ok_or_else(|| underflow(func))?;
    Ok(stack.split_off(at))
}

fn target_of(receiver: &Value, func: &LinkedFunction) -> Result<Value, CallError> {
    match receiver {
        Value::Proxy(p) => Ok(p.target().clone()),
        _ => Err(internal(func, "receiver is not a proxy")),
    }
}

fn unwrap(type_name: &str, value: Value) -> Result<Value, CallError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Proxy(p) if p.class().name() == type_name => Ok(p.target().clone()),
        other => Err(CallError::ClassCast {
            expected: type_name.to_string(),
            found: other.type_name(),
        }),
    }
}

/// Most array elements one allocation may create, nested levels included
pub const MAX_ARRAY_ELEMENTS: u64 = 1 << 26;

/// Allocate a (nested) array; `sizes` are outermost first
fn allocate(elem: &TypeDesc, sizes: &[i32]) -> Result<Value, CallError> {
    if let Some(&negative) = sizes.iter().find(|&&n| n < 0) {
        return Err(CallError::NegativeArraySize(negative));
    }
    let mut level = 1u64;
    let mut total = 0u64;
    for &n in sizes {
        level = level.saturating_mul(n as u64);
        total = total.saturating_add(level);
    }
    if total > MAX_ARRAY_ELEMENTS {
        return Err(CallError::OutOfMemory { requested: total });
    }
    allocate_level(elem, sizes)
}

fn allocate_level(elem: &TypeDesc, sizes: &[i32]) -> Result<Value, CallError> {
    let len = sizes.first().copied().unwrap_or(0) as usize;
    let array = match sizes {
        [] | [_] => HostArray::try_new(elem.clone(), len)?,
        [_, rest @ ..] => {
            let component = rest
                .iter()
                .fold(elem.clone(), |ty, _| TypeDesc::array_of(ty));
            let mut items = Vec::new();
            items
                .try_reserve_exact(len)
                .map_err(|_| CallError::OutOfMemory { requested: len as u64 })?;
            for _ in 0..len {
                items.push(allocate_level(elem, rest)?);
            }
            HostArray::from_values(component, items)
        }
    };
    Ok(Value::Array(Arc::new(array)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostClass, HostRegistry};

    fn registry() -> HostRegistry {
        let registry = HostRegistry::new();
        let base = HostClass::builder("game.Entity").build().unwrap();
        let zombie = HostClass::builder("game.Zombie").extends(&base).build().unwrap();
        registry.register_all([base, zombie]);
        registry
    }

    #[test]
    fn test_nested_allocation_shape() {
        let value = allocate(&TypeDesc::Int, &[2, 3]).unwrap();
        let outer = value.as_array().unwrap();
        assert_eq!(outer.len(), 2);
        assert_eq!(outer.elem().to_string(), "[I");
        let inner = outer.get(1).unwrap();
        assert_eq!(inner.as_array().unwrap().len(), 3);
        assert_eq!(inner.as_array().unwrap().get(0), Some(Value::Int(0)));
    }

    #[test]
    fn test_negative_dimension() {
        assert_eq!(
            allocate(&TypeDesc::Int, &[2, -1]).err(),
            Some(CallError::NegativeArraySize(-1))
        );
    }

    #[test]
    fn test_oversized_allocation_is_recoverable() {
        assert_eq!(
            allocate(&TypeDesc::Int, &[i32::MAX]).err(),
            Some(CallError::OutOfMemory {
                requested: i32::MAX as u64
            })
        );
        assert!(matches!(
            allocate(&TypeDesc::Int, &[1 << 14, 1 << 14]),
            Err(CallError::OutOfMemory { .. })
        ));
        // An empty outer level allocates nothing below it
        assert!(allocate(&TypeDesc::Int, &[0, i32::MAX]).is_ok());
    }

    #[test]
    fn test_type_tests() {
        let registry = registry();
        let zombie = registry.find_class("game.Zombie").unwrap();
        let zombie_obj = Value::Object(Arc::new(crate::host::HostObject::new(zombie)));
        let entity = TypeDesc::object("game.Entity");
        assert!(instance_of(&zombie_obj, &entity, &registry));
        assert!(instance_of(&zombie_obj, &TypeDesc::Any, &registry));
        assert!(!instance_of(&Value::Null, &entity, &registry));
        assert!(accepts(&entity, &Value::Null, &registry));
        assert!(!accepts(&TypeDesc::Int, &Value::Null, &registry));
        assert!(!accepts(&TypeDesc::Long, &Value::Int(1), &registry));

        let zombies = Value::Array(Arc::new(HostArray::try_new(TypeDesc::object("game.Zombie"), 1).unwrap()));
        assert!(instance_of(&zombies, &TypeDesc::array_of(entity.clone()), &registry));
        let ints = Value::Array(Arc::new(HostArray::try_new(TypeDesc::Int, 1).unwrap()));
        assert!(!instance_of(&ints, &TypeDesc::array_of(TypeDesc::Any), &registry));
    }
}
