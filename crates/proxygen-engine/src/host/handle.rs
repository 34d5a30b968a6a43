//! Indirect invocation handles
//!
//! A handle is resolved once, with access checks suppressed, and invoked many
//! times. Instance members take their receiver as the first argument.

use std::fmt;
use std::sync::Arc;

use super::class::{Access, HostConstructor, HostField, HostMethod, ResolvedMember};
use super::value::Value;
use crate::error::CallError;

/// What a handle invokes
#[derive(Clone)]
pub enum HandleTarget {
    Method(Arc<HostMethod>),
    /// Reads with receiver only, writes with receiver plus value
    Field(Arc<HostField>),
    Constructor(Arc<HostConstructor>),
}

/// A resolved, reusable reference to a host member
pub struct MemberHandle {
    target: HandleTarget,
}

impl MemberHandle {
    pub fn new(member: ResolvedMember) -> Self {
        let target = match member {
            ResolvedMember::Method(m) => HandleTarget::Method(m),
            ResolvedMember::Field(f) => HandleTarget::Field(f),
            ResolvedMember::Constructor(c) => HandleTarget::Constructor(c),
        };
        Self { target }
    }

    pub fn target(&self) -> &HandleTarget {
        &self.target
    }

    /// Invoke with flattened arguments
    pub fn invoke(&self, args: &[Value]) -> Result<Value, CallError> {
        match &self.target {
            HandleTarget::Method(m) if m.is_static() => m.invoke(&Value::Null, args),
            HandleTarget::Method(m) => {
                let (receiver, rest) = split_receiver(args, || m.member_ref().to_string())?;
                dispatch(m, receiver).invoke(receiver, rest)
            }
            HandleTarget::Field(f) => {
                let (receiver, rest) = if f.is_static() {
                    (&Value::Null, args)
                } else {
                    split_receiver(args, || f.member_ref().to_string())?
                };
                match rest {
                    [] => f.get(receiver),
                    [value] => f.set(receiver, value.clone()).map(|()| Value::Null),
                    _ => Err(CallError::ArgumentCount {
                        name: f.member_ref().to_string(),
                        expected: 1,
                        got: rest.len(),
                    }),
                }
            }
            HandleTarget::Constructor(c) => c.new_instance(args),
        }
    }
}

/// Overriding method of the receiver's class; private methods never override
fn dispatch<'a>(method: &'a Arc<HostMethod>, receiver: &'a Value) -> &'a Arc<HostMethod> {
    if method.access() == Access::Private {
        return method;
    }
    match receiver {
        Value::Object(o) => o
            .class()
            .find_virtual(method.name(), method.desc())
            .filter(|m| m.access() != Access::Private)
            .unwrap_or(method),
        _ => method,
    }
}

fn split_receiver<'a>(
    args: &'a [Value],
    describe: impl Fn() -> String,
) -> Result<(&'a Value, &'a [Value]), CallError> {
    match args.split_first() {
        Some((Value::Null, _)) => Err(CallError::NullTarget(describe())),
        Some((receiver, rest)) => Ok((receiver, rest)),
        None => Err(CallError::ArgumentCount {
            name: describe(),
            expected: 1,
            got: 0,
        }),
    }
}

impl fmt::Debug for MemberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let member = match &self.target {
            HandleTarget::Method(m) => m.member_ref(),
            HandleTarget::Field(x) => x.member_ref(),
            HandleTarget::Constructor(c) => c.member_ref(),
        };
        write!(f, "MemberHandle({})", member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostClass;

    #[test]
    fn test_private_method_through_handle() {
        let class = HostClass::builder("game.Secret")
            .method("twice", "(I)I", Access::Private, |_, args| {
                Ok(Value::Int(args[0].expect_int()? * 2))
            })
            .constructor("()V", Access::Private, |_, _| Ok(Value::Null))
            .build()
            .unwrap();
        let ctor = MemberHandle::new(ResolvedMember::Constructor(class.constructors()[0].clone()));
        let obj = ctor.invoke(&[]).unwrap();

        let method = class.find_methods("twice")[0].1.clone();
        let handle = MemberHandle::new(ResolvedMember::Method(method));
        assert_eq!(handle.invoke(&[obj, Value::Int(21)]).unwrap(), Value::Int(42));
        assert!(matches!(
            handle.invoke(&[Value::Null, Value::Int(1)]),
            Err(CallError::NullTarget(_))
        ));
    }

    #[test]
    fn test_method_handle_dispatches_on_receiver() {
        let base = HostClass::builder("game.Base")
            .method("tick", "()I", Access::Protected, |_, _| Ok(Value::Int(1)))
            .method("tock", "()I", Access::Private, |_, _| Ok(Value::Int(1)))
            .build()
            .unwrap();
        let sub = HostClass::builder("game.Sub")
            .extends(&base)
            .method("tick", "()I", Access::Protected, |_, _| Ok(Value::Int(2)))
            .method("tock", "()I", Access::Private, |_, _| Ok(Value::Int(2)))
            .constructor("()V", Access::Public, |_, _| Ok(Value::Null))
            .build()
            .unwrap();
        let obj = sub.constructors()[0].new_instance(&[]).unwrap();

        let tick = MemberHandle::new(ResolvedMember::Method(base.find_methods("tick")[0].1.clone()));
        assert_eq!(tick.invoke(&[obj.clone()]).unwrap(), Value::Int(2));

        let tock = MemberHandle::new(ResolvedMember::Method(base.find_methods("tock")[0].1.clone()));
        assert_eq!(tock.invoke(&[obj]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_field_handle_get_and_set() {
        let class = HostClass::builder("game.Counter")
            .field_init("count", "I", Access::Private, Value::Int(3))
            .static_field("total", "I", Access::Private, Value::Int(0))
            .constructor("()V", Access::Public, |_, _| Ok(Value::Null))
            .build()
            .unwrap();
        let obj = class.constructors()[0].new_instance(&[]).unwrap();

        let count = MemberHandle::new(ResolvedMember::Field(class.find_field("count").unwrap().1.clone()));
        assert_eq!(count.invoke(&[obj.clone()]).unwrap(), Value::Int(3));
        count.invoke(&[obj.clone(), Value::Int(4)]).unwrap();
        assert_eq!(count.invoke(&[obj]).unwrap(), Value::Int(4));

        let total = MemberHandle::new(ResolvedMember::Field(class.find_field("total").unwrap().1.clone()));
        total.invoke(&[Value::Int(10)]).unwrap();
        assert_eq!(total.invoke(&[]).unwrap(), Value::Int(10));
    }
}
