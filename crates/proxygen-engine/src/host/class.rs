//! Host classes and their members
//!
//! A `HostClass` is the reflection-level view of a class in the running host:
//! name, access, superclass and declared members. Method and constructor
//! bodies are native closures.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use proxygen_bytecode::{DecodeError, MemberKind, MemberRef, MethodDesc, TypeDesc};

use super::value::{HostObject, Value};
use crate::error::CallError;

/// Body of a host method or constructor: `(receiver, args)`
///
/// Static methods receive `Value::Null` as receiver; constructors receive the
/// freshly allocated object.
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync>;

/// Access level of a class or member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Access {
    Public,
    Protected,
    Package,
    Private,
}

impl Access {
    pub fn is_public(self) -> bool {
        self == Access::Public
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Public => "public",
            Access::Protected => "protected",
            Access::Package => "package",
            Access::Private => "private",
        })
    }
}

/// A field declared by a host class
pub struct HostField {
    owner: String,
    name: String,
    ty: TypeDesc,
    access: Access,
    is_static: bool,
    initial: Value,
    static_value: RwLock<Value>,
}

impl HostField {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDesc {
        &self.ty
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub(crate) fn initial(&self) -> &Value {
        &self.initial
    }

    /// Symbolic reference to this field
    pub fn member_ref(&self) -> MemberRef {
        MemberRef {
            owner: self.owner.clone(),
            name: self.name.clone(),
            desc: MethodDesc::new(vec![], self.ty.clone()),
            kind: if self.is_static {
                MemberKind::StaticField
            } else {
                MemberKind::Field
            },
        }
    }

    /// Read the field; `receiver` is ignored for static fields
    pub fn get(&self, receiver: &Value) -> Result<Value, CallError> {
        if self.is_static {
            return Ok(self.static_value.read().clone());
        }
        match receiver {
            Value::Null => Err(CallError::NullTarget(self.member_ref().to_string())),
            other => other.expect_object()?.field(&self.name),
        }
    }

    /// Write the field; `receiver` is ignored for static fields
    pub fn set(&self, receiver: &Value, value: Value) -> Result<(), CallError> {
        if self.is_static {
            *self.static_value.write() = value;
            return Ok(());
        }
        match receiver {
            Value::Null => Err(CallError::NullTarget(self.member_ref().to_string())),
            other => other.expect_object()?.set_field(&self.name, value),
        }
    }
}

/// A method declared by a host class
pub struct HostMethod {
    owner: String,
    name: String,
    desc: MethodDesc,
    access: Access,
    is_static: bool,
    body: NativeFn,
}

impl HostMethod {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &MethodDesc {
        &self.desc
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn member_ref(&self) -> MemberRef {
        MemberRef {
            owner: self.owner.clone(),
            name: self.name.clone(),
            desc: self.desc.clone(),
            kind: if self.is_static {
                MemberKind::StaticMethod
            } else {
                MemberKind::Method
            },
        }
    }

    /// Call the body
    pub fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value, CallError> {
        if !self.is_static && receiver.is_null() {
            return Err(CallError::NullTarget(self.member_ref().to_string()));
        }
        if args.len() != self.desc.params.len() {
            return Err(CallError::ArgumentCount {
                name: self.member_ref().to_string(),
                expected: self.desc.params.len(),
                got: args.len(),
            });
        }
        (self.body)(receiver, args)
    }
}

/// Name used for constructors in member references
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// A constructor declared by a host class
pub struct HostConstructor {
    class: Weak<HostClass>,
    owner: String,
    params: Vec<TypeDesc>,
    access: Access,
    body: NativeFn,
}

impl HostConstructor {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn params(&self) -> &[TypeDesc] {
        &self.params
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Descriptor with the owner type as return
    pub fn desc(&self) -> MethodDesc {
        MethodDesc::new(self.params.clone(), TypeDesc::object(self.owner.clone()))
    }

    pub fn member_ref(&self) -> MemberRef {
        MemberRef {
            owner: self.owner.clone(),
            name: CONSTRUCTOR_NAME.to_string(),
            desc: self.desc(),
            kind: MemberKind::Constructor,
        }
    }

    /// Allocate an instance and run the body on it
    pub fn new_instance(&self, args: &[Value]) -> Result<Value, CallError> {
        let class = self
            .class
            .upgrade()
            .ok_or_else(|| CallError::Internal(format!("class {} was dropped", self.owner)))?;
        if args.len() != self.params.len() {
            return Err(CallError::ArgumentCount {
                name: self.member_ref().to_string(),
                expected: self.params.len(),
                got: args.len(),
            });
        }
        let object = Value::Object(Arc::new(HostObject::new(class)));
        (self.body)(&object, args)?;
        Ok(object)
    }
}

/// A class of the running host
pub struct HostClass {
    name: String,
    access: Access,
    superclass: Option<Arc<HostClass>>,
    fields: Vec<Arc<HostField>>,
    methods: Vec<Arc<HostMethod>>,
    constructors: Vec<Arc<HostConstructor>>,
}

impl fmt::Debug for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClass")
            .field("name", &self.name)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

impl HostClass {
    /// Start building a class
    pub fn builder(name: impl Into<String>) -> HostClassBuilder {
        HostClassBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_public(&self) -> bool {
        self.access.is_public()
    }

    pub fn superclass(&self) -> Option<&Arc<HostClass>> {
        self.superclass.as_ref()
    }

    pub fn declared_fields(&self) -> &[Arc<HostField>] {
        &self.fields
    }

    pub fn declared_methods(&self) -> &[Arc<HostMethod>] {
        &self.methods
    }

    pub fn constructors(&self) -> &[Arc<HostConstructor>] {
        &self.constructors
    }

    /// This class followed by its superclasses
    pub fn chain(&self) -> impl Iterator<Item = &HostClass> {
        std::iter::successors(Some(self), |c| c.superclass.as_deref())
    }

    /// Whether this class is `name` or inherits from it
    pub fn is_subclass_of(&self, name: &str) -> bool {
        self.chain().any(|c| c.name == name)
    }

    /// Instance fields of the whole chain
    pub fn instance_fields(&self) -> impl Iterator<Item = &Arc<HostField>> {
        self.chain()
            .flat_map(|c| c.fields.iter())
            .filter(|f| !f.is_static)
    }

    /// Methods named `name` visible from this class, most-derived first
    ///
    /// A superclass method whose descriptor and static-ness match one already
    /// seen is overridden and skipped.
    pub fn find_methods(&self, name: &str) -> Vec<(&HostClass, &Arc<HostMethod>)> {
        let mut found: Vec<(&HostClass, &Arc<HostMethod>)> = Vec::new();
        for class in self.chain() {
            for method in class.methods.iter().filter(|m| m.name == name) {
                let overridden = found
                    .iter()
                    .any(|(_, m)| m.desc == method.desc && m.is_static == method.is_static);
                if !overridden {
                    found.push((class, method));
                }
            }
        }
        found
    }

    /// Field named `name` visible from this class
    pub fn find_field(&self, name: &str) -> Option<(&HostClass, &Arc<HostField>)> {
        self.chain()
            .find_map(|c| c.fields.iter().find(|f| f.name == name).map(|f| (c, f)))
    }

    /// Most-derived instance method with an exact descriptor
    pub fn find_virtual(&self, name: &str, desc: &MethodDesc) -> Option<&Arc<HostMethod>> {
        self.chain().find_map(|c| {
            c.methods
                .iter()
                .find(|m| !m.is_static && m.name == name && &m.desc == desc)
        })
    }

    /// The member a symbolic reference names, declared on this very class
    pub fn declared_member(&self, member: &MemberRef) -> Option<ResolvedMember> {
        match member.kind {
            MemberKind::Method | MemberKind::StaticMethod => self
                .methods
                .iter()
                .find(|m| {
                    m.name == member.name
                        && m.desc == member.desc
                        && m.is_static == (member.kind == MemberKind::StaticMethod)
                })
                .cloned()
                .map(ResolvedMember::Method),
            MemberKind::Field | MemberKind::StaticField => self
                .fields
                .iter()
                .find(|f| {
                    f.name == member.name
                        && f.ty == member.desc.ret
                        && f.is_static == (member.kind == MemberKind::StaticField)
                })
                .cloned()
                .map(ResolvedMember::Field),
            MemberKind::Constructor => self
                .constructors
                .iter()
                .find(|c| c.params == member.desc.params)
                .cloned()
                .map(ResolvedMember::Constructor),
        }
    }
}

/// A concrete host member
#[derive(Clone)]
pub enum ResolvedMember {
    Method(Arc<HostMethod>),
    Field(Arc<HostField>),
    Constructor(Arc<HostConstructor>),
}

impl ResolvedMember {
    pub fn access(&self) -> Access {
        match self {
            ResolvedMember::Method(m) => m.access,
            ResolvedMember::Field(f) => f.access,
            ResolvedMember::Constructor(c) => c.access,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            ResolvedMember::Method(m) => &m.owner,
            ResolvedMember::Field(f) => &f.owner,
            ResolvedMember::Constructor(c) => &c.owner,
        }
    }

    pub fn member_ref(&self) -> MemberRef {
        match self {
            ResolvedMember::Method(m) => m.member_ref(),
            ResolvedMember::Field(f) => f.member_ref(),
            ResolvedMember::Constructor(c) => c.member_ref(),
        }
    }

    pub fn is_static(&self) -> bool {
        match self {
            ResolvedMember::Method(m) => m.is_static,
            ResolvedMember::Field(f) => f.is_static,
            ResolvedMember::Constructor(_) => false,
        }
    }
}

impl fmt::Debug for ResolvedMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.access(), self.member_ref())
    }
}

struct FieldSpec {
    name: String,
    ty: TypeDesc,
    access: Access,
    is_static: bool,
    initial: Option<Value>,
}

struct MethodSpec {
    name: String,
    desc: MethodDesc,
    access: Access,
    is_static: bool,
    body: NativeFn,
}

struct CtorSpec {
    params: Vec<TypeDesc>,
    access: Access,
    body: NativeFn,
}

/// Builder for [`HostClass`]
///
/// Descriptors are given as text (`"(II)I"`, `"Lgame.Entity;"`); the first
/// malformed one is reported by [`HostClassBuilder::build`].
pub struct HostClassBuilder {
    name: String,
    access: Access,
    superclass: Option<Arc<HostClass>>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    ctors: Vec<CtorSpec>,
    error: Option<DecodeError>,
}

impl HostClassBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            access: Access::Public,
            superclass: None,
            fields: Vec::new(),
            methods: Vec::new(),
            ctors: Vec::new(),
            error: None,
        }
    }

    fn record<T>(&mut self, parsed: Result<T, DecodeError>) -> Option<T> {
        match parsed {
            Ok(v) => Some(v),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn extends(mut self, superclass: &Arc<HostClass>) -> Self {
        self.superclass = Some(Arc::clone(superclass));
        self
    }

    fn push_field(
        mut self,
        name: &str,
        ty: &str,
        access: Access,
        is_static: bool,
        initial: Option<Value>,
    ) -> Self {
        if let Some(ty) = self.record(TypeDesc::parse(ty)) {
            self.fields.push(FieldSpec {
                name: name.to_string(),
                ty,
                access,
                is_static,
                initial,
            });
        }
        self
    }

    /// Instance field starting at its type's zero value
    pub fn field(self, name: &str, ty: &str, access: Access) -> Self {
        self.push_field(name, ty, access, false, None)
    }

    /// Instance field with an explicit initial value
    pub fn field_init(self, name: &str, ty: &str, access: Access, initial: Value) -> Self {
        self.push_field(name, ty, access, false, Some(initial))
    }

    pub fn static_field(self, name: &str, ty: &str, access: Access, initial: Value) -> Self {
        self.push_field(name, ty, access, true, Some(initial))
    }

    fn push_method<F>(mut self, name: &str, desc: &str, access: Access, is_static: bool, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        if let Some(desc) = self.record(MethodDesc::parse(desc)) {
            self.methods.push(MethodSpec {
                name: name.to_string(),
                desc,
                access,
                is_static,
                body: Arc::new(f),
            });
        }
        self
    }

    pub fn method<F>(self, name: &str, desc: &str, access: Access, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.push_method(name, desc, access, false, f)
    }

    pub fn static_method<F>(self, name: &str, desc: &str, access: Access, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.push_method(name, desc, access, true, f)
    }

    /// Constructor; `desc` lists the parameters and returns `V`
    pub fn constructor<F>(mut self, desc: &str, access: Access, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        if let Some(desc) = self.record(MethodDesc::parse(desc)) {
            self.ctors.push(CtorSpec {
                params: desc.params,
                access,
                body: Arc::new(f),
            });
        }
        self
    }

    pub fn build(self) -> Result<Arc<HostClass>, DecodeError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let owner = self.name;
        let fields = self
            .fields
            .into_iter()
            .map(|s| {
                let initial = s.initial.unwrap_or_else(|| Value::default_for(&s.ty));
                Arc::new(HostField {
                    owner: owner.clone(),
                    name: s.name,
                    ty: s.ty,
                    access: s.access,
                    is_static: s.is_static,
                    static_value: RwLock::new(initial.clone()),
                    initial,
                })
            })
            .collect();
        let methods = self
            .methods
            .into_iter()
            .map(|s| {
                Arc::new(HostMethod {
                    owner: owner.clone(),
                    name: s.name,
                    desc: s.desc,
                    access: s.access,
                    is_static: s.is_static,
                    body: s.body,
                })
            })
            .collect();
        let ctor_specs = self.ctors;
        let access = self.access;
        let superclass = self.superclass;
        Ok(Arc::new_cyclic(|weak| HostClass {
            constructors: ctor_specs
                .into_iter()
                .map(|s| {
                    Arc::new(HostConstructor {
                        class: weak.clone(),
                        owner: owner.clone(),
                        params: s.params,
                        access: s.access,
                        body: s.body,
                    })
                })
                .collect(),
            name: owner,
            access,
            superclass,
            fields,
            methods,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> Arc<HostClass> {
        HostClass::builder("game.Entity")
            .field_init("x", "I", Access::Public, Value::Int(7))
            .method("id", "()I", Access::Public, |_, _| Ok(Value::Int(1)))
            .method("secret", "()T", Access::Private, |_, _| Ok(Value::str("s")))
            .constructor("()V", Access::Public, |_, _| Ok(Value::Null))
            .build()
            .unwrap()
    }

    #[test]
    fn test_construct_and_fields() {
        let class = entity();
        let obj = class.constructors()[0].new_instance(&[]).unwrap();
        let (_, x) = class.find_field("x").unwrap();
        assert_eq!(x.get(&obj).unwrap(), Value::Int(7));
        x.set(&obj, Value::Int(9)).unwrap();
        assert_eq!(x.get(&obj).unwrap(), Value::Int(9));
        assert!(matches!(x.get(&Value::Null), Err(CallError::NullTarget(_))));
    }

    #[test]
    fn test_override_hides_super_method() {
        let base = entity();
        let zombie = HostClass::builder("game.Zombie")
            .extends(&base)
            .method("id", "()I", Access::Public, |_, _| Ok(Value::Int(2)))
            .build()
            .unwrap();

        let found = zombie.find_methods("id");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.name(), "game.Zombie");
        assert!(zombie.is_subclass_of("game.Entity"));
        assert!(zombie.find_field("x").is_some());
    }

    #[test]
    fn test_declared_member_lookup() {
        let class = entity();
        let secret = class.find_methods("secret")[0].1.member_ref();
        assert!(matches!(
            class.declared_member(&secret),
            Some(ResolvedMember::Method(_))
        ));
        let ctor = class.constructors()[0].member_ref();
        assert_eq!(ctor.to_string(), "game.Entity.<init>()Lgame.Entity;");
        assert!(class.declared_member(&ctor).is_some());
    }

    #[test]
    fn test_bad_descriptor_reported() {
        let err = HostClass::builder("x")
            .method("m", "(Q)V", Access::Public, |_, _| Ok(Value::Null))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_argument_count_checked() {
        let class = entity();
        let obj = class.constructors()[0].new_instance(&[]).unwrap();
        let id = &class.find_methods("id")[0].1;
        assert!(matches!(
            id.invoke(&obj, &[Value::Int(1)]),
            Err(CallError::ArgumentCount { .. })
        ));
    }
}
