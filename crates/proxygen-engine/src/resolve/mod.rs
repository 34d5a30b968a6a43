//! Member resolution
//!
//! Maps every template method onto one member of the target class and plans
//! the type bridges for its parameters and return.

pub mod bridge;
pub mod overload;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use proxygen_bytecode::{MethodDesc, TypeDesc};
use rustc_hash::FxHashMap;

pub use bridge::{Bridge, BridgeContext, Conversion};
pub use overload::{HandleSlot, OverloadTable};

use crate::error::{BridgingError, ProxyError, ResolutionError};
use crate::host::{HostClass, ReflectionProvider, ResolvedMember};
use crate::template::{markers, Template, TemplateCatalog, TemplateMethod};
use crate::types::{TemplateId, TypeRef};

/// Template method names treated as constructors when they return their own proxy
pub const CONSTRUCTOR_CONVENTION: &[&str] = &["construct", "newInstance"];

/// Name of the structural factory method backed by the no-argument constructor
pub const CREATE_METHOD: &str = "create";

/// Shape of a resolved member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MappingKind {
    Method,
    FieldGetter,
    FieldSetter,
    Constructor,
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MappingKind::Method => "method",
            MappingKind::FieldGetter => "getter",
            MappingKind::FieldSetter => "setter",
            MappingKind::Constructor => "constructor",
        })
    }
}

/// One template method bound to one target member
#[derive(Debug, Clone)]
pub struct MemberMapping {
    /// Index into the template's methods; `None` for the implicit `create`
    pub method_index: Option<usize>,
    /// Template method name
    pub name: String,
    pub kind: MappingKind,
    pub member: ResolvedMember,
    pub params: Vec<Bridge>,
    pub ret: Bridge,
    pub is_static: bool,
    /// Dispatch through a handle rather than a direct reference
    pub indirect: bool,
    /// Template-facing descriptor
    pub synthetic_desc: MethodDesc,
}

impl MemberMapping {
    /// Member name used for synthetic handle names
    pub fn member_name(&self) -> String {
        self.member.member_ref().name
    }

    /// Result type of the real member as seen by the caller
    pub fn real_return(&self) -> &TypeDesc {
        &self.ret.real
    }

    /// Parameter and result shape of the handle call site
    pub fn handle_desc(&self, target: &str) -> MethodDesc {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        if !self.is_static && self.kind != MappingKind::Constructor {
            params.push(TypeDesc::object(target));
        }
        params.extend(self.params.iter().map(|b| b.real.clone()));
        MethodDesc::new(params, self.ret.real.clone())
    }

    /// Count of conversions other than identity
    fn conversion_cost(&self) -> usize {
        self.params
            .iter()
            .chain(std::iter::once(&self.ret))
            .filter(|b| !b.conversion.is_identity())
            .count()
    }
}

/// Result of resolving one template
#[derive(Debug, Clone)]
pub struct MappingTable {
    pub template: TemplateId,
    pub target: Arc<HostClass>,
    /// One mapping per template method, in declaration order
    pub mappings: Vec<MemberMapping>,
    /// Mapping behind `create()`, when the target has a no-argument constructor
    pub create: Option<MemberMapping>,
    /// Other templates whose proxy types this one wraps or unwraps
    pub dependencies: BTreeSet<TemplateId>,
}

impl MappingTable {
    /// Template mappings followed by the `create` mapping
    pub fn all(&self) -> impl Iterator<Item = &MemberMapping> {
        self.mappings.iter().chain(self.create.iter())
    }
}

/// Resolves templates against the classes of a reflection provider
pub struct Resolver<'a> {
    provider: &'a dyn ReflectionProvider,
    templates: &'a TemplateCatalog,
}

struct Candidate {
    mapping: MemberMapping,
    key: String,
}

impl<'a> Resolver<'a> {
    pub fn new(provider: &'a dyn ReflectionProvider, templates: &'a TemplateCatalog) -> Self {
        Self {
            provider,
            templates,
        }
    }

    /// The first of the template's target names the host knows
    pub fn target_class(&self, template: &Template) -> Result<Arc<HostClass>, ProxyError> {
        let names = template.target_names();
        names
            .iter()
            .find_map(|name| self.provider.find_class(name))
            .ok_or_else(|| ProxyError::TargetNotFound {
                template: template.id().to_string(),
                names,
            })
    }

    /// Resolve every method of a template
    pub fn resolve(&self, template: &Template) -> Result<MappingTable, ProxyError> {
        let target = self.target_class(template)?;
        log::trace!("resolving {} against {}", template.id(), target.name());

        let mut proxy_targets = FxHashMap::default();
        proxy_targets.insert(template.id().clone(), target.name().to_string());
        for id in template.referenced_templates() {
            if proxy_targets.contains_key(id) {
                continue;
            }
            let other = self
                .templates
                .get(id)
                .ok_or_else(|| ProxyError::UnknownTemplate(id.to_string()))?;
            let class = self.target_class(&other)?;
            proxy_targets.insert(id.clone(), class.name().to_string());
        }

        let provider = self.provider;
        let is_subclass = move |a: &str, b: &str| provider.is_subclass(a, b);
        let ctx = BridgeContext {
            proxy_targets: &proxy_targets,
            is_subclass: &is_subclass,
        };
        let scope = Scope {
            template,
            target: &target,
            ctx: &ctx,
        };

        let mut mappings = Vec::with_capacity(template.methods().len());
        for (index, method) in template.methods().iter().enumerate() {
            let mapping = scope.resolve_method(index, method)?;
            log::trace!(
                "  {} -> {:?} ({})",
                method,
                mapping.member,
                if mapping.indirect { "handle" } else { "direct" }
            );
            mappings.push(mapping);
        }
        let create = scope.resolve_create();

        let dependencies = mappings
            .iter()
            .chain(create.iter())
            .flat_map(|m| m.params.iter().chain(std::iter::once(&m.ret)))
            .filter_map(Bridge::template)
            .filter(|id| *id != template.id())
            .cloned()
            .collect();

        Ok(MappingTable {
            template: template.id().clone(),
            target,
            mappings,
            create,
            dependencies,
        })
    }
}

struct Scope<'s> {
    template: &'s Template,
    target: &'s Arc<HostClass>,
    ctx: &'s BridgeContext<'s>,
}

enum Planned {
    Ok(Candidate),
    /// The member matched by name and arity but a type could not be bridged
    Unbridgeable(String),
}

impl Scope<'_> {
    fn resolution_error(&self, method: &TemplateMethod, attempts: Vec<String>) -> ProxyError {
        ResolutionError {
            template: self.template.id().to_string(),
            method: method.to_string(),
            attempts,
        }
        .into()
    }

    fn bridging_error(&self, method: &TemplateMethod, real: String, reason: String) -> ProxyError {
        BridgingError {
            template: self.template.id().to_string(),
            method: method.to_string(),
            synthetic: method.synthetic_desc().to_string(),
            real,
            reason,
        }
        .into()
    }

    /// Direct dispatch needs the target, the declaring class, and the member public
    fn is_indirect(&self, method: Option<&TemplateMethod>, declaring: &HostClass, member: &ResolvedMember) -> bool {
        let forced = method.is_some_and(|m| m.has_marker(markers::HANDLE));
        forced || !(self.target.is_public() && declaring.is_public() && member.access().is_public())
    }

    fn is_constructor(&self, method: &TemplateMethod) -> bool {
        method.has_marker(markers::CONSTRUCTOR)
            || (CONSTRUCTOR_CONVENTION.contains(&method.name.as_str())
                && method.ret.proxy_template() == Some(self.template.id()))
    }

    fn resolve_method(&self, index: usize, method: &TemplateMethod) -> Result<MemberMapping, ProxyError> {
        if self.is_constructor(method) {
            return self.resolve_constructor(index, method);
        }
        if let Some(marker) = method.marker(markers::FIELD) {
            let names = if marker.args.is_empty() {
                field_convention(&method.name).into_iter().collect()
            } else {
                marker.args.clone()
            };
            let mut attempts = Vec::new();
            return match self.resolve_field(index, method, &names, &mut attempts)? {
                Some(m) => Ok(m),
                None => Err(self.resolution_error(method, attempts)),
            };
        }

        let mut attempts = Vec::new();
        let mut unbridgeable: Option<(String, String)> = None;
        let mut any_named = false;
        for name in method.candidate_names() {
            let found = self.target.find_methods(&name);
            if found.is_empty() {
                attempts.push(format!("{}.{}: not found", self.target.name(), name));
                continue;
            }
            any_named = true;
            let mut candidates = Vec::new();
            let same_arity = found
                .iter()
                .filter(|(_, m)| m.desc().params.len() == method.params.len());
            for &(declaring, host) in same_arity {
                let member = ResolvedMember::Method(Arc::clone(host));
                let desc = host.desc();
                match self.plan(index, method, MappingKind::Method, declaring, member, &desc.params, &desc.ret) {
                    Planned::Ok(c) => candidates.push(c),
                    Planned::Unbridgeable(reason) => {
                        unbridgeable.get_or_insert((host.member_ref().to_string(), reason));
                    }
                }
            }
            if let Some(best) = pick(candidates) {
                return Ok(best);
            }
            attempts.push(format!(
                "{}.{}: no overload taking {} parameter(s) bridges {}",
                self.target.name(),
                name,
                method.params.len(),
                method.synthetic_desc()
            ));
        }

        if let Some((real, reason)) = unbridgeable {
            return Err(self.bridging_error(method, real, reason));
        }
        if !any_named {
            let names: Vec<String> = method
                .candidate_names()
                .iter()
                .filter_map(|n| accessor_field(n, method))
                .collect();
            if let Some(m) = self.resolve_field(index, method, &names, &mut attempts)? {
                return Ok(m);
            }
        }
        Err(self.resolution_error(method, attempts))
    }

    /// Field accessor lookup; `None` when no named field exists
    fn resolve_field(
        &self,
        index: usize,
        method: &TemplateMethod,
        names: &[String],
        attempts: &mut Vec<String>,
    ) -> Result<Option<MemberMapping>, ProxyError> {
        let kind = match (method.params.len(), &method.ret) {
            (0, ret) if *ret != TypeRef::Void => MappingKind::FieldGetter,
            (1, TypeRef::Void) => MappingKind::FieldSetter,
            _ => {
                attempts.push(format!("{} is neither a getter nor a setter", method));
                return Ok(None);
            }
        };
        for name in names {
            let Some((declaring, field)) = self.target.find_field(name) else {
                attempts.push(format!("{}.{}: no such field", self.target.name(), name));
                continue;
            };
            let member = ResolvedMember::Field(Arc::clone(field));
            let (params, ret) = match kind {
                MappingKind::FieldGetter => (vec![], field.ty().clone()),
                _ => (vec![field.ty().clone()], TypeDesc::Void),
            };
            return match self.plan(index, method, kind, declaring, member, &params, &ret) {
                Planned::Ok(c) => Ok(Some(c.mapping)),
                Planned::Unbridgeable(reason) => Err(self.bridging_error(
                    method,
                    field.member_ref().to_string(),
                    reason,
                )),
            };
        }
        Ok(None)
    }

    fn resolve_constructor(&self, index: usize, method: &TemplateMethod) -> Result<MemberMapping, ProxyError> {
        let mut candidates = Vec::new();
        let mut unbridgeable = None;
        let owner = TypeDesc::object(self.target.name());
        for ctor in self
            .target
            .constructors()
            .iter()
            .filter(|c| c.params().len() == method.params.len())
        {
            let member = ResolvedMember::Constructor(Arc::clone(ctor));
            match self.plan(index, method, MappingKind::Constructor, self.target, member, ctor.params(), &owner) {
                Planned::Ok(c) => candidates.push(c),
                Planned::Unbridgeable(reason) => {
                    unbridgeable.get_or_insert((ctor.member_ref().to_string(), reason));
                }
            }
        }
        if let Some(best) = pick(candidates) {
            return Ok(best);
        }
        if let Some((real, reason)) = unbridgeable {
            return Err(self.bridging_error(method, real, reason));
        }
        Err(self.resolution_error(
            method,
            vec![format!(
                "{}.<init>: no constructor taking {} parameter(s)",
                self.target.name(),
                method.params.len()
            )],
        ))
    }

    /// The implicit mapping behind `create()`
    fn resolve_create(&self) -> Option<MemberMapping> {
        let ctor = self.target.constructors().iter().find(|c| c.params().is_empty())?;
        let member = ResolvedMember::Constructor(Arc::clone(ctor));
        let ret = Bridge {
            synthetic: TypeRef::Proxy(self.template.id().clone()),
            real: TypeDesc::object(self.target.name()),
            conversion: Conversion::Wrap(self.template.id().clone()),
        };
        Some(MemberMapping {
            method_index: None,
            name: CREATE_METHOD.to_string(),
            kind: MappingKind::Constructor,
            indirect: self.is_indirect(None, self.target, &member),
            member,
            params: Vec::new(),
            synthetic_desc: MethodDesc::new(vec![], ret.synthetic.to_desc()),
            ret,
            is_static: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn plan(
        &self,
        index: usize,
        method: &TemplateMethod,
        kind: MappingKind,
        declaring: &HostClass,
        member: ResolvedMember,
        real_params: &[TypeDesc],
        real_ret: &TypeDesc,
    ) -> Planned {
        let mut params = Vec::with_capacity(real_params.len());
        for (synthetic, real) in method.params.iter().zip(real_params) {
            match self.ctx.plan_param(synthetic, real) {
                Ok(b) => params.push(b),
                Err(reason) => {
                    return Planned::Unbridgeable(format!("parameter {} to {}: {}", synthetic, real, reason))
                }
            }
        }
        let ret = match self.ctx.plan_return(&method.ret, real_ret) {
            Ok(b) => b,
            Err(reason) => {
                return Planned::Unbridgeable(format!("{} to return {}: {}", real_ret, method.ret, reason))
            }
        };
        let key = member.member_ref().desc.to_string();
        let mapping = MemberMapping {
            method_index: Some(index),
            name: method.name.clone(),
            kind,
            is_static: member.is_static(),
            indirect: self.is_indirect(Some(method), declaring, &member),
            member,
            params,
            ret,
            synthetic_desc: method.synthetic_desc(),
        };
        Planned::Ok(Candidate { mapping, key })
    }
}

/// Fewest non-identity conversions, then descriptor text
fn pick(candidates: Vec<Candidate>) -> Option<MemberMapping> {
    candidates
        .into_iter()
        .min_by(|a, b| {
            (a.mapping.conversion_cost(), &a.key).cmp(&(b.mapping.conversion_cost(), &b.key))
        })
        .map(|c| c.mapping)
}

/// Field named by an accessor-style method name, for the given shape
fn accessor_field(name: &str, method: &TemplateMethod) -> Option<String> {
    match (method.params.len(), &method.ret) {
        (0, ret) if *ret != TypeRef::Void => Some(
            strip_accessor(name, "get")
                .or_else(|| strip_accessor(name, "is"))
                .unwrap_or_else(|| name.to_string()),
        ),
        (1, TypeRef::Void) => strip_accessor(name, "set"),
        _ => None,
    }
}

/// Field name for a `Field` marker without arguments
fn field_convention(name: &str) -> Option<String> {
    ["get", "is", "set"]
        .iter()
        .find_map(|p| strip_accessor(name, p))
        .or_else(|| Some(name.to_string()))
}

/// `getHealth` with prefix `get` gives `health`
fn strip_accessor(name: &str, prefix: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_uppercase() {
        return None;
    }
    Some(first.to_lowercase().chain(chars).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Access, HostRegistry, Value};

    fn host() -> HostRegistry {
        let registry = HostRegistry::new();
        let location = HostClass::builder("game.Location")
            .field("x", "D", Access::Public)
            .build()
            .unwrap();
        let entity = HostClass::builder("game.Entity")
            .field_init("x", "I", Access::Public, Value::Int(7))
            .field("alive", "Z", Access::Private)
            .method("greet", "()T", Access::Private, |_, _| Ok(Value::str("hi")))
            .method("add", "(II)I", Access::Private, |_, a| {
                Ok(Value::Int(a[0].expect_int()? + a[1].expect_int()?))
            })
            .method("add", "(DD)D", Access::Private, |_, a| {
                Ok(Value::Double(a[0].expect_double()? + a[1].expect_double()?))
            })
            .method("where", "()Lgame.Location;", Access::Public, |_, _| Ok(Value::Null))
            .method("tick", "()I", Access::Public, |_, _| Ok(Value::Int(1)))
            .constructor("()V", Access::Public, |_, _| Ok(Value::Null))
            .build()
            .unwrap();
        registry.register_all([location, entity]);
        registry
    }

    fn catalog() -> TemplateCatalog {
        let catalog = TemplateCatalog::new();
        catalog
            .declare(Template::builder("Location").target(&["game.Location"]).build().unwrap())
            .unwrap();
        catalog
    }

    fn entity(methods: Vec<TemplateMethod>) -> Template {
        methods
            .into_iter()
            .fold(Template::builder("Entity").target(&["game.Missing", "game.Entity"]), |b, m| b.method(m))
            .build()
            .unwrap()
    }

    #[test]
    fn test_field_convention() {
        let registry = host();
        let catalog = catalog();
        let t = entity(vec![
            TemplateMethod::new("getX").returns(TypeRef::Int),
            TemplateMethod::new("setX").param(TypeRef::Int),
            TemplateMethod::new("isAlive").returns(TypeRef::Boolean),
        ]);
        let table = Resolver::new(&registry, &catalog).resolve(&t).unwrap();
        assert_eq!(table.target.name(), "game.Entity");
        assert_eq!(table.mappings[0].kind, MappingKind::FieldGetter);
        assert_eq!(table.mappings[1].kind, MappingKind::FieldSetter);
        assert!(!table.mappings[0].indirect);
        assert!(table.mappings[2].indirect);
        assert!(table.create.is_some());
    }

    #[test]
    fn test_overloads_pick_matching_member() {
        let registry = host();
        let catalog = catalog();
        let t = entity(vec![
            TemplateMethod::new("add").param(TypeRef::Int).param(TypeRef::Int).returns(TypeRef::Int),
            TemplateMethod::new("add")
                .param(TypeRef::Double)
                .param(TypeRef::Double)
                .returns(TypeRef::Double),
        ]);
        let table = Resolver::new(&registry, &catalog).resolve(&t).unwrap();
        assert_eq!(table.mappings[0].member.member_ref().desc.to_string(), "(II)I");
        assert_eq!(table.mappings[1].member.member_ref().desc.to_string(), "(DD)D");
        assert!(table.mappings.iter().all(|m| m.indirect));
    }

    #[test]
    fn test_renamed_member_and_wrap_dependency() {
        let registry = host();
        let catalog = catalog();
        let t = entity(vec![TemplateMethod::new("location")
            .names(&["getLocation", "where"])
            .returns(TypeRef::proxy("Location"))]);
        let table = Resolver::new(&registry, &catalog).resolve(&t).unwrap();
        let mapping = &table.mappings[0];
        assert_eq!(mapping.member_name(), "where");
        assert_eq!(mapping.ret.conversion, Conversion::Wrap(TemplateId::from("Location")));
        assert!(table.dependencies.contains(&TemplateId::from("Location")));
    }

    #[test]
    fn test_resolution_error_lists_attempts() {
        let registry = host();
        let catalog = catalog();
        let t = entity(vec![TemplateMethod::new("jump").names(&["jump", "leap"])]);
        let err = Resolver::new(&registry, &catalog).resolve(&t).unwrap_err();
        let err = match err {
            ProxyError::Resolution(err) => err,
            other => panic!("expected resolution error, got {other}"),
        };
        assert!(err.attempts.iter().any(|a| a.contains("jump")));
        assert!(err.attempts.iter().any(|a| a.contains("leap")));
    }

    #[test]
    fn test_bridging_error_when_types_cannot_convert() {
        let registry = host();
        let catalog = catalog();
        let t = entity(vec![TemplateMethod::new("tick").returns(TypeRef::String)]);
        let err = Resolver::new(&registry, &catalog).resolve(&t).unwrap_err();
        assert!(matches!(err, ProxyError::Bridging(_)));
    }

    #[test]
    fn test_constructor_convention_and_forced_handle() {
        let registry = host();
        let catalog = catalog();
        let t = entity(vec![
            TemplateMethod::new("construct").returns(TypeRef::proxy("Entity")),
            TemplateMethod::new("tick").returns(TypeRef::Int).handle(),
        ]);
        let table = Resolver::new(&registry, &catalog).resolve(&t).unwrap();
        assert_eq!(table.mappings[0].kind, MappingKind::Constructor);
        assert!(!table.mappings[0].indirect);
        assert!(table.mappings[1].indirect);
        assert!(table.dependencies.is_empty());
    }

    #[test]
    fn test_target_not_found() {
        let registry = HostRegistry::new();
        let catalog = catalog();
        let t = entity(vec![]);
        assert!(matches!(
            Resolver::new(&registry, &catalog).resolve(&t),
            Err(ProxyError::TargetNotFound { .. })
        ));
    }

    #[test]
    fn test_strip_accessor() {
        assert_eq!(strip_accessor("getHealth", "get").as_deref(), Some("health"));
        assert_eq!(strip_accessor("getaway", "get"), None);
        assert_eq!(strip_accessor("get", "get"), None);
    }
}
