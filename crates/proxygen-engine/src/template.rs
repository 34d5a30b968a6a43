//! Template contracts
//!
//! A template lists the methods a caller wants to call, each optionally
//! annotated with the target member names it goes by across host versions.
//! Markers live in the `proxygen.` namespace and are stripped from generated
//! types.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use proxygen_bytecode::{Annotation, MethodDesc};

use crate::error::ProxyError;
use crate::types::{TemplateId, TypeRef};

/// Namespace of generator markers
pub const MARKER_PREFIX: &str = "proxygen.";

/// Generator marker names
pub mod markers {
    /// Alternative target member names, tried in order
    pub const NAMES: &str = "proxygen.Names";
    /// Map to a field accessor; args name the field (alternatives allowed)
    pub const FIELD: &str = "proxygen.Field";
    /// Map to a target constructor
    pub const CONSTRUCTOR: &str = "proxygen.Constructor";
    /// Always dispatch through a handle
    pub const HANDLE: &str = "proxygen.Handle";
    /// Template level: alternative target class names, tried in order
    pub const TARGET: &str = "proxygen.Target";
}

/// Method names taken by the structural methods of every generated type
pub const RESERVED_NAMES: &[&str] = &[
    "instance",
    "bindTo",
    "isInstance",
    "equals",
    "hashCode",
    "toString",
    "newArray",
    "getTargetClass",
    "create",
];

/// Whether an annotation is a generator marker
pub fn is_marker(annotation: &Annotation) -> bool {
    annotation.name.starts_with(MARKER_PREFIX)
}

/// One method signature of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMethod {
    pub name: String,
    pub params: Vec<TypeRef>,
    pub ret: TypeRef,
    pub annotations: Vec<Annotation>,
}

impl TemplateMethod {
    /// A `void name()` method; refine with the builder methods
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret: TypeRef::Void,
            annotations: Vec::new(),
        }
    }

    pub fn param(mut self, ty: TypeRef) -> Self {
        self.params.push(ty);
        self
    }

    pub fn returns(mut self, ty: TypeRef) -> Self {
        self.ret = ty;
        self
    }

    pub fn annotate(mut self, name: impl Into<String>, args: &[&str]) -> Self {
        self.annotations.push(Annotation {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    /// Target member names, tried in order
    pub fn names(self, names: &[&str]) -> Self {
        self.annotate(markers::NAMES, names)
    }

    /// Map to the field with one of these names
    pub fn field(self, names: &[&str]) -> Self {
        self.annotate(markers::FIELD, names)
    }

    pub fn constructor(self) -> Self {
        self.annotate(markers::CONSTRUCTOR, &[])
    }

    pub fn handle(self) -> Self {
        self.annotate(markers::HANDLE, &[])
    }

    pub fn marker(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.marker(name).is_some()
    }

    /// Member names to try: the `Names` marker, or the method's own name
    pub fn candidate_names(&self) -> Vec<String> {
        match self.marker(markers::NAMES) {
            Some(a) if !a.args.is_empty() => a.args.clone(),
            _ => vec![self.name.clone()],
        }
    }

    /// Template-facing descriptor, used as the overload sort key
    pub fn synthetic_desc(&self) -> MethodDesc {
        MethodDesc::new(
            self.params.iter().map(TypeRef::to_desc).collect(),
            self.ret.to_desc(),
        )
    }

    /// Annotations that survive into the generated type
    pub fn copied_annotations(&self) -> Vec<Annotation> {
        self.annotations
            .iter()
            .filter(|a| !is_marker(a))
            .cloned()
            .collect()
    }
}

impl fmt::Display for TemplateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.ret, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", p)?;
        }
        f.write_str(")")
    }
}

/// A caller-declared contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    id: TemplateId,
    methods: Vec<TemplateMethod>,
    annotations: Vec<Annotation>,
}

impl Template {
    pub fn builder(id: impl Into<TemplateId>) -> TemplateBuilder {
        TemplateBuilder {
            id: id.into(),
            methods: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    pub fn methods(&self) -> &[TemplateMethod] {
        &self.methods
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Target class names, tried in order
    pub fn target_names(&self) -> Vec<String> {
        self.annotations
            .iter()
            .filter(|a| a.name == markers::TARGET)
            .flat_map(|a| a.args.iter().cloned())
            .collect()
    }

    /// Templates this one mentions through proxy-typed parameters or returns
    pub fn referenced_templates(&self) -> impl Iterator<Item = &TemplateId> {
        self.methods.iter().flat_map(|m| {
            m.params
                .iter()
                .chain(std::iter::once(&m.ret))
                .filter_map(TypeRef::proxy_template)
        })
    }

    pub fn copied_annotations(&self) -> Vec<Annotation> {
        self.annotations
            .iter()
            .filter(|a| !is_marker(a))
            .cloned()
            .collect()
    }
}

/// Builder for [`Template`]
pub struct TemplateBuilder {
    id: TemplateId,
    methods: Vec<TemplateMethod>,
    annotations: Vec<Annotation>,
}

impl TemplateBuilder {
    /// Add target class names (may be called repeatedly)
    pub fn target(mut self, names: &[&str]) -> Self {
        self.annotations.push(Annotation {
            name: markers::TARGET.to_string(),
            args: names.iter().map(|n| n.to_string()).collect(),
        });
        self
    }

    pub fn method(mut self, method: TemplateMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn annotate(mut self, name: impl Into<String>, args: &[&str]) -> Self {
        self.annotations.push(Annotation {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> Result<Template, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidTemplate {
            template: self.id.to_string(),
            reason,
        };
        if self.id.as_str().is_empty() {
            return Err(invalid("empty template id".to_string()));
        }
        if !self.annotations.iter().any(|a| a.name == markers::TARGET && !a.args.is_empty()) {
            return Err(invalid("no target class names".to_string()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for method in &self.methods {
            if method.name.is_empty() || method.name.starts_with('<') {
                return Err(invalid(format!("bad method name '{}'", method.name)));
            }
            if RESERVED_NAMES.contains(&method.name.as_str()) {
                return Err(invalid(format!(
                    "method name '{}' is reserved for generated types",
                    method.name
                )));
            }
            if let Some(p) = method.params.iter().find(|p| **p == TypeRef::Void) {
                return Err(invalid(format!("{} has a {} parameter", method, p)));
            }
            if !seen.insert((method.name.as_str(), method.synthetic_desc().params)) {
                return Err(invalid(format!("duplicate method {}", method)));
            }
        }
        Ok(Template {
            id: self.id,
            methods: self.methods,
            annotations: self.annotations,
        })
    }
}

/// Declared templates, keyed by id
#[derive(Default)]
pub struct TemplateCatalog {
    templates: DashMap<TemplateId, Arc<Template>>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a template; an identical redeclaration is accepted
    pub fn declare(&self, template: Template) -> Result<Arc<Template>, ProxyError> {
        use dashmap::mapref::entry::Entry;

        match self.templates.entry(template.id().clone()) {
            Entry::Occupied(existing) => {
                if **existing.get() == template {
                    Ok(Arc::clone(existing.get()))
                } else {
                    Err(ProxyError::DuplicateTemplate(template.id().to_string()))
                }
            }
            Entry::Vacant(slot) => Ok(Arc::clone(slot.insert(Arc::new(template)).value())),
        }
    }

    pub fn get(&self, id: &TemplateId) -> Option<Arc<Template>> {
        self.templates.get(id).map(|t| Arc::clone(t.value()))
    }

    pub fn contains(&self, id: &TemplateId) -> bool {
        self.templates.contains_key(id)
    }

    pub fn ids(&self) -> Vec<TemplateId> {
        let mut ids: Vec<TemplateId> = self.templates.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> TemplateBuilder {
        Template::builder("Entity").target(&["game.Entity", "game.EntityLegacy"])
    }

    #[test]
    fn test_build_template() {
        let t = entity()
            .method(TemplateMethod::new("getX").returns(TypeRef::Int))
            .method(TemplateMethod::new("setX").param(TypeRef::Int).field(&["x"]))
            .annotate("game.Doc", &["entity"])
            .build()
            .unwrap();
        assert_eq!(t.target_names(), vec!["game.Entity", "game.EntityLegacy"]);
        assert_eq!(t.methods()[1].synthetic_desc().to_string(), "(I)V");
        assert_eq!(t.copied_annotations().len(), 1);
        assert!(t.methods()[1].copied_annotations().is_empty());
    }

    #[test]
    fn test_candidate_names() {
        let plain = TemplateMethod::new("tick");
        assert_eq!(plain.candidate_names(), vec!["tick"]);
        let renamed = TemplateMethod::new("tick").names(&["a", "tick"]);
        assert_eq!(renamed.candidate_names(), vec!["a", "tick"]);
    }

    #[test]
    fn test_reserved_and_duplicate_rejected() {
        let reserved = entity().method(TemplateMethod::new("create")).build();
        assert!(matches!(reserved, Err(ProxyError::InvalidTemplate { .. })));

        let dup = entity()
            .method(TemplateMethod::new("add").param(TypeRef::Int))
            .method(TemplateMethod::new("add").param(TypeRef::Int).returns(TypeRef::Int))
            .build();
        assert!(matches!(dup, Err(ProxyError::InvalidTemplate { .. })));

        let no_target = Template::builder("X").build();
        assert!(no_target.is_err());
    }

    #[test]
    fn test_referenced_templates() {
        let t = entity()
            .method(TemplateMethod::new("world").returns(TypeRef::proxy("World")))
            .method(TemplateMethod::new("moveTo").param(TypeRef::proxy("Location")))
            .build()
            .unwrap();
        let refs: Vec<&str> = t.referenced_templates().map(TemplateId::as_str).collect();
        assert_eq!(refs, vec!["World", "Location"]);
    }

    #[test]
    fn test_catalog_declare() {
        let catalog = TemplateCatalog::new();
        let t = entity().build().unwrap();
        catalog.declare(t.clone()).unwrap();
        catalog.declare(t).unwrap();
        let other = entity()
            .method(TemplateMethod::new("tick"))
            .build()
            .unwrap();
        assert!(matches!(
            catalog.declare(other),
            Err(ProxyError::DuplicateTemplate(_))
        ));
        assert_eq!(catalog.ids(), vec![TemplateId::from("Entity")]);
    }
}
