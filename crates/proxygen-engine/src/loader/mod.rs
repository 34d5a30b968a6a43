//! Proxy runtime: generation batches, definition and the type cache
//!
//! A [`ProxyRuntime`] owns every generated type for its lifetime. Lookups
//! are lock-free; a miss takes the generation lock, re-checks, then
//! generates the requested template together with every not-yet-defined
//! template it references:
//!
//! ```text
//! closure -> resolve -> generate -> encode/decode -> verify -> link -> define
//! ```
//!
//! Any failure aborts the whole batch before a single type is defined.

mod class;

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use proxygen_bytecode::{disassemble_module, verify_module, Module, TypeOracle, VerifyContext};
use rustc_hash::FxHashSet;
use serde::Serialize;

pub use class::{ProxyClass, ProxyInstance};

use crate::codegen;
use crate::config::{ConfigError, ProxyGenConfig};
use crate::error::{GenerationVerificationError, ProxyError};
use crate::host::ReflectionProvider;
use crate::link::link_module;
use crate::proxy::Proxy;
use crate::resolve::{MappingTable, OverloadTable, Resolver};
use crate::template::{Template, TemplateCatalog};
use crate::types::TemplateId;
use crate::version::{self, TargetSelection};

/// Printable view of one resolved mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSummary {
    /// Template method, e.g. `int getX()`
    pub method: String,
    pub kind: String,
    /// Target member reference
    pub member: String,
    /// `direct` or `handle`
    pub dispatch: String,
    /// Handle slot name for indirect mappings
    pub slot: Option<String>,
    /// Parameter conversions
    pub params: Vec<String>,
    /// Return conversion
    pub ret: String,
}

pub(crate) struct RuntimeInner {
    provider: Arc<dyn ReflectionProvider>,
    config: ProxyGenConfig,
    selection: OnceCell<TargetSelection>,
    templates: TemplateCatalog,
    by_template: DashMap<TemplateId, Arc<ProxyClass>>,
    by_name: DashMap<String, Arc<ProxyClass>>,
    factories: DashMap<TemplateId, Proxy>,
    generation_lock: Mutex<()>,
    generated: AtomicUsize,
    dump: Mutex<Box<dyn Write + Send>>,
}

impl RuntimeInner {
    pub(crate) fn provider(&self) -> &dyn ReflectionProvider {
        &*self.provider
    }

    pub(crate) fn class_by_name(&self, name: &str) -> Option<Arc<ProxyClass>> {
        self.by_name.get(name).map(|c| Arc::clone(c.value()))
    }
}

/// Class facts for the verifier: host classes plus already defined proxies
struct RuntimeOracle<'a>(&'a RuntimeInner);

impl TypeOracle for RuntimeOracle<'_> {
    fn knows_class(&self, name: &str) -> bool {
        self.0.by_name.contains_key(name) || self.0.provider.find_class(name).is_some()
    }

    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        sub == sup || self.0.provider.is_subclass(sub, sup)
    }
}

/// Generates, defines and caches proxy types for one host
#[derive(Clone)]
pub struct ProxyRuntime {
    inner: Arc<RuntimeInner>,
}

impl ProxyRuntime {
    /// Runtime with the default config plus `PROXYGEN_*` environment overrides
    pub fn new(provider: Arc<dyn ReflectionProvider>) -> Result<Self, ProxyError> {
        let config = ProxyGenConfig::default().with_env()?;
        Self::with_config(provider, config)
    }

    pub fn with_config(
        provider: Arc<dyn ReflectionProvider>,
        config: ProxyGenConfig,
    ) -> Result<Self, ProxyError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                provider,
                config,
                selection: OnceCell::new(),
                templates: TemplateCatalog::new(),
                by_template: DashMap::new(),
                by_name: DashMap::new(),
                factories: DashMap::new(),
                generation_lock: Mutex::new(()),
                generated: AtomicUsize::new(0),
                dump: Mutex::new(Box::new(std::io::stderr())),
            }),
        })
    }

    pub fn config(&self) -> &ProxyGenConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &Arc<dyn ReflectionProvider> {
        &self.inner.provider
    }

    pub fn templates(&self) -> &TemplateCatalog {
        &self.inner.templates
    }

    /// Redirect disassembly dumps (stderr by default)
    pub fn set_dump_sink(&self, sink: Box<dyn Write + Send>) {
        *self.inner.dump.lock() = sink;
    }

    /// Format and feature level of every type this runtime generates
    ///
    /// Chosen on first use and fixed afterwards.
    pub fn selection(&self) -> Result<TargetSelection, ProxyError> {
        let inner = &self.inner;
        let selection = inner.selection.get_or_try_init(|| {
            let requested = inner.config.target_override()?;
            let selection = version::select(inner.provider.max_format_version(), requested)?;
            log::debug!("proxy target selected: {}", selection);
            Ok::<_, ConfigError>(selection)
        })?;
        Ok(*selection)
    }

    pub fn declare(&self, template: Template) -> Result<Arc<Template>, ProxyError> {
        self.inner.templates.declare(template)
    }

    /// Number of types defined so far
    pub fn generated_count(&self) -> usize {
        self.inner.generated.load(Ordering::SeqCst)
    }

    /// The defined type of a template, without generating it
    pub fn proxy_class(&self, id: impl Into<TemplateId>) -> Option<Arc<ProxyClass>> {
        self.inner
            .by_template
            .get(&id.into())
            .map(|c| Arc::clone(c.value()))
    }

    /// Define the type of a template, generating its batch on first use
    ///
    /// Does not run the type's initializer.
    pub fn define(&self, id: impl Into<TemplateId>) -> Result<Arc<ProxyClass>, ProxyError> {
        let id = id.into();
        if let Some(class) = self.proxy_class(id.clone()) {
            return Ok(class);
        }

        let _guard = self.inner.generation_lock.lock();
        if let Some(class) = self.proxy_class(id.clone()) {
            return Ok(class);
        }
        self.generate_batch(&id)?;
        self.proxy_class(id.clone())
            .ok_or_else(|| ProxyError::UnknownTemplate(id.to_string()))
    }

    /// The unbound factory proxy of a template
    ///
    /// Defines and initializes the type on first use.
    pub fn proxy(&self, id: impl Into<TemplateId>) -> Result<Proxy, ProxyError> {
        let id = id.into();
        if let Some(factory) = self.inner.factories.get(&id) {
            return Ok(factory.value().clone());
        }
        let class = self.define(id.clone())?;
        class.ensure_initialized()?;
        let factory = self
            .inner
            .factories
            .entry(id)
            .or_insert_with(|| Proxy::unbound(class))
            .value()
            .clone();
        Ok(factory)
    }

    /// Resolved mappings of a template's type
    pub fn mappings(&self, id: impl Into<TemplateId>) -> Result<Vec<MappingSummary>, ProxyError> {
        Ok(self.define(id)?.mappings().to_vec())
    }

    /// Disassembly of a template's type
    pub fn disassemble(&self, id: impl Into<TemplateId>) -> Result<String, ProxyError> {
        Ok(disassemble_module(self.define(id)?.module()))
    }

    /// Templates the root needs that are not defined yet, root first
    fn closure(&self, root: &TemplateId) -> Result<Vec<Arc<Template>>, ProxyError> {
        let inner = &self.inner;
        let mut batch = Vec::new();
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) || inner.by_template.contains_key(&id) {
                continue;
            }
            let template = inner
                .templates
                .get(&id)
                .ok_or_else(|| ProxyError::UnknownTemplate(id.to_string()))?;
            queue.extend(template.referenced_templates().cloned());
            batch.push(template);
        }
        Ok(batch)
    }

    /// Caller holds the generation lock
    fn generate_batch(&self, root: &TemplateId) -> Result<(), ProxyError> {
        let inner = &self.inner;
        let selection = self.selection()?;
        let batch = self.closure(root)?;
        log::debug!(
            "generating batch for {}: {}",
            root,
            batch.iter().map(|t| t.id().as_str()).collect::<Vec<_>>().join(", ")
        );

        let resolver = Resolver::new(inner.provider(), &inner.templates);
        let mut planned = Vec::with_capacity(batch.len());
        for template in &batch {
            let table = resolver.resolve(template)?;
            let overloads = OverloadTable::build(&table);
            planned.push((template, table, overloads));
        }

        let oracle = RuntimeOracle(inner);
        let ctx = VerifyContext::new(&oracle)
            .with_siblings(batch.iter().map(|t| t.id().proxy_type_name()));

        let mut defined = Vec::with_capacity(planned.len());
        for (template, table, overloads) in planned {
            let type_name = template.id().proxy_type_name();
            let generated = codegen::generate(template, &table, &overloads, &selection);
            let module = Module::decode(&generated.encode()).map_err(|source| ProxyError::Module {
                type_name: type_name.clone(),
                source,
            })?;
            verify_module(&module, &ctx).map_err(|error| GenerationVerificationError {
                type_name: type_name.clone(),
                error,
                disassembly: disassemble_module(&module),
            })?;
            let functions =
                link_module(&module, inner.provider()).map_err(|source| ProxyError::Link {
                    type_name: type_name.clone(),
                    source,
                })?;
            let mappings = summarize(template, &table, &overloads);
            defined.push(ProxyClass::new(
                Arc::clone(template),
                Arc::clone(&table.target),
                module,
                functions,
                Arc::downgrade(inner),
                mappings,
            ));
        }

        if let Some(taken) = defined.iter().find(|c| inner.by_name.contains_key(c.name())) {
            return Err(ProxyError::DuplicateDefinition(taken.name().to_string()));
        }
        for class in defined {
            self.install(Arc::new(class))?;
        }
        Ok(())
    }

    /// Register a defined type under its name and template
    fn install(&self, class: Arc<ProxyClass>) -> Result<(), ProxyError> {
        let inner = &self.inner;
        match inner.by_name.entry(class.name().to_string()) {
            Entry::Occupied(_) => return Err(ProxyError::DuplicateDefinition(class.name().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&class));
            }
        }
        if inner.config.debug.dump {
            self.dump(&class);
        }
        log::debug!(
            "defined {} -> {} ({} functions)",
            class.name(),
            class.target().name(),
            class.module().functions.len()
        );
        inner
            .by_template
            .insert(class.template().id().clone(), class);
        inner.generated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dump(&self, class: &ProxyClass) {
        let listing = disassemble_module(class.module());
        let mut sink = self.inner.dump.lock();
        if let Err(e) = writeln!(sink, "{}", listing).and_then(|()| sink.flush()) {
            log::warn!("could not dump {}: {}", class.name(), e);
        }
    }
}

fn summarize(template: &Template, table: &MappingTable, overloads: &OverloadTable) -> Vec<MappingSummary> {
    table
        .all()
        .enumerate()
        .map(|(pos, mapping)| MappingSummary {
            method: match mapping.method_index {
                Some(i) => template.methods()[i].to_string(),
                None => format!("{} {}()", template.id().proxy_type_name(), codegen::structural::CREATE),
            },
            kind: mapping.kind.to_string(),
            member: mapping.member.member_ref().to_string(),
            dispatch: if mapping.indirect { "handle" } else { "direct" }.to_string(),
            slot: overloads.slot_name(pos).map(str::to_string),
            params: mapping.params.iter().map(|b| b.conversion.to_string()).collect(),
            ret: mapping.ret.conversion.to_string(),
        })
        .collect()
}
