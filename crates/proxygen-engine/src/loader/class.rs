//! Defined proxy types and their instances

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use proxygen_bytecode::{MethodDesc, Module, TypeDesc};
use rustc_hash::FxHashMap;

use super::{MappingSummary, RuntimeInner};
use crate::error::{CallError, InitializationError};
use crate::host::{HostClass, Value};
use crate::interp::{accepts, Interpreter};
use crate::link::LinkedFunction;
use crate::template::Template;

/// A generated type defined into a runtime
pub struct ProxyClass {
    name: String,
    template: Arc<Template>,
    target: Arc<HostClass>,
    module: Module,
    functions: Vec<LinkedFunction>,
    by_signature: FxHashMap<(String, MethodDesc), usize>,
    /// Template method name to function indices, in dispatch order
    overloads: BTreeMap<String, Vec<usize>>,
    statics: RwLock<Vec<Value>>,
    /// Outcome of the one-time initializer; a failure sticks
    init: OnceCell<Result<(), InitializationError>>,
    initializer: Option<usize>,
    runtime: Weak<RuntimeInner>,
    mappings: Vec<MappingSummary>,
}

impl ProxyClass {
    pub(crate) fn new(
        template: Arc<Template>,
        target: Arc<HostClass>,
        module: Module,
        functions: Vec<LinkedFunction>,
        runtime: Weak<RuntimeInner>,
        mappings: Vec<MappingSummary>,
    ) -> Self {
        let mut by_signature = FxHashMap::default();
        let mut overloads: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, func) in functions.iter().enumerate() {
            by_signature.insert((func.name.clone(), func.desc.clone()), index);
            if !func.is_static && !func.is_synthetic {
                overloads.entry(func.name.clone()).or_default().push(index);
            }
        }
        let statics = module
            .class
            .statics
            .iter()
            .map(|s| Value::default_for(&s.ty))
            .collect();
        Self {
            name: module.class.name.clone(),
            initializer: module.initializer(),
            template,
            target,
            module,
            functions,
            by_signature,
            overloads,
            statics: RwLock::new(statics),
            init: OnceCell::new(),
            runtime,
            mappings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    pub fn target(&self) -> &Arc<HostClass> {
        &self.target
    }

    /// The verified module this type was defined from
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn mappings(&self) -> &[MappingSummary] {
        &self.mappings
    }

    pub fn function(&self, index: usize) -> Option<&LinkedFunction> {
        self.functions.get(index)
    }

    pub fn find_function(&self, name: &str, desc: &MethodDesc) -> Option<usize> {
        self.by_signature.get(&(name.to_string(), desc.clone())).copied()
    }

    /// Functions implementing a template method, in dispatch order
    pub fn overloads(&self, name: &str) -> &[usize] {
        self.overloads.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Template method names
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.overloads.keys().map(String::as_str)
    }

    pub(crate) fn runtime(&self) -> Option<Arc<RuntimeInner>> {
        self.runtime.upgrade()
    }

    pub(crate) fn load_static(&self, slot: u16) -> Result<Value, CallError> {
        self.statics
            .read()
            .get(slot as usize)
            .cloned()
            .ok_or_else(|| CallError::Internal(format!("{}: no static slot {}", self.name, slot)))
    }

    pub(crate) fn store_static(&self, slot: u16, value: Value) -> Result<(), CallError> {
        match self.statics.write().get_mut(slot as usize) {
            Some(s) => {
                *s = value;
                Ok(())
            }
            None => Err(CallError::Internal(format!(
                "{}: no static slot {}",
                self.name, slot
            ))),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.init.get(), Some(Ok(())))
    }

    /// Run the one-time initializer on first use
    ///
    /// A failed initialization is cached; every later use reports the same
    /// error.
    pub fn ensure_initialized(&self) -> Result<(), InitializationError> {
        self.init.get_or_init(|| self.run_initializer()).clone()
    }

    fn run_initializer(&self) -> Result<(), InitializationError> {
        let Some(index) = self.initializer else {
            return Ok(());
        };
        log::debug!("initializing {}", self.name);
        let result = Interpreter::new(self).and_then(|interp| interp.execute(&self.functions[index], vec![]));
        match result {
            Ok(_) => Ok(()),
            Err(cause) => {
                log::warn!("initialization of {} failed: {}", self.name, cause);
                Err(InitializationError {
                    type_name: self.name.clone(),
                    cause: cause.to_string(),
                })
            }
        }
    }

    /// Call one function with a receiver (ignored for static functions)
    pub fn call(&self, index: usize, receiver: &Value, args: &[Value]) -> Result<Value, CallError> {
        let func = self
            .functions
            .get(index)
            .ok_or_else(|| CallError::Internal(format!("{}: no function {}", self.name, index)))?;
        if args.len() != func.desc.params.len() {
            return Err(CallError::ArgumentCount {
                name: format!("{}.{}{}", self.name, func.name, func.desc),
                expected: func.desc.params.len(),
                got: args.len(),
            });
        }
        let runtime = self
            .runtime()
            .ok_or_else(|| CallError::Internal(format!("runtime of {} was dropped", self.name)))?;
        for (ty, arg) in func.desc.params.iter().zip(args) {
            if !accepts(ty, arg, runtime.provider()) {
                return Err(CallError::ClassCast {
                    expected: ty.to_string(),
                    found: arg.type_name(),
                });
            }
        }
        self.ensure_initialized()?;

        let mut frame = Vec::with_capacity(args.len() + 1);
        if !func.is_static {
            frame.push(receiver.clone());
        }
        frame.extend_from_slice(args);
        Interpreter::new(self)?.execute(func, frame)
    }

    /// Whether a call with `args` would type-check against function `index`
    pub(crate) fn accepts_args(&self, index: usize, args: &[Value]) -> bool {
        let (Some(func), Some(runtime)) = (self.functions.get(index), self.runtime()) else {
            return false;
        };
        func.desc.params.len() == args.len()
            && func
                .desc
                .params
                .iter()
                .zip(args)
                .all(|(ty, arg)| accepts(ty, arg, runtime.provider()))
    }

    /// Self type as a descriptor
    pub fn self_type(&self) -> TypeDesc {
        TypeDesc::object(self.name.clone())
    }
}

impl fmt::Debug for ProxyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyClass")
            .field("name", &self.name)
            .field("target", &self.target.name())
            .field("functions", &self.functions.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// An instance of a generated type
///
/// The target is `Value::Null` for the unbound factory instance.
pub struct ProxyInstance {
    class: Arc<ProxyClass>,
    target: Value,
}

impl ProxyInstance {
    pub(crate) fn new(class: Arc<ProxyClass>, target: Value) -> Self {
        Self { class, target }
    }

    pub fn class(&self) -> &Arc<ProxyClass> {
        &self.class
    }

    pub fn target(&self) -> &Value {
        &self.target
    }

    pub fn is_bound(&self) -> bool {
        !self.target.is_null()
    }
}

impl fmt::Debug for ProxyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.class.name(), self.target)
    }
}
