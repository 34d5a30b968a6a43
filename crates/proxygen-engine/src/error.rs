//! Error types for proxy generation and proxy calls

use proxygen_bytecode::{ModuleError, VerifyError};
use thiserror::Error;

use crate::config::ConfigError;

/// No target member matches a template method
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no target member for {template}.{method}; tried: {}", attempts.join(", "))]
pub struct ResolutionError {
    pub template: String,
    pub method: String,
    /// Every name/signature that was looked up
    pub attempts: Vec<String>,
}

/// A synthetic/real type pair that cannot be converted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot bridge {template}.{method}: {synthetic} to {real} ({reason})")]
pub struct BridgingError {
    pub template: String,
    pub method: String,
    pub synthetic: String,
    pub real: String,
    pub reason: String,
}

/// Generated code failed structural verification
///
/// Always a generator defect; carries the full listing of the offending type.
#[derive(Debug, Error)]
#[error("generated type {type_name} failed verification: {error}\n{disassembly}")]
pub struct GenerationVerificationError {
    pub type_name: String,
    #[source]
    pub error: VerifyError,
    pub disassembly: String,
}

/// One-time initialization of a generated type failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("initialization of {type_name} failed: {cause}")]
pub struct InitializationError {
    pub type_name: String,
    pub cause: String,
}

/// Direct member references that cannot be bound
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("class {0} not found")]
    NoSuchClass(String),

    #[error("member {0} not found")]
    NoSuchMember(String),

    /// Direct access to a member that is not public
    #[error("illegal direct access to {0}")]
    IllegalAccess(String),

    /// Code the verifier should have rejected
    #[error("malformed code: {0}")]
    Malformed(String),
}

/// Errors raised while declaring templates or generating proxy types
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Bridging(#[from] BridgingError),

    #[error(transparent)]
    Verification(#[from] GenerationVerificationError),

    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error("unknown template {0}")]
    UnknownTemplate(String),

    #[error("template {0} is already declared")]
    DuplicateTemplate(String),

    #[error("invalid template {template}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("no target class for template {template}; tried {}", names.join(", "))]
    TargetNotFound { template: String, names: Vec<String> },

    /// The same type name was defined twice
    #[error("type {0} is already defined")]
    DuplicateDefinition(String),

    #[error("linking {type_name} failed: {source}")]
    Link {
        type_name: String,
        #[source]
        source: LinkError,
    },

    #[error("module for {type_name} does not decode: {source}")]
    Module {
        type_name: String,
        #[source]
        source: ModuleError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by calls on a proxy or by host code it forwards to
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Instance member reached without a wrapped instance
    #[error("null target while accessing {0}")]
    NullTarget(String),

    #[error("class cast: expected {expected}, found {found}")]
    ClassCast { expected: String, found: String },

    #[error("no method {name} accepting ({args})")]
    NoSuchMethod { name: String, args: String },

    #[error("ambiguous call to {name}: {}", candidates.join(" | "))]
    AmbiguousOverload {
        name: String,
        candidates: Vec<String>,
    },

    #[error("{name} expects {expected} arguments, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("negative array size {0}")]
    NegativeArraySize(i32),

    /// Array allocation above the host limit or refused by the allocator
    #[error("out of memory allocating {requested} array elements")]
    OutOfMemory { requested: u64 },

    #[error("trap {code}: {message}")]
    Trap { code: u16, message: String },

    #[error("illegal access to {0}")]
    IllegalAccess(String),

    #[error("no such member {0}")]
    NoSuchMember(String),

    /// Error reported by host code
    #[error("host error: {0}")]
    Host(String),

    #[error(transparent)]
    Initialization(#[from] InitializationError),

    /// Broken invariant in the interpreter
    #[error("internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Shorthand for host code reporting a failure
    pub fn host(message: impl Into<String>) -> Self {
        CallError::Host(message.into())
    }
}
