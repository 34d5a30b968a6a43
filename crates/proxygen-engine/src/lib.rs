//! Proxy generation engine
//!
//! Turns a [`Template`] (the methods a caller wants) and a host class found
//! through a [`ReflectionProvider`] into a generated proxy type:
//! - Version selection (format version and feature level, once per runtime)
//! - Member resolution and type bridging
//! - Overload grouping and handle slot naming
//! - Code generation into a bytecode module
//! - Verification, linking and definition into a [`ProxyRuntime`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use proxygen_engine::{HostRegistry, ProxyRuntime, Template, TemplateMethod, TypeRef};
//!
//! let registry = Arc::new(HostRegistry::new());
//! let runtime = ProxyRuntime::new(registry).unwrap();
//! runtime
//!     .declare(
//!         Template::builder("Entity")
//!             .target(&["game.Entity"])
//!             .method(TemplateMethod::new("getX").returns(TypeRef::Int))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//! let entity = runtime.proxy("Entity").unwrap().create().unwrap();
//! let x = entity.invoke("getX", &[]).unwrap();
//! ```

#![warn(rust_2018_idioms)]

pub mod codegen;
pub mod config;
pub mod error;
pub mod host;
pub mod interp;
pub mod link;
pub mod loader;
pub mod proxy;
pub mod resolve;
pub mod template;
pub mod types;
pub mod version;

pub use config::{ConfigError, ProxyGenConfig, ENV_DUMP, ENV_TARGET};
pub use error::{
    BridgingError, CallError, GenerationVerificationError, InitializationError, LinkError,
    ProxyError, ResolutionError,
};
pub use host::{
    Access, HostArray, HostClass, HostClassBuilder, HostObject, HostRegistry, MemberHandle,
    ReflectionProvider, Value,
};
pub use loader::{MappingSummary, ProxyClass, ProxyInstance, ProxyRuntime};
pub use proxy::Proxy;
pub use resolve::{MappingKind, MappingTable, MemberMapping, OverloadTable, Resolver};
pub use template::{markers, Template, TemplateBuilder, TemplateCatalog, TemplateMethod};
pub use types::{TemplateId, TypeRef};
pub use version::{select, TargetOverride, TargetSelection};
