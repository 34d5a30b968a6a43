//! Host object model
//!
//! Stands in for the running host: classes with access-controlled members,
//! live objects, and the reflection provider the resolver queries.

pub mod class;
pub mod handle;
pub mod registry;
pub mod value;

pub use class::{
    Access, HostClass, HostClassBuilder, HostConstructor, HostField, HostMethod, NativeFn,
    ResolvedMember, CONSTRUCTOR_NAME,
};
pub use handle::{HandleTarget, MemberHandle};
pub use registry::{HostRegistry, ReflectionProvider};
pub use value::{HostArray, HostObject, Value};
