//! Type bridging between template-facing and target-facing types
//!
//! Every parameter and return of a mapping carries one [`Bridge`]; the
//! resolver plans them and the code generator consumes them.

use std::fmt;

use proxygen_bytecode::TypeDesc;
use rustc_hash::FxHashMap;

use crate::types::{TemplateId, TypeRef};

/// How a value crosses between the synthetic and the real type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    /// Passed unchanged (includes widening reference conversions)
    Identity,
    /// Checked narrowing cast to the receiving type
    Cast,
    /// Raw result wrapped into a bound proxy of the template
    Wrap(TemplateId),
    /// Proxy argument unwrapped to its raw target instance
    Unwrap(TemplateId),
    /// Result dropped because the template method returns void
    Discard,
}

impl Conversion {
    pub fn is_identity(&self) -> bool {
        *self == Conversion::Identity
    }

    pub fn name(&self) -> &'static str {
        match self {
            Conversion::Identity => "identity",
            Conversion::Cast => "cast",
            Conversion::Wrap(_) => "wrap",
            Conversion::Unwrap(_) => "unwrap",
            Conversion::Discard => "discard",
        }
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::Wrap(id) | Conversion::Unwrap(id) => write!(f, "{}({})", self.name(), id),
            other => f.write_str(other.name()),
        }
    }
}

/// One planned conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub synthetic: TypeRef,
    pub real: TypeDesc,
    pub conversion: Conversion,
}

impl Bridge {
    pub fn template(&self) -> Option<&TemplateId> {
        match &self.conversion {
            Conversion::Wrap(id) | Conversion::Unwrap(id) => Some(id),
            _ => None,
        }
    }
}

/// Class facts the planner needs
pub struct BridgeContext<'a> {
    /// Target class name of every template that may appear as a proxy type
    pub proxy_targets: &'a FxHashMap<TemplateId, String>,
    pub is_subclass: &'a dyn Fn(&str, &str) -> bool,
}

impl BridgeContext<'_> {
    /// Whether a `from` value can be stored where `to` is expected
    pub fn assignable(&self, from: &TypeDesc, to: &TypeDesc) -> bool {
        if from == to {
            return true;
        }
        match (from, to) {
            (f, TypeDesc::Any) => f.is_reference(),
            (TypeDesc::Object(a), TypeDesc::Object(b)) => (self.is_subclass)(a, b),
            (TypeDesc::Array(a), TypeDesc::Array(b)) => {
                a.is_reference() && b.is_reference() && self.assignable(a, b)
            }
            _ => false,
        }
    }

    /// Either direction of assignability
    fn related(&self, a: &TypeDesc, b: &TypeDesc) -> bool {
        self.assignable(a, b) || self.assignable(b, a)
    }

    fn proxy_target(&self, id: &TemplateId) -> Result<TypeDesc, String> {
        self.proxy_targets
            .get(id)
            .map(|name| TypeDesc::object(name.clone()))
            .ok_or_else(|| format!("template {} has no known target", id))
    }

    /// Plan a parameter: the synthetic argument flows into the real parameter
    pub fn plan_param(&self, synthetic: &TypeRef, real: &TypeDesc) -> Result<Bridge, String> {
        let conversion = match synthetic {
            TypeRef::Proxy(id) => {
                let target = self.proxy_target(id)?;
                if !self.related(&target, real) {
                    return Err(format!("{} wraps {}, unrelated to {}", id, target, real));
                }
                Conversion::Unwrap(id.clone())
            }
            other => self.plan_plain(&other.to_desc(), real)?,
        };
        Ok(Bridge {
            synthetic: synthetic.clone(),
            real: real.clone(),
            conversion,
        })
    }

    /// Plan a return: the real result flows back out as the synthetic type
    pub fn plan_return(&self, synthetic: &TypeRef, real: &TypeDesc) -> Result<Bridge, String> {
        let conversion = match (synthetic, real) {
            (TypeRef::Void, TypeDesc::Void) => Conversion::Identity,
            (TypeRef::Void, _) => Conversion::Discard,
            (_, TypeDesc::Void) => return Err("target member returns nothing".to_string()),
            (TypeRef::Proxy(id), real) => {
                let target = self.proxy_target(id)?;
                if !self.related(real, &target) {
                    return Err(format!("{} wraps {}, unrelated to {}", id, target, real));
                }
                Conversion::Wrap(id.clone())
            }
            (other, real) => self.plan_plain(real, &other.to_desc())?,
        };
        Ok(Bridge {
            synthetic: synthetic.clone(),
            real: real.clone(),
            conversion,
        })
    }

    /// Conversion for a value of type `from` flowing into `to`
    fn plan_plain(&self, from: &TypeDesc, to: &TypeDesc) -> Result<Conversion, String> {
        if contains_proxy_array(from) || contains_proxy_array(to) {
            return Err("arrays of proxies cannot be bridged".to_string());
        }
        if from.is_primitive() || to.is_primitive() {
            return if from == to {
                Ok(Conversion::Identity)
            } else {
                Err("primitive types differ".to_string())
            };
        }
        if self.assignable(from, to) {
            Ok(Conversion::Identity)
        } else if self.assignable(to, from) {
            Ok(Conversion::Cast)
        } else {
            Err("unrelated reference types".to_string())
        }
    }
}

fn contains_proxy_array(ty: &TypeDesc) -> bool {
    match ty {
        TypeDesc::Array(elem) => match &**elem {
            TypeDesc::Object(name) => name.ends_with(crate::types::PROXY_SUFFIX),
            inner => contains_proxy_array(inner),
        },
        _ => false,
    }
}
