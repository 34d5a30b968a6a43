//! Reflection provider and the in-process host registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use proxygen_bytecode::FormatVersion;
use rustc_hash::FxHashMap;

use super::class::HostClass;

/// Source of class metadata for the running host
pub trait ReflectionProvider: Send + Sync {
    /// Look up a class by fully qualified name
    fn find_class(&self, name: &str) -> Option<Arc<HostClass>>;

    /// Newest module format the host can load
    fn max_format_version(&self) -> FormatVersion;

    /// Whether handles may be resolved to non-public members
    fn allows_private_access(&self) -> bool {
        true
    }

    /// Whether `sub` is `sup` or inherits from it
    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        sub == sup
            || self
                .find_class(sub)
                .is_some_and(|class| class.is_subclass_of(sup))
    }
}

/// Registry of host classes
pub struct HostRegistry {
    /// Class name to class
    classes: RwLock<FxHashMap<String, Arc<HostClass>>>,
    max_format: FormatVersion,
    private_access: AtomicBool,
}

impl HostRegistry {
    /// Create an empty registry supporting the newest format
    pub fn new() -> Self {
        Self::with_max_format(FormatVersion::LATEST)
    }

    pub fn with_max_format(max_format: FormatVersion) -> Self {
        Self {
            classes: RwLock::new(FxHashMap::default()),
            max_format,
            private_access: AtomicBool::new(true),
        }
    }

    /// Register a class, replacing any class of the same name
    pub fn register(&self, class: Arc<HostClass>) {
        self.classes.write().insert(class.name().to_string(), class);
    }

    /// Register several classes
    pub fn register_all(&self, classes: impl IntoIterator<Item = Arc<HostClass>>) {
        let mut map = self.classes.write();
        for class in classes {
            map.insert(class.name().to_string(), class);
        }
    }

    /// Allow or forbid resolving handles to non-public members
    pub fn set_private_access(&self, allowed: bool) {
        self.private_access.store(allowed, Ordering::Release);
    }

    /// Registered class names, sorted
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReflectionProvider for HostRegistry {
    fn find_class(&self, name: &str) -> Option<Arc<HostClass>> {
        self.classes.read().get(name).cloned()
    }

    fn max_format_version(&self) -> FormatVersion {
        self.max_format
    }

    fn allows_private_access(&self) -> bool {
        self.private_access.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_find() {
        let registry = HostRegistry::new();
        let base = HostClass::builder("game.Entity").build().unwrap();
        let zombie = HostClass::builder("game.Zombie").extends(&base).build().unwrap();
        registry.register_all([base, zombie]);

        assert!(registry.find_class("game.Entity").is_some());
        assert!(registry.find_class("game.Missing").is_none());
        assert!(registry.is_subclass("game.Zombie", "game.Entity"));
        assert!(!registry.is_subclass("game.Entity", "game.Zombie"));
        assert_eq!(registry.class_names(), vec!["game.Entity", "game.Zombie"]);
    }

    #[test]
    fn test_format_and_access_flags() {
        let registry = HostRegistry::with_max_format(FormatVersion::V1);
        assert_eq!(registry.max_format_version(), FormatVersion::V1);
        assert!(registry.allows_private_access());
        registry.set_private_access(false);
        assert!(!registry.allows_private_access());
    }
}
