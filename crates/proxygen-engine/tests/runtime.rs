//! Runtime-level behavior: caching, concurrency, selection and batches

mod common;

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use proxygen_bytecode::{FeatureLevel, FormatVersion};
use proxygen_engine::{
    Access, HostClass, HostRegistry, ProxyError, ProxyGenConfig, ProxyRuntime,
    Template, TemplateMethod, TypeRef, Value,
};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_generation_is_idempotent() {
    let runtime = common::runtime();
    let a = runtime.proxy("Entity").unwrap();
    let b = runtime.proxy("Entity").unwrap();
    assert!(a.ptr_eq(&b));
    assert!(Arc::ptr_eq(a.proxy_class(), b.proxy_class()));

    // Entity pulls in Location through its signatures
    assert_eq!(runtime.generated_count(), 2);
    assert!(runtime.proxy_class("Location").is_some());

    runtime.proxy("Location").unwrap();
    assert_eq!(runtime.generated_count(), 2);
}

#[test]
fn test_concurrent_first_use() {
    let runtime = common::runtime();
    let factories: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let runtime = runtime.clone();
                scope.spawn(move || {
                    let id = if i % 2 == 0 { "Entity" } else { "Location" };
                    runtime.proxy("Entity").unwrap();
                    runtime.proxy(id).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(runtime.generated_count(), 2);
    let entity = runtime.proxy("Entity").unwrap();
    let location = runtime.proxy("Location").unwrap();
    for (i, factory) in factories.iter().enumerate() {
        let expected = if i % 2 == 0 { &entity } else { &location };
        assert!(factory.ptr_eq(expected));
    }
}

#[test]
fn test_define_does_not_initialize() {
    let runtime = common::runtime();
    let class = runtime.define("Entity").unwrap();
    assert!(!class.is_initialized());
    runtime.proxy("Entity").unwrap();
    assert!(class.is_initialized());
}

#[test]
fn test_failed_initialization_sticks() {
    let registry = common::world();
    registry.set_private_access(false);
    let runtime = common::runtime_with(Arc::clone(&registry), ProxyGenConfig::default());

    let class = runtime.define("Entity").unwrap();
    assert!(matches!(
        runtime.proxy("Entity"),
        Err(ProxyError::Initialization(_))
    ));

    registry.set_private_access(true);
    assert!(matches!(
        runtime.proxy("Entity"),
        Err(ProxyError::Initialization(_))
    ));
    assert!(class.ensure_initialized().is_err());
    assert!(!class.is_initialized());
}

#[test]
fn test_levels_behave_the_same() {
    for target in ["v1:baseline", "v2:fused-target", "v3:guarded"] {
        let runtime = common::runtime_with(common::world(), common::config_for(target));
        let factory = runtime.proxy("Entity").unwrap();
        let entity = factory.create().unwrap();

        assert_eq!(entity.invoke("getX", &[]).unwrap().as_int(), Some(7), "{}", target);
        assert_eq!(entity.invoke("greet", &[]).unwrap().as_str(), Some("hi"), "{}", target);
        assert_eq!(
            entity
                .invoke("add", &[Value::Int(1), Value::Int(2)])
                .unwrap()
                .as_int(),
            Some(3),
            "{}",
            target
        );
        assert!(common::is_unsupported(&entity.create()), "{}", target);
        assert!(entity.equals(&entity.instance().unwrap()).unwrap(), "{}", target);

        let class = runtime.define("Entity").unwrap();
        assert_eq!(class.module().level, FeatureLevel::from_u8(target_level(target)).unwrap());
    }
}

fn target_level(target: &str) -> u8 {
    match target {
        "v1:baseline" => 1,
        "v2:fused-target" => 2,
        _ => 3,
    }
}

#[test]
fn test_auto_follows_host_maximum() {
    let registry = HostRegistry::with_max_format(FormatVersion::V1);
    let location = common::location_class();
    registry.register_all([common::entity_class(&location), location]);
    let runtime = common::runtime_with(Arc::new(registry), ProxyGenConfig::default());

    let selection = runtime.selection().unwrap();
    assert_eq!(selection.format, FormatVersion::V1);
    assert_eq!(selection.level, FeatureLevel::Baseline);
    assert!(!selection.overridden);

    let entity = runtime.proxy("Entity").unwrap().create().unwrap();
    assert_eq!(entity.invoke("greet", &[]).unwrap().as_str(), Some("hi"));
}

#[test]
fn test_override_above_host_fails() {
    let registry = HostRegistry::with_max_format(FormatVersion::V1);
    let location = common::location_class();
    registry.register_all([common::entity_class(&location), location]);
    let runtime = common::runtime_with(Arc::new(registry), common::config_for("v3"));

    assert!(matches!(runtime.proxy("Entity"), Err(ProxyError::Config(_))));
    assert_eq!(runtime.generated_count(), 0);
}

#[test]
fn test_dump_writes_disassembly() {
    let mut config = ProxyGenConfig::default();
    config.debug.dump = true;
    let runtime = common::runtime_with(common::world(), config);
    let sink = SharedBuf::default();
    runtime.set_dump_sink(Box::new(sink.clone()));

    runtime.define("Entity").unwrap();
    let dump = sink.contents();
    assert!(dump.contains("class Entity$Proxy"));
    assert!(dump.contains("class Location$Proxy"));
}

#[test]
fn test_resolution_failure_defines_nothing() {
    let runtime = common::runtime();
    runtime
        .declare(
            Template::builder("Flyer")
                .target(&["game.Entity"])
                .method(TemplateMethod::new("fly").returns(TypeRef::Int))
                .method(TemplateMethod::new("home").returns(TypeRef::proxy("Location")))
                .build()
                .unwrap(),
        )
        .unwrap();

    assert!(matches!(runtime.define("Flyer"), Err(ProxyError::Resolution(_))));
    assert_eq!(runtime.generated_count(), 0);
    assert!(runtime.proxy_class("Location").is_none());

    // The failure is not cached as a definition
    assert!(runtime.define("Flyer").is_err());
    assert!(runtime.proxy("Entity").is_ok());
}

#[test]
fn test_mutually_referencing_templates() {
    let registry = HostRegistry::new();
    let child = HostClass::builder("tree.Child")
        .field("parent", "Ltree.Parent;", Access::Public)
        .constructor("()V", Access::Public, |_, _| Ok(Value::Null))
        .build()
        .unwrap();
    let parent = HostClass::builder("tree.Parent")
        .field("child", "Ltree.Child;", Access::Public)
        .constructor("()V", Access::Public, |_, _| Ok(Value::Null))
        .build()
        .unwrap();
    registry.register_all([child, parent]);

    let runtime = ProxyRuntime::with_config(Arc::new(registry), ProxyGenConfig::default()).unwrap();
    runtime
        .declare(
            Template::builder("Parent")
                .target(&["tree.Parent"])
                .method(TemplateMethod::new("getChild").returns(TypeRef::proxy("Child")))
                .method(TemplateMethod::new("setChild").param(TypeRef::proxy("Child")))
                .build()
                .unwrap(),
        )
        .unwrap();
    runtime
        .declare(
            Template::builder("Child")
                .target(&["tree.Child"])
                .method(TemplateMethod::new("getParent").returns(TypeRef::proxy("Parent")))
                .method(TemplateMethod::new("setParent").param(TypeRef::proxy("Parent")))
                .build()
                .unwrap(),
        )
        .unwrap();

    let parent = runtime.proxy("Parent").unwrap().create().unwrap();
    assert_eq!(runtime.generated_count(), 2);

    let child = runtime.proxy("Child").unwrap().create().unwrap();
    parent.invoke("setChild", &[child.as_value()]).unwrap();
    child.invoke("setParent", &[parent.as_value()]).unwrap();

    let back = proxygen_engine::Proxy::from_value(&parent.invoke("getChild", &[]).unwrap()).unwrap();
    let again = proxygen_engine::Proxy::from_value(&back.invoke("getParent", &[]).unwrap()).unwrap();
    assert!(again.equals(&parent.as_value()).unwrap());
    assert!(parent.invoke("getChild", &[]).unwrap().as_proxy().is_some());
}
