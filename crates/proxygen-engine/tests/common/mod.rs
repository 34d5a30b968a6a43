//! Shared host fixture for engine integration tests
//!
//! `game.Entity` mixes public and private members so every template below
//! exercises both direct and handle dispatch.

#![allow(dead_code)]

use std::sync::Arc;

use proxygen_engine::{
    Access, CallError, HostClass, HostRegistry, ProxyGenConfig, ProxyRuntime, Template,
    TemplateMethod, TypeRef, Value,
};

pub fn location_class() -> Arc<HostClass> {
    HostClass::builder("game.Location")
        .field("x", "D", Access::Public)
        .field("y", "D", Access::Public)
        .constructor("(DD)V", Access::Public, |this, args| {
            let obj = this.expect_object()?;
            obj.set_field("x", args[0].clone())?;
            obj.set_field("y", args[1].clone())?;
            Ok(Value::Null)
        })
        .build()
        .unwrap()
}

pub fn entity_class(location: &Arc<HostClass>) -> Arc<HostClass> {
    let location_ctor = location
        .constructors()
        .iter()
        .find(|c| c.params().len() == 2)
        .cloned()
        .unwrap();

    HostClass::builder("game.Entity")
        .field_init("x", "I", Access::Public, Value::Int(7))
        .field("loc", "Lgame.Location;", Access::Private)
        .constructor("()V", Access::Public, move |this, _| {
            let loc = location_ctor.new_instance(&[Value::Double(1.0), Value::Double(2.0)])?;
            this.expect_object()?.set_field("loc", loc)?;
            Ok(Value::Null)
        })
        .constructor("(I)V", Access::Private, |this, args| {
            this.expect_object()?.set_field("x", args[0].clone())?;
            Ok(Value::Null)
        })
        .method("greet", "()T", Access::Private, |_, _| Ok(Value::str("hi")))
        .method("add", "(II)I", Access::Private, |_, args| {
            Ok(Value::Int(args[0].expect_int()? + args[1].expect_int()?))
        })
        .method("add", "(DD)D", Access::Private, |_, args| {
            Ok(Value::Double(args[0].expect_double()? * args[1].expect_double()?))
        })
        .method("getLocation", "()Lgame.Location;", Access::Public, |this, _| {
            this.expect_object()?.field("loc")
        })
        .method("moveTo", "(Lgame.Location;)V", Access::Public, |this, args| {
            this.expect_object()?.set_field("loc", args[0].clone())?;
            Ok(Value::Null)
        })
        .method("hashCode", "()I", Access::Public, |this, _| {
            Ok(Value::Int(this.expect_object()?.field("x")?.expect_int()? + 1000))
        })
        .method("toString", "()T", Access::Public, |this, _| {
            let x = this.expect_object()?.field("x")?.expect_int()?;
            Ok(Value::str(format!("Entity(x={})", x)))
        })
        .build()
        .unwrap()
}

/// Registry with `game.Entity` and `game.Location`
pub fn world() -> Arc<HostRegistry> {
    let registry = HostRegistry::new();
    let location = location_class();
    let entity = entity_class(&location);
    registry.register_all([location, entity]);
    Arc::new(registry)
}

pub fn location_template() -> Template {
    Template::builder("Location")
        .target(&["game.Location"])
        .method(TemplateMethod::new("getX").returns(TypeRef::Double))
        .method(TemplateMethod::new("getY").returns(TypeRef::Double))
        .method(
            TemplateMethod::new("construct")
                .param(TypeRef::Double)
                .param(TypeRef::Double)
                .returns(TypeRef::proxy("Location")),
        )
        .build()
        .unwrap()
}

pub fn entity_template() -> Template {
    Template::builder("Entity")
        .target(&["game.LivingEntity", "game.Entity"])
        .method(TemplateMethod::new("getX").returns(TypeRef::Int))
        .method(TemplateMethod::new("setX").param(TypeRef::Int))
        .method(TemplateMethod::new("greet").returns(TypeRef::String))
        .method(
            TemplateMethod::new("add")
                .param(TypeRef::Int)
                .param(TypeRef::Int)
                .returns(TypeRef::Int),
        )
        .method(
            TemplateMethod::new("add")
                .param(TypeRef::Double)
                .param(TypeRef::Double)
                .returns(TypeRef::Double),
        )
        .method(TemplateMethod::new("getLocation").returns(TypeRef::proxy("Location")))
        .method(TemplateMethod::new("moveTo").param(TypeRef::proxy("Location")))
        .method(
            TemplateMethod::new("construct")
                .param(TypeRef::Int)
                .returns(TypeRef::proxy("Entity")),
        )
        .build()
        .unwrap()
}

/// Runtime over `registry` with both templates declared
pub fn runtime_with(registry: Arc<HostRegistry>, config: ProxyGenConfig) -> ProxyRuntime {
    let runtime = ProxyRuntime::with_config(registry, config).unwrap();
    runtime.declare(location_template()).unwrap();
    runtime.declare(entity_template()).unwrap();
    runtime
}

pub fn runtime() -> ProxyRuntime {
    runtime_with(world(), ProxyGenConfig::default())
}

/// Config pinned to one target string
pub fn config_for(target: &str) -> ProxyGenConfig {
    let mut config = ProxyGenConfig::default();
    config.codegen.target = target.to_string();
    config
}

pub fn is_unsupported<T: std::fmt::Debug>(result: &Result<T, CallError>) -> bool {
    matches!(result, Err(CallError::Unsupported(_)))
}
