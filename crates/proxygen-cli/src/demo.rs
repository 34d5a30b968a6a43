//! Built-in demo host
//!
//! A small game model: `game.Entity` keeps its greeting and arithmetic
//! private, so the generated proxies need handles for them.

use std::sync::Arc;

use anyhow::Context;
use proxygen_bytecode::FormatVersion;
use proxygen_engine::{
    Access, HostClass, HostRegistry, Template, TemplateMethod, TypeRef, Value,
};

pub fn registry(max_format: FormatVersion) -> anyhow::Result<Arc<HostRegistry>> {
    let location = HostClass::builder("game.Location")
        .field("x", "D", Access::Public)
        .field("y", "D", Access::Public)
        .constructor("(DD)V", Access::Public, |this, args| {
            let obj = this.expect_object()?;
            obj.set_field("x", args[0].clone())?;
            obj.set_field("y", args[1].clone())?;
            Ok(Value::Null)
        })
        .method("toString", "()T", Access::Public, |this, _| {
            let obj = this.expect_object()?;
            Ok(Value::str(format!(
                "({}, {})",
                obj.field("x")?.expect_double()?,
                obj.field("y")?.expect_double()?
            )))
        })
        .build()
        .context("building game.Location")?;

    let origin = location
        .constructors()
        .first()
        .cloned()
        .context("game.Location has no constructor")?;

    let entity = HostClass::builder("game.Entity")
        .field_init("x", "I", Access::Public, Value::Int(7))
        .field("loc", "Lgame.Location;", Access::Private)
        .constructor("()V", Access::Public, move |this, _| {
            let loc = origin.new_instance(&[Value::Double(0.0), Value::Double(0.0)])?;
            this.expect_object()?.set_field("loc", loc)?;
            Ok(Value::Null)
        })
        .method("greet", "()T", Access::Private, |_, _| Ok(Value::str("hi")))
        .method("add", "(II)I", Access::Private, |_, args| {
            Ok(Value::Int(args[0].expect_int()?.wrapping_add(args[1].expect_int()?)))
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
        .build()
        .context("building game.Entity")?;

    let registry = HostRegistry::with_max_format(max_format);
    registry.register_all([location, entity]);
    Ok(Arc::new(registry))
}

pub fn templates() -> anyhow::Result<Vec<Template>> {
    let location = Template::builder("Location")
        .target(&["game.Location"])
        .method(TemplateMethod::new("getX").returns(TypeRef::Double))
        .method(TemplateMethod::new("getY").returns(TypeRef::Double))
        .method(
            TemplateMethod::new("construct")
                .param(TypeRef::Double)
                .param(TypeRef::Double)
                .returns(TypeRef::proxy("Location")),
        )
        .build()?;

    let entity = Template::builder("Entity")
        .target(&["game.Entity"])
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
        .build()?;

    Ok(vec![location, entity])
}
