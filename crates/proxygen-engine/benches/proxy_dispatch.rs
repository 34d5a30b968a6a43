use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use proxygen_engine::{
    Access, HostClass, HostRegistry, ProxyGenConfig, ProxyRuntime, Template, TemplateMethod,
    TypeRef, Value,
};

fn registry() -> Arc<HostRegistry> {
    let registry = HostRegistry::new();
    registry.register(
        HostClass::builder("bench.Counter")
            .field_init("count", "I", Access::Public, Value::Int(0))
            .constructor("()V", Access::Public, |_, _| Ok(Value::Null))
            .method("bump", "(I)I", Access::Public, |_, args| Ok(args[0].clone()))
            .method("secret", "(I)I", Access::Private, |_, args| Ok(args[0].clone()))
            .build()
            .unwrap(),
    );
    Arc::new(registry)
}

fn template() -> Template {
    Template::builder("Counter")
        .target(&["bench.Counter"])
        .method(TemplateMethod::new("getCount").returns(TypeRef::Int))
        .method(TemplateMethod::new("bump").param(TypeRef::Int).returns(TypeRef::Int))
        .method(TemplateMethod::new("secret").param(TypeRef::Int).returns(TypeRef::Int))
        .build()
        .unwrap()
}

fn runtime(target: &str) -> ProxyRuntime {
    let mut config = ProxyGenConfig::default();
    config.codegen.target = target.to_string();
    let runtime = ProxyRuntime::with_config(registry(), config).unwrap();
    runtime.declare(template()).unwrap();
    runtime
}

fn bench_generation(c: &mut Criterion) {
    c.bench_function("generate/counter", |b| {
        b.iter(|| {
            let runtime = runtime("auto");
            black_box(runtime.define("Counter").unwrap())
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    for target in ["v1:baseline", "v3:guarded"] {
        let runtime = runtime(target);
        let counter = runtime.proxy("Counter").unwrap().create().unwrap();
        group.bench_with_input(BenchmarkId::new("field", target), &counter, |b, p| {
            b.iter(|| p.invoke("getCount", &[]).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("direct", target), &counter, |b, p| {
            b.iter(|| p.invoke("bump", black_box(&[Value::Int(1)])).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("handle", target), &counter, |b, p| {
            b.iter(|| p.invoke("secret", black_box(&[Value::Int(1)])).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generation, bench_dispatch);
criterion_main!(benches);
