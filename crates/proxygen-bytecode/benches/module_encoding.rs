use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use proxygen_bytecode::{
    verify_module, BytecodeWriter, ClassDef, FeatureLevel, FieldDef, FormatVersion, Function,
    MemberKind, MemberRef, MethodDesc, Module, NoClasses, Opcode, TypeDesc, VerifyContext,
};

fn build_module(methods: usize) -> Module {
    let class = ClassDef {
        name: "Bench$Proxy".to_string(),
        template: "Bench".to_string(),
        target: "Bench".to_string(),
        fields: vec![FieldDef::new("instance", TypeDesc::object("Bench$Proxy"))],
        statics: vec![],
        annotations: vec![],
    };
    let mut module = Module::new(class, FormatVersion::V1, FeatureLevel::Baseline);
    for i in 0..methods {
        let member = module.constants.add_member(MemberRef {
            owner: "Bench$Proxy".to_string(),
            name: format!("m{}", i),
            desc: MethodDesc::new(vec![TypeDesc::Int, TypeDesc::Double], TypeDesc::Long),
            kind: MemberKind::Method,
        });
        let mut w = BytecodeWriter::new();
        w.emit_load_local(0);
        w.emit_op_u16(Opcode::LoadField, 0);
        w.emit_load_local(1);
        w.emit_load_local(2);
        w.emit_op_u32(Opcode::InvokeVirtual, member);
        w.emit_opcode(Opcode::Return);
        module.functions.push(Function {
            name: format!("m{}", i),
            descriptor: MethodDesc::new(vec![TypeDesc::Int, TypeDesc::Double], TypeDesc::Long),
            flags: 0,
            max_stack: 4,
            max_locals: 4,
            code: w.into_bytes(),
            annotations: vec![],
        });
    }
    module
}

fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("module");
    for methods in [4usize, 32, 128] {
        let module = build_module(methods);
        let bytes = module.encode();
        group.bench_with_input(BenchmarkId::new("encode", methods), &module, |b, m| {
            b.iter(|| black_box(m).encode())
        });
        group.bench_with_input(BenchmarkId::new("decode", methods), &bytes, |b, bytes| {
            b.iter(|| Module::decode(black_box(bytes)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("verify", methods), &module, |b, m| {
            let ctx = VerifyContext::new(&NoClasses).with_siblings(["Bench$Proxy"]);
            b.iter(|| verify_module(black_box(m), &ctx).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
