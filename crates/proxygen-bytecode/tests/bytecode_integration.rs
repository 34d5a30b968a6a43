//! Integration tests for the proxy module format and verifier

use proxygen_bytecode::{
    disassemble_module, flags, function_flags, verify_module, BytecodeWriter, ClassDef,
    FeatureLevel, FieldDef, FormatVersion, Function, MemberKind, MemberRef, MethodDesc, Module,
    ModuleError, Opcode, TypeDesc, TypeOracle, VerifyContext, VerifyError, INITIALIZER_NAME,
    TRAP_UNSUPPORTED,
};

struct Host;

impl TypeOracle for Host {
    fn knows_class(&self, name: &str) -> bool {
        matches!(name, "game.Counter" | "game.Chunk")
    }

    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        sub == sup
    }
}

fn counter_class() -> ClassDef {
    ClassDef {
        name: "Counter$Proxy".to_string(),
        template: "Counter".to_string(),
        target: "game.Counter".to_string(),
        fields: vec![FieldDef::new("instance", TypeDesc::object("game.Counter"))],
        statics: vec![FieldDef::new("bump", TypeDesc::Handle)],
        annotations: vec![],
    }
}

/// A module with a handle-dispatched `bump(I)I`, a guarded constructor and
/// the initializer that fills the handle slot.
fn counter_module(version: FormatVersion, level: FeatureLevel) -> Module {
    let mut m = Module::new(counter_class(), version, level);
    let bump = m.constants.add_member(MemberRef {
        owner: "game.Counter".to_string(),
        name: "bump".to_string(),
        desc: MethodDesc::new(vec![TypeDesc::Int], TypeDesc::Int),
        kind: MemberKind::Method,
    });
    let ctor = m.constants.add_member(MemberRef {
        owner: "game.Counter".to_string(),
        name: "<init>".to_string(),
        desc: MethodDesc::new(vec![], TypeDesc::object("game.Counter")),
        kind: MemberKind::Constructor,
    });
    let call_site = m.constants.add_descriptor(MethodDesc::new(
        vec![TypeDesc::object("game.Counter"), TypeDesc::Int],
        TypeDesc::Int,
    ));
    let self_ty = m.constants.add_type(TypeDesc::object("Counter$Proxy"));
    let msg = m.constants.add_string("constructor on bound proxy");

    // <clinit>
    let mut w = BytecodeWriter::new();
    w.emit_op_u32(Opcode::ResolveHandle, bump);
    w.emit_op_u16(Opcode::StoreStatic, 0);
    w.emit_opcode(Opcode::ReturnVoid);
    m.functions.push(Function {
        name: INITIALIZER_NAME.to_string(),
        descriptor: MethodDesc::new(vec![], TypeDesc::Void),
        flags: function_flags::STATIC,
        max_stack: 1,
        max_locals: 0,
        code: w.into_bytes(),
        annotations: vec![],
    });
    m.flags |= flags::HAS_INITIALIZER | flags::USES_HANDLES;

    // bump(I)I through the handle
    let mut w = BytecodeWriter::new();
    w.emit_op_u16(Opcode::LoadStatic, 0);
    w.emit_load_local(0);
    w.emit_op_u16(Opcode::LoadField, 0);
    w.emit_load_local(1);
    w.emit_op_u32(Opcode::InvokeHandle, call_site);
    w.emit_opcode(Opcode::Return);
    m.functions.push(Function {
        name: "bump".to_string(),
        descriptor: MethodDesc::new(vec![TypeDesc::Int], TypeDesc::Int),
        flags: 0,
        max_stack: 3,
        max_locals: 2,
        code: w.into_bytes(),
        annotations: vec![],
    });

    // construct()LCounter$Proxy; guarded against bound receivers
    let mut w = BytecodeWriter::new();
    let unbound = w.new_label();
    w.emit_load_local(0);
    w.emit_op_u16(Opcode::LoadField, 0);
    w.emit_jump(Opcode::JmpIfNull, unbound);
    w.emit_op_u32(Opcode::ConstStr, msg);
    w.emit_op_u16(Opcode::Trap, TRAP_UNSUPPORTED);
    w.bind_label(unbound);
    w.emit_op_u32(Opcode::NewTarget, ctor);
    w.emit_op_u32(Opcode::Wrap, self_ty);
    w.emit_opcode(Opcode::Return);
    m.functions.push(Function {
        name: "construct".to_string(),
        descriptor: MethodDesc::new(vec![], TypeDesc::object("Counter$Proxy")),
        flags: 0,
        max_stack: 1,
        max_locals: 1,
        code: w.into_bytes(),
        annotations: vec![],
    });
    m.metadata.generator = "integration".to_string();
    m
}

#[test]
fn test_encode_decode_verify() {
    let module = counter_module(FormatVersion::V1, FeatureLevel::Baseline);
    let bytes = module.encode();
    let decoded = Module::decode(&bytes).expect("decode");

    assert_eq!(decoded.functions.len(), 3);
    assert_eq!(decoded.initializer(), Some(0));
    assert_eq!(decoded.constants.members.len(), 2);

    let ctx = VerifyContext::new(&Host).with_siblings(["Counter$Proxy"]);
    verify_module(&decoded, &ctx).expect("verify");
}

#[test]
fn test_self_type_must_be_known_or_sibling() {
    let module = counter_module(FormatVersion::V1, FeatureLevel::Baseline);
    let ctx = VerifyContext::new(&Host);
    let err = verify_module(&module, &ctx).unwrap_err();
    match err {
        VerifyError::InFunction { function, source } => {
            assert!(function.starts_with("construct"));
            assert!(matches!(*source, VerifyError::UnknownClass { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_truncated_module() {
    let bytes = counter_module(FormatVersion::V1, FeatureLevel::Baseline).encode();
    let err = Module::decode(&bytes[..bytes.len() / 2]).unwrap_err();
    // Truncation changes the payload, so the checksum catches it first.
    assert!(matches!(err, ModuleError::ChecksumMismatch { .. }));
}

#[test]
fn test_handle_call_site_type_checked() {
    let mut module = counter_module(FormatVersion::V1, FeatureLevel::Baseline);
    // Swap the receiver and argument order of bump's call site.
    module.constants.descriptors[0] = MethodDesc::new(
        vec![TypeDesc::Int, TypeDesc::object("game.Counter")],
        TypeDesc::Int,
    );
    let ctx = VerifyContext::new(&Host).with_siblings(["Counter$Proxy"]);
    assert!(verify_module(&module, &ctx).is_err());
}

#[test]
fn test_disassembly_lists_every_function() {
    let module = counter_module(FormatVersion::V3, FeatureLevel::Guarded);
    let text = disassemble_module(&module);
    assert!(text.contains("static fn <clinit>()V"));
    assert!(text.contains("fn bump(I)I"));
    assert!(text.contains("INVOKE_HANDLE #0 (Lgame.Counter;I)I"));
    assert!(text.contains("NEW_TARGET #1 game.Counter.<init>()Lgame.Counter;"));
    assert!(text.contains("TRAP 1"));
}
