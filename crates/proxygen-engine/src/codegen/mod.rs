//! Code generation
//!
//! Turns a template and its mapping table into a bytecode [`Module`] for the
//! generated type: one forwarding body per template method, the structural
//! methods every proxy carries, and a one-time initializer resolving handles.

mod emit;

use proxygen_bytecode::{
    flags, function_flags, ClassDef, FeatureLevel, FieldDef, Function, MethodDesc, Module,
    TypeDesc, INITIALIZER_NAME,
};

use crate::resolve::{MappingTable, OverloadTable};
use crate::template::Template;
use crate::version::TargetSelection;

pub use emit::BodyEmitter;

/// Name of the single instance field
pub const INSTANCE_FIELD: &str = "instance";

/// Structural method names and descriptors of a generated type
pub mod structural {
    pub const INSTANCE: &str = "instance";
    pub const BIND_TO: &str = "bindTo";
    pub const IS_INSTANCE: &str = "isInstance";
    pub const EQUALS: &str = "equals";
    pub const HASH_CODE: &str = "hashCode";
    pub const TO_STRING: &str = "toString";
    pub const NEW_ARRAY: &str = "newArray";
    pub const GET_TARGET_CLASS: &str = "getTargetClass";
    pub const CREATE: &str = "create";
}

/// Message of the trap raised when a constructor runs on a bound proxy
pub fn bound_constructor_message(type_name: &str, method: &str) -> String {
    format!("{}.{} requires an unbound proxy", type_name, method)
}

/// Producer string stored in module metadata
pub fn generator_name() -> String {
    format!("proxygen {}", env!("CARGO_PKG_VERSION"))
}

/// Generate the module of one template
pub fn generate(
    template: &Template,
    table: &MappingTable,
    overloads: &OverloadTable,
    selection: &TargetSelection,
) -> Module {
    let type_name = template.id().proxy_type_name();
    let target = table.target.name().to_string();

    let class = ClassDef {
        name: type_name.clone(),
        template: template.id().to_string(),
        target: target.clone(),
        fields: vec![FieldDef::new(INSTANCE_FIELD, TypeDesc::object(target.clone()))],
        statics: overloads
            .slots()
            .iter()
            .map(|slot| FieldDef::new(slot.name.clone(), TypeDesc::Handle))
            .collect(),
        annotations: template.copied_annotations(),
    };
    let mut module = Module::new(class, selection.format, selection.level);
    module.metadata.generator = generator_name();

    let all: Vec<_> = table.all().collect();

    // Template methods in overload-group order.
    for positions in overloads.groups().values() {
        for &pos in positions {
            let mapping = all[pos];
            let mut e = BodyEmitter::new(&mut module, selection.level);
            e.forward(mapping, overloads.slot_of(pos));
            let annotations = mapping
                .method_index
                .map(|i| template.methods()[i].copied_annotations())
                .unwrap_or_default();
            let function = e.finish(&mapping.name, mapping.synthetic_desc.clone(), 0, annotations);
            module.functions.push(function);
        }
    }

    let create_slot = table
        .create
        .as_ref()
        .and_then(|_| overloads.slot_of(table.mappings.len()));
    emit_structural(&mut module, selection.level, table, create_slot);

    if !overloads.slots().is_empty() {
        let mut e = BodyEmitter::new(&mut module, selection.level);
        for (index, slot) in overloads.slots().iter().enumerate() {
            e.resolve_handle(slot.member.clone(), index as u16);
        }
        e.return_void();
        let init = e.finish(
            INITIALIZER_NAME,
            MethodDesc::new(vec![], TypeDesc::Void),
            function_flags::STATIC | function_flags::SYNTHETIC,
            vec![],
        );
        module.functions.push(init);
        module.flags |= flags::HAS_INITIALIZER | flags::USES_HANDLES;
    }

    log::debug!(
        "generated {} ({} functions, {} handle slots, format {}, level {})",
        type_name,
        module.functions.len(),
        overloads.slots().len(),
        selection.format,
        selection.level
    );
    module
}

fn push_structural<F>(module: &mut Module, level: FeatureLevel, name: &str, desc: MethodDesc, body: F)
where
    F: FnOnce(&mut BodyEmitter<'_>),
{
    let mut e = BodyEmitter::new(module, level);
    body(&mut e);
    let function: Function = e.finish(name, desc, function_flags::SYNTHETIC, vec![]);
    module.functions.push(function);
}

fn emit_structural(
    module: &mut Module,
    level: FeatureLevel,
    table: &MappingTable,
    create_slot: Option<usize>,
) {
    let self_ty = module.class.self_type();
    let target_ty = module.class.fields[0].ty.clone();

    push_structural(module, level, structural::INSTANCE, MethodDesc::new(vec![], TypeDesc::Any), |e| {
        e.load_target();
        e.ret();
    });
    push_structural(
        module,
        level,
        structural::BIND_TO,
        MethodDesc::new(vec![TypeDesc::Any], self_ty.clone()),
        |e| e.bind_to(structural::BIND_TO),
    );
    push_structural(
        module,
        level,
        structural::IS_INSTANCE,
        MethodDesc::new(vec![TypeDesc::Any], TypeDesc::Boolean),
        |e| e.is_instance(),
    );
    push_structural(
        module,
        level,
        structural::EQUALS,
        MethodDesc::new(vec![TypeDesc::Any], TypeDesc::Boolean),
        |e| e.equals(),
    );
    push_structural(module, level, structural::HASH_CODE, MethodDesc::new(vec![], TypeDesc::Int), |e| {
        e.hash_code()
    });
    push_structural(module, level, structural::TO_STRING, MethodDesc::new(vec![], TypeDesc::Str), |e| {
        e.to_str()
    });
    for dims in 1u8..=3 {
        let mut ret = target_ty.clone();
        for _ in 0..dims {
            ret = TypeDesc::array_of(ret);
        }
        push_structural(
            module,
            level,
            structural::NEW_ARRAY,
            MethodDesc::new(vec![TypeDesc::Int; dims as usize], ret),
            |e| e.new_array(dims),
        );
    }
    push_structural(
        module,
        level,
        structural::NEW_ARRAY,
        MethodDesc::new(vec![TypeDesc::array_of(TypeDesc::Int)], TypeDesc::Any),
        |e| e.new_array_dyn(),
    );
    push_structural(
        module,
        level,
        structural::GET_TARGET_CLASS,
        MethodDesc::new(vec![], TypeDesc::ClassObj),
        |e| e.target_class(),
    );
    push_structural(module, level, structural::CREATE, MethodDesc::new(vec![], self_ty), |e| {
        match &table.create {
            Some(mapping) => e.forward(mapping, create_slot),
            None => e.no_default_constructor(),
        }
    });
}
