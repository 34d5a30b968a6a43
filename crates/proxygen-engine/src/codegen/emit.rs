//! Body emission for generated functions

use proxygen_bytecode::{
    function_flags, Annotation, BytecodeWriter, FeatureLevel, Function, MemberRef, MethodDesc,
    Module, Opcode, TypeDesc, TRAP_UNSUPPORTED,
};

use super::bound_constructor_message;
use crate::resolve::{Conversion, MappingKind, MemberMapping};

/// Emits one function body into a module's constant pool and code buffer
pub struct BodyEmitter<'m> {
    module: &'m mut Module,
    level: FeatureLevel,
    w: BytecodeWriter,
    max_stack: u16,
}

impl<'m> BodyEmitter<'m> {
    pub fn new(module: &'m mut Module, level: FeatureLevel) -> Self {
        Self {
            module,
            level,
            w: BytecodeWriter::new(),
            max_stack: 0,
        }
    }

    fn need(&mut self, slots: u16) {
        self.max_stack = self.max_stack.max(slots);
    }

    fn self_type(&self) -> TypeDesc {
        self.module.class.self_type()
    }

    fn target_type(&self) -> TypeDesc {
        TypeDesc::object(self.module.class.target.clone())
    }

    fn emit_typed(&mut self, opcode: Opcode, ty: TypeDesc) {
        let index = self.module.constants.add_type(ty);
        self.w.emit_op_u32(opcode, index);
    }

    fn proxy_type(id: &crate::types::TemplateId) -> TypeDesc {
        TypeDesc::object(id.proxy_type_name())
    }

    /// Push the wrapped target instance of the receiver
    pub fn load_target(&mut self) {
        if self.level >= FeatureLevel::FusedTarget {
            self.w.emit_opcode(Opcode::LoadTarget);
        } else {
            self.w.emit_load_local(0);
            self.w.emit_op_u16(Opcode::LoadField, 0);
        }
        self.need(1);
    }

    pub fn ret(&mut self) {
        self.w.emit_opcode(Opcode::Return);
    }

    pub fn return_void(&mut self) {
        self.w.emit_opcode(Opcode::ReturnVoid);
    }

    /// Trap with "unsupported operation" unless the receiver is unbound
    fn guard_unbound(&mut self, method: &str) {
        let message = bound_constructor_message(&self.module.class.name, method);
        let message = self.module.constants.add_string(message);
        if self.level >= FeatureLevel::Guarded {
            self.w.emit_op_u32(Opcode::GuardUnbound, message);
        } else {
            let unbound = self.w.new_label();
            self.load_target();
            self.w.emit_jump(Opcode::JmpIfNull, unbound);
            self.w.emit_op_u32(Opcode::ConstStr, message);
            self.w.emit_op_u16(Opcode::Trap, TRAP_UNSUPPORTED);
            self.w.bind_label(unbound);
        }
        self.need(1);
    }

    /// Forwarding body of one mapping
    pub fn forward(&mut self, mapping: &MemberMapping, slot: Option<usize>) {
        let handle_slot = if mapping.indirect { slot } else { None };
        if mapping.kind == MappingKind::Constructor {
            self.guard_unbound(&mapping.name);
        }

        let mut depth = 0u16;
        if let Some(slot) = handle_slot {
            self.w.emit_op_u16(Opcode::LoadStatic, slot as u16);
            depth += 1;
        }
        if !mapping.is_static && mapping.kind != MappingKind::Constructor {
            self.load_target();
            depth += 1;
        }

        let mut local = 1u16;
        for bridge in &mapping.params {
            self.w.emit_load_local(local);
            local += bridge.synthetic.slots();
            match &bridge.conversion {
                Conversion::Unwrap(id) => {
                    self.emit_typed(Opcode::Unwrap, Self::proxy_type(id));
                    if bridge.real != TypeDesc::Any {
                        self.emit_typed(Opcode::CheckCast, bridge.real.clone());
                    }
                }
                Conversion::Cast => self.emit_typed(Opcode::CheckCast, bridge.real.clone()),
                _ => {}
            }
            depth += bridge.real.slots();
        }

        match handle_slot {
            Some(_) => {
                let desc = mapping.handle_desc(&self.module.class.target);
                let index = self.module.constants.add_descriptor(desc);
                self.w.emit_op_u32(Opcode::InvokeHandle, index);
            }
            None => {
                let opcode = match (mapping.kind, mapping.is_static) {
                    (MappingKind::Method, false) => Opcode::InvokeVirtual,
                    (MappingKind::Method, true) => Opcode::InvokeStatic,
                    (MappingKind::FieldGetter, false) => Opcode::GetTargetField,
                    (MappingKind::FieldGetter, true) => Opcode::GetStaticTarget,
                    (MappingKind::FieldSetter, false) => Opcode::PutTargetField,
                    (MappingKind::FieldSetter, true) => Opcode::PutStaticTarget,
                    (MappingKind::Constructor, _) => Opcode::NewTarget,
                };
                let index = self.module.constants.add_member(mapping.member.member_ref());
                self.w.emit_op_u32(opcode, index);
            }
        }

        let ret = &mapping.ret;
        self.need(depth.max(ret.real.slots()).max(ret.synthetic.slots()).max(1));
        match &ret.conversion {
            Conversion::Wrap(id) => {
                self.emit_typed(Opcode::Wrap, Self::proxy_type(id));
                self.ret();
            }
            Conversion::Cast => {
                self.emit_typed(Opcode::CheckCast, ret.synthetic.to_desc());
                self.ret();
            }
            Conversion::Discard => {
                self.w.emit_opcode(Opcode::Pop);
                self.return_void();
            }
            Conversion::Identity | Conversion::Unwrap(_) => {
                if ret.real == TypeDesc::Void {
                    self.return_void();
                } else {
                    self.ret();
                }
            }
        }
    }

    /// `<clinit>` step: resolve one handle into its static slot
    pub fn resolve_handle(&mut self, member: MemberRef, slot: u16) {
        let index = self.module.constants.add_member(member);
        self.w.emit_op_u32(Opcode::ResolveHandle, index);
        self.w.emit_op_u16(Opcode::StoreStatic, slot);
        self.need(1);
    }

    pub fn bind_to(&mut self, method: &str) {
        self.guard_unbound(method);
        self.w.emit_load_local(1);
        self.emit_typed(Opcode::CheckCast, self.target_type());
        self.emit_typed(Opcode::Wrap, self.self_type());
        self.ret();
    }

    pub fn is_instance(&mut self) {
        self.w.emit_load_local(1);
        self.emit_typed(Opcode::InstanceOf, self.target_type());
        self.ret();
        self.need(1);
    }

    /// Bound: same raw instance, given as a proxy of this type or raw.
    /// Unbound: proxy identity.
    pub fn equals(&mut self) {
        let unbound = self.w.new_label();
        let raw = self.w.new_label();

        self.load_target();
        self.w.emit_jump(Opcode::JmpIfNull, unbound);
        self.w.emit_load_local(1);
        self.emit_typed(Opcode::InstanceOf, self.self_type());
        self.w.emit_jump(Opcode::JmpIfFalse, raw);

        self.load_target();
        self.w.emit_load_local(1);
        self.emit_typed(Opcode::CheckCast, self.self_type());
        self.emit_typed(Opcode::Unwrap, self.self_type());
        self.w.emit_opcode(Opcode::RefEq);
        self.ret();

        self.w.bind_label(raw);
        self.load_target();
        self.w.emit_load_local(1);
        self.w.emit_opcode(Opcode::RefEq);
        self.ret();

        self.w.bind_label(unbound);
        self.w.emit_load_local(0);
        self.w.emit_load_local(1);
        self.w.emit_opcode(Opcode::RefEq);
        self.ret();
        self.need(2);
    }

    /// Apply `bound` to the target when bound, `unbound` to the proxy otherwise
    fn delegate_or_identity(&mut self, bound: Opcode, unbound: Opcode) {
        let is_unbound = self.w.new_label();
        self.load_target();
        self.w.emit_opcode(Opcode::Dup);
        self.w.emit_jump(Opcode::JmpIfNull, is_unbound);
        self.w.emit_opcode(bound);
        self.ret();

        self.w.bind_label(is_unbound);
        self.w.emit_opcode(Opcode::Pop);
        self.w.emit_load_local(0);
        self.w.emit_opcode(unbound);
        self.ret();
        self.need(2);
    }

    pub fn hash_code(&mut self) {
        self.delegate_or_identity(Opcode::HashCode, Opcode::IdentityHash);
    }

    pub fn to_str(&mut self) {
        self.delegate_or_identity(Opcode::ToStr, Opcode::ToStr);
    }

    pub fn new_array(&mut self, dims: u8) {
        for local in 1..=dims as u16 {
            self.w.emit_load_local(local);
        }
        let elem = self.module.constants.add_type(self.target_type());
        self.w.emit_new_array(elem, dims);
        self.ret();
        self.need(dims as u16);
    }

    pub fn new_array_dyn(&mut self) {
        self.w.emit_load_local(1);
        self.emit_typed(Opcode::NewArrayDyn, self.target_type());
        self.ret();
        self.need(1);
    }

    pub fn target_class(&mut self) {
        self.emit_typed(Opcode::ConstClass, self.target_type());
        self.ret();
        self.need(1);
    }

    /// `create()` body for targets without a no-argument constructor
    pub fn no_default_constructor(&mut self) {
        let message = format!("{} has no no-argument constructor", self.module.class.target);
        let message = self.module.constants.add_string(message);
        self.w.emit_op_u32(Opcode::ConstStr, message);
        self.w.emit_op_u16(Opcode::Trap, TRAP_UNSUPPORTED);
        self.need(1);
    }

    /// Close the body into a function
    pub fn finish(
        self,
        name: &str,
        descriptor: MethodDesc,
        flags: u8,
        annotations: Vec<Annotation>,
    ) -> Function {
        let receiver = if flags & function_flags::STATIC != 0 { 0 } else { 1 };
        Function {
            name: name.to_string(),
            max_locals: receiver + descriptor.param_slots(),
            descriptor,
            flags,
            max_stack: self.max_stack,
            code: self.w.into_bytes(),
            annotations,
        }
    }
}
