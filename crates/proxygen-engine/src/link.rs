//! Linking of decoded modules
//!
//! Decodes every function once and binds its direct member references to
//! live host members. Direct references must name public members of public
//! classes; anything else is a generator defect and fails the link. Handle
//! resolutions stay symbolic and run in the initializer.

use std::sync::Arc;

use proxygen_bytecode::{
    decode_function, DecodedInstr, MemberKind, MemberRef, MethodDesc, Module, Opcode, Operands,
    TypeDesc,
};
use rustc_hash::FxHashMap;

use crate::error::LinkError;
use crate::host::{HostClass, HostConstructor, HostField, HostMethod, ReflectionProvider, ResolvedMember};

/// A pre-decoded instruction with resolved operands
///
/// Jump targets are instruction indices.
#[derive(Clone)]
pub enum Instr {
    Nop,
    Pop,
    Dup,
    ConstNull,
    ConstBool(bool),
    ConstInt(i32),
    ConstStr(Arc<str>),
    ConstClass(Arc<HostClass>),
    LoadLocal(u16),
    StoreLocal(u16),
    Jmp(usize),
    JmpIfFalse(usize),
    JmpIfTrue(usize),
    JmpIfNull(usize),
    JmpIfNotNull(usize),
    InvokeVirtual(Arc<HostMethod>),
    InvokeStatic(Arc<HostMethod>),
    NewTarget(Arc<HostConstructor>),
    /// Argument count includes the receiver, if any
    InvokeHandle { argc: usize, returns: bool },
    Return,
    ReturnVoid,
    LoadField(u16),
    LoadStatic(u16),
    StoreStatic(u16),
    GetField(Arc<HostField>),
    PutField(Arc<HostField>),
    GetStatic(Arc<HostField>),
    PutStatic(Arc<HostField>),
    NewArray { elem: TypeDesc, dims: u8 },
    NewArrayDyn(TypeDesc),
    Trap(u16),
    Wrap(String),
    Unwrap(String),
    CheckCast(TypeDesc),
    InstanceOf(TypeDesc),
    RefEq,
    IdentityHash,
    HashCode,
    ToStr,
    ResolveHandle(MemberRef),
    LoadTarget,
    GuardUnbound(Arc<str>),
}

/// A function ready for execution
pub struct LinkedFunction {
    pub name: String,
    pub desc: MethodDesc,
    pub is_static: bool,
    pub is_synthetic: bool,
    pub max_locals: u16,
    pub max_stack: u16,
    pub code: Vec<Instr>,
}

/// Link every function of a verified module
pub fn link_module(
    module: &Module,
    provider: &dyn ReflectionProvider,
) -> Result<Vec<LinkedFunction>, LinkError> {
    let mut linker = Linker {
        module,
        provider,
        classes: FxHashMap::default(),
    };
    module
        .functions
        .iter()
        .map(|func| {
            let decoded = decode_function(&func.code)
                .map_err(|e| LinkError::Malformed(format!("{}: {}", func.name, e)))?;
            let code = linker.link_code(&decoded)?;
            Ok(LinkedFunction {
                name: func.name.clone(),
                desc: func.descriptor.clone(),
                is_static: func.is_static(),
                is_synthetic: func.is_synthetic(),
                max_locals: func.max_locals,
                max_stack: func.max_stack,
                code,
            })
        })
        .collect()
}

struct Linker<'a> {
    module: &'a Module,
    provider: &'a dyn ReflectionProvider,
    classes: FxHashMap<String, Arc<HostClass>>,
}

impl Linker<'_> {
    fn link_code(&mut self, decoded: &[DecodedInstr]) -> Result<Vec<Instr>, LinkError> {
        let index_of: FxHashMap<usize, usize> = decoded
            .iter()
            .enumerate()
            .map(|(i, instr)| (instr.offset, i))
            .collect();
        let jump = |instr: &DecodedInstr| -> Result<usize, LinkError> {
            instr
                .jump_target()
                .and_then(|t| usize::try_from(t).ok())
                .and_then(|t| index_of.get(&t).copied())
                .ok_or_else(|| LinkError::Malformed(format!("bad jump at offset {}", instr.offset)))
        };

        let mut code = Vec::with_capacity(decoded.len());
        for instr in decoded {
            let linked = match instr.opcode {
                Opcode::Nop => Instr::Nop,
                Opcode::Pop => Instr::Pop,
                Opcode::Dup => Instr::Dup,
                Opcode::ConstNull => Instr::ConstNull,
                Opcode::ConstTrue => Instr::ConstBool(true),
                Opcode::ConstFalse => Instr::ConstBool(false),
                Opcode::ConstI32 => match instr.operands {
                    Operands::I32(v) => Instr::ConstInt(v),
                    _ => return Err(self.malformed(instr)),
                },
                Opcode::ConstStr => Instr::ConstStr(self.string(instr)?),
                Opcode::ConstClass => {
                    let ty = self.ty(instr)?;
                    let name = ty
                        .class_name()
                        .ok_or_else(|| LinkError::Malformed(format!("class constant {}", ty)))?;
                    Instr::ConstClass(self.class(name)?)
                }
                Opcode::LoadLocal => Instr::LoadLocal(instr.u16_operand()),
                Opcode::StoreLocal => Instr::StoreLocal(instr.u16_operand()),
                Opcode::Jmp => Instr::Jmp(jump(instr)?),
                Opcode::JmpIfFalse => Instr::JmpIfFalse(jump(instr)?),
                Opcode::JmpIfTrue => Instr::JmpIfTrue(jump(instr)?),
                Opcode::JmpIfNull => Instr::JmpIfNull(jump(instr)?),
                Opcode::JmpIfNotNull => Instr::JmpIfNotNull(jump(instr)?),
                Opcode::InvokeVirtual | Opcode::InvokeStatic => match self.direct(instr)? {
                    ResolvedMember::Method(m) if m.is_static() => Instr::InvokeStatic(m),
                    ResolvedMember::Method(m) => Instr::InvokeVirtual(m),
                    other => return Err(LinkError::NoSuchMember(other.member_ref().to_string())),
                },
                Opcode::NewTarget => match self.direct(instr)? {
                    ResolvedMember::Constructor(c) => Instr::NewTarget(c),
                    other => return Err(LinkError::NoSuchMember(other.member_ref().to_string())),
                },
                Opcode::GetTargetField
                | Opcode::PutTargetField
                | Opcode::GetStaticTarget
                | Opcode::PutStaticTarget => {
                    let field = match self.direct(instr)? {
                        ResolvedMember::Field(f) => f,
                        other => {
                            return Err(LinkError::NoSuchMember(other.member_ref().to_string()))
                        }
                    };
                    match instr.opcode {
                        Opcode::GetTargetField => Instr::GetField(field),
                        Opcode::PutTargetField => Instr::PutField(field),
                        Opcode::GetStaticTarget => Instr::GetStatic(field),
                        _ => Instr::PutStatic(field),
                    }
                }
                Opcode::InvokeHandle => {
                    let desc = self
                        .module
                        .constants
                        .get_descriptor(instr.index_operand())
                        .ok_or_else(|| self.malformed(instr))?;
                    Instr::InvokeHandle {
                        argc: desc.params.len(),
                        returns: desc.ret != TypeDesc::Void,
                    }
                }
                Opcode::Return => Instr::Return,
                Opcode::ReturnVoid => Instr::ReturnVoid,
                Opcode::LoadField => Instr::LoadField(instr.u16_operand()),
                Opcode::LoadStatic => Instr::LoadStatic(instr.u16_operand()),
                Opcode::StoreStatic => Instr::StoreStatic(instr.u16_operand()),
                Opcode::NewArray => match instr.operands {
                    Operands::Array { type_index, dims } => Instr::NewArray {
                        elem: self.type_at(type_index, instr)?,
                        dims,
                    },
                    _ => return Err(self.malformed(instr)),
                },
                Opcode::NewArrayDyn => Instr::NewArrayDyn(self.ty(instr)?),
                Opcode::Trap => Instr::Trap(instr.u16_operand()),
                Opcode::Wrap | Opcode::Unwrap => {
                    let ty = self.ty(instr)?;
                    let name = ty
                        .class_name()
                        .ok_or_else(|| LinkError::Malformed(format!("proxy type {}", ty)))?
                        .to_string();
                    if instr.opcode == Opcode::Wrap {
                        Instr::Wrap(name)
                    } else {
                        Instr::Unwrap(name)
                    }
                }
                Opcode::CheckCast => Instr::CheckCast(self.ty(instr)?),
                Opcode::InstanceOf => Instr::InstanceOf(self.ty(instr)?),
                Opcode::RefEq => Instr::RefEq,
                Opcode::IdentityHash => Instr::IdentityHash,
                Opcode::HashCode => Instr::HashCode,
                Opcode::ToStr => Instr::ToStr,
                Opcode::ResolveHandle => Instr::ResolveHandle(self.member(instr)?.clone()),
                Opcode::LoadTarget => Instr::LoadTarget,
                Opcode::GuardUnbound => Instr::GuardUnbound(self.string(instr)?),
            };
            code.push(linked);
        }
        Ok(code)
    }

    fn malformed(&self, instr: &DecodedInstr) -> LinkError {
        LinkError::Malformed(format!(
            "{} at offset {} has a bad operand",
            instr.opcode.name(),
            instr.offset
        ))
    }

    fn string(&self, instr: &DecodedInstr) -> Result<Arc<str>, LinkError> {
        self.module
            .constants
            .get_string(instr.index_operand())
            .map(Arc::from)
            .ok_or_else(|| self.malformed(instr))
    }

    fn ty(&self, instr: &DecodedInstr) -> Result<TypeDesc, LinkError> {
        self.type_at(instr.index_operand(), instr)
    }

    fn type_at(&self, index: u32, instr: &DecodedInstr) -> Result<TypeDesc, LinkError> {
        self.module
            .constants
            .get_type(index)
            .cloned()
            .ok_or_else(|| self.malformed(instr))
    }

    fn member(&self, instr: &DecodedInstr) -> Result<&MemberRef, LinkError> {
        self.module
            .constants
            .get_member(instr.index_operand())
            .ok_or_else(|| self.malformed(instr))
    }

    fn class(&mut self, name: &str) -> Result<Arc<HostClass>, LinkError> {
        if let Some(class) = self.classes.get(name) {
            return Ok(Arc::clone(class));
        }
        let class = self
            .provider
            .find_class(name)
            .ok_or_else(|| LinkError::NoSuchClass(name.to_string()))?;
        self.classes.insert(name.to_string(), Arc::clone(&class));
        Ok(class)
    }

    /// Bind a direct member reference, enforcing public access
    fn direct(&mut self, instr: &DecodedInstr) -> Result<ResolvedMember, LinkError> {
        let member = self.member(instr)?.clone();
        let class = self.class(&member.owner)?;
        let resolved = class
            .declared_member(&member)
            .ok_or_else(|| LinkError::NoSuchMember(member.to_string()))?;
        if !class.is_public() || !resolved.access().is_public() {
            return Err(LinkError::IllegalAccess(member.to_string()));
        }
        let expected_static = matches!(member.kind, MemberKind::StaticMethod | MemberKind::StaticField);
        if resolved.is_static() != expected_static {
            return Err(LinkError::NoSuchMember(member.to_string()));
        }
        Ok(resolved)
    }
}
