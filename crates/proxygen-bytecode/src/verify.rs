//! Bytecode verification
//!
//! A typed dataflow pass over every function of a decoded module. Each
//! instruction is checked for format availability, operand validity and
//! type-correct stack effects; merge points must agree on stack shape.
//!
//! Class relationships are answered by a [`TypeOracle`]. Names listed as
//! siblings in the [`VerifyContext`] are accepted without the oracle knowing
//! them, so mutually referencing proxy types can be verified as one batch
//! before any of them is defined.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::constants::{MemberKind, MemberRef};
use crate::decoder::{decode_function, DecodedInstr, Operands};
use crate::descriptor::TypeDesc;
use crate::encoder::DecodeError;
use crate::module::{FormatVersion, Function, Module};
use crate::opcode::Opcode;

/// Bytecode verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Opcode newer than the module's format version
    #[error("{opcode} at offset {offset} requires format {required}, module is {version}")]
    OpcodeNotInFormat {
        opcode: &'static str,
        offset: usize,
        required: FormatVersion,
        version: FormatVersion,
    },

    /// Stack underflow
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(usize),

    /// Stack overflow
    #[error("Stack overflow at offset {offset} (depth {depth}, max_stack {max})")]
    StackOverflow { offset: usize, depth: u16, max: u16 },

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget { target: i64, offset: usize },

    /// Invalid constant pool reference
    #[error("Invalid {pool} constant reference: index {index} at offset {offset}")]
    InvalidConstantRef {
        pool: &'static str,
        index: u32,
        offset: usize,
    },

    /// Invalid local variable reference
    #[error("Invalid local variable reference: index {index} (max {max}) at offset {offset}")]
    InvalidLocalRef { index: u16, max: u16, offset: usize },

    /// Read of a local that is not definitely assigned
    #[error("Local {index} read before assignment at offset {offset}")]
    UninitializedLocal { index: u16, offset: usize },

    /// Invalid field or static slot reference
    #[error("Invalid {kind} reference {index} at offset {offset}")]
    InvalidSlotRef {
        kind: &'static str,
        index: u16,
        offset: usize,
    },

    /// A value is not assignable where it is used
    #[error("Type mismatch at offset {offset}: expected {expected}, found {found}")]
    TypeMismatch {
        offset: usize,
        expected: String,
        found: String,
    },

    /// Member reference used with the wrong instruction
    #[error("Member {member} is not a {expected} (offset {offset})")]
    WrongMemberKind {
        member: String,
        expected: &'static str,
        offset: usize,
    },

    /// Class name neither known to the oracle nor a batch sibling
    #[error("Unknown class {name} at offset {offset}")]
    UnknownClass { name: String, offset: usize },

    /// Inconsistent stack shape where control flow merges
    #[error("Inconsistent stack at merge point {0}")]
    StackMismatch(usize),

    /// Ill-formed function frame or operand
    #[error("Bad frame: {0}")]
    BadFrame(String),

    /// Execution falls off end
    #[error("Execution falls off end of function at offset {0}")]
    FallOffEnd(usize),

    /// Module validation error
    #[error("Module validation error: {0}")]
    ModuleValidation(String),

    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Error inside a specific function
    #[error("in {function}: {source}")]
    InFunction {
        function: String,
        #[source]
        source: Box<VerifyError>,
    },
}

/// Answers class questions for the verifier
pub trait TypeOracle {
    /// Whether a class of this name exists
    fn knows_class(&self, name: &str) -> bool;

    /// Whether `sub` is `sup` or inherits from it
    fn is_subclass(&self, sub: &str, sup: &str) -> bool;
}

/// Oracle that knows no classes at all
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClasses;

impl TypeOracle for NoClasses {
    fn knows_class(&self, _name: &str) -> bool {
        false
    }

    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        sub == sup
    }
}

/// Verification environment shared by all modules of one batch
pub struct VerifyContext<'a> {
    oracle: &'a dyn TypeOracle,
    siblings: FxHashSet<String>,
}

impl<'a> VerifyContext<'a> {
    pub fn new(oracle: &'a dyn TypeOracle) -> Self {
        Self {
            oracle,
            siblings: FxHashSet::default(),
        }
    }

    /// Tolerate these not-yet-defined type names as forward references
    pub fn with_siblings<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.siblings.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_sibling(&self, name: &str) -> bool {
        self.siblings.contains(name)
    }

    fn check_class(&self, name: &str, offset: usize) -> Result<(), VerifyError> {
        if self.is_sibling(name) || self.oracle.knows_class(name) {
            Ok(())
        } else {
            Err(VerifyError::UnknownClass {
                name: name.to_string(),
                offset,
            })
        }
    }

    fn check_type(&self, ty: &TypeDesc, offset: usize) -> Result<(), VerifyError> {
        match ty {
            TypeDesc::Object(name) => self.check_class(name, offset),
            TypeDesc::Array(elem) => self.check_type(elem, offset),
            _ => Ok(()),
        }
    }

    /// Whether a value of type `from` may be stored where `to` is expected
    fn assignable(&self, from: &VType, to: &TypeDesc) -> bool {
        let from = match from {
            VType::Null => return to.is_reference(),
            VType::Ty(t) => t,
        };
        if from == to {
            return true;
        }
        match (from, to) {
            (f, TypeDesc::Any) => f.is_reference(),
            (TypeDesc::Object(a), TypeDesc::Object(b)) => {
                // Generated types are leaves: only identical names relate.
                if self.is_sibling(a) || self.is_sibling(b) {
                    return false;
                }
                self.oracle.is_subclass(a, b)
            }
            (TypeDesc::Array(a), TypeDesc::Array(b)) => {
                a.is_reference() && b.is_reference() && self.assignable(&VType::Ty((**a).clone()), b)
            }
            _ => false,
        }
    }
}

/// Verify every function of a module
pub fn verify_module(module: &Module, ctx: &VerifyContext<'_>) -> Result<(), VerifyError> {
    module.validate().map_err(VerifyError::ModuleValidation)?;

    for function in &module.functions {
        verify_function(function, module, ctx).map_err(|e| VerifyError::InFunction {
            function: format!("{}{}", function.name, function.descriptor),
            source: Box::new(e),
        })?;
    }

    Ok(())
}

/// Verification-time value type
#[derive(Debug, Clone, PartialEq, Eq)]
enum VType {
    Null,
    Ty(TypeDesc),
}

impl VType {
    fn slots(&self) -> u16 {
        match self {
            VType::Null => 1,
            VType::Ty(t) => t.slots(),
        }
    }

    fn is_reference(&self) -> bool {
        match self {
            VType::Null => true,
            VType::Ty(t) => t.is_reference(),
        }
    }

    fn describe(&self) -> String {
        match self {
            VType::Null => "null".to_string(),
            VType::Ty(t) => t.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Local {
    Unset,
    Value(VType),
    /// Upper half of a wide value
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    stack: Vec<VType>,
    locals: Vec<Local>,
}

impl Frame {
    fn depth(&self) -> u16 {
        self.stack.iter().map(VType::slots).sum()
    }

    fn set_local(&mut self, index: u16, value: VType) {
        let i = index as usize;
        // Overwriting half of a wide value kills the other half.
        if matches!(self.locals[i], Local::High) && i > 0 {
            self.locals[i - 1] = Local::Unset;
        }
        let was_wide = matches!(&self.locals[i], Local::Value(v) if v.slots() == 2);
        if was_wide && i + 1 < self.locals.len() {
            self.locals[i + 1] = Local::Unset;
        }
        let wide = value.slots() == 2;
        self.locals[i] = Local::Value(value);
        if wide {
            self.locals[i + 1] = Local::High;
        }
    }
}

struct FunctionVerifier<'m, 'c> {
    function: &'m Function,
    module: &'m Module,
    ctx: &'c VerifyContext<'c>,
}

fn verify_function(
    function: &Function,
    module: &Module,
    ctx: &VerifyContext<'_>,
) -> Result<(), VerifyError> {
    let instrs = decode_function(&function.code)?;
    if instrs.is_empty() {
        return Err(VerifyError::FallOffEnd(0));
    }

    let index_of: FxHashMap<usize, usize> = instrs
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.offset, i))
        .collect();

    for instr in &instrs {
        let required = instr.opcode.min_format();
        if required > module.version {
            return Err(VerifyError::OpcodeNotInFormat {
                opcode: instr.opcode.name(),
                offset: instr.offset,
                required,
                version: module.version,
            });
        }
        if let Some(target) = instr.jump_target() {
            if target < 0 || !index_of.contains_key(&(target as usize)) {
                return Err(VerifyError::InvalidJumpTarget {
                    target,
                    offset: instr.offset,
                });
            }
        }
    }

    let verifier = FunctionVerifier {
        function,
        module,
        ctx,
    };
    let entry = verifier.entry_frame()?;

    let mut states: Vec<Option<Frame>> = vec![None; instrs.len()];
    states[0] = Some(entry);
    let mut worklist = vec![0usize];

    while let Some(i) = worklist.pop() {
        let Some(mut frame) = states[i].clone() else {
            continue;
        };
        let instr = &instrs[i];
        verifier.step(&mut frame, instr)?;

        let mut successors = Vec::with_capacity(2);
        if let Some(target) = instr.jump_target() {
            successors.push(index_of[&(target as usize)]);
        }
        if !instr.opcode.is_terminator() {
            if i + 1 >= instrs.len() {
                return Err(VerifyError::FallOffEnd(instr.offset));
            }
            successors.push(i + 1);
        }

        for succ in successors {
            let offset = instrs[succ].offset;
            let changed = match &mut states[succ] {
                Some(existing) => merge(existing, &frame, offset)?,
                slot @ None => {
                    *slot = Some(frame.clone());
                    true
                }
            };
            if changed {
                worklist.push(succ);
            }
        }
    }

    Ok(())
}

fn merge(existing: &mut Frame, incoming: &Frame, offset: usize) -> Result<bool, VerifyError> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(VerifyError::StackMismatch(offset));
    }
    let mut changed = false;
    for (have, new) in existing.stack.iter_mut().zip(&incoming.stack) {
        if have == new {
            continue;
        }
        let merged = match (&*have, new) {
            (VType::Null, VType::Ty(t)) if t.is_reference() => VType::Ty(t.clone()),
            (VType::Ty(t), VType::Null) if t.is_reference() => continue,
            (a, b) if a.is_reference() && b.is_reference() => VType::Ty(TypeDesc::Any),
            _ => return Err(VerifyError::StackMismatch(offset)),
        };
        if *have != merged {
            *have = merged;
            changed = true;
        }
    }
    for (have, new) in existing.locals.iter_mut().zip(&incoming.locals) {
        if have != new && *have != Local::Unset {
            *have = Local::Unset;
            changed = true;
        }
    }
    Ok(changed)
}

impl<'m, 'c> FunctionVerifier<'m, 'c> {
    fn entry_frame(&self) -> Result<Frame, VerifyError> {
        let f = self.function;
        if f.arg_slots() > f.max_locals {
            return Err(VerifyError::BadFrame(format!(
                "arguments need {} slots, max_locals is {}",
                f.arg_slots(),
                f.max_locals
            )));
        }
        let mut frame = Frame {
            stack: Vec::new(),
            locals: vec![Local::Unset; f.max_locals as usize],
        };
        let mut slot = 0u16;
        if !f.is_static() {
            frame.set_local(0, VType::Ty(self.module.class.self_type()));
            slot = 1;
        }
        for param in &f.descriptor.params {
            frame.set_local(slot, VType::Ty(param.clone()));
            slot += param.slots();
        }
        Ok(frame)
    }

    fn push(&self, frame: &mut Frame, value: VType, offset: usize) -> Result<(), VerifyError> {
        frame.stack.push(value);
        let depth = frame.depth();
        if depth > self.function.max_stack {
            return Err(VerifyError::StackOverflow {
                offset,
                depth,
                max: self.function.max_stack,
            });
        }
        Ok(())
    }

    fn pop(&self, frame: &mut Frame, offset: usize) -> Result<VType, VerifyError> {
        frame.stack.pop().ok_or(VerifyError::StackUnderflow(offset))
    }

    fn pop_expect(
        &self,
        frame: &mut Frame,
        expected: &TypeDesc,
        offset: usize,
    ) -> Result<VType, VerifyError> {
        let value = self.pop(frame, offset)?;
        if !self.ctx.assignable(&value, expected) {
            return Err(VerifyError::TypeMismatch {
                offset,
                expected: expected.to_string(),
                found: value.describe(),
            });
        }
        Ok(value)
    }

    fn pop_reference(&self, frame: &mut Frame, offset: usize) -> Result<VType, VerifyError> {
        self.pop_expect(frame, &TypeDesc::Any, offset)
    }

    fn string(&self, index: u32, offset: usize) -> Result<&'m str, VerifyError> {
        self.module
            .constants
            .get_string(index)
            .ok_or(VerifyError::InvalidConstantRef {
                pool: "string",
                index,
                offset,
            })
    }

    fn ty(&self, index: u32, offset: usize) -> Result<&'m TypeDesc, VerifyError> {
        let ty = self
            .module
            .constants
            .get_type(index)
            .ok_or(VerifyError::InvalidConstantRef {
                pool: "type",
                index,
                offset,
            })?;
        self.ctx.check_type(ty, offset)?;
        Ok(ty)
    }

    fn class_type(&self, index: u32, offset: usize) -> Result<&'m str, VerifyError> {
        match self.ty(index, offset)? {
            TypeDesc::Object(name) => Ok(name),
            other => Err(VerifyError::TypeMismatch {
                offset,
                expected: "class type".to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn member(
        &self,
        index: u32,
        kind: MemberKind,
        offset: usize,
    ) -> Result<&'m MemberRef, VerifyError> {
        let member = self
            .module
            .constants
            .get_member(index)
            .ok_or(VerifyError::InvalidConstantRef {
                pool: "member",
                index,
                offset,
            })?;
        if member.kind != kind {
            return Err(VerifyError::WrongMemberKind {
                member: member.to_string(),
                expected: kind_name(kind),
                offset,
            });
        }
        self.ctx.check_class(&member.owner, offset)?;
        Ok(member)
    }

    fn pop_args(
        &self,
        frame: &mut Frame,
        params: &[TypeDesc],
        offset: usize,
    ) -> Result<(), VerifyError> {
        for param in params.iter().rev() {
            self.pop_expect(frame, param, offset)?;
        }
        Ok(())
    }

    fn push_result(&self, frame: &mut Frame, ret: &TypeDesc, offset: usize) -> Result<(), VerifyError> {
        if *ret != TypeDesc::Void {
            self.push(frame, VType::Ty(ret.clone()), offset)?;
        }
        Ok(())
    }

    fn require_receiver(&self, opcode: Opcode) -> Result<(), VerifyError> {
        if self.function.is_static() {
            return Err(VerifyError::BadFrame(format!(
                "{} in a static function",
                opcode.name()
            )));
        }
        Ok(())
    }

    fn instance_field(&self, index: u16, offset: usize) -> Result<&'m TypeDesc, VerifyError> {
        self.module
            .class
            .fields
            .get(index as usize)
            .map(|f| &f.ty)
            .ok_or(VerifyError::InvalidSlotRef {
                kind: "field",
                index,
                offset,
            })
    }

    fn static_slot(&self, index: u16, offset: usize) -> Result<&'m TypeDesc, VerifyError> {
        self.module
            .class
            .statics
            .get(index as usize)
            .map(|f| &f.ty)
            .ok_or(VerifyError::InvalidSlotRef {
                kind: "static slot",
                index,
                offset,
            })
    }

    fn step(&self, frame: &mut Frame, instr: &DecodedInstr) -> Result<(), VerifyError> {
        let offset = instr.offset;
        let idx = instr.index_operand();
        match instr.opcode {
            Opcode::Nop => {}
            Opcode::Pop => {
                self.pop(frame, offset)?;
            }
            Opcode::Dup => {
                let top = frame
                    .stack
                    .last()
                    .cloned()
                    .ok_or(VerifyError::StackUnderflow(offset))?;
                self.push(frame, top, offset)?;
            }
            Opcode::ConstNull => self.push(frame, VType::Null, offset)?,
            Opcode::ConstTrue | Opcode::ConstFalse => {
                self.push(frame, VType::Ty(TypeDesc::Boolean), offset)?
            }
            Opcode::ConstI32 => self.push(frame, VType::Ty(TypeDesc::Int), offset)?,
            Opcode::ConstStr => {
                self.string(idx, offset)?;
                self.push(frame, VType::Ty(TypeDesc::Str), offset)?;
            }
            Opcode::ConstClass => {
                self.class_type(idx, offset)?;
                self.push(frame, VType::Ty(TypeDesc::ClassObj), offset)?;
            }

            Opcode::LoadLocal => {
                let index = instr.u16_operand();
                self.check_local(index, 1, offset)?;
                let value = match &frame.locals[index as usize] {
                    Local::Value(v) => v.clone(),
                    _ => return Err(VerifyError::UninitializedLocal { index, offset }),
                };
                self.push(frame, value, offset)?;
            }
            Opcode::StoreLocal => {
                let index = instr.u16_operand();
                let value = self.pop(frame, offset)?;
                self.check_local(index, value.slots(), offset)?;
                frame.set_local(index, value);
            }

            Opcode::Jmp => {}
            Opcode::JmpIfFalse | Opcode::JmpIfTrue => {
                self.pop_expect(frame, &TypeDesc::Boolean, offset)?;
            }
            Opcode::JmpIfNull | Opcode::JmpIfNotNull => {
                self.pop_reference(frame, offset)?;
            }

            Opcode::InvokeVirtual => {
                let m = self.member(idx, MemberKind::Method, offset)?;
                self.pop_args(frame, &m.desc.params, offset)?;
                self.pop_expect(frame, &TypeDesc::object(m.owner.clone()), offset)?;
                self.push_result(frame, &m.desc.ret, offset)?;
            }
            Opcode::InvokeStatic => {
                let m = self.member(idx, MemberKind::StaticMethod, offset)?;
                self.pop_args(frame, &m.desc.params, offset)?;
                self.push_result(frame, &m.desc.ret, offset)?;
            }
            Opcode::NewTarget => {
                let m = self.member(idx, MemberKind::Constructor, offset)?;
                self.pop_args(frame, &m.desc.params, offset)?;
                self.push(frame, VType::Ty(TypeDesc::object(m.owner.clone())), offset)?;
            }
            Opcode::InvokeHandle => {
                let desc = self.module.constants.get_descriptor(idx).ok_or(
                    VerifyError::InvalidConstantRef {
                        pool: "descriptor",
                        index: idx,
                        offset,
                    },
                )?;
                self.pop_args(frame, &desc.params, offset)?;
                self.pop_expect(frame, &TypeDesc::Handle, offset)?;
                self.push_result(frame, &desc.ret, offset)?;
            }
            Opcode::Return => {
                let ret = &self.function.descriptor.ret;
                if *ret == TypeDesc::Void {
                    return Err(VerifyError::TypeMismatch {
                        offset,
                        expected: "RETURN_VOID".to_string(),
                        found: "RETURN".to_string(),
                    });
                }
                self.pop_expect(frame, ret, offset)?;
            }
            Opcode::ReturnVoid => {
                if self.function.descriptor.ret != TypeDesc::Void {
                    return Err(VerifyError::TypeMismatch {
                        offset,
                        expected: self.function.descriptor.ret.to_string(),
                        found: "V".to_string(),
                    });
                }
            }

            Opcode::LoadField => {
                let ty = self.instance_field(instr.u16_operand(), offset)?;
                self.pop_expect(frame, &self.module.class.self_type(), offset)?;
                self.push(frame, VType::Ty(ty.clone()), offset)?;
            }
            Opcode::LoadStatic => {
                let ty = self.static_slot(instr.u16_operand(), offset)?;
                self.push(frame, VType::Ty(ty.clone()), offset)?;
            }
            Opcode::StoreStatic => {
                let ty = self.static_slot(instr.u16_operand(), offset)?;
                self.pop_expect(frame, ty, offset)?;
            }
            Opcode::GetTargetField => {
                let m = self.member(idx, MemberKind::Field, offset)?;
                self.pop_expect(frame, &TypeDesc::object(m.owner.clone()), offset)?;
                self.push(frame, VType::Ty(m.field_type().clone()), offset)?;
            }
            Opcode::PutTargetField => {
                let m = self.member(idx, MemberKind::Field, offset)?;
                self.pop_expect(frame, m.field_type(), offset)?;
                self.pop_expect(frame, &TypeDesc::object(m.owner.clone()), offset)?;
            }
            Opcode::GetStaticTarget => {
                let m = self.member(idx, MemberKind::StaticField, offset)?;
                self.push(frame, VType::Ty(m.field_type().clone()), offset)?;
            }
            Opcode::PutStaticTarget => {
                let m = self.member(idx, MemberKind::StaticField, offset)?;
                self.pop_expect(frame, m.field_type(), offset)?;
            }

            Opcode::NewArray => {
                let Operands::Array { type_index, dims } = instr.operands else {
                    return Err(VerifyError::BadFrame("NEW_ARRAY without dims".to_string()));
                };
                if dims == 0 {
                    return Err(VerifyError::BadFrame(format!(
                        "NEW_ARRAY with zero dimensions at offset {}",
                        offset
                    )));
                }
                let mut ty = self.ty(type_index, offset)?.clone();
                for _ in 0..dims {
                    self.pop_expect(frame, &TypeDesc::Int, offset)?;
                    ty = TypeDesc::array_of(ty);
                }
                self.push(frame, VType::Ty(ty), offset)?;
            }
            Opcode::NewArrayDyn => {
                self.ty(idx, offset)?;
                self.pop_expect(frame, &TypeDesc::array_of(TypeDesc::Int), offset)?;
                self.push(frame, VType::Ty(TypeDesc::Any), offset)?;
            }

            Opcode::Trap => {
                self.pop_expect(frame, &TypeDesc::Str, offset)?;
            }

            Opcode::Wrap => {
                let name = self.class_type(idx, offset)?;
                self.pop_reference(frame, offset)?;
                self.push(frame, VType::Ty(TypeDesc::object(name)), offset)?;
            }
            Opcode::Unwrap => {
                let name = self.class_type(idx, offset)?;
                self.pop_expect(frame, &TypeDesc::object(name), offset)?;
                self.push(frame, VType::Ty(TypeDesc::Any), offset)?;
            }
            Opcode::CheckCast => {
                let ty = self.ty(idx, offset)?;
                if !ty.is_reference() {
                    return Err(VerifyError::TypeMismatch {
                        offset,
                        expected: "reference type".to_string(),
                        found: ty.to_string(),
                    });
                }
                self.pop_reference(frame, offset)?;
                self.push(frame, VType::Ty(ty.clone()), offset)?;
            }
            Opcode::InstanceOf => {
                self.ty(idx, offset)?;
                self.pop_reference(frame, offset)?;
                self.push(frame, VType::Ty(TypeDesc::Boolean), offset)?;
            }
            Opcode::RefEq => {
                self.pop_reference(frame, offset)?;
                self.pop_reference(frame, offset)?;
                self.push(frame, VType::Ty(TypeDesc::Boolean), offset)?;
            }
            Opcode::IdentityHash | Opcode::HashCode => {
                self.pop_reference(frame, offset)?;
                self.push(frame, VType::Ty(TypeDesc::Int), offset)?;
            }
            Opcode::ToStr => {
                self.pop(frame, offset)?;
                self.push(frame, VType::Ty(TypeDesc::Str), offset)?;
            }
            Opcode::ResolveHandle => {
                let member = self.module.constants.get_member(idx).ok_or(
                    VerifyError::InvalidConstantRef {
                        pool: "member",
                        index: idx,
                        offset,
                    },
                )?;
                self.ctx.check_class(&member.owner, offset)?;
                self.push(frame, VType::Ty(TypeDesc::Handle), offset)?;
            }
            Opcode::LoadTarget => {
                self.require_receiver(instr.opcode)?;
                let ty = self.instance_field(0, offset)?;
                self.push(frame, VType::Ty(ty.clone()), offset)?;
            }
            Opcode::GuardUnbound => {
                self.require_receiver(instr.opcode)?;
                self.instance_field(0, offset)?;
                self.string(idx, offset)?;
            }
        }
        Ok(())
    }

    fn check_local(&self, index: u16, slots: u16, offset: usize) -> Result<(), VerifyError> {
        let max = self.function.max_locals;
        if index as u32 + slots.max(1) as u32 > max as u32 {
            return Err(VerifyError::InvalidLocalRef { index, max, offset });
        }
        Ok(())
    }
}

fn kind_name(kind: MemberKind) -> &'static str {
    match kind {
        MemberKind::Method => "method",
        MemberKind::StaticMethod => "static method",
        MemberKind::Field => "field",
        MemberKind::StaticField => "static field",
        MemberKind::Constructor => "constructor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MethodDesc;
    use crate::encoder::BytecodeWriter;
    use crate::module::{ClassDef, FeatureLevel, FieldDef};

    struct Classes(&'static [&'static str]);

    impl TypeOracle for Classes {
        fn knows_class(&self, name: &str) -> bool {
            self.0.contains(&name)
        }
        fn is_subclass(&self, sub: &str, sup: &str) -> bool {
            sub == sup || (sub == "game.Zombie" && sup == "game.Entity")
        }
    }

    const HOST: Classes = Classes(&["game.Entity", "game.Zombie"]);

    fn module(version: FormatVersion) -> Module {
        let class = ClassDef {
            name: "Entity$Proxy".to_string(),
            template: "Entity".to_string(),
            target: "game.Entity".to_string(),
            fields: vec![FieldDef::new("instance", TypeDesc::object("game.Entity"))],
            statics: vec![],
            annotations: vec![],
        };
        Module::new(class, version, FeatureLevel::Baseline)
    }

    fn func(desc: &str, max_stack: u16, max_locals: u16, w: BytecodeWriter) -> Function {
        Function {
            name: "m".to_string(),
            descriptor: MethodDesc::parse(desc).unwrap(),
            flags: 0,
            max_stack,
            max_locals,
            code: w.into_bytes(),
            annotations: vec![],
        }
    }

    fn check(m: &Module) -> Result<(), VerifyError> {
        let ctx = VerifyContext::new(&HOST).with_siblings(["Entity$Proxy"]);
        verify_module(m, &ctx).map_err(|e| match e {
            VerifyError::InFunction { source, .. } => *source,
            other => other,
        })
    }

    fn load_target_getter(m: &mut Module) -> BytecodeWriter {
        let x = m.constants.add_member(MemberRef {
            owner: "game.Entity".to_string(),
            name: "x".to_string(),
            desc: MethodDesc::new(vec![], TypeDesc::Int),
            kind: MemberKind::Field,
        });
        let mut w = BytecodeWriter::new();
        w.emit_load_local(0);
        w.emit_op_u16(Opcode::LoadField, 0);
        w.emit_op_u32(Opcode::GetTargetField, x);
        w.emit_opcode(Opcode::Return);
        w
    }

    #[test]
    fn test_valid_getter() {
        let mut m = module(FormatVersion::V1);
        let w = load_target_getter(&mut m);
        m.functions.push(func("()I", 1, 1, w));
        assert_eq!(check(&m), Ok(()));
    }

    #[test]
    fn test_stack_overflow() {
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        w.emit_const_i32(1);
        w.emit_const_i32(2);
        w.emit_opcode(Opcode::Pop);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("()I", 1, 1, w));
        assert!(matches!(check(&m), Err(VerifyError::StackOverflow { .. })));
    }

    #[test]
    fn test_wide_params_count_two_slots() {
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        w.emit_load_local(1);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("(D)D", 2, 3, w));
        assert_eq!(check(&m), Ok(()));

        // Reading the upper half of a wide local is rejected.
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        w.emit_load_local(2);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("(D)D", 2, 3, w));
        assert!(matches!(
            check(&m),
            Err(VerifyError::UninitializedLocal { index: 2, .. })
        ));
    }

    #[test]
    fn test_type_mismatch_on_return() {
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        w.emit_const_i32(1);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("()T", 1, 1, w));
        assert!(matches!(check(&m), Err(VerifyError::TypeMismatch { .. })));
    }

    #[test]
    fn test_fall_off_end() {
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Nop);
        m.functions.push(func("()V", 0, 1, w));
        assert_eq!(check(&m), Err(VerifyError::FallOffEnd(0)));
    }

    #[test]
    fn test_jump_into_operand() {
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Jmp);
        w.emit_i32(1);
        w.emit_const_i32(0);
        w.emit_opcode(Opcode::ReturnVoid);
        m.functions.push(func("()V", 1, 1, w));
        assert!(matches!(check(&m), Err(VerifyError::InvalidJumpTarget { .. })));
    }

    #[test]
    fn test_opcode_gated_by_format() {
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::LoadTarget);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("()Lgame.Entity;", 1, 1, w));
        assert!(matches!(check(&m), Err(VerifyError::OpcodeNotInFormat { .. })));

        m.version = FormatVersion::V2;
        assert_eq!(check(&m), Ok(()));
    }

    #[test]
    fn test_subclass_assignability() {
        let mut m = module(FormatVersion::V1);
        let zombie = m.constants.add_type(TypeDesc::object("game.Zombie"));
        let mut w = BytecodeWriter::new();
        w.emit_load_local(1);
        w.emit_op_u32(Opcode::CheckCast, zombie);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("(A)Lgame.Entity;", 1, 2, w));
        assert_eq!(check(&m), Ok(()));
    }

    #[test]
    fn test_sibling_forward_reference() {
        let mut m = module(FormatVersion::V1);
        let other = m.constants.add_type(TypeDesc::object("Chunk$Proxy"));
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::ConstNull);
        w.emit_op_u32(Opcode::Wrap, other);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("()LChunk$Proxy;", 1, 1, w));

        // Unknown without the sibling declaration.
        let ctx = VerifyContext::new(&HOST).with_siblings(["Entity$Proxy"]);
        assert!(verify_module(&m, &ctx).is_err());

        let ctx = VerifyContext::new(&HOST).with_siblings(["Entity$Proxy", "Chunk$Proxy"]);
        assert!(verify_module(&m, &ctx).is_ok());
    }

    #[test]
    fn test_merge_requires_same_depth() {
        let mut m = module(FormatVersion::V1);
        let mut w = BytecodeWriter::new();
        let join = w.new_label();
        w.emit_load_local(1);
        w.emit_jump(Opcode::JmpIfNull, join);
        w.emit_const_i32(3);
        w.bind_label(join);
        w.emit_opcode(Opcode::ReturnVoid);
        m.functions.push(func("(A)V", 1, 2, w));
        assert!(matches!(check(&m), Err(VerifyError::StackMismatch(_))));
    }

    #[test]
    fn test_wrong_member_kind() {
        let mut m = module(FormatVersion::V1);
        // Adds the field reference at member index 0.
        load_target_getter(&mut m);
        let mut w = BytecodeWriter::new();
        w.emit_load_local(0);
        w.emit_op_u16(Opcode::LoadField, 0);
        w.emit_op_u32(Opcode::InvokeVirtual, 0);
        w.emit_opcode(Opcode::Return);
        m.functions.push(func("()I", 1, 1, w));
        assert!(matches!(check(&m), Err(VerifyError::WrongMemberKind { .. })));
    }
}
