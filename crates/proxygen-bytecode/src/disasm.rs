//! Human-readable module listings
//!
//! Used for the debug dump sink and attached to verification failures.

use std::fmt::Write;

use crate::decoder::{decode_function, DecodedInstr, Operands};
use crate::module::{Function, Module};
use crate::opcode::Opcode;

/// Disassemble a whole module
pub fn disassemble_module(module: &Module) -> String {
    let mut out = String::new();
    let class = &module.class;
    let _ = writeln!(
        out,
        "class {} implements {} -> {} (format {}, {})",
        class.name, class.template, class.target, module.version, module.level
    );
    for a in &class.annotations {
        let _ = writeln!(out, "  @{}({})", a.name, a.args.join(", "));
    }
    for field in &class.fields {
        let _ = writeln!(out, "  field {}: {}", field.name, field.ty);
    }
    for (i, slot) in class.statics.iter().enumerate() {
        let _ = writeln!(out, "  static #{} {}: {}", i, slot.name, slot.ty);
    }
    for function in &module.functions {
        out.push('\n');
        disassemble_function_into(&mut out, function, module);
    }
    out
}

/// Disassemble one function
pub fn disassemble_function(function: &Function, module: &Module) -> String {
    let mut out = String::new();
    disassemble_function_into(&mut out, function, module);
    out
}

fn disassemble_function_into(out: &mut String, function: &Function, module: &Module) {
    let kind = if function.is_static() { "static " } else { "" };
    let _ = writeln!(
        out,
        "  {}fn {}{} [max_stack={}, max_locals={}]",
        kind, function.name, function.descriptor, function.max_stack, function.max_locals
    );
    match decode_function(&function.code) {
        Ok(instrs) => {
            for instr in &instrs {
                let _ = writeln!(out, "    {:04}: {}", instr.offset, render(instr, module));
            }
        }
        Err(e) => {
            let _ = writeln!(out, "    <undecodable: {}>", e);
        }
    }
}

fn render(instr: &DecodedInstr, module: &Module) -> String {
    let name = instr.opcode.name();
    let pool = &module.constants;
    let idx = instr.index_operand();
    let or_bad = |s: Option<String>| s.unwrap_or_else(|| "<bad index>".to_string());
    match instr.operands {
        Operands::None => name.to_string(),
        Operands::U16(v) => {
            let note = match instr.opcode {
                Opcode::LoadField => module.class.fields.get(v as usize).map(|f| f.name.clone()),
                Opcode::LoadStatic | Opcode::StoreStatic => {
                    module.class.statics.get(v as usize).map(|f| f.name.clone())
                }
                _ => None,
            };
            match note {
                Some(note) => format!("{} {} ; {}", name, v, note),
                None => format!("{} {}", name, v),
            }
        }
        Operands::I32(v) => match instr.jump_target() {
            Some(target) => format!("{} -> {:04}", name, target),
            None => format!("{} {}", name, v),
        },
        Operands::U32(_) => {
            let text = match instr.opcode {
                Opcode::ConstStr | Opcode::GuardUnbound => {
                    or_bad(pool.get_string(idx).map(|s| format!("{:?}", s)))
                }
                Opcode::InvokeHandle => or_bad(pool.get_descriptor(idx).map(|d| d.to_string())),
                op if op.is_member_ref() => or_bad(pool.get_member(idx).map(|m| m.to_string())),
                _ => or_bad(pool.get_type(idx).map(|t| t.to_string())),
            };
            format!("{} #{} {}", name, idx, text)
        }
        Operands::Array { dims, .. } => {
            let text = or_bad(pool.get_type(idx).map(|t| t.to_string()));
            format!("{} #{} {} dims={}", name, idx, text, dims)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{MethodDesc, TypeDesc};
    use crate::encoder::BytecodeWriter;
    use crate::module::{ClassDef, FeatureLevel, FieldDef, FormatVersion};

    #[test]
    fn test_disassemble() {
        let class = ClassDef {
            name: "Greeter$Proxy".to_string(),
            template: "Greeter".to_string(),
            target: "game.Greeter".to_string(),
            fields: vec![FieldDef::new("instance", TypeDesc::object("game.Greeter"))],
            statics: vec![FieldDef::new("greet", TypeDesc::Handle)],
            annotations: vec![],
        };
        let mut module = Module::new(class, FormatVersion::V1, FeatureLevel::Baseline);
        let msg = module.constants.add_string("hi");
        let mut w = BytecodeWriter::new();
        w.emit_op_u16(Opcode::LoadStatic, 0);
        w.emit_op_u32(Opcode::ConstStr, msg);
        w.emit_opcode(Opcode::Return);
        module.functions.push(Function {
            name: "greet".to_string(),
            descriptor: MethodDesc::new(vec![], TypeDesc::Str),
            flags: 0,
            max_stack: 2,
            max_locals: 1,
            code: w.into_bytes(),
            annotations: vec![],
        });

        let text = disassemble_module(&module);
        assert!(text.contains("class Greeter$Proxy implements Greeter -> game.Greeter"));
        assert!(text.contains("static #0 greet: H"));
        assert!(text.contains("fn greet()T"));
        assert!(text.contains("0000: LOAD_STATIC 0 ; greet"));
        assert!(text.contains("CONST_STR #0 \"hi\""));
    }
}
