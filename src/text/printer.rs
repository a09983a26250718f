// This module renders programs back into the textual VIL format and renders emitted 6502
// statement lists as assembler source. Printing a program writes its struct declarations
// first and then one instruction per line in the argument order the catalog declares, using
// the same operand syntax the parser reads, so printed output parses back to the same
// program. Size suffixes are only written where a size differs from the natural size of
// its type.

//! VIL and assembly printers.

use crate::core::operand::{Operand, RomIndex};
use crate::core::types::{is_pointer, Type, TypeRegistry, SHORT_POINTER_SIZE};
use crate::mos6502::isa::Statement;
use crate::vil::{Arg, Inst, Program, StackSlot};
use std::fmt::Write;

pub fn print_program(program: &Program) -> String {
    print_insts(&program.types, &program.insts)
}

/// Print `insts` with the struct declarations of `types`.
pub fn print_insts(types: &TypeRegistry, insts: &[Inst]) -> String {
    let mut out = String::new();
    for (_, name, size) in types.user_types() {
        let _ = writeln!(out, ".type {} {}", name, size);
    }
    for inst in insts {
        let _ = writeln!(out, "{}", print_inst(types, inst));
    }
    out
}

pub fn print_inst(types: &TypeRegistry, inst: &Inst) -> String {
    if let Inst::Label { name } = inst {
        return format!("{}:", name);
    }
    let args: Vec<String> = inst.args().iter().map(|arg| print_arg(types, arg)).collect();
    if args.is_empty() {
        format!("\t{}", inst.name())
    } else {
        format!("\t{} {}", inst.name(), args.join(", "))
    }
}

fn print_arg(types: &TypeRegistry, arg: &Arg) -> String {
    match arg {
        Arg::Operand(operand) => print_operand(types, operand),
        Arg::Slot(slot) => print_slot(types, slot),
        Arg::Type(ty) => type_name(types, *ty),
        Arg::Number(n) => n.to_string(),
        Arg::Label(label) => label.clone(),
    }
}

fn type_name(types: &TypeRegistry, ty: Type) -> String {
    types.name_of(ty).unwrap_or_else(|_| ty.to_string())
}

fn natural_size(types: &TypeRegistry, ty: Type) -> Option<u8> {
    if is_pointer(ty) {
        Some(SHORT_POINTER_SIZE)
    } else {
        types.size_of(ty).ok()
    }
}

/// `T`, with `@n` when `size` is not the natural size of `T`.
fn annotated(types: &TypeRegistry, ty: Type, size: u8) -> String {
    let name = type_name(types, ty);
    if natural_size(types, ty) == Some(size) {
        name
    } else {
        format!("{}@{}", name, size)
    }
}

fn print_slot(types: &TypeRegistry, slot: &StackSlot) -> String {
    annotated(types, slot.ty, slot.size)
}

fn address(addr: u16) -> String {
    if addr < 0x100 {
        format!("${:02x}", addr)
    } else {
        format!("${:04x}", addr)
    }
}

pub fn print_operand(types: &TypeRegistry, operand: &Operand) -> String {
    match operand {
        Operand::Constant { value, ty, size } => format!("#{}:{}", value, annotated(types, *ty, *size)),
        Operand::Global { addr, ty, size } => {
            format!("{}:{}", address(*addr), annotated(types, *ty, *size))
        }
        Operand::Field {
            base, offset, ty, ..
        } => format!(
            "[{}]+{}:{}",
            print_operand(types, base),
            offset,
            type_name(types, *ty)
        ),
        Operand::PointerDeref { base, .. } => format!("*{}", print_operand(types, base)),
        Operand::RomElement {
            label,
            referent,
            index,
        } => {
            let index = match index {
                RomIndex::Constant(i) => i.to_string(),
                RomIndex::Stack => "s".to_string(),
            };
            format!("{}[{}]:{}", label, index, type_name(types, *referent))
        }
    }
}

/// Assembler source for `statements`, one per line.
pub fn print_statements(statements: &[Statement]) -> String {
    let mut out = String::new();
    for statement in statements {
        let _ = writeln!(out, "{}", statement);
    }
    out
}
