// This module is the construction-time gate for VIL programs. Every instruction that enters
// a Program goes through validate, which checks it against its catalog descriptor (operand
// kinds per position) and against the type and size resolver: binary operations need a
// defined result type and single-byte operands, stores follow the short-integer truncation
// rule, pointer-consuming instructions need pointer-typed slots of a supported width, flags
// are single bytes, and fused increments are limited to the amounts the target expands.
// Builder wraps a Program and offers typed helpers for the common primitives so front ends
// and tests do not have to assemble operands by hand. A failure is reported as a Diagnostic
// carrying the index the rejected instruction would have had.

//! Typed IR builder with construction-time validation.

use super::catalog::Catalog;
use super::{Inst, Program, StackSlot};
use crate::core::error::{CompileError, CompileResult, Diagnostic};
use crate::core::operand::{Operand, MAX_VALUE_SIZE};
use crate::core::types::{
    check_operand_sizes, is_pointer, is_short_integer, pointer_of, referent_of, result_type,
    store_kind, Type, TypeOp, TypeRegistry, LONG_POINTER_SIZE,
};

/// Amounts `incrementGlobal`/`decrementGlobal` accept.
pub const MAX_STEP_AMOUNT: u8 = 2;

/// Validate one instruction against the catalog and the resolver.
pub fn validate(inst: &Inst, registry: &TypeRegistry) -> CompileResult<()> {
    Catalog::descriptor(inst.kind()).check_operand_kinds(inst)?;

    match inst {
        Inst::PushConstant { .. } | Inst::PushGlobal { .. } => Ok(()),
        Inst::PushAddressOfGlobal { global } => {
            pointer_of(global.ty())?;
            match global.global_addr() {
                Some(addr) if addr < 0x100 => Ok(()),
                Some(addr) => Err(CompileError::unsupported_size(format!(
                    "address ${:04X} does not fit a zero-page pointer",
                    addr
                ))),
                None => Err(CompileError::invariant("pushAddressOfGlobal needs a global")),
            }
        }
        Inst::PushAddressOfField {
            offset,
            field_ty,
            pointer,
        } => {
            let referent = pointer_slot(pointer)?;
            let field_size = registry.size_of(*field_ty)?;
            pointer_of(*field_ty)?;
            field_in_bounds(registry, referent, *offset, field_size)
        }
        Inst::PushDereferenceFromStack { pointer, result } => {
            let referent = pointer_slot(pointer)?;
            if result.ty != referent {
                return Err(CompileError::type_mismatch(format!(
                    "a pointer to {} cannot be dereferenced as {}",
                    referent, result.ty
                )));
            }
            natural_slot(registry, result)
        }
        Inst::PushFieldFromStack {
            pointer,
            offset,
            result,
        } => {
            let referent = pointer_slot(pointer)?;
            natural_slot(registry, result)?;
            field_in_bounds(registry, referent, *offset, result.size)
        }
        Inst::PopToGlobal { target, stack } => {
            value_slot(stack)?;
            store_kind(target.ty(), target.size(), stack.ty, stack.size).map(|_| ())
        }
        Inst::PopToAddressFromStack { value, pointer } => {
            let referent = pointer_slot(pointer)?;
            single_byte(value, "storing through a pointer")?;
            store_kind(referent, registry.size_of(referent)?, value.ty, value.size).map(|_| ())
        }
        Inst::PopToFieldFromStack {
            value,
            pointer,
            offset,
        } => {
            let referent = pointer_slot(pointer)?;
            single_byte(value, "storing through a pointer")?;
            if !is_short_integer(value.ty) {
                return Err(CompileError::type_mismatch(format!(
                    "field store of non-integer type {}",
                    value.ty
                )));
            }
            field_in_bounds(registry, referent, *offset, 1)
        }
        Inst::PopToRegister { register, stack } => {
            single_byte(stack, &format!("popping into register {}", register))
        }
        Inst::PopStack { stack } | Inst::Duplicate { stack } => value_slot(stack),
        Inst::AddFromStack { first, second } => binary(TypeOp::Add, first, second),
        Inst::SubFromStack { first, second } => binary(TypeOp::Sub, first, second),
        Inst::OrFromStack { first, second } => binary(TypeOp::BitwiseOr, first, second),
        Inst::CompareEqualToFromStack { first, second }
        | Inst::CompareGreaterThanFromStack { first, second } => {
            binary(TypeOp::Compare, first, second)
        }
        Inst::Branch { target } | Inst::CallVoid { target } => label(target),
        Inst::Label { name } => label(name),
        Inst::BranchTrueFromStack { target, stack }
        | Inst::BranchFalseFromStack { target, stack } => {
            label(target)?;
            flag(stack)
        }
        Inst::ReturnFromCall => Ok(()),

        Inst::AssignConstantToGlobal { constant, target } => store(target, constant),
        Inst::CopyGlobalToGlobal { source, target } => store(target, source),
        Inst::AddFromGlobalAndConstant { global, constant }
        | Inst::AddFromAddresses {
            first: global,
            second: constant,
        } => operands(TypeOp::Add, global, constant).map(|_| ()),
        Inst::AddFromGlobalAndConstantToGlobal {
            global,
            constant,
            target,
        }
        | Inst::AddFromAddressesToAddress {
            first: global,
            second: constant,
            target,
        } => {
            let ty = operands(TypeOp::Add, global, constant)?;
            store_result(target, ty)
        }
        Inst::AddFromAddressesToAddresses {
            first,
            second,
            target,
            copy,
        } => {
            let ty = operands(TypeOp::Add, first, second)?;
            store_result(target, ty)?;
            store(copy, target)
        }
        Inst::SubFromGlobalAndConstant { global, constant } => {
            operands(TypeOp::Sub, global, constant).map(|_| ())
        }
        Inst::SubFromGlobalAndConstantToGlobal {
            global,
            constant,
            target,
        } => {
            let ty = operands(TypeOp::Sub, global, constant)?;
            store_result(target, ty)
        }
        Inst::IncrementGlobal { global, amount } | Inst::DecrementGlobal { global, amount } => {
            if *amount == 0 || *amount > MAX_STEP_AMOUNT {
                return Err(CompileError::invariant(format!(
                    "{} amount {} is outside 1..={}",
                    inst.name(),
                    amount,
                    MAX_STEP_AMOUNT
                )));
            }
            result_type(TypeOp::Add, global.ty(), Type::BYTE)?;
            check_operand_sizes(TypeOp::Add, global.size(), 1)
        }
        Inst::CompareGreaterThanFromGlobalAndConstant { global, constant } => {
            operands(TypeOp::Compare, global, constant).map(|_| ())
        }
        Inst::CompareGreaterThanFromGlobalAndConstantToGlobal {
            global,
            constant,
            target,
        } => {
            let ty = operands(TypeOp::Compare, global, constant)?;
            store_result(target, ty)
        }
        Inst::BranchIfGreaterThanFromGlobalAndConstant {
            global,
            constant,
            target,
        } => {
            label(target)?;
            operands(TypeOp::Compare, global, constant).map(|_| ())
        }
        Inst::BranchTrueFromGlobal { global, target } => {
            label(target)?;
            flag(&StackSlot::of(global))
        }
    }
}

/// Referent of a pointer slot; the slot must be 1 or 2 bytes.
fn pointer_slot(slot: &StackSlot) -> CompileResult<Type> {
    if !is_pointer(slot.ty) {
        return Err(CompileError::invariant(format!(
            "expected a pointer on the stack, found {}",
            slot.ty
        )));
    }
    if slot.size == 0 || slot.size > LONG_POINTER_SIZE {
        return Err(CompileError::unsupported_size(format!(
            "{}-byte pointer on the stack",
            slot.size
        )));
    }
    referent_of(slot.ty)
}

fn value_slot(slot: &StackSlot) -> CompileResult<()> {
    if slot.size == 0 || slot.size > MAX_VALUE_SIZE {
        return Err(CompileError::unsupported_size(format!(
            "{}-byte stack value",
            slot.size
        )));
    }
    Ok(())
}

/// A slot whose size is the registered size of its type.
fn natural_slot(registry: &TypeRegistry, slot: &StackSlot) -> CompileResult<()> {
    value_slot(slot)?;
    let natural = registry.size_of(slot.ty)?;
    if !is_pointer(slot.ty) && slot.size != natural {
        return Err(CompileError::unsupported_size(format!(
            "{} is {} bytes, slot declares {}",
            slot.ty, natural, slot.size
        )));
    }
    Ok(())
}

fn single_byte(slot: &StackSlot, what: &str) -> CompileResult<()> {
    if slot.size != 1 {
        return Err(CompileError::unsupported_size(format!(
            "{} with a {}-byte value",
            what, slot.size
        )));
    }
    Ok(())
}

fn field_in_bounds(registry: &TypeRegistry, container: Type, offset: u8, size: u8) -> CompileResult<()> {
    let container_size = registry.size_of(container)?;
    if offset as u16 + size as u16 > container_size as u16 {
        return Err(CompileError::invariant(format!(
            "field at offset {} of size {} exceeds its {}-byte struct",
            offset, size, container_size
        )));
    }
    Ok(())
}

fn binary(op: TypeOp, first: &StackSlot, second: &StackSlot) -> CompileResult<()> {
    result_type(op, first.ty, second.ty)?;
    check_operand_sizes(op, first.size, second.size)
}

/// Result type of `op` over two memory operands.
fn operands(op: TypeOp, first: &Operand, second: &Operand) -> CompileResult<Type> {
    let ty = result_type(op, first.ty(), second.ty())?;
    check_operand_sizes(op, first.size(), second.size())?;
    Ok(ty)
}

fn store(target: &Operand, value: &Operand) -> CompileResult<()> {
    store_kind(target.ty(), target.size(), value.ty(), value.size()).map(|_| ())
}

fn store_result(target: &Operand, ty: Type) -> CompileResult<()> {
    store_kind(target.ty(), target.size(), ty, 1).map(|_| ())
}

fn flag(slot: &StackSlot) -> CompileResult<()> {
    if !is_short_integer(slot.ty) {
        return Err(CompileError::type_mismatch(format!(
            "branch condition of type {}",
            slot.ty
        )));
    }
    single_byte(slot, "branching on a flag")
}

fn label(name: &str) -> CompileResult<()> {
    if name.is_empty() {
        return Err(CompileError::invariant("empty label"));
    }
    Ok(())
}

/// Appends validated instructions to a [`Program`].
#[derive(Debug, Default)]
pub struct Builder {
    program: Program,
}

impl Builder {
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            program: Program::new(types),
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.program.types
    }

    /// Registry access for front ends that declare struct types as they go.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.program.types
    }

    /// Index the next instruction will get.
    pub fn position(&self) -> usize {
        self.program.len()
    }

    /// Validate and append `inst`.
    pub fn push(&mut self, inst: Inst) -> Result<&mut Self, Diagnostic> {
        let index = self.position();
        validate(&inst, &self.program.types).map_err(|e| e.at(index))?;
        self.program.insts.push(inst);
        Ok(self)
    }

    pub fn finish(self) -> Program {
        self.program
    }

    fn at<T>(&self, result: CompileResult<T>) -> Result<T, Diagnostic> {
        result.map_err(|e| e.at(self.position()))
    }

    pub fn push_constant(&mut self, value: u16, ty: Type) -> Result<&mut Self, Diagnostic> {
        let constant = self.at(Operand::constant(value, ty, 1))?;
        self.push(Inst::PushConstant { constant })
    }

    pub fn push_global(&mut self, addr: u16, ty: Type) -> Result<&mut Self, Diagnostic> {
        let source = self.at(Operand::global(self.types(), addr, ty, None))?;
        self.push(Inst::PushGlobal { source })
    }

    pub fn pop_to_global(&mut self, addr: u16, ty: Type, stack: StackSlot) -> Result<&mut Self, Diagnostic> {
        let target = self.at(Operand::global(self.types(), addr, ty, None))?;
        self.push(Inst::PopToGlobal { target, stack })
    }

    pub fn add_from_stack(&mut self) -> Result<&mut Self, Diagnostic> {
        self.push(Inst::AddFromStack {
            first: StackSlot::BYTE,
            second: StackSlot::BYTE,
        })
    }

    pub fn sub_from_stack(&mut self) -> Result<&mut Self, Diagnostic> {
        self.push(Inst::SubFromStack {
            first: StackSlot::BYTE,
            second: StackSlot::BYTE,
        })
    }

    pub fn compare_greater_than_from_stack(&mut self) -> Result<&mut Self, Diagnostic> {
        self.push(Inst::CompareGreaterThanFromStack {
            first: StackSlot::BYTE,
            second: StackSlot::BYTE,
        })
    }

    pub fn branch_true_from_stack(&mut self, target: &str) -> Result<&mut Self, Diagnostic> {
        self.push(Inst::BranchTrueFromStack {
            target: target.to_string(),
            stack: StackSlot::BOOLEAN,
        })
    }

    pub fn branch(&mut self, target: &str) -> Result<&mut Self, Diagnostic> {
        self.push(Inst::Branch {
            target: target.to_string(),
        })
    }

    pub fn label(&mut self, name: &str) -> Result<&mut Self, Diagnostic> {
        self.push(Inst::Label {
            name: name.to_string(),
        })
    }
}
