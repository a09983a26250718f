// This module is the code emitter: a deterministic mapping from each VIL instruction to a
// fixed 6502 statement template with its operands substituted. Operand addressing is
// delegated to the resolver, and scratch bytes are drawn from a fresh reserved-slot arena
// per expansion, so no scratch byte is live across two instructions. Templates that branch
// internally get local labels of the form _vil_<n>_<suffix> from a per-program counter, so
// two expansions never share a label. Stack values are pushed low byte first and popped
// high byte first. When annotations are enabled, each expansion is preceded by a comment
// naming the instruction it came from. No optimization happens here.

//! 6502 code emitter.

use super::addressing::{resolve, Access};
use super::isa::{encoded_len, Address, Mnemonic, Mode, Statement};
use crate::core::error::{CompileError, CompileResult, Diagnostic};
use crate::core::operand::Operand;
use crate::core::reserved::{Register, ReservedSlots, ScratchSlot, SlotSet};
use crate::core::types::{LONG_POINTER_SIZE, SHORT_POINTER_SIZE};
use crate::vil::{Inst, StackSlot};
use log::trace;

/// Base of the hardware stack page.
const STACK_PAGE: u16 = 0x0100;

/// Emits 6502 statements for VIL instructions.
#[derive(Debug, Default)]
pub struct Emitter {
    next_label: usize,
    annotate: bool,
}

/// Scratch bytes referenced by `statements`.
pub fn scratch_used(statements: &[Statement]) -> SlotSet {
    let mut used = SlotSet::new();
    let mut mark = |addr: u16| {
        if let Some(slot) = ScratchSlot::at_address(addr) {
            used.set(slot);
        }
    };
    for statement in statements {
        if let Statement::Op { mode, .. } = statement {
            match mode {
                Mode::Direct(Address::Numeric(addr)) => mark(*addr),
                Mode::IndirectY(zp) => {
                    mark(*zp as u16);
                    mark(*zp as u16 + 1);
                }
                _ => {}
            }
        }
    }
    used
}

/// Templates accumulate into this.
struct Expansion<'a> {
    out: Vec<Statement>,
    slots: ReservedSlots,
    id: usize,
    emitter: &'a mut Emitter,
    labelled: bool,
}

impl Expansion<'_> {
    fn op(&mut self, mnemonic: Mnemonic) {
        self.out.push(Statement::implied(mnemonic));
    }

    fn imm(&mut self, mnemonic: Mnemonic, value: u8) {
        self.out.push(Statement::imm(mnemonic, value));
    }

    fn direct(&mut self, mnemonic: Mnemonic, addr: u16) {
        self.out.push(Statement::direct(mnemonic, addr));
    }

    fn jump(&mut self, mnemonic: Mnemonic, target: &str) {
        self.out.push(Statement::target(mnemonic, target));
    }

    fn scratch(&mut self, index: u8) -> CompileResult<u16> {
        Ok(self.slots.slot(index)?.address())
    }

    /// Local label `_vil_<n>_<suffix>`, unique per expansion.
    fn local(&mut self, suffix: &str) -> String {
        if !self.labelled {
            self.id = self.emitter.next_label;
            self.emitter.next_label += 1;
            self.labelled = true;
        }
        format!("_vil_{}_{}", self.id, suffix)
    }

    fn label(&mut self, name: String) {
        self.out.push(Statement::Label(name));
    }

    /// Resolve an operand and emit its setup.
    fn access(&mut self, operand: &Operand) -> CompileResult<Access> {
        let resolved = resolve(operand, &mut self.slots)?;
        self.out.extend(resolved.setup);
        Ok(resolved.access)
    }

    /// Resolve an operand that must be directly addressable.
    fn direct_access(&mut self, operand: &Operand) -> CompileResult<Access> {
        let resolved = resolve(operand, &mut self.slots)?;
        if !resolved.setup.is_empty() {
            return Err(CompileError::invariant(format!(
                "{:?} operand needs setup where a direct operand is required",
                operand.kind()
            )));
        }
        Ok(resolved.access)
    }

    fn apply(&mut self, access: &Access, mnemonic: Mnemonic, i: u8) -> CompileResult<()> {
        access.apply(mnemonic, i, &mut self.out)
    }

    /// Pop a pointer of `pointer.size` bytes off the stack into an access strategy.
    fn pop_pointer(&mut self, pointer: &StackSlot, offset: u8, size: u8) -> CompileResult<Access> {
        match pointer.size {
            SHORT_POINTER_SIZE => {
                self.op(Mnemonic::Pla);
                self.op(Mnemonic::Tax);
                Ok(Access::ShortPointer { offset, size })
            }
            LONG_POINTER_SIZE => {
                let lo = self.slots.slot(0)?;
                let hi = self.slots.slot(1)?;
                self.op(Mnemonic::Pla);
                self.direct(Mnemonic::Sta, hi.address());
                self.op(Mnemonic::Pla);
                self.direct(Mnemonic::Sta, lo.address());
                Ok(Access::LongPointer {
                    base: lo,
                    offset,
                    size,
                })
            }
            other => Err(CompileError::unsupported_size(format!(
                "{}-byte pointer on the stack",
                other
            ))),
        }
    }

    fn push_through_pointer(&mut self, pointer: &StackSlot, offset: u8, result: &StackSlot) -> CompileResult<()> {
        let access = self.pop_pointer(pointer, offset, result.size)?;
        for i in 0..result.size {
            self.apply(&access, Mnemonic::Lda, i)?;
            self.op(Mnemonic::Pha);
        }
        Ok(())
    }

    /// Value on top, pointer below it. Only 1-byte values.
    fn pop_through_pointer(&mut self, value: &StackSlot, pointer: &StackSlot, offset: u8) -> CompileResult<()> {
        if value.size != 1 {
            return Err(CompileError::unsupported_size(format!(
                "storing a {}-byte value through a pointer",
                value.size
            )));
        }
        match pointer.size {
            SHORT_POINTER_SIZE => {
                self.op(Mnemonic::Pla);
                self.op(Mnemonic::Tay);
                self.op(Mnemonic::Pla);
                self.op(Mnemonic::Tax);
                self.out.push(Statement::op(
                    Mnemonic::Sty,
                    Mode::IndexedX(Address::Numeric(offset as u16)),
                ));
            }
            LONG_POINTER_SIZE => {
                self.op(Mnemonic::Pla);
                self.op(Mnemonic::Tax);
                let access = self.pop_pointer(pointer, offset, 1)?;
                self.op(Mnemonic::Txa);
                self.apply(&access, Mnemonic::Sta, 0)?;
            }
            other => {
                return Err(CompileError::unsupported_size(format!(
                    "{}-byte pointer on the stack",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Pop two bytes, combine them with `ops`, push the result.
    fn binary(&mut self, ops: &[Mnemonic]) -> CompileResult<()> {
        let s0 = self.scratch(0)?;
        self.op(Mnemonic::Pla);
        self.direct(Mnemonic::Sta, s0);
        self.op(Mnemonic::Pla);
        for (i, mnemonic) in ops.iter().enumerate() {
            if i + 1 == ops.len() {
                self.direct(*mnemonic, s0);
            } else {
                self.op(*mnemonic);
            }
        }
        self.op(Mnemonic::Pha);
        Ok(())
    }

    /// After a CMP: A = 1 if the compared value was strictly greater, else 0.
    fn greater_than_to_a(&mut self) {
        let f = self.local("false");
        let t = self.local("true");
        let end = self.local("end");
        self.jump(Mnemonic::Beq, &f);
        self.jump(Mnemonic::Bcs, &t);
        self.label(f);
        self.imm(Mnemonic::Lda, 0);
        self.jump(Mnemonic::Beq, &end);
        self.label(t);
        self.imm(Mnemonic::Lda, 1);
        self.label(end);
    }

    /// `global > constant` into A as 0/1; leaves the final store or push to the caller
    /// through `finish`.
    fn compare_global_constant(
        &mut self,
        global: &Operand,
        constant: &Operand,
        finish: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let g = self.direct_access(global)?;
        let c = self.direct_access(constant)?;
        self.apply(&g, Mnemonic::Lda, 0)?;
        if constant.constant_value() == Some(0) {
            let end = self.local("end");
            self.jump(Mnemonic::Beq, &end);
            self.imm(Mnemonic::Lda, 1);
            self.label(end);
        } else {
            self.apply(&c, Mnemonic::Cmp, 0)?;
            self.greater_than_to_a();
        }
        finish(self)
    }

    /// Pop a flag and jump to `target` when it is zero (`skip_on` = BNE) or non-zero
    /// (`skip_on` = BEQ).
    fn conditional_jump(&mut self, skip_on: Mnemonic, target: &str) {
        let skip = self.local("skip");
        self.jump(skip_on, &skip);
        self.jump(Mnemonic::Jmp, target);
        self.label(skip);
    }

    /// `LDA a; CLC|SEC; ADC|SBC b` into A.
    fn arith(&mut self, a: &Operand, carry: Mnemonic, op: Mnemonic, b: &Operand) -> CompileResult<()> {
        let a = self.direct_access(a)?;
        let b = self.direct_access(b)?;
        self.apply(&a, Mnemonic::Lda, 0)?;
        self.op(carry);
        self.apply(&b, op, 0)
    }

    fn store_a(&mut self, target: &Operand) -> CompileResult<()> {
        let t = self.direct_access(target)?;
        self.apply(&t, Mnemonic::Sta, 0)
    }

    fn repeat_rmw(&mut self, mnemonic: Mnemonic, global: &Operand, amount: u8) -> CompileResult<()> {
        let access = self.direct_access(global)?;
        let addr = access
            .direct_address()
            .cloned()
            .ok_or_else(|| CompileError::invariant("read-modify-write needs a direct address"))?;
        for _ in 0..amount {
            self.out.push(Statement::op(mnemonic, Mode::Direct(addr.clone())));
        }
        Ok(())
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_annotations(annotate: bool) -> Self {
        Self {
            next_label: 0,
            annotate,
        }
    }

    /// Expand one instruction.
    pub fn emit(&mut self, inst: &Inst) -> CompileResult<Vec<Statement>> {
        let mut x = Expansion {
            out: Vec::new(),
            slots: ReservedSlots::new(),
            id: 0,
            emitter: self,
            labelled: false,
        };

        match inst {
            Inst::PushConstant { constant } => {
                let c = x.access(constant)?;
                for i in 0..constant.size() {
                    x.apply(&c, Mnemonic::Lda, i)?;
                    x.op(Mnemonic::Pha);
                }
            }
            Inst::PushGlobal { source } => {
                let s = x.access(source)?;
                for i in 0..source.size() {
                    x.apply(&s, Mnemonic::Lda, i)?;
                    x.op(Mnemonic::Pha);
                }
            }
            Inst::PushAddressOfGlobal { global } => {
                let addr = global
                    .global_addr()
                    .ok_or_else(|| CompileError::invariant("pushAddressOfGlobal needs a global"))?;
                let addr = u8::try_from(addr).map_err(|_| {
                    CompileError::unsupported_size(format!(
                        "address ${:04X} does not fit a zero-page pointer",
                        addr
                    ))
                })?;
                x.imm(Mnemonic::Lda, addr);
                x.op(Mnemonic::Pha);
            }
            Inst::PushAddressOfField {
                offset, pointer, ..
            } => match pointer.size {
                SHORT_POINTER_SIZE => {
                    x.op(Mnemonic::Pla);
                    x.op(Mnemonic::Clc);
                    x.imm(Mnemonic::Adc, *offset);
                    x.op(Mnemonic::Pha);
                }
                LONG_POINTER_SIZE => {
                    let s0 = x.scratch(0)?;
                    x.op(Mnemonic::Pla);
                    x.direct(Mnemonic::Sta, s0);
                    x.op(Mnemonic::Pla);
                    x.op(Mnemonic::Clc);
                    x.imm(Mnemonic::Adc, *offset);
                    x.op(Mnemonic::Pha);
                    x.direct(Mnemonic::Lda, s0);
                    x.imm(Mnemonic::Adc, 0);
                    x.op(Mnemonic::Pha);
                }
                other => {
                    return Err(CompileError::unsupported_size(format!(
                        "{}-byte pointer on the stack",
                        other
                    )))
                }
            },
            Inst::PushDereferenceFromStack { pointer, result } => {
                x.push_through_pointer(pointer, 0, result)?;
            }
            Inst::PushFieldFromStack {
                pointer,
                offset,
                result,
            } => {
                x.push_through_pointer(pointer, *offset, result)?;
            }
            Inst::PopToGlobal { target, stack } => {
                let t = x.access(target)?;
                let discard = stack.size.checked_sub(target.size()).ok_or_else(|| {
                    CompileError::unsupported_size(format!(
                        "popping {} bytes into a {}-byte target",
                        stack.size,
                        target.size()
                    ))
                })?;
                for _ in 0..discard {
                    x.op(Mnemonic::Pla);
                }
                for i in (0..target.size()).rev() {
                    x.op(Mnemonic::Pla);
                    x.apply(&t, Mnemonic::Sta, i)?;
                }
            }
            Inst::PopToAddressFromStack { value, pointer } => {
                x.pop_through_pointer(value, pointer, 0)?;
            }
            Inst::PopToFieldFromStack {
                value,
                pointer,
                offset,
            } => {
                x.pop_through_pointer(value, pointer, *offset)?;
            }
            Inst::PopToRegister { register, .. } => {
                x.op(Mnemonic::Pla);
                match register {
                    Register::A => {}
                    Register::X => x.op(Mnemonic::Tax),
                    Register::Y => x.op(Mnemonic::Tay),
                }
            }
            Inst::PopStack { stack } => {
                for _ in 0..stack.size {
                    x.op(Mnemonic::Pla);
                }
            }
            Inst::Duplicate { stack } => {
                for _ in 0..stack.size {
                    x.op(Mnemonic::Tsx);
                    x.out.push(Statement::op(
                        Mnemonic::Lda,
                        Mode::IndexedX(Address::Numeric(STACK_PAGE + stack.size as u16)),
                    ));
                    x.op(Mnemonic::Pha);
                }
            }
            Inst::AddFromStack { .. } => x.binary(&[Mnemonic::Clc, Mnemonic::Adc])?,
            Inst::SubFromStack { .. } => x.binary(&[Mnemonic::Sec, Mnemonic::Sbc])?,
            Inst::OrFromStack { .. } => x.binary(&[Mnemonic::Ora])?,
            Inst::CompareEqualToFromStack { .. } => {
                let s0 = x.scratch(0)?;
                let t = x.local("true");
                let end = x.local("end");
                x.op(Mnemonic::Pla);
                x.direct(Mnemonic::Sta, s0);
                x.op(Mnemonic::Pla);
                x.direct(Mnemonic::Cmp, s0);
                x.jump(Mnemonic::Beq, &t);
                x.imm(Mnemonic::Lda, 0);
                x.jump(Mnemonic::Beq, &end);
                x.label(t);
                x.imm(Mnemonic::Lda, 1);
                x.label(end);
                x.op(Mnemonic::Pha);
            }
            Inst::CompareGreaterThanFromStack { .. } => {
                let s0 = x.scratch(0)?;
                x.op(Mnemonic::Pla);
                x.direct(Mnemonic::Sta, s0);
                x.op(Mnemonic::Pla);
                x.direct(Mnemonic::Cmp, s0);
                x.greater_than_to_a();
                x.op(Mnemonic::Pha);
            }
            Inst::Branch { target } => x.jump(Mnemonic::Jmp, target),
            Inst::BranchTrueFromStack { target, .. } => {
                x.op(Mnemonic::Pla);
                x.conditional_jump(Mnemonic::Beq, target);
            }
            Inst::BranchFalseFromStack { target, .. } => {
                x.op(Mnemonic::Pla);
                x.conditional_jump(Mnemonic::Bne, target);
            }
            Inst::CallVoid { target } => x.jump(Mnemonic::Jsr, target),
            Inst::ReturnFromCall => x.op(Mnemonic::Rts),
            Inst::Label { name } => x.label(name.clone()),

            Inst::AssignConstantToGlobal { constant, target } => {
                let c = x.direct_access(constant)?;
                let t = x.direct_access(target)?;
                for i in 0..target.size() {
                    x.apply(&c, Mnemonic::Lda, i)?;
                    x.apply(&t, Mnemonic::Sta, i)?;
                }
            }
            Inst::CopyGlobalToGlobal { source, target } => {
                let s = x.direct_access(source)?;
                let t = x.direct_access(target)?;
                for i in 0..target.size() {
                    x.apply(&s, Mnemonic::Lda, i)?;
                    x.apply(&t, Mnemonic::Sta, i)?;
                }
            }
            Inst::AddFromGlobalAndConstant { global, constant } => {
                x.arith(global, Mnemonic::Clc, Mnemonic::Adc, constant)?;
                x.op(Mnemonic::Pha);
            }
            Inst::AddFromGlobalAndConstantToGlobal {
                global,
                constant,
                target,
            } => {
                x.arith(global, Mnemonic::Clc, Mnemonic::Adc, constant)?;
                x.store_a(target)?;
            }
            Inst::IncrementGlobal { global, amount } => {
                x.repeat_rmw(Mnemonic::Inc, global, *amount)?;
            }
            Inst::AddFromAddresses { first, second } => {
                x.arith(first, Mnemonic::Clc, Mnemonic::Adc, second)?;
                x.op(Mnemonic::Pha);
            }
            Inst::AddFromAddressesToAddress {
                first,
                second,
                target,
            } => {
                x.arith(first, Mnemonic::Clc, Mnemonic::Adc, second)?;
                x.store_a(target)?;
            }
            Inst::AddFromAddressesToAddresses {
                first,
                second,
                target,
                copy,
            } => {
                x.arith(first, Mnemonic::Clc, Mnemonic::Adc, second)?;
                x.store_a(target)?;
                x.store_a(copy)?;
            }
            Inst::SubFromGlobalAndConstant { global, constant } => {
                x.arith(global, Mnemonic::Sec, Mnemonic::Sbc, constant)?;
                x.op(Mnemonic::Pha);
            }
            Inst::SubFromGlobalAndConstantToGlobal {
                global,
                constant,
                target,
            } => {
                x.arith(global, Mnemonic::Sec, Mnemonic::Sbc, constant)?;
                x.store_a(target)?;
            }
            Inst::DecrementGlobal { global, amount } => {
                x.repeat_rmw(Mnemonic::Dec, global, *amount)?;
            }
            Inst::CompareGreaterThanFromGlobalAndConstant { global, constant } => {
                x.compare_global_constant(global, constant, |x| {
                    x.op(Mnemonic::Pha);
                    Ok(())
                })?;
            }
            Inst::CompareGreaterThanFromGlobalAndConstantToGlobal {
                global,
                constant,
                target,
            } => {
                x.compare_global_constant(global, constant, |x| x.store_a(target))?;
            }
            Inst::BranchIfGreaterThanFromGlobalAndConstant {
                global,
                constant,
                target,
            } => {
                let g = x.direct_access(global)?;
                let c = x.direct_access(constant)?;
                let skip = x.local("skip");
                x.apply(&g, Mnemonic::Lda, 0)?;
                if constant.constant_value() != Some(0) {
                    x.apply(&c, Mnemonic::Cmp, 0)?;
                    x.jump(Mnemonic::Bcc, &skip);
                }
                x.jump(Mnemonic::Beq, &skip);
                x.jump(Mnemonic::Jmp, target);
                x.label(skip);
            }
            Inst::BranchTrueFromGlobal { global, target } => {
                let g = x.direct_access(global)?;
                x.apply(&g, Mnemonic::Lda, 0)?;
                x.conditional_jump(Mnemonic::Beq, target);
            }
        }

        let used = x.slots.used();
        let out = x.out;
        trace!(
            "{} -> {} statements, {} bytes, {} scratch",
            inst.name(),
            out.len(),
            encoded_len(&out),
            used.count()
        );
        Ok(out)
    }

    /// Expand a whole instruction stream.
    pub fn emit_program(&mut self, insts: &[Inst]) -> Result<Vec<Statement>, Diagnostic> {
        let mut out = Vec::new();
        for (index, inst) in insts.iter().enumerate() {
            if self.annotate {
                out.push(Statement::Comment(inst.name().to_string()));
            }
            out.extend(self.emit(inst).map_err(|e| e.at(index))?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{pointer_of, Type, TypeRegistry};

    fn render(statements: &[Statement]) -> Vec<String> {
        statements.iter().map(|s| s.to_string().trim().to_string()).collect()
    }

    fn byte(addr: u16) -> Operand {
        Operand::global(&TypeRegistry::new(), addr, Type::BYTE, None).unwrap()
    }

    #[test]
    fn test_add_from_stack_template() {
        let out = Emitter::new()
            .emit(&Inst::AddFromStack {
                first: StackSlot::BYTE,
                second: StackSlot::BYTE,
            })
            .unwrap();
        assert_eq!(
            render(&out),
            vec!["PLA", "STA $80", "PLA", "CLC", "ADC $80", "PHA"]
        );
        assert_eq!(scratch_used(&out).count(), 1);
    }

    #[test]
    fn test_compare_labels_are_unique_per_expansion() {
        let mut emitter = Emitter::new();
        let inst = Inst::CompareGreaterThanFromStack {
            first: StackSlot::BYTE,
            second: StackSlot::BYTE,
        };
        let a = render(&emitter.emit(&inst).unwrap());
        let b = render(&emitter.emit(&inst).unwrap());
        assert!(a.contains(&"_vil_0_true".to_string()));
        assert!(b.contains(&"_vil_1_true".to_string()));
    }

    #[test]
    fn test_pop_to_global_truncates_high_bytes() {
        let out = Emitter::new()
            .emit(&Inst::PopToGlobal {
                target: byte(0x90),
                stack: StackSlot::new(Type::BYTE, 2),
            })
            .unwrap();
        assert_eq!(render(&out), vec!["PLA", "PLA", "STA $90"]);
    }

    #[test]
    fn test_increment_uses_inc() {
        let out = Emitter::new()
            .emit(&Inst::IncrementGlobal {
                global: byte(0x90),
                amount: 2,
            })
            .unwrap();
        assert_eq!(render(&out), vec!["INC $90", "INC $90"]);
        assert_eq!(encoded_len(&out), 4);
    }

    #[test]
    fn test_push_address_of_global_requires_zero_page() {
        let err = Emitter::new()
            .emit(&Inst::PushAddressOfGlobal {
                global: byte(0x0200),
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::UnsupportedSize);
    }

    #[test]
    fn test_long_pointer_store_uses_two_slots() {
        let ptr = pointer_of(Type::BYTE).unwrap();
        let out = Emitter::new()
            .emit(&Inst::PopToAddressFromStack {
                value: StackSlot::BYTE,
                pointer: StackSlot::new(ptr, 2),
            })
            .unwrap();
        assert_eq!(
            render(&out),
            vec![
                "PLA", "TAX", "PLA", "STA $81", "PLA", "STA $80", "TXA", "LDY #$00",
                "STA ($80),Y"
            ]
        );
        assert_eq!(scratch_used(&out).span(), 2);
    }

    #[test]
    fn test_annotations_name_the_instruction() {
        let mut emitter = Emitter::with_annotations(true);
        let out = emitter.emit_program(&[Inst::ReturnFromCall]).unwrap();
        assert_eq!(render(&out), vec!["; returnFromCall", "RTS"]);
    }
}
