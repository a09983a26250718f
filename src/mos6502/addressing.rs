// This module resolves operand descriptors into concrete 6502 addressing. A constant becomes
// immediate bytes. A global, or a field of a global, becomes a direct address with the field
// offset folded in at compile time. A dereference or a field reached through a pointer
// depends on the pointer's width: a 1-byte zero-page pointer is loaded into X and each byte
// is accessed as offset,X, while a 2-byte long pointer is first copied into two reserved
// scratch bytes and each byte is accessed as (scratch),Y with the offset in Y. A ROM element
// with a constant index folds to label+index, and one indexed from the stack pops the index
// into X and reads label,X. Resolution yields the setup statements to run once, followed by
// per-byte load and store accessors used by the emitter templates.

//! Operand addressing resolver.

use super::isa::{Address, Mnemonic, Mode, Statement};
use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::{Operand, RomIndex};
use crate::core::reserved::{ReservedSlots, ScratchSlot};
use crate::core::types::{LONG_POINTER_SIZE, SHORT_POINTER_SIZE};

/// How the bytes of an operand are reached once setup has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Immediate { value: u16, size: u8 },
    Direct { addr: Address, size: u8 },
    /// X holds the pointer; byte `i` is at `offset + i,X`.
    ShortPointer { offset: u8, size: u8 },
    /// The pointer is in `base`/`base + 1`; byte `i` is at `(base),Y` with `Y = offset + i`.
    LongPointer { base: ScratchSlot, offset: u8, size: u8 },
    /// X holds the index popped from the stack.
    RomIndexed { label: String },
}

/// A resolved operand: setup statements plus the access strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub setup: Vec<Statement>,
    pub access: Access,
}

/// Resolve `operand`, drawing any scratch bytes from `slots`.
pub fn resolve(operand: &Operand, slots: &mut ReservedSlots) -> CompileResult<Resolved> {
    match operand {
        Operand::Constant { value, size, .. } => Ok(Resolved {
            setup: Vec::new(),
            access: Access::Immediate {
                value: *value,
                size: *size,
            },
        }),
        Operand::Global { addr, size, .. } => Ok(Resolved {
            setup: Vec::new(),
            access: Access::Direct {
                addr: Address::Numeric(*addr),
                size: *size,
            },
        }),
        Operand::Field {
            base, offset, size, ..
        } => match base.as_ref() {
            Operand::Global { addr, .. } => Ok(Resolved {
                setup: Vec::new(),
                access: Access::Direct {
                    addr: Address::Numeric(addr.wrapping_add(*offset as u16)),
                    size: *size,
                },
            }),
            Operand::PointerDeref {
                base: pointer,
                pointer_size,
                ..
            } => through_pointer(pointer, *pointer_size, *offset, *size, slots),
            other => Err(CompileError::invariant(format!(
                "field base {:?} has no addressing strategy",
                other.kind()
            ))),
        },
        Operand::PointerDeref {
            base,
            pointer_size,
            size,
            ..
        } => through_pointer(base, *pointer_size, 0, *size, slots),
        Operand::RomElement { label, index, .. } => match index {
            RomIndex::Constant(i) => Ok(Resolved {
                setup: Vec::new(),
                access: Access::Direct {
                    addr: Address::Symbol {
                        label: label.clone(),
                        offset: *i as u16,
                    },
                    size: 1,
                },
            }),
            RomIndex::Stack => Ok(Resolved {
                setup: vec![
                    Statement::implied(Mnemonic::Pla),
                    Statement::implied(Mnemonic::Tax),
                ],
                access: Access::RomIndexed {
                    label: label.clone(),
                },
            }),
        },
    }
}

fn through_pointer(
    pointer: &Operand,
    pointer_size: u8,
    offset: u8,
    size: u8,
    slots: &mut ReservedSlots,
) -> CompileResult<Resolved> {
    let addr = pointer.global_addr().ok_or_else(|| {
        CompileError::invariant("pointer operand is not stored in a global")
    })?;
    match pointer_size {
        SHORT_POINTER_SIZE => Ok(Resolved {
            setup: vec![Statement::direct(Mnemonic::Ldx, addr)],
            access: Access::ShortPointer { offset, size },
        }),
        LONG_POINTER_SIZE => {
            let lo = slots.slot(0)?;
            let hi = slots.slot(1)?;
            Ok(Resolved {
                setup: vec![
                    Statement::direct(Mnemonic::Lda, addr),
                    Statement::direct(Mnemonic::Sta, lo.address()),
                    Statement::direct(Mnemonic::Lda, addr.wrapping_add(1)),
                    Statement::direct(Mnemonic::Sta, hi.address()),
                ],
                access: Access::LongPointer {
                    base: lo,
                    offset,
                    size,
                },
            })
        }
        other => Err(CompileError::unsupported_size(format!(
            "{}-byte pointer",
            other
        ))),
    }
}

impl Access {
    pub fn size(&self) -> u8 {
        match self {
            Access::Immediate { size, .. }
            | Access::Direct { size, .. }
            | Access::ShortPointer { size, .. }
            | Access::LongPointer { size, .. } => *size,
            Access::RomIndexed { .. } => 1,
        }
    }

    /// Append statements that apply `mnemonic` to byte `i` (LDA, ADC, CMP, STA, ...).
    pub fn apply(&self, mnemonic: Mnemonic, i: u8, out: &mut Vec<Statement>) -> CompileResult<()> {
        if i >= self.size() {
            return Err(CompileError::invariant(format!(
                "byte {} out of range for a {}-byte operand",
                i,
                self.size()
            )));
        }
        match self {
            Access::Immediate { value, .. } => {
                if mnemonic == Mnemonic::Sta {
                    return Err(CompileError::invariant("cannot store to an immediate"));
                }
                out.push(Statement::imm(mnemonic, (value >> (8 * i as u16)) as u8));
            }
            Access::Direct { addr, .. } => {
                out.push(Statement::op(mnemonic, Mode::Direct(addr.offset(i as u16))));
            }
            Access::ShortPointer { offset, .. } => {
                out.push(Statement::op(
                    mnemonic,
                    Mode::IndexedX(Address::Numeric(offset.wrapping_add(i) as u16)),
                ));
            }
            Access::LongPointer { base, offset, .. } => {
                out.push(Statement::imm(Mnemonic::Ldy, offset.wrapping_add(i)));
                out.push(Statement::op(mnemonic, Mode::IndirectY(base.address() as u8)));
            }
            Access::RomIndexed { label } => {
                if mnemonic == Mnemonic::Sta {
                    return Err(CompileError::invariant("cannot store to ROM"));
                }
                out.push(Statement::op(
                    mnemonic,
                    Mode::IndexedX(Address::Symbol {
                        label: label.clone(),
                        offset: 0,
                    }),
                ));
            }
        }
        Ok(())
    }

    /// Direct address of byte 0, for read-modify-write instructions like INC.
    pub fn direct_address(&self) -> Option<&Address> {
        match self {
            Access::Direct { addr, .. } => Some(addr),
            _ => None,
        }
    }
}
