// This module defines the VIL instruction set as a closed sum type. Inst has one variant per
// catalog entry, primitives first and composites after, so the fusion engine, the verifier
// and the emitter can match on it exhaustively. Each variant carries the operand descriptors
// and stack-slot metadata (type and byte size of every value it pops or pushes) that the
// front end attached. InstKind is the payload-free discriminant used by the catalog and by
// fusion patterns. Arg is the uniform argument representation shared by the textual parser
// and printer: every instruction converts to and from an ordered argument list whose shape
// the catalog declares. StackEffect spells out the typed pop list (top of stack first) and
// push list of a concrete instruction, and Program bundles an instruction stream with the
// type registry its operands were resolved against.

//! The VIL instruction set.

pub mod builder;
pub mod catalog;
pub mod verifier;

use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::Operand;
use crate::core::reserved::Register;
use crate::core::types::{pointer_of, result_type, Type, TypeOp, TypeRegistry};
use std::fmt;

pub use builder::Builder;
pub use catalog::{Catalog, InstClass, InstDescriptor, ParamKind};
pub use verifier::verify;

/// Type and size of one value on the VIL stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackSlot {
    pub ty: Type,
    pub size: u8,
}

impl StackSlot {
    pub const fn new(ty: Type, size: u8) -> Self {
        Self { ty, size }
    }

    pub const BYTE: StackSlot = StackSlot::new(Type::BYTE, 1);
    pub const BOOLEAN: StackSlot = StackSlot::new(Type::BOOLEAN, 1);

    /// The slot a value read from `operand` occupies.
    pub fn of(operand: &Operand) -> Self {
        Self::new(operand.ty(), operand.size())
    }
}

/// Typed stack effect of one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackEffect {
    /// Popped values, top of stack first.
    pub pop: Vec<StackSlot>,
    /// Pushed values, in push order.
    pub push: Vec<StackSlot>,
}

impl StackEffect {
    fn new(pop: Vec<StackSlot>, push: Vec<StackSlot>) -> Self {
        Self { pop, push }
    }

    /// Net change in stack bytes.
    pub fn net_bytes(&self) -> i32 {
        let pushed: i32 = self.push.iter().map(|s| s.size as i32).sum();
        let popped: i32 = self.pop.iter().map(|s| s.size as i32).sum();
        pushed - popped
    }
}

/// One VIL instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    // Primitives.
    PushConstant { constant: Operand },
    PushGlobal { source: Operand },
    PushAddressOfGlobal { global: Operand },
    PushAddressOfField { offset: u8, field_ty: Type, pointer: StackSlot },
    PushDereferenceFromStack { pointer: StackSlot, result: StackSlot },
    PushFieldFromStack { pointer: StackSlot, offset: u8, result: StackSlot },
    PopToGlobal { target: Operand, stack: StackSlot },
    PopToAddressFromStack { value: StackSlot, pointer: StackSlot },
    PopToFieldFromStack { value: StackSlot, pointer: StackSlot, offset: u8 },
    PopToRegister { register: Register, stack: StackSlot },
    PopStack { stack: StackSlot },
    Duplicate { stack: StackSlot },
    AddFromStack { first: StackSlot, second: StackSlot },
    SubFromStack { first: StackSlot, second: StackSlot },
    OrFromStack { first: StackSlot, second: StackSlot },
    CompareEqualToFromStack { first: StackSlot, second: StackSlot },
    CompareGreaterThanFromStack { first: StackSlot, second: StackSlot },
    Branch { target: String },
    BranchTrueFromStack { target: String, stack: StackSlot },
    BranchFalseFromStack { target: String, stack: StackSlot },
    CallVoid { target: String },
    ReturnFromCall,
    Label { name: String },

    // Composites.
    AssignConstantToGlobal { constant: Operand, target: Operand },
    CopyGlobalToGlobal { source: Operand, target: Operand },
    AddFromGlobalAndConstant { global: Operand, constant: Operand },
    AddFromGlobalAndConstantToGlobal { global: Operand, constant: Operand, target: Operand },
    IncrementGlobal { global: Operand, amount: u8 },
    AddFromAddresses { first: Operand, second: Operand },
    AddFromAddressesToAddress { first: Operand, second: Operand, target: Operand },
    AddFromAddressesToAddresses { first: Operand, second: Operand, target: Operand, copy: Operand },
    SubFromGlobalAndConstant { global: Operand, constant: Operand },
    SubFromGlobalAndConstantToGlobal { global: Operand, constant: Operand, target: Operand },
    DecrementGlobal { global: Operand, amount: u8 },
    CompareGreaterThanFromGlobalAndConstant { global: Operand, constant: Operand },
    CompareGreaterThanFromGlobalAndConstantToGlobal { global: Operand, constant: Operand, target: Operand },
    BranchIfGreaterThanFromGlobalAndConstant { global: Operand, constant: Operand, target: String },
    BranchTrueFromGlobal { global: Operand, target: String },
}

/// Payload-free instruction discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstKind {
    PushConstant,
    PushGlobal,
    PushAddressOfGlobal,
    PushAddressOfField,
    PushDereferenceFromStack,
    PushFieldFromStack,
    PopToGlobal,
    PopToAddressFromStack,
    PopToFieldFromStack,
    PopToRegister,
    PopStack,
    Duplicate,
    AddFromStack,
    SubFromStack,
    OrFromStack,
    CompareEqualToFromStack,
    CompareGreaterThanFromStack,
    Branch,
    BranchTrueFromStack,
    BranchFalseFromStack,
    CallVoid,
    ReturnFromCall,
    Label,
    AssignConstantToGlobal,
    CopyGlobalToGlobal,
    AddFromGlobalAndConstant,
    AddFromGlobalAndConstantToGlobal,
    IncrementGlobal,
    AddFromAddresses,
    AddFromAddressesToAddress,
    AddFromAddressesToAddresses,
    SubFromGlobalAndConstant,
    SubFromGlobalAndConstantToGlobal,
    DecrementGlobal,
    CompareGreaterThanFromGlobalAndConstant,
    CompareGreaterThanFromGlobalAndConstantToGlobal,
    BranchIfGreaterThanFromGlobalAndConstant,
    BranchTrueFromGlobal,
}

impl InstKind {
    pub const ALL: [InstKind; 38] = [
        InstKind::PushConstant,
        InstKind::PushGlobal,
        InstKind::PushAddressOfGlobal,
        InstKind::PushAddressOfField,
        InstKind::PushDereferenceFromStack,
        InstKind::PushFieldFromStack,
        InstKind::PopToGlobal,
        InstKind::PopToAddressFromStack,
        InstKind::PopToFieldFromStack,
        InstKind::PopToRegister,
        InstKind::PopStack,
        InstKind::Duplicate,
        InstKind::AddFromStack,
        InstKind::SubFromStack,
        InstKind::OrFromStack,
        InstKind::CompareEqualToFromStack,
        InstKind::CompareGreaterThanFromStack,
        InstKind::Branch,
        InstKind::BranchTrueFromStack,
        InstKind::BranchFalseFromStack,
        InstKind::CallVoid,
        InstKind::ReturnFromCall,
        InstKind::Label,
        InstKind::AssignConstantToGlobal,
        InstKind::CopyGlobalToGlobal,
        InstKind::AddFromGlobalAndConstant,
        InstKind::AddFromGlobalAndConstantToGlobal,
        InstKind::IncrementGlobal,
        InstKind::AddFromAddresses,
        InstKind::AddFromAddressesToAddress,
        InstKind::AddFromAddressesToAddresses,
        InstKind::SubFromGlobalAndConstant,
        InstKind::SubFromGlobalAndConstantToGlobal,
        InstKind::DecrementGlobal,
        InstKind::CompareGreaterThanFromGlobalAndConstant,
        InstKind::CompareGreaterThanFromGlobalAndConstantToGlobal,
        InstKind::BranchIfGreaterThanFromGlobalAndConstant,
        InstKind::BranchTrueFromGlobal,
    ];

    /// Canonical textual name.
    pub fn name(self) -> &'static str {
        match self {
            InstKind::PushConstant => "pushConstant",
            InstKind::PushGlobal => "pushGlobal",
            InstKind::PushAddressOfGlobal => "pushAddressOfGlobal",
            InstKind::PushAddressOfField => "pushAddressOfField",
            InstKind::PushDereferenceFromStack => "pushDereferenceFromStack",
            InstKind::PushFieldFromStack => "pushFieldFromStack",
            InstKind::PopToGlobal => "popToGlobal",
            InstKind::PopToAddressFromStack => "popToAddressFromStack",
            InstKind::PopToFieldFromStack => "popToFieldFromStack",
            InstKind::PopToRegister => "popToRegister",
            InstKind::PopStack => "popStack",
            InstKind::Duplicate => "duplicate",
            InstKind::AddFromStack => "addFromStack",
            InstKind::SubFromStack => "subFromStack",
            InstKind::OrFromStack => "orFromStack",
            InstKind::CompareEqualToFromStack => "compareEqualToFromStack",
            InstKind::CompareGreaterThanFromStack => "compareGreaterThanFromStack",
            InstKind::Branch => "branch",
            InstKind::BranchTrueFromStack => "branchTrueFromStack",
            InstKind::BranchFalseFromStack => "branchFalseFromStack",
            InstKind::CallVoid => "callVoid",
            InstKind::ReturnFromCall => "returnFromCall",
            InstKind::Label => "label",
            InstKind::AssignConstantToGlobal => "assignConstantToGlobal",
            InstKind::CopyGlobalToGlobal => "copyGlobalToGlobal",
            InstKind::AddFromGlobalAndConstant => "addFromGlobalAndConstant",
            InstKind::AddFromGlobalAndConstantToGlobal => "addFromGlobalAndConstantToGlobal",
            InstKind::IncrementGlobal => "incrementGlobal",
            InstKind::AddFromAddresses => "addFromAddresses",
            InstKind::AddFromAddressesToAddress => "addFromAddressesToAddress",
            InstKind::AddFromAddressesToAddresses => "addFromAddressesToAddresses",
            InstKind::SubFromGlobalAndConstant => "subFromGlobalAndConstant",
            InstKind::SubFromGlobalAndConstantToGlobal => "subFromGlobalAndConstantToGlobal",
            InstKind::DecrementGlobal => "decrementGlobal",
            InstKind::CompareGreaterThanFromGlobalAndConstant => {
                "compareGreaterThanFromGlobalAndConstant"
            }
            InstKind::CompareGreaterThanFromGlobalAndConstantToGlobal => {
                "compareGreaterThanFromGlobalAndConstantToGlobal"
            }
            InstKind::BranchIfGreaterThanFromGlobalAndConstant => {
                "branchIfGreaterThanFromGlobalAndConstant"
            }
            InstKind::BranchTrueFromGlobal => "branchTrueFromGlobal",
        }
    }

    pub fn is_composite(self) -> bool {
        self >= InstKind::AssignConstantToGlobal
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One textual argument of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Operand(Operand),
    Slot(StackSlot),
    Type(Type),
    Number(u16),
    Label(String),
}

impl Inst {
    pub fn kind(&self) -> InstKind {
        match self {
            Inst::PushConstant { .. } => InstKind::PushConstant,
            Inst::PushGlobal { .. } => InstKind::PushGlobal,
            Inst::PushAddressOfGlobal { .. } => InstKind::PushAddressOfGlobal,
            Inst::PushAddressOfField { .. } => InstKind::PushAddressOfField,
            Inst::PushDereferenceFromStack { .. } => InstKind::PushDereferenceFromStack,
            Inst::PushFieldFromStack { .. } => InstKind::PushFieldFromStack,
            Inst::PopToGlobal { .. } => InstKind::PopToGlobal,
            Inst::PopToAddressFromStack { .. } => InstKind::PopToAddressFromStack,
            Inst::PopToFieldFromStack { .. } => InstKind::PopToFieldFromStack,
            Inst::PopToRegister { .. } => InstKind::PopToRegister,
            Inst::PopStack { .. } => InstKind::PopStack,
            Inst::Duplicate { .. } => InstKind::Duplicate,
            Inst::AddFromStack { .. } => InstKind::AddFromStack,
            Inst::SubFromStack { .. } => InstKind::SubFromStack,
            Inst::OrFromStack { .. } => InstKind::OrFromStack,
            Inst::CompareEqualToFromStack { .. } => InstKind::CompareEqualToFromStack,
            Inst::CompareGreaterThanFromStack { .. } => InstKind::CompareGreaterThanFromStack,
            Inst::Branch { .. } => InstKind::Branch,
            Inst::BranchTrueFromStack { .. } => InstKind::BranchTrueFromStack,
            Inst::BranchFalseFromStack { .. } => InstKind::BranchFalseFromStack,
            Inst::CallVoid { .. } => InstKind::CallVoid,
            Inst::ReturnFromCall => InstKind::ReturnFromCall,
            Inst::Label { .. } => InstKind::Label,
            Inst::AssignConstantToGlobal { .. } => InstKind::AssignConstantToGlobal,
            Inst::CopyGlobalToGlobal { .. } => InstKind::CopyGlobalToGlobal,
            Inst::AddFromGlobalAndConstant { .. } => InstKind::AddFromGlobalAndConstant,
            Inst::AddFromGlobalAndConstantToGlobal { .. } => {
                InstKind::AddFromGlobalAndConstantToGlobal
            }
            Inst::IncrementGlobal { .. } => InstKind::IncrementGlobal,
            Inst::AddFromAddresses { .. } => InstKind::AddFromAddresses,
            Inst::AddFromAddressesToAddress { .. } => InstKind::AddFromAddressesToAddress,
            Inst::AddFromAddressesToAddresses { .. } => InstKind::AddFromAddressesToAddresses,
            Inst::SubFromGlobalAndConstant { .. } => InstKind::SubFromGlobalAndConstant,
            Inst::SubFromGlobalAndConstantToGlobal { .. } => {
                InstKind::SubFromGlobalAndConstantToGlobal
            }
            Inst::DecrementGlobal { .. } => InstKind::DecrementGlobal,
            Inst::CompareGreaterThanFromGlobalAndConstant { .. } => {
                InstKind::CompareGreaterThanFromGlobalAndConstant
            }
            Inst::CompareGreaterThanFromGlobalAndConstantToGlobal { .. } => {
                InstKind::CompareGreaterThanFromGlobalAndConstantToGlobal
            }
            Inst::BranchIfGreaterThanFromGlobalAndConstant { .. } => {
                InstKind::BranchIfGreaterThanFromGlobalAndConstant
            }
            Inst::BranchTrueFromGlobal { .. } => InstKind::BranchTrueFromGlobal,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Typed stack effect of this instruction.
    pub fn stack_effect(&self) -> CompileResult<StackEffect> {
        let effect = match self {
            Inst::PushConstant { constant } => StackEffect::new(vec![], vec![StackSlot::of(constant)]),
            Inst::PushGlobal { source } => {
                let pop = if source.consumes_stack_index() {
                    vec![StackSlot::BYTE]
                } else {
                    vec![]
                };
                StackEffect::new(pop, vec![StackSlot::of(source)])
            }
            Inst::PushAddressOfGlobal { global } => {
                StackEffect::new(vec![], vec![StackSlot::new(pointer_of(global.ty())?, 1)])
            }
            Inst::PushAddressOfField {
                field_ty, pointer, ..
            } => StackEffect::new(
                vec![*pointer],
                vec![StackSlot::new(pointer_of(*field_ty)?, pointer.size)],
            ),
            Inst::PushDereferenceFromStack { pointer, result }
            | Inst::PushFieldFromStack {
                pointer, result, ..
            } => StackEffect::new(vec![*pointer], vec![*result]),
            Inst::PopToGlobal { stack, .. } => StackEffect::new(vec![*stack], vec![]),
            Inst::PopToAddressFromStack { value, pointer }
            | Inst::PopToFieldFromStack { value, pointer, .. } => {
                StackEffect::new(vec![*value, *pointer], vec![])
            }
            Inst::PopToRegister { stack, .. } | Inst::PopStack { stack } => {
                StackEffect::new(vec![*stack], vec![])
            }
            Inst::Duplicate { stack } => StackEffect::new(vec![*stack], vec![*stack, *stack]),
            Inst::AddFromStack { first, second } => binary_effect(TypeOp::Add, first, second)?,
            Inst::SubFromStack { first, second } => binary_effect(TypeOp::Sub, first, second)?,
            Inst::OrFromStack { first, second } => {
                binary_effect(TypeOp::BitwiseOr, first, second)?
            }
            Inst::CompareEqualToFromStack { first, second }
            | Inst::CompareGreaterThanFromStack { first, second } => {
                binary_effect(TypeOp::Compare, first, second)?
            }
            Inst::BranchTrueFromStack { stack, .. } | Inst::BranchFalseFromStack { stack, .. } => {
                StackEffect::new(vec![*stack], vec![])
            }
            Inst::Branch { .. }
            | Inst::CallVoid { .. }
            | Inst::ReturnFromCall
            | Inst::Label { .. } => StackEffect::default(),
            Inst::AddFromGlobalAndConstant { global, constant } => StackEffect::new(
                vec![],
                vec![StackSlot::new(result_type(TypeOp::Add, global.ty(), constant.ty())?, 1)],
            ),
            Inst::AddFromAddresses { first, second } => StackEffect::new(
                vec![],
                vec![StackSlot::new(result_type(TypeOp::Add, first.ty(), second.ty())?, 1)],
            ),
            Inst::SubFromGlobalAndConstant { global, constant } => StackEffect::new(
                vec![],
                vec![StackSlot::new(result_type(TypeOp::Sub, global.ty(), constant.ty())?, 1)],
            ),
            Inst::CompareGreaterThanFromGlobalAndConstant { global, constant } => {
                StackEffect::new(
                    vec![],
                    vec![StackSlot::new(
                        result_type(TypeOp::Compare, global.ty(), constant.ty())?,
                        1,
                    )],
                )
            }
            Inst::AssignConstantToGlobal { .. }
            | Inst::CopyGlobalToGlobal { .. }
            | Inst::AddFromGlobalAndConstantToGlobal { .. }
            | Inst::IncrementGlobal { .. }
            | Inst::AddFromAddressesToAddress { .. }
            | Inst::AddFromAddressesToAddresses { .. }
            | Inst::SubFromGlobalAndConstantToGlobal { .. }
            | Inst::DecrementGlobal { .. }
            | Inst::CompareGreaterThanFromGlobalAndConstantToGlobal { .. }
            | Inst::BranchIfGreaterThanFromGlobalAndConstant { .. }
            | Inst::BranchTrueFromGlobal { .. } => StackEffect::default(),
        };
        Ok(effect)
    }

    /// Ordered argument list, in the shape the catalog declares for this kind.
    pub fn args(&self) -> Vec<Arg> {
        let op = |o: &Operand| Arg::Operand(o.clone());
        let label = |l: &String| Arg::Label(l.clone());
        match self {
            Inst::PushConstant { constant } => vec![op(constant)],
            Inst::PushGlobal { source } => vec![op(source)],
            Inst::PushAddressOfGlobal { global } => vec![op(global)],
            Inst::PushAddressOfField {
                offset,
                field_ty,
                pointer,
            } => vec![
                Arg::Number(*offset as u16),
                Arg::Type(*field_ty),
                Arg::Slot(*pointer),
            ],
            Inst::PushDereferenceFromStack { pointer, result } => {
                vec![Arg::Slot(*pointer), Arg::Slot(*result)]
            }
            Inst::PushFieldFromStack {
                pointer,
                offset,
                result,
            } => vec![
                Arg::Slot(*pointer),
                Arg::Number(*offset as u16),
                Arg::Slot(*result),
            ],
            Inst::PopToGlobal { target, stack } => vec![op(target), Arg::Slot(*stack)],
            Inst::PopToAddressFromStack { value, pointer } => {
                vec![Arg::Slot(*value), Arg::Slot(*pointer)]
            }
            Inst::PopToFieldFromStack {
                value,
                pointer,
                offset,
            } => vec![
                Arg::Slot(*value),
                Arg::Slot(*pointer),
                Arg::Number(*offset as u16),
            ],
            Inst::PopToRegister { register, stack } => {
                vec![Arg::Number(register.index() as u16), Arg::Slot(*stack)]
            }
            Inst::PopStack { stack } | Inst::Duplicate { stack } => vec![Arg::Slot(*stack)],
            Inst::AddFromStack { first, second }
            | Inst::SubFromStack { first, second }
            | Inst::OrFromStack { first, second }
            | Inst::CompareEqualToFromStack { first, second }
            | Inst::CompareGreaterThanFromStack { first, second } => {
                vec![Arg::Slot(*first), Arg::Slot(*second)]
            }
            Inst::Branch { target } | Inst::CallVoid { target } => vec![label(target)],
            Inst::BranchTrueFromStack { target, stack }
            | Inst::BranchFalseFromStack { target, stack } => {
                vec![label(target), Arg::Slot(*stack)]
            }
            Inst::ReturnFromCall => vec![],
            Inst::Label { name } => vec![label(name)],
            Inst::AssignConstantToGlobal { constant, target } => vec![op(constant), op(target)],
            Inst::CopyGlobalToGlobal { source, target } => vec![op(source), op(target)],
            Inst::AddFromGlobalAndConstant { global, constant }
            | Inst::SubFromGlobalAndConstant { global, constant }
            | Inst::CompareGreaterThanFromGlobalAndConstant { global, constant } => {
                vec![op(global), op(constant)]
            }
            Inst::AddFromGlobalAndConstantToGlobal {
                global,
                constant,
                target,
            }
            | Inst::SubFromGlobalAndConstantToGlobal {
                global,
                constant,
                target,
            }
            | Inst::CompareGreaterThanFromGlobalAndConstantToGlobal {
                global,
                constant,
                target,
            } => vec![op(global), op(constant), op(target)],
            Inst::IncrementGlobal { global, amount } | Inst::DecrementGlobal { global, amount } => {
                vec![op(global), Arg::Number(*amount as u16)]
            }
            Inst::AddFromAddresses { first, second } => vec![op(first), op(second)],
            Inst::AddFromAddressesToAddress {
                first,
                second,
                target,
            } => vec![op(first), op(second), op(target)],
            Inst::AddFromAddressesToAddresses {
                first,
                second,
                target,
                copy,
            } => vec![op(first), op(second), op(target), op(copy)],
            Inst::BranchIfGreaterThanFromGlobalAndConstant {
                global,
                constant,
                target,
            } => vec![op(global), op(constant), label(target)],
            Inst::BranchTrueFromGlobal { global, target } => vec![op(global), label(target)],
        }
    }

    /// Rebuild an instruction of `kind` from its argument list.
    ///
    /// Only the argument shape is checked here; operand validation is the
    /// builder's job.
    pub fn from_args(kind: InstKind, args: Vec<Arg>) -> CompileResult<Inst> {
        let mut args = ArgReader::new(kind, args);
        let inst = match kind {
            InstKind::PushConstant => Inst::PushConstant {
                constant: args.operand()?,
            },
            InstKind::PushGlobal => Inst::PushGlobal {
                source: args.operand()?,
            },
            InstKind::PushAddressOfGlobal => Inst::PushAddressOfGlobal {
                global: args.operand()?,
            },
            InstKind::PushAddressOfField => Inst::PushAddressOfField {
                offset: args.byte()?,
                field_ty: args.ty()?,
                pointer: args.slot()?,
            },
            InstKind::PushDereferenceFromStack => Inst::PushDereferenceFromStack {
                pointer: args.slot()?,
                result: args.slot()?,
            },
            InstKind::PushFieldFromStack => Inst::PushFieldFromStack {
                pointer: args.slot()?,
                offset: args.byte()?,
                result: args.slot()?,
            },
            InstKind::PopToGlobal => Inst::PopToGlobal {
                target: args.operand()?,
                stack: args.slot()?,
            },
            InstKind::PopToAddressFromStack => Inst::PopToAddressFromStack {
                value: args.slot()?,
                pointer: args.slot()?,
            },
            InstKind::PopToFieldFromStack => Inst::PopToFieldFromStack {
                value: args.slot()?,
                pointer: args.slot()?,
                offset: args.byte()?,
            },
            InstKind::PopToRegister => Inst::PopToRegister {
                register: Register::try_from(args.byte()?)?,
                stack: args.slot()?,
            },
            InstKind::PopStack => Inst::PopStack {
                stack: args.slot()?,
            },
            InstKind::Duplicate => Inst::Duplicate {
                stack: args.slot()?,
            },
            InstKind::AddFromStack => Inst::AddFromStack {
                first: args.slot()?,
                second: args.slot()?,
            },
            InstKind::SubFromStack => Inst::SubFromStack {
                first: args.slot()?,
                second: args.slot()?,
            },
            InstKind::OrFromStack => Inst::OrFromStack {
                first: args.slot()?,
                second: args.slot()?,
            },
            InstKind::CompareEqualToFromStack => Inst::CompareEqualToFromStack {
                first: args.slot()?,
                second: args.slot()?,
            },
            InstKind::CompareGreaterThanFromStack => Inst::CompareGreaterThanFromStack {
                first: args.slot()?,
                second: args.slot()?,
            },
            InstKind::Branch => Inst::Branch {
                target: args.label()?,
            },
            InstKind::BranchTrueFromStack => Inst::BranchTrueFromStack {
                target: args.label()?,
                stack: args.slot()?,
            },
            InstKind::BranchFalseFromStack => Inst::BranchFalseFromStack {
                target: args.label()?,
                stack: args.slot()?,
            },
            InstKind::CallVoid => Inst::CallVoid {
                target: args.label()?,
            },
            InstKind::ReturnFromCall => Inst::ReturnFromCall,
            InstKind::Label => Inst::Label {
                name: args.label()?,
            },
            InstKind::AssignConstantToGlobal => Inst::AssignConstantToGlobal {
                constant: args.operand()?,
                target: args.operand()?,
            },
            InstKind::CopyGlobalToGlobal => Inst::CopyGlobalToGlobal {
                source: args.operand()?,
                target: args.operand()?,
            },
            InstKind::AddFromGlobalAndConstant => Inst::AddFromGlobalAndConstant {
                global: args.operand()?,
                constant: args.operand()?,
            },
            InstKind::AddFromGlobalAndConstantToGlobal => Inst::AddFromGlobalAndConstantToGlobal {
                global: args.operand()?,
                constant: args.operand()?,
                target: args.operand()?,
            },
            InstKind::IncrementGlobal => Inst::IncrementGlobal {
                global: args.operand()?,
                amount: args.byte()?,
            },
            InstKind::AddFromAddresses => Inst::AddFromAddresses {
                first: args.operand()?,
                second: args.operand()?,
            },
            InstKind::AddFromAddressesToAddress => Inst::AddFromAddressesToAddress {
                first: args.operand()?,
                second: args.operand()?,
                target: args.operand()?,
            },
            InstKind::AddFromAddressesToAddresses => Inst::AddFromAddressesToAddresses {
                first: args.operand()?,
                second: args.operand()?,
                target: args.operand()?,
                copy: args.operand()?,
            },
            InstKind::SubFromGlobalAndConstant => Inst::SubFromGlobalAndConstant {
                global: args.operand()?,
                constant: args.operand()?,
            },
            InstKind::SubFromGlobalAndConstantToGlobal => Inst::SubFromGlobalAndConstantToGlobal {
                global: args.operand()?,
                constant: args.operand()?,
                target: args.operand()?,
            },
            InstKind::DecrementGlobal => Inst::DecrementGlobal {
                global: args.operand()?,
                amount: args.byte()?,
            },
            InstKind::CompareGreaterThanFromGlobalAndConstant => {
                Inst::CompareGreaterThanFromGlobalAndConstant {
                    global: args.operand()?,
                    constant: args.operand()?,
                }
            }
            InstKind::CompareGreaterThanFromGlobalAndConstantToGlobal => {
                Inst::CompareGreaterThanFromGlobalAndConstantToGlobal {
                    global: args.operand()?,
                    constant: args.operand()?,
                    target: args.operand()?,
                }
            }
            InstKind::BranchIfGreaterThanFromGlobalAndConstant => {
                Inst::BranchIfGreaterThanFromGlobalAndConstant {
                    global: args.operand()?,
                    constant: args.operand()?,
                    target: args.label()?,
                }
            }
            InstKind::BranchTrueFromGlobal => Inst::BranchTrueFromGlobal {
                global: args.operand()?,
                target: args.label()?,
            },
        };
        args.finish()?;
        Ok(inst)
    }
}

fn binary_effect(op: TypeOp, first: &StackSlot, second: &StackSlot) -> CompileResult<StackEffect> {
    let ty = result_type(op, first.ty, second.ty)?;
    Ok(StackEffect::new(vec![*second, *first], vec![StackSlot::new(ty, 1)]))
}

struct ArgReader {
    kind: InstKind,
    args: std::vec::IntoIter<Arg>,
}

impl ArgReader {
    fn new(kind: InstKind, args: Vec<Arg>) -> Self {
        Self {
            kind,
            args: args.into_iter(),
        }
    }

    fn next(&mut self, expected: &str) -> CompileResult<Arg> {
        self.args.next().ok_or_else(|| {
            CompileError::invariant(format!("{} is missing its {} argument", self.kind, expected))
        })
    }

    fn mismatch(&self, expected: &str, got: &Arg) -> CompileError {
        CompileError::invariant(format!(
            "{} expected a {} argument, got {:?}",
            self.kind, expected, got
        ))
    }

    fn operand(&mut self) -> CompileResult<Operand> {
        match self.next("operand")? {
            Arg::Operand(o) => Ok(o),
            other => Err(self.mismatch("operand", &other)),
        }
    }

    fn slot(&mut self) -> CompileResult<StackSlot> {
        match self.next("stack slot")? {
            Arg::Slot(s) => Ok(s),
            other => Err(self.mismatch("stack slot", &other)),
        }
    }

    fn ty(&mut self) -> CompileResult<Type> {
        match self.next("type")? {
            Arg::Type(t) => Ok(t),
            Arg::Slot(s) => Ok(s.ty),
            other => Err(self.mismatch("type", &other)),
        }
    }

    fn byte(&mut self) -> CompileResult<u8> {
        match self.next("number")? {
            Arg::Number(n) => u8::try_from(n).map_err(|_| {
                CompileError::unsupported_size(format!("{} argument {} exceeds one byte", self.kind, n))
            }),
            other => Err(self.mismatch("number", &other)),
        }
    }

    fn label(&mut self) -> CompileResult<String> {
        match self.next("label")? {
            Arg::Label(l) => Ok(l),
            other => Err(self.mismatch("label", &other)),
        }
    }

    fn finish(mut self) -> CompileResult<()> {
        match self.args.next() {
            None => Ok(()),
            Some(extra) => Err(CompileError::invariant(format!(
                "{} got an unexpected extra argument {:?}",
                self.kind, extra
            ))),
        }
    }
}

/// A VIL program: an instruction stream plus the types its operands use.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub types: TypeRegistry,
    pub insts: Vec<Inst>,
}

impl Program {
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            types,
            insts: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_unique() {
        let mut names: Vec<_> = InstKind::ALL.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), InstKind::ALL.len());
    }

    #[test]
    fn test_composite_classification() {
        assert!(!InstKind::Label.is_composite());
        assert!(InstKind::AssignConstantToGlobal.is_composite());
        assert!(InstKind::BranchTrueFromGlobal.is_composite());
        assert_eq!(InstKind::ALL.iter().filter(|k| k.is_composite()).count(), 15);
    }

    #[test]
    fn test_binary_effect_order() {
        let inst = Inst::CompareGreaterThanFromStack {
            first: StackSlot::BYTE,
            second: StackSlot::BYTE,
        };
        let effect = inst.stack_effect().unwrap();
        assert_eq!(effect.pop.len(), 2);
        assert_eq!(effect.push, vec![StackSlot::BOOLEAN]);
        assert_eq!(effect.net_bytes(), -1);
    }

    #[test]
    fn test_args_round_trip_shape() {
        let inst = Inst::PopToRegister {
            register: Register::Y,
            stack: StackSlot::BYTE,
        };
        let rebuilt = Inst::from_args(InstKind::PopToRegister, inst.args()).unwrap();
        assert_eq!(rebuilt, inst);
    }

    #[test]
    fn test_from_args_rejects_bad_register() {
        let err = Inst::from_args(
            InstKind::PopToRegister,
            vec![Arg::Number(3), Arg::Slot(StackSlot::BYTE)],
        )
        .unwrap_err();
        assert_eq!(err, CompileError::InvalidRegisterIndex { index: 3 });
    }

    #[test]
    fn test_from_args_rejects_extra_argument() {
        let err = Inst::from_args(InstKind::ReturnFromCall, vec![Arg::Number(1)]).unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::InvariantViolation);
    }
}
