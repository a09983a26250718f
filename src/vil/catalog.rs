// This module is the declarative instruction catalog. It holds one static descriptor per
// instruction kind: the canonical name, the ordered parameter shape (which operand kinds
// each operand position accepts), how many values the instruction pops and pushes, how many
// reserved scratch bytes its expansion may use, whether it is a primitive or a composite,
// and for composites the primitive sequence it stands for. The catalog also maps the
// deprecated names still accepted by the text front end onto their canonical kinds.
// Catalog::self_check closes the contract between the table and the code generator: for a
// set of representative instances of every kind it emits the 6502 expansion, checks that the
// scratch bytes actually touched stay within the declared count (and that the count is
// reached at least once), and runs the expansion on the reference executor to confirm that
// the hardware stack pointer moves by exactly the declared net effect.

//! Instruction catalog.

use super::{Inst, InstKind, StackSlot};
use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::{Operand, OperandKind, RomIndex};
use crate::core::reserved::Register;
use crate::core::types::{pointer_of, Type, TypeRegistry};
use crate::mos6502::emit::{scratch_used, Emitter};
use crate::mos6502::sim::Machine;
use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstClass {
    Primitive,
    Composite,
}

/// Shape of one instruction parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// An operand of one of the listed kinds.
    Operand(&'static [OperandKind]),
    /// A stack slot annotation `T` or `T@n`.
    Slot,
    Type,
    /// Byte offset into a struct.
    Offset,
    /// CPU register index.
    Register,
    /// Small repeat count.
    Amount,
    Label,
}

/// Static description of one instruction kind.
#[derive(Debug, Clone, Copy)]
pub struct InstDescriptor {
    pub kind: InstKind,
    pub params: &'static [ParamKind],
    /// Number of stack values popped.
    pub pops: u8,
    /// Number of stack values pushed.
    pub pushes: u8,
    /// Reserved scratch bytes the expansion may use.
    pub scratch: u8,
    pub class: InstClass,
    /// Primitive sequence a composite replaces.
    pub equivalent: Option<&'static str>,
}

impl InstDescriptor {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Check that `inst` supplies operands of the kinds this entry accepts.
    pub fn check_operand_kinds(&self, inst: &Inst) -> CompileResult<()> {
        for (param, arg) in self.params.iter().zip(inst.args()) {
            if let (ParamKind::Operand(allowed), super::Arg::Operand(operand)) = (param, &arg) {
                if !allowed.contains(&operand.kind()) {
                    return Err(CompileError::type_mismatch(format!(
                        "{} does not accept a {:?} operand",
                        self.name(),
                        operand.kind()
                    )));
                }
            }
        }
        Ok(())
    }
}

const CONSTANT: ParamKind = ParamKind::Operand(&[OperandKind::Constant]);
const GLOBAL: ParamKind = ParamKind::Operand(&[OperandKind::Global]);
const SOURCE: ParamKind = ParamKind::Operand(&[
    OperandKind::Global,
    OperandKind::Field,
    OperandKind::PointerDeref,
    OperandKind::RomElement,
]);
const TARGET: ParamKind = ParamKind::Operand(&[
    OperandKind::Global,
    OperandKind::Field,
    OperandKind::PointerDeref,
]);

const fn primitive(
    kind: InstKind,
    params: &'static [ParamKind],
    pops: u8,
    pushes: u8,
    scratch: u8,
) -> InstDescriptor {
    InstDescriptor {
        kind,
        params,
        pops,
        pushes,
        scratch,
        class: InstClass::Primitive,
        equivalent: None,
    }
}

const fn composite(
    kind: InstKind,
    params: &'static [ParamKind],
    pushes: u8,
    equivalent: &'static str,
) -> InstDescriptor {
    InstDescriptor {
        kind,
        params,
        pops: 0,
        pushes,
        scratch: 0,
        class: InstClass::Composite,
        equivalent: Some(equivalent),
    }
}

use ParamKind::{Amount, Label, Offset, Slot};

/// One descriptor per kind, in `InstKind::ALL` order.
static DESCRIPTORS: [InstDescriptor; 38] = [
    primitive(InstKind::PushConstant, &[CONSTANT], 0, 1, 0),
    primitive(InstKind::PushGlobal, &[SOURCE], 0, 1, 2),
    primitive(InstKind::PushAddressOfGlobal, &[GLOBAL], 0, 1, 0),
    primitive(InstKind::PushAddressOfField, &[Offset, ParamKind::Type, Slot], 1, 1, 1),
    primitive(InstKind::PushDereferenceFromStack, &[Slot, Slot], 1, 1, 2),
    primitive(InstKind::PushFieldFromStack, &[Slot, Offset, Slot], 1, 1, 2),
    primitive(InstKind::PopToGlobal, &[TARGET, Slot], 1, 0, 2),
    primitive(InstKind::PopToAddressFromStack, &[Slot, Slot], 2, 0, 2),
    primitive(InstKind::PopToFieldFromStack, &[Slot, Slot, Offset], 2, 0, 2),
    primitive(InstKind::PopToRegister, &[ParamKind::Register, Slot], 1, 0, 0),
    primitive(InstKind::PopStack, &[Slot], 1, 0, 0),
    primitive(InstKind::Duplicate, &[Slot], 1, 2, 0),
    primitive(InstKind::AddFromStack, &[Slot, Slot], 2, 1, 1),
    primitive(InstKind::SubFromStack, &[Slot, Slot], 2, 1, 1),
    primitive(InstKind::OrFromStack, &[Slot, Slot], 2, 1, 1),
    primitive(InstKind::CompareEqualToFromStack, &[Slot, Slot], 2, 1, 1),
    primitive(InstKind::CompareGreaterThanFromStack, &[Slot, Slot], 2, 1, 1),
    primitive(InstKind::Branch, &[Label], 0, 0, 0),
    primitive(InstKind::BranchTrueFromStack, &[Label, Slot], 1, 0, 0),
    primitive(InstKind::BranchFalseFromStack, &[Label, Slot], 1, 0, 0),
    primitive(InstKind::CallVoid, &[Label], 0, 0, 0),
    primitive(InstKind::ReturnFromCall, &[], 0, 0, 0),
    primitive(InstKind::Label, &[Label], 0, 0, 0),
    composite(
        InstKind::AssignConstantToGlobal,
        &[CONSTANT, GLOBAL],
        0,
        "pushConstant + popToGlobal",
    ),
    composite(
        InstKind::CopyGlobalToGlobal,
        &[GLOBAL, GLOBAL],
        0,
        "pushGlobal + popToGlobal",
    ),
    composite(
        InstKind::AddFromGlobalAndConstant,
        &[GLOBAL, CONSTANT],
        1,
        "pushGlobal + pushConstant + addFromStack",
    ),
    composite(
        InstKind::AddFromGlobalAndConstantToGlobal,
        &[GLOBAL, CONSTANT, GLOBAL],
        0,
        "addFromGlobalAndConstant + popToGlobal",
    ),
    composite(
        InstKind::IncrementGlobal,
        &[GLOBAL, Amount],
        0,
        "addFromGlobalAndConstantToGlobal with source == target and constant in {1, 2}",
    ),
    composite(
        InstKind::AddFromAddresses,
        &[GLOBAL, GLOBAL],
        1,
        "pushGlobal + pushGlobal + addFromStack",
    ),
    composite(
        InstKind::AddFromAddressesToAddress,
        &[GLOBAL, GLOBAL, GLOBAL],
        0,
        "addFromAddresses + popToGlobal",
    ),
    composite(
        InstKind::AddFromAddressesToAddresses,
        &[GLOBAL, GLOBAL, GLOBAL, GLOBAL],
        0,
        "addFromAddressesToAddress + copyGlobalToGlobal from its target",
    ),
    composite(
        InstKind::SubFromGlobalAndConstant,
        &[GLOBAL, CONSTANT],
        1,
        "pushGlobal + pushConstant + subFromStack",
    ),
    composite(
        InstKind::SubFromGlobalAndConstantToGlobal,
        &[GLOBAL, CONSTANT, GLOBAL],
        0,
        "subFromGlobalAndConstant + popToGlobal",
    ),
    composite(
        InstKind::DecrementGlobal,
        &[GLOBAL, Amount],
        0,
        "subFromGlobalAndConstantToGlobal with source == target and constant in {1, 2}",
    ),
    composite(
        InstKind::CompareGreaterThanFromGlobalAndConstant,
        &[GLOBAL, CONSTANT],
        1,
        "pushGlobal + pushConstant + compareGreaterThanFromStack",
    ),
    composite(
        InstKind::CompareGreaterThanFromGlobalAndConstantToGlobal,
        &[GLOBAL, CONSTANT, GLOBAL],
        0,
        "compareGreaterThanFromGlobalAndConstant + popToGlobal",
    ),
    composite(
        InstKind::BranchIfGreaterThanFromGlobalAndConstant,
        &[GLOBAL, CONSTANT, Label],
        0,
        "compareGreaterThanFromGlobalAndConstant + branchTrueFromStack",
    ),
    composite(
        InstKind::BranchTrueFromGlobal,
        &[GLOBAL, Label],
        0,
        "pushGlobal + branchTrueFromStack",
    ),
];

/// Deprecated spellings and the canonical kind they stand for.
pub const DEPRECATED_ALIASES: [(&str, InstKind); 4] = [
    ("pushLocal", InstKind::PushGlobal),
    ("popToLocal", InstKind::PopToGlobal),
    ("assignConstantToLocal", InstKind::AssignConstantToGlobal),
    ("copyTo", InstKind::CopyGlobalToGlobal),
];

/// Result of looking up an instruction name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub kind: InstKind,
    /// The name was a deprecated alias.
    pub deprecated: bool,
}

/// Name lookup over the static descriptor table.
#[derive(Debug, Clone)]
pub struct Catalog {
    by_name: HashMap<&'static str, Lookup>,
}

impl Catalog {
    pub fn new() -> Self {
        let mut by_name = HashMap::with_capacity(DESCRIPTORS.len() + DEPRECATED_ALIASES.len());
        for desc in DESCRIPTORS.iter() {
            by_name.insert(
                desc.name(),
                Lookup {
                    kind: desc.kind,
                    deprecated: false,
                },
            );
        }
        for (alias, kind) in DEPRECATED_ALIASES {
            by_name.insert(
                alias,
                Lookup {
                    kind,
                    deprecated: true,
                },
            );
        }
        Self { by_name }
    }

    pub fn descriptor(kind: InstKind) -> &'static InstDescriptor {
        &DESCRIPTORS[kind as usize]
    }

    pub fn descriptors() -> &'static [InstDescriptor] {
        &DESCRIPTORS
    }

    pub fn lookup(&self, name: &str) -> Option<Lookup> {
        self.by_name.get(name).copied()
    }

    /// Verify the descriptor table against the code generator.
    pub fn self_check(&self) -> CompileResult<()> {
        let registry = TypeRegistry::new();
        let mut seen = hashbrown::HashSet::new();
        for (index, kind) in InstKind::ALL.iter().enumerate() {
            let desc = &DESCRIPTORS[index];
            if desc.kind != *kind || !seen.insert(desc.kind) {
                return Err(CompileError::invariant(format!(
                    "descriptor table out of order at {}: expected {}, found {}",
                    index, kind, desc.kind
                )));
            }
            if (desc.class == InstClass::Composite) != kind.is_composite() {
                return Err(CompileError::invariant(format!(
                    "{} is misclassified",
                    kind
                )));
            }
            match self.lookup(kind.name()) {
                Some(found) if found.kind == *kind && !found.deprecated => {}
                _ => {
                    return Err(CompileError::invariant(format!(
                        "{} is not reachable by name",
                        kind
                    )))
                }
            }

            let samples = samples(&registry, *kind)?;
            if samples.is_empty() {
                return Err(CompileError::invariant(format!("{} has no samples", kind)));
            }
            let mut max_span = 0;
            for sample in &samples {
                max_span = max_span.max(check_sample(desc, sample)?);
            }
            if max_span != desc.scratch {
                return Err(CompileError::invariant(format!(
                    "{} declares {} scratch bytes but its widest expansion uses {}",
                    kind, desc.scratch, max_span
                )));
            }
        }
        log::debug!("catalog self-check passed for {} kinds", DESCRIPTORS.len());
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Stack pointer the self-check starts from; leaves room below and above.
const CHECK_SP: u8 = 0xe0;

/// Check one sample against its descriptor, returning the scratch span it used.
fn check_sample(desc: &InstDescriptor, sample: &Inst) -> CompileResult<u8> {
    desc.check_operand_kinds(sample)?;
    let effect = sample.stack_effect()?;
    if effect.pop.len() != desc.pops as usize || effect.push.len() != desc.pushes as usize {
        return Err(CompileError::invariant(format!(
            "{} declares {} pops and {} pushes, instance has {} and {}",
            desc.name(),
            desc.pops,
            desc.pushes,
            effect.pop.len(),
            effect.push.len()
        )));
    }

    let statements = Emitter::new().emit(sample)?;
    let span = scratch_used(&statements).span();
    if span > desc.scratch {
        return Err(CompileError::invariant(format!(
            "{} expansion uses {} scratch bytes, {} declared",
            desc.name(),
            span,
            desc.scratch
        )));
    }

    let mut machine = Machine::new();
    machine.sp = CHECK_SP;
    machine.write(0x94, 0xa0);
    machine.write_word(0x96, 0x0300);
    machine.define_symbol("DATA", 0xf000);
    machine
        .run(&statements)
        .map_err(|e| CompileError::invariant(format!("{}: {}", desc.name(), e)))?;
    let moved = machine.sp as i32 - CHECK_SP as i32;
    if -moved != effect.net_bytes() {
        return Err(CompileError::invariant(format!(
            "{} declares a net stack effect of {} bytes, expansion moves {}",
            desc.name(),
            effect.net_bytes(),
            -moved
        )));
    }
    Ok(span)
}

/// Representative instances of `kind`, covering every addressing strategy.
pub fn samples(registry: &TypeRegistry, kind: InstKind) -> CompileResult<Vec<Inst>> {
    let byte_ptr = pointer_of(Type::BYTE)?;
    let global = |addr| Operand::global(registry, addr, Type::BYTE, None);
    let constant = |value| Operand::constant(value, Type::BYTE, 1);
    let short_ptr = Operand::global(registry, 0x94, byte_ptr, Some(1))?;
    let long_ptr = Operand::global(registry, 0x96, byte_ptr, Some(2))?;
    let short_slot = StackSlot::new(byte_ptr, 1);
    let long_slot = StackSlot::new(byte_ptr, 2);
    let byte = StackSlot::BYTE;
    let label = || "target".to_string();

    let samples = match kind {
        InstKind::PushConstant => vec![
            Inst::PushConstant {
                constant: constant(7)?,
            },
            Inst::PushConstant {
                constant: Operand::constant(0x1234, byte_ptr, 2)?,
            },
        ],
        InstKind::PushGlobal => vec![
            Inst::PushGlobal {
                source: global(0x90)?,
            },
            Inst::PushGlobal {
                source: Operand::deref(registry, short_ptr.clone())?,
            },
            Inst::PushGlobal {
                source: Operand::deref(registry, long_ptr.clone())?,
            },
            Inst::PushGlobal {
                source: Operand::rom_element(registry, "DATA", Type::BYTE, RomIndex::Constant(3))?,
            },
            Inst::PushGlobal {
                source: Operand::rom_element(registry, "DATA", Type::BYTE, RomIndex::Stack)?,
            },
        ],
        InstKind::PushAddressOfGlobal => vec![Inst::PushAddressOfGlobal {
            global: global(0x90)?,
        }],
        InstKind::PushAddressOfField => vec![
            Inst::PushAddressOfField {
                offset: 1,
                field_ty: Type::BYTE,
                pointer: short_slot,
            },
            Inst::PushAddressOfField {
                offset: 1,
                field_ty: Type::BYTE,
                pointer: long_slot,
            },
        ],
        InstKind::PushDereferenceFromStack => vec![
            Inst::PushDereferenceFromStack {
                pointer: short_slot,
                result: byte,
            },
            Inst::PushDereferenceFromStack {
                pointer: long_slot,
                result: byte,
            },
        ],
        InstKind::PushFieldFromStack => vec![
            Inst::PushFieldFromStack {
                pointer: short_slot,
                offset: 0,
                result: byte,
            },
            Inst::PushFieldFromStack {
                pointer: long_slot,
                offset: 0,
                result: byte,
            },
        ],
        InstKind::PopToGlobal => vec![
            Inst::PopToGlobal {
                target: global(0x90)?,
                stack: byte,
            },
            Inst::PopToGlobal {
                target: global(0x90)?,
                stack: StackSlot::new(Type::BYTE, 2),
            },
            Inst::PopToGlobal {
                target: Operand::deref(registry, long_ptr.clone())?,
                stack: byte,
            },
        ],
        InstKind::PopToAddressFromStack => vec![
            Inst::PopToAddressFromStack {
                value: byte,
                pointer: short_slot,
            },
            Inst::PopToAddressFromStack {
                value: byte,
                pointer: long_slot,
            },
        ],
        InstKind::PopToFieldFromStack => vec![
            Inst::PopToFieldFromStack {
                value: byte,
                pointer: short_slot,
                offset: 0,
            },
            Inst::PopToFieldFromStack {
                value: byte,
                pointer: long_slot,
                offset: 0,
            },
        ],
        InstKind::PopToRegister => [Register::A, Register::X, Register::Y]
            .into_iter()
            .map(|register| Inst::PopToRegister {
                register,
                stack: byte,
            })
            .collect(),
        InstKind::PopStack => vec![
            Inst::PopStack { stack: byte },
            Inst::PopStack { stack: long_slot },
        ],
        InstKind::Duplicate => vec![
            Inst::Duplicate { stack: byte },
            Inst::Duplicate { stack: long_slot },
        ],
        InstKind::AddFromStack => vec![Inst::AddFromStack {
            first: byte,
            second: byte,
        }],
        InstKind::SubFromStack => vec![Inst::SubFromStack {
            first: byte,
            second: byte,
        }],
        InstKind::OrFromStack => vec![
            Inst::OrFromStack {
                first: byte,
                second: byte,
            },
            Inst::OrFromStack {
                first: StackSlot::BOOLEAN,
                second: StackSlot::BOOLEAN,
            },
        ],
        InstKind::CompareEqualToFromStack => vec![Inst::CompareEqualToFromStack {
            first: byte,
            second: byte,
        }],
        InstKind::CompareGreaterThanFromStack => vec![Inst::CompareGreaterThanFromStack {
            first: byte,
            second: byte,
        }],
        InstKind::Branch => vec![Inst::Branch { target: label() }],
        InstKind::BranchTrueFromStack => vec![Inst::BranchTrueFromStack {
            target: label(),
            stack: StackSlot::BOOLEAN,
        }],
        InstKind::BranchFalseFromStack => vec![Inst::BranchFalseFromStack {
            target: label(),
            stack: StackSlot::BOOLEAN,
        }],
        InstKind::CallVoid => vec![Inst::CallVoid { target: label() }],
        InstKind::ReturnFromCall => vec![Inst::ReturnFromCall],
        InstKind::Label => vec![Inst::Label { name: label() }],
        InstKind::AssignConstantToGlobal => vec![Inst::AssignConstantToGlobal {
            constant: constant(5)?,
            target: global(0x90)?,
        }],
        InstKind::CopyGlobalToGlobal => vec![Inst::CopyGlobalToGlobal {
            source: global(0x90)?,
            target: global(0x91)?,
        }],
        InstKind::AddFromGlobalAndConstant => vec![Inst::AddFromGlobalAndConstant {
            global: global(0x90)?,
            constant: constant(3)?,
        }],
        InstKind::AddFromGlobalAndConstantToGlobal => {
            vec![Inst::AddFromGlobalAndConstantToGlobal {
                global: global(0x90)?,
                constant: constant(3)?,
                target: global(0x91)?,
            }]
        }
        InstKind::IncrementGlobal => vec![Inst::IncrementGlobal {
            global: global(0x90)?,
            amount: 2,
        }],
        InstKind::AddFromAddresses => vec![Inst::AddFromAddresses {
            first: global(0x90)?,
            second: global(0x91)?,
        }],
        InstKind::AddFromAddressesToAddress => vec![Inst::AddFromAddressesToAddress {
            first: global(0x90)?,
            second: global(0x91)?,
            target: global(0x92)?,
        }],
        InstKind::AddFromAddressesToAddresses => vec![Inst::AddFromAddressesToAddresses {
            first: global(0x90)?,
            second: global(0x91)?,
            target: global(0x92)?,
            copy: global(0x93)?,
        }],
        InstKind::SubFromGlobalAndConstant => vec![Inst::SubFromGlobalAndConstant {
            global: global(0x90)?,
            constant: constant(3)?,
        }],
        InstKind::SubFromGlobalAndConstantToGlobal => {
            vec![Inst::SubFromGlobalAndConstantToGlobal {
                global: global(0x90)?,
                constant: constant(3)?,
                target: global(0x91)?,
            }]
        }
        InstKind::DecrementGlobal => vec![Inst::DecrementGlobal {
            global: global(0x90)?,
            amount: 1,
        }],
        InstKind::CompareGreaterThanFromGlobalAndConstant => vec![
            Inst::CompareGreaterThanFromGlobalAndConstant {
                global: global(0x90)?,
                constant: constant(3)?,
            },
            Inst::CompareGreaterThanFromGlobalAndConstant {
                global: global(0x90)?,
                constant: constant(0)?,
            },
        ],
        InstKind::CompareGreaterThanFromGlobalAndConstantToGlobal => {
            vec![Inst::CompareGreaterThanFromGlobalAndConstantToGlobal {
                global: global(0x90)?,
                constant: constant(3)?,
                target: Operand::global(registry, 0x91, Type::BOOLEAN, None)?,
            }]
        }
        InstKind::BranchIfGreaterThanFromGlobalAndConstant => {
            vec![Inst::BranchIfGreaterThanFromGlobalAndConstant {
                global: global(0x90)?,
                constant: constant(3)?,
                target: label(),
            }]
        }
        InstKind::BranchTrueFromGlobal => vec![Inst::BranchTrueFromGlobal {
            global: Operand::global(registry, 0x90, Type::BOOLEAN, None)?,
            target: label(),
        }],
    };
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_check_passes() {
        Catalog::new().self_check().unwrap();
    }

    #[test]
    fn test_lookup_canonical_and_deprecated() {
        let catalog = Catalog::new();
        let found = catalog.lookup("addFromStack").unwrap();
        assert_eq!(found.kind, InstKind::AddFromStack);
        assert!(!found.deprecated);

        let alias = catalog.lookup("copyTo").unwrap();
        assert_eq!(alias.kind, InstKind::CopyGlobalToGlobal);
        assert!(alias.deprecated);

        assert!(catalog.lookup("storeTo").is_none());
    }

    #[test]
    fn test_every_kind_has_a_descriptor() {
        for kind in InstKind::ALL {
            assert_eq!(Catalog::descriptor(kind).kind, kind);
        }
    }

    #[test]
    fn test_composites_document_their_equivalence() {
        for desc in Catalog::descriptors() {
            assert_eq!(
                desc.equivalent.is_some(),
                desc.class == InstClass::Composite,
                "{}",
                desc.name()
            );
        }
    }

    #[test]
    fn test_operand_kind_check() {
        let registry = TypeRegistry::new();
        let inst = Inst::PushConstant {
            constant: Operand::global(&registry, 0x90, Type::BYTE, None).unwrap(),
        };
        let err = Catalog::descriptor(InstKind::PushConstant)
            .check_operand_kinds(&inst)
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::TypeMismatch);
    }
}
