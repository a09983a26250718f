// This module holds the ordered fusion rule table. A rule is a contiguous pattern of
// instruction kinds plus a rewrite function that inspects the matched window, checks its
// guard, and either returns the single composite instruction that replaces the window or
// declines. Declaration order is the tie-break order used by the driver. Guards only accept
// plain global operands where a composite addresses memory directly, and they compare the
// typed stack slot each producer pushes with the slot its consumer declares: if the two
// disagree the window carries contradictory metadata and the rule fails with AmbiguousFusion
// instead of silently skipping the window.

//! Peephole fusion rules.

use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::{Operand, OperandKind};
use crate::vil::builder::MAX_STEP_AMOUNT;
use crate::vil::{Inst, InstKind, StackSlot};

/// Rewrite for one matched window: `Ok(None)` when the guard declines.
pub type Rewrite = fn(&'static str, &[Inst]) -> CompileResult<Option<Inst>>;

/// One entry of the rule table.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub pattern: &'static [InstKind],
    pub apply: Rewrite,
}

impl Rule {
    /// Whether the kinds of `window` start with this rule's pattern.
    pub fn matches_kinds(&self, window: &[Inst]) -> bool {
        window.len() >= self.pattern.len()
            && self
                .pattern
                .iter()
                .zip(window)
                .all(|(kind, inst)| inst.kind() == *kind)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish()
    }
}

use InstKind as K;

/// The rule table, most specific first within each family.
pub static RULES: [Rule; 17] = [
    Rule {
        name: "add_global_constant",
        pattern: &[K::PushGlobal, K::PushConstant, K::AddFromStack],
        apply: add_global_constant,
    },
    Rule {
        name: "add_constant_global",
        pattern: &[K::PushConstant, K::PushGlobal, K::AddFromStack],
        apply: add_constant_global,
    },
    Rule {
        name: "add_global_constant_to_global",
        pattern: &[K::AddFromGlobalAndConstant, K::PopToGlobal],
        apply: add_global_constant_to_global,
    },
    Rule {
        name: "increment_global",
        pattern: &[K::AddFromGlobalAndConstantToGlobal],
        apply: increment_global,
    },
    Rule {
        name: "add_globals",
        pattern: &[K::PushGlobal, K::PushGlobal, K::AddFromStack],
        apply: add_globals,
    },
    Rule {
        name: "add_globals_to_global",
        pattern: &[K::AddFromAddresses, K::PopToGlobal],
        apply: add_globals_to_global,
    },
    Rule {
        name: "add_globals_to_globals",
        pattern: &[K::AddFromAddressesToAddress, K::CopyGlobalToGlobal],
        apply: add_globals_to_globals,
    },
    Rule {
        name: "sub_global_constant",
        pattern: &[K::PushGlobal, K::PushConstant, K::SubFromStack],
        apply: sub_global_constant,
    },
    Rule {
        name: "sub_global_constant_to_global",
        pattern: &[K::SubFromGlobalAndConstant, K::PopToGlobal],
        apply: sub_global_constant_to_global,
    },
    Rule {
        name: "decrement_global",
        pattern: &[K::SubFromGlobalAndConstantToGlobal],
        apply: decrement_global,
    },
    Rule {
        name: "compare_gt_global_constant",
        pattern: &[K::PushGlobal, K::PushConstant, K::CompareGreaterThanFromStack],
        apply: compare_gt_global_constant,
    },
    Rule {
        name: "compare_gt_global_constant_to_global",
        pattern: &[K::CompareGreaterThanFromGlobalAndConstant, K::PopToGlobal],
        apply: compare_gt_global_constant_to_global,
    },
    Rule {
        name: "branch_if_gt_global_constant",
        pattern: &[K::CompareGreaterThanFromGlobalAndConstant, K::BranchTrueFromStack],
        apply: branch_if_gt_global_constant,
    },
    Rule {
        name: "branch_true_from_global",
        pattern: &[K::PushGlobal, K::BranchTrueFromStack],
        apply: branch_true_from_global,
    },
    Rule {
        name: "assign_constant",
        pattern: &[K::PushConstant, K::PopToGlobal],
        apply: assign_constant,
    },
    Rule {
        name: "copy_global",
        pattern: &[K::PushGlobal, K::PopToGlobal],
        apply: copy_global,
    },
    Rule {
        name: "branch_to_next",
        pattern: &[K::Branch, K::Label],
        apply: branch_to_next,
    },
];

fn plain(operand: &Operand) -> bool {
    operand.kind() == OperandKind::Global
}

/// The slot a producer pushes must be the slot its consumer pops.
fn agree(rule: &'static str, produced: StackSlot, consumed: StackSlot) -> CompileResult<()> {
    if produced != consumed {
        return Err(CompileError::AmbiguousFusion {
            rule,
            reason: format!(
                "producer pushes {}@{} but consumer declares {}@{}",
                produced.ty, produced.size, consumed.ty, consumed.size
            ),
        });
    }
    Ok(())
}

/// Result slot a fused producer leaves on the stack.
fn pushed(inst: &Inst) -> CompileResult<StackSlot> {
    let effect = inst.stack_effect()?;
    match effect.push.as_slice() {
        [slot] => Ok(*slot),
        other => Err(CompileError::invariant(format!(
            "{} pushes {} values where one was expected",
            inst.name(),
            other.len()
        ))),
    }
}

/// Amount for an increment or decrement: same location and a constant in 1..=2.
fn step_amount(global: &Operand, constant: &Operand, target: &Operand) -> Option<u8> {
    if global != target {
        return None;
    }
    match constant.constant_value() {
        Some(value) if (1..=MAX_STEP_AMOUNT as u16).contains(&value) => Some(value as u8),
        _ => None,
    }
}

fn add_global_constant(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::PushGlobal { source }, Inst::PushConstant { constant }, Inst::AddFromStack { first, second }) =
        (&w[0], &w[1], &w[2])
    else {
        return Ok(None);
    };
    if !plain(source) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(source), *first)?;
    agree(rule, StackSlot::of(constant), *second)?;
    Ok(Some(Inst::AddFromGlobalAndConstant {
        global: source.clone(),
        constant: constant.clone(),
    }))
}

fn add_constant_global(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::PushConstant { constant }, Inst::PushGlobal { source }, Inst::AddFromStack { first, second }) =
        (&w[0], &w[1], &w[2])
    else {
        return Ok(None);
    };
    if !plain(source) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(constant), *first)?;
    agree(rule, StackSlot::of(source), *second)?;
    Ok(Some(Inst::AddFromGlobalAndConstant {
        global: source.clone(),
        constant: constant.clone(),
    }))
}

fn add_global_constant_to_global(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::AddFromGlobalAndConstant { global, constant }, Inst::PopToGlobal { target, stack }) =
        (&w[0], &w[1])
    else {
        return Ok(None);
    };
    if !plain(target) {
        return Ok(None);
    }
    agree(rule, pushed(&w[0])?, *stack)?;
    Ok(Some(Inst::AddFromGlobalAndConstantToGlobal {
        global: global.clone(),
        constant: constant.clone(),
        target: target.clone(),
    }))
}

fn increment_global(_rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let Inst::AddFromGlobalAndConstantToGlobal {
        global,
        constant,
        target,
    } = &w[0]
    else {
        return Ok(None);
    };
    Ok(step_amount(global, constant, target).map(|amount| Inst::IncrementGlobal {
        global: global.clone(),
        amount,
    }))
}

fn add_globals(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::PushGlobal { source: a }, Inst::PushGlobal { source: b }, Inst::AddFromStack { first, second }) =
        (&w[0], &w[1], &w[2])
    else {
        return Ok(None);
    };
    if !plain(a) || !plain(b) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(a), *first)?;
    agree(rule, StackSlot::of(b), *second)?;
    Ok(Some(Inst::AddFromAddresses {
        first: a.clone(),
        second: b.clone(),
    }))
}

fn add_globals_to_global(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::AddFromAddresses { first, second }, Inst::PopToGlobal { target, stack }) = (&w[0], &w[1])
    else {
        return Ok(None);
    };
    if !plain(target) {
        return Ok(None);
    }
    agree(rule, pushed(&w[0])?, *stack)?;
    Ok(Some(Inst::AddFromAddressesToAddress {
        first: first.clone(),
        second: second.clone(),
        target: target.clone(),
    }))
}

fn add_globals_to_globals(_rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (
        Inst::AddFromAddressesToAddress {
            first,
            second,
            target,
        },
        Inst::CopyGlobalToGlobal {
            source,
            target: copy,
        },
    ) = (&w[0], &w[1])
    else {
        return Ok(None);
    };
    if source != target || target.size() != copy.size() {
        return Ok(None);
    }
    Ok(Some(Inst::AddFromAddressesToAddresses {
        first: first.clone(),
        second: second.clone(),
        target: target.clone(),
        copy: copy.clone(),
    }))
}

fn sub_global_constant(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::PushGlobal { source }, Inst::PushConstant { constant }, Inst::SubFromStack { first, second }) =
        (&w[0], &w[1], &w[2])
    else {
        return Ok(None);
    };
    if !plain(source) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(source), *first)?;
    agree(rule, StackSlot::of(constant), *second)?;
    Ok(Some(Inst::SubFromGlobalAndConstant {
        global: source.clone(),
        constant: constant.clone(),
    }))
}

fn sub_global_constant_to_global(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::SubFromGlobalAndConstant { global, constant }, Inst::PopToGlobal { target, stack }) =
        (&w[0], &w[1])
    else {
        return Ok(None);
    };
    if !plain(target) {
        return Ok(None);
    }
    agree(rule, pushed(&w[0])?, *stack)?;
    Ok(Some(Inst::SubFromGlobalAndConstantToGlobal {
        global: global.clone(),
        constant: constant.clone(),
        target: target.clone(),
    }))
}

fn decrement_global(_rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let Inst::SubFromGlobalAndConstantToGlobal {
        global,
        constant,
        target,
    } = &w[0]
    else {
        return Ok(None);
    };
    Ok(step_amount(global, constant, target).map(|amount| Inst::DecrementGlobal {
        global: global.clone(),
        amount,
    }))
}

fn compare_gt_global_constant(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (
        Inst::PushGlobal { source },
        Inst::PushConstant { constant },
        Inst::CompareGreaterThanFromStack { first, second },
    ) = (&w[0], &w[1], &w[2])
    else {
        return Ok(None);
    };
    if !plain(source) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(source), *first)?;
    agree(rule, StackSlot::of(constant), *second)?;
    Ok(Some(Inst::CompareGreaterThanFromGlobalAndConstant {
        global: source.clone(),
        constant: constant.clone(),
    }))
}

fn compare_gt_global_constant_to_global(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (
        Inst::CompareGreaterThanFromGlobalAndConstant { global, constant },
        Inst::PopToGlobal { target, stack },
    ) = (&w[0], &w[1])
    else {
        return Ok(None);
    };
    if !plain(target) {
        return Ok(None);
    }
    agree(rule, pushed(&w[0])?, *stack)?;
    Ok(Some(Inst::CompareGreaterThanFromGlobalAndConstantToGlobal {
        global: global.clone(),
        constant: constant.clone(),
        target: target.clone(),
    }))
}

fn branch_if_gt_global_constant(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (
        Inst::CompareGreaterThanFromGlobalAndConstant { global, constant },
        Inst::BranchTrueFromStack { target, stack },
    ) = (&w[0], &w[1])
    else {
        return Ok(None);
    };
    agree(rule, pushed(&w[0])?, *stack)?;
    Ok(Some(Inst::BranchIfGreaterThanFromGlobalAndConstant {
        global: global.clone(),
        constant: constant.clone(),
        target: target.clone(),
    }))
}

fn branch_true_from_global(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::PushGlobal { source }, Inst::BranchTrueFromStack { target, stack }) = (&w[0], &w[1]) else {
        return Ok(None);
    };
    if !plain(source) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(source), *stack)?;
    Ok(Some(Inst::BranchTrueFromGlobal {
        global: source.clone(),
        target: target.clone(),
    }))
}

fn assign_constant(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::PushConstant { constant }, Inst::PopToGlobal { target, stack }) = (&w[0], &w[1]) else {
        return Ok(None);
    };
    if !plain(target) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(constant), *stack)?;
    Ok(Some(Inst::AssignConstantToGlobal {
        constant: constant.clone(),
        target: target.clone(),
    }))
}

fn copy_global(rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    let (Inst::PushGlobal { source }, Inst::PopToGlobal { target, stack }) = (&w[0], &w[1]) else {
        return Ok(None);
    };
    if !plain(source) || !plain(target) {
        return Ok(None);
    }
    agree(rule, StackSlot::of(source), *stack)?;
    Ok(Some(Inst::CopyGlobalToGlobal {
        source: source.clone(),
        target: target.clone(),
    }))
}

fn branch_to_next(_rule: &'static str, w: &[Inst]) -> CompileResult<Option<Inst>> {
    match (&w[0], &w[1]) {
        (Inst::Branch { target }, Inst::Label { name }) if target == name => Ok(Some(w[1].clone())),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Type, TypeRegistry};
    use crate::core::ErrorKind;

    fn global(addr: u16) -> Operand {
        Operand::global(&TypeRegistry::new(), addr, Type::BYTE, None).unwrap()
    }

    fn constant(value: u16) -> Operand {
        Operand::constant(value, Type::BYTE, 1).unwrap()
    }

    fn rule(name: &str) -> &'static Rule {
        RULES.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_rule_names_are_unique() {
        let mut names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RULES.len());
    }

    #[test]
    fn test_patterns_are_non_empty() {
        for rule in RULES.iter() {
            assert!(!rule.pattern.is_empty(), "{}", rule.name);
        }
    }

    #[test]
    fn test_increment_guard() {
        let r = rule("increment_global");
        let make = |value, target| Inst::AddFromGlobalAndConstantToGlobal {
            global: global(0x90),
            constant: constant(value),
            target: global(target),
        };
        assert_eq!(
            (r.apply)(r.name, &[make(2, 0x90)]).unwrap(),
            Some(Inst::IncrementGlobal {
                global: global(0x90),
                amount: 2
            })
        );
        assert_eq!((r.apply)(r.name, &[make(3, 0x90)]).unwrap(), None);
        assert_eq!((r.apply)(r.name, &[make(1, 0x91)]).unwrap(), None);
    }

    #[test]
    fn test_conflicting_slots_are_ambiguous() {
        let r = rule("add_global_constant");
        let window = [
            Inst::PushGlobal { source: global(0x90) },
            Inst::PushConstant {
                constant: Operand::constant(0x102, Type::BYTE, 2).unwrap(),
            },
            Inst::AddFromStack {
                first: StackSlot::BYTE,
                second: StackSlot::BYTE,
            },
        ];
        let err = (r.apply)(r.name, &window).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousFusion);
        assert!(err.to_string().contains("add_global_constant"));
    }

    #[test]
    fn test_pointer_sources_are_not_fused() {
        let registry = TypeRegistry::new();
        let ptr = Operand::global(
            &registry,
            0x94,
            crate::core::types::pointer_of(Type::BYTE).unwrap(),
            None,
        )
        .unwrap();
        let r = rule("copy_global");
        let window = [
            Inst::PushGlobal {
                source: Operand::deref(&registry, ptr).unwrap(),
            },
            Inst::PopToGlobal {
                target: global(0x90),
                stack: StackSlot::BYTE,
            },
        ];
        assert!(r.matches_kinds(&window));
        assert_eq!((r.apply)(r.name, &window).unwrap(), None);
    }

    #[test]
    fn test_branch_to_next_needs_same_label() {
        let r = rule("branch_to_next");
        let window = [
            Inst::Branch {
                target: "a".to_string(),
            },
            Inst::Label {
                name: "b".to_string(),
            },
        ];
        assert_eq!((r.apply)(r.name, &window).unwrap(), None);
    }
}
