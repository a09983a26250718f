// This module checks the stack discipline of a whole instruction stream. It walks the
// program once with an abstract stack of typed slots: every instruction's declared pops are
// matched against the slots its predecessors pushed, then its pushes are recorded. A slot
// whose type disagrees with what the consumer declares is a TypeMismatch, and one whose size
// disagrees is an InvariantViolation (the front end attached contradictory metadata). Values
// that were pushed before a label are unknown at the label, since control may arrive from
// elsewhere, so the abstract stack is cleared there and after unconditional transfers; pops
// with nothing known below them are accepted as values from the caller's context.

//! Whole-program stack-flow verifier.

use super::{Inst, Program, StackSlot};
use crate::core::error::{CompileError, Diagnostic};

/// Verify that every pop in `program` sees the slot it declares.
pub fn verify(program: &Program) -> Result<(), Diagnostic> {
    verify_insts(&program.insts)
}

pub fn verify_insts(insts: &[Inst]) -> Result<(), Diagnostic> {
    let mut stack: Vec<StackSlot> = Vec::new();
    for (index, inst) in insts.iter().enumerate() {
        if let Inst::Label { .. } = inst {
            stack.clear();
            continue;
        }
        let effect = inst.stack_effect().map_err(|e| e.at(index))?;
        for expected in &effect.pop {
            let Some(actual) = stack.pop() else {
                continue;
            };
            if actual.ty != expected.ty {
                return Err(CompileError::type_mismatch(format!(
                    "{} expects {} on the stack, found {}",
                    inst.name(),
                    expected.ty,
                    actual.ty
                ))
                .at(index));
            }
            if actual.size != expected.size {
                return Err(CompileError::invariant(format!(
                    "{} expects a {}-byte {} on the stack, found {} bytes",
                    inst.name(),
                    expected.size,
                    expected.ty,
                    actual.size
                ))
                .at(index));
            }
        }
        stack.extend(effect.push.iter().copied());
        if matches!(inst, Inst::Branch { .. } | Inst::ReturnFromCall) {
            stack.clear();
        }
    }
    Ok(())
}
