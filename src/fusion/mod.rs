// This module is the fixed-point driver of the peephole fusion engine. It copies the
// validated instruction stream into a session-arena buffer and scans it left to right. At
// each position every rule whose kind pattern matches is asked for a rewrite; the longest
// accepted window wins and ties go to the rule declared first. The window is replaced in
// place by the single composite the rule returned, and scanning resumes at the replacement
// so that a fresh composite can immediately take part in a more specific fusion. Full passes
// repeat until one makes no change. Every rewrite must strictly shrink the pair (instruction
// count, emitted ROM bytes of the window), which both bounds the number of rewrites and
// catches broken rules; a rewrite that does not shrink it, or a pass count above the
// configured cap, is an InvariantViolation. Each replacement is revalidated against the
// resolver before it is accepted. A second buffer runs beside the instructions and holds,
// for each one, the input index it came from; a replacement inherits the origin of the first
// instruction of its window, and every diagnostic raised here names that input index.

//! Peephole fusion engine.

pub mod rules;

use crate::core::error::{CompileError, CompileResult, Diagnostic};
use crate::core::session::CompilationSession;
use crate::core::types::TypeRegistry;
use crate::mos6502::emit::Emitter;
use crate::mos6502::isa::encoded_len;
use crate::vil::builder::validate;
use crate::vil::Inst;
use bumpalo::collections::Vec as BumpVec;
use log::debug;

pub use rules::{Rule, RULES};

/// A rule that fired at some position.
struct Match {
    rule: &'static Rule,
    len: usize,
    replacement: Inst,
}

/// Best rewrite for the window starting at `window[0]`.
fn best_match(window: &[Inst]) -> CompileResult<Option<Match>> {
    let mut best: Option<Match> = None;
    for rule in RULES.iter() {
        if !rule.matches_kinds(window) {
            continue;
        }
        let len = rule.pattern.len();
        if best.as_ref().is_some_and(|b| b.len >= len) {
            continue;
        }
        if let Some(replacement) = (rule.apply)(rule.name, &window[..len])? {
            best = Some(Match {
                rule,
                len,
                replacement,
            });
        }
    }
    Ok(best)
}

/// ROM bytes the window would occupy once emitted.
fn rom_cost(insts: &[Inst]) -> CompileResult<usize> {
    let mut emitter = Emitter::new();
    let mut bytes = 0;
    for inst in insts {
        bytes += encoded_len(&emitter.emit(inst)?);
    }
    Ok(bytes)
}

/// Check that replacing `window` with `replacement` shrinks (count, bytes).
fn check_progress(rule: &Rule, window: &[Inst], replacement: &Inst) -> CompileResult<()> {
    let before = (window.len(), rom_cost(window)?);
    let after = (1, rom_cost(std::slice::from_ref(replacement))?);
    if after >= before {
        return Err(CompileError::invariant(format!(
            "rule `{}` does not shrink its window: {} insts/{} bytes became {} insts/{} bytes",
            rule.name, before.0, before.1, after.0, after.1
        )));
    }
    Ok(())
}

/// Fixed-point stream together with the input index of every instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fused {
    pub insts: Vec<Inst>,
    pub origins: Vec<usize>,
}

/// Rewrite `insts` to a fixed point of the rule table.
pub fn fuse(
    session: &CompilationSession<'_>,
    types: &TypeRegistry,
    insts: Vec<Inst>,
    max_passes: usize,
) -> Result<Fused, Diagnostic> {
    let mut origins = BumpVec::from_iter_in(0..insts.len(), session.arena());
    let mut buf = BumpVec::from_iter_in(insts, session.arena());
    let mut passes = 0;
    loop {
        if passes == max_passes {
            return Err(CompileError::invariant(format!(
                "fusion did not reach a fixed point within {} passes",
                max_passes
            ))
            .at(0));
        }
        passes += 1;
        session.record_pass();

        let mut rewrites = 0;
        let mut i = 0;
        while i < buf.len() {
            let origin = origins[i];
            let found = best_match(&buf[i..]).map_err(|e| e.at(origin))?;
            let Some(Match {
                rule,
                len,
                replacement,
            }) = found
            else {
                i += 1;
                continue;
            };
            validate(&replacement, types).map_err(|e| e.at(origin))?;
            check_progress(rule, &buf[i..i + len], &replacement).map_err(|e| e.at(origin))?;
            debug!(
                "pass {}: {} at {} (input {}) -> {}",
                passes,
                rule.name,
                i,
                origin,
                replacement.name()
            );
            buf.drain(i..i + len);
            buf.insert(i, replacement);
            origins.drain(i + 1..i + len);
            session.record_rewrite(rule.name);
            rewrites += 1;
        }

        debug!(
            "fusion pass {} made {} rewrites, {} instructions remain",
            passes,
            rewrites,
            buf.len()
        );
        if rewrites == 0 {
            break;
        }
    }
    Ok(Fused {
        insts: buf.into_iter().collect(),
        origins: origins.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Type;
    use crate::core::{ErrorKind, Operand};
    use crate::vil::{InstKind, StackSlot};
    use bumpalo::Bump;

    fn global(addr: u16) -> Operand {
        Operand::global(&TypeRegistry::new(), addr, Type::BYTE, None).unwrap()
    }

    fn constant(value: u16) -> Operand {
        Operand::constant(value, Type::BYTE, 1).unwrap()
    }

    fn add_to(source: u16, value: u16, target: u16) -> Vec<Inst> {
        vec![
            Inst::PushGlobal {
                source: global(source),
            },
            Inst::PushConstant {
                constant: constant(value),
            },
            Inst::AddFromStack {
                first: StackSlot::BYTE,
                second: StackSlot::BYTE,
            },
            Inst::PopToGlobal {
                target: global(target),
                stack: StackSlot::BYTE,
            },
        ]
    }

    fn run(insts: Vec<Inst>) -> Result<Vec<Inst>, Diagnostic> {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        fuse(&session, &TypeRegistry::new(), insts, 64).map(|fused| fused.insts)
    }

    #[test]
    fn test_add_chain_fuses_to_increment() {
        let out = run(add_to(0x90, 1, 0x90)).unwrap();
        assert_eq!(
            out,
            vec![Inst::IncrementGlobal {
                global: global(0x90),
                amount: 1
            }]
        );
    }

    #[test]
    fn test_add_three_stays_a_store() {
        let out = run(add_to(0x90, 3, 0x90)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), InstKind::AddFromGlobalAndConstantToGlobal);
    }

    #[test]
    fn test_different_target_is_not_increment() {
        let out = run(add_to(0x90, 1, 0x91)).unwrap();
        assert_eq!(out[0].kind(), InstKind::AddFromGlobalAndConstantToGlobal);
    }

    #[test]
    fn test_folded_store_needs_matching_copy_source() {
        let mut insts = vec![
            Inst::PushGlobal {
                source: global(0x90),
            },
            Inst::PushGlobal {
                source: global(0x91),
            },
            Inst::AddFromStack {
                first: StackSlot::BYTE,
                second: StackSlot::BYTE,
            },
            Inst::PopToGlobal {
                target: global(0x92),
                stack: StackSlot::BYTE,
            },
            Inst::PushGlobal {
                source: global(0x92),
            },
            Inst::PopToGlobal {
                target: global(0x93),
                stack: StackSlot::BYTE,
            },
        ];
        let out = run(insts.clone()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), InstKind::AddFromAddressesToAddresses);

        insts[4] = Inst::PushGlobal {
            source: global(0x95),
        };
        let out = run(insts).unwrap();
        assert_eq!(
            out.iter().map(|i| i.kind()).collect::<Vec<_>>(),
            vec![InstKind::AddFromAddressesToAddress, InstKind::CopyGlobalToGlobal]
        );
    }

    #[test]
    fn test_pass_cap() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let diag = fuse(&session, &TypeRegistry::new(), add_to(0x90, 1, 0x90), 1).unwrap_err();
        assert_eq!(diag.kind, ErrorKind::InvariantViolation);
    }

    #[test]
    fn test_rewrites_are_counted() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        fuse(&session, &TypeRegistry::new(), add_to(0x90, 2, 0x90), 64).unwrap();
        let stats = session.stats();
        assert_eq!(stats.rewrites, 3);
        assert_eq!(stats.rewrites_per_rule.get("increment_global"), Some(&1));
        assert_eq!(stats.fusion_passes, 2);
    }

    #[test]
    fn test_ambiguous_window_reports_start() {
        let insts = vec![
            Inst::Label {
                name: "top".to_string(),
            },
            Inst::PushGlobal {
                source: global(0x90),
            },
            Inst::BranchTrueFromStack {
                target: "top".to_string(),
                stack: StackSlot::BOOLEAN,
            },
        ];
        let diag = run(insts).unwrap_err();
        assert_eq!(diag.kind, ErrorKind::AmbiguousFusion);
        assert_eq!(diag.index, 1);
    }

    #[test]
    fn test_origins_follow_window_start() {
        let mut insts = vec![Inst::Label {
            name: "top".to_string(),
        }];
        insts.extend(add_to(0x90, 3, 0x91));
        insts.push(Inst::PushGlobal {
            source: global(0x92),
        });
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let fused = fuse(&session, &TypeRegistry::new(), insts, 64).unwrap();
        assert_eq!(
            fused.insts.iter().map(|i| i.kind()).collect::<Vec<_>>(),
            vec![
                InstKind::Label,
                InstKind::AddFromGlobalAndConstantToGlobal,
                InstKind::PushGlobal
            ]
        );
        assert_eq!(fused.origins, vec![0, 1, 5]);
    }

    #[test]
    fn test_ambiguous_window_after_rewrite_names_input_index() {
        let mut insts = add_to(0x90, 3, 0x91);
        insts.push(Inst::PushGlobal {
            source: global(0x90),
        });
        insts.push(Inst::BranchTrueFromStack {
            target: "top".to_string(),
            stack: StackSlot::BOOLEAN,
        });
        let diag = run(insts).unwrap_err();
        assert_eq!(diag.kind, ErrorKind::AmbiguousFusion);
        assert_eq!(diag.index, 4);
    }

    #[test]
    fn test_branch_to_next_label() {
        let insts = vec![
            Inst::Branch {
                target: "next".to_string(),
            },
            Inst::Label {
                name: "next".to_string(),
            },
        ];
        let out = run(insts).unwrap();
        assert_eq!(
            out,
            vec![Inst::Label {
                name: "next".to_string()
            }]
        );
    }
}
