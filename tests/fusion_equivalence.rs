//! Every fusion rule must leave RAM and the hardware stack exactly as the primitive
//! sequence it replaces. Both forms are compiled from the same source and run on the
//! reference executor from identical starting states.

use bumpalo::Bump;
use vilc::compiler::{CompileOptions, Compiler, Output};
use vilc::core::reserved::{RESERVED_BASE, RESERVED_SLOTS};
use vilc::core::{CompilationSession, SessionStats};
use vilc::mos6502::{Halt, Machine};
use vilc::text::parse_program;

/// (rule expected to fire, primitive source)
const CASES: &[(&str, &str)] = &[
    (
        "add_global_constant",
        "pushGlobal $90:byte\npushConstant #7:byte\naddFromStack byte, byte\n",
    ),
    (
        "add_constant_global",
        "pushConstant #7:byte\npushGlobal $90:byte\naddFromStack byte, byte\n",
    ),
    (
        "add_global_constant_to_global",
        "pushGlobal $90:byte\npushConstant #200:byte\naddFromStack byte, byte\n\
         popToGlobal $92:byte, byte\n",
    ),
    (
        "increment_global",
        "pushGlobal $90:byte\npushConstant #2:byte\naddFromStack byte, byte\n\
         popToGlobal $90:byte, byte\n",
    ),
    (
        "add_globals",
        "pushGlobal $90:byte\npushGlobal $91:byte\naddFromStack byte, byte\n",
    ),
    (
        "add_globals_to_global",
        "pushGlobal $90:byte\npushGlobal $91:byte\naddFromStack byte, byte\n\
         popToGlobal $0300:byte, byte\n",
    ),
    (
        "add_globals_to_globals",
        "pushGlobal $90:byte\npushGlobal $91:byte\naddFromStack byte, byte\n\
         popToGlobal $92:byte, byte\npushGlobal $92:byte\npopToGlobal $93:byte, byte\n",
    ),
    (
        "sub_global_constant",
        "pushGlobal $90:byte\npushConstant #3:byte\nsubFromStack byte, byte\n",
    ),
    (
        "sub_global_constant_to_global",
        "pushGlobal $90:byte\npushConstant #3:byte\nsubFromStack byte, byte\n\
         popToGlobal $92:byte, byte\n",
    ),
    (
        "decrement_global",
        "pushGlobal $90:byte\npushConstant #1:byte\nsubFromStack byte, byte\n\
         popToGlobal $90:byte, byte\n",
    ),
    (
        "compare_gt_global_constant",
        "pushGlobal $90:byte\npushConstant #3:byte\ncompareGreaterThanFromStack byte, byte\n",
    ),
    (
        "compare_gt_global_constant",
        "pushGlobal $90:byte\npushConstant #0:byte\ncompareGreaterThanFromStack byte, byte\n",
    ),
    (
        "compare_gt_global_constant_to_global",
        "pushGlobal $90:byte\npushConstant #3:byte\ncompareGreaterThanFromStack byte, byte\n\
         popToGlobal $92:bool, bool\n",
    ),
    (
        "branch_if_gt_global_constant",
        "pushGlobal $90:byte\npushConstant #3:byte\ncompareGreaterThanFromStack byte, byte\n\
         branchTrueFromStack taken, bool\n",
    ),
    (
        "branch_if_gt_global_constant",
        "pushGlobal $90:byte\npushConstant #0:byte\ncompareGreaterThanFromStack byte, byte\n\
         branchTrueFromStack taken, bool\n",
    ),
    (
        "branch_true_from_global",
        "pushGlobal $95:bool\nbranchTrueFromStack taken, bool\n",
    ),
    (
        "assign_constant",
        "pushConstant #9:byte\npopToGlobal $0310:byte, byte\n",
    ),
    (
        "copy_global",
        "pushGlobal $90:byte\npopToGlobal $92:byte, byte\n",
    ),
    ("branch_to_next", "branch next\nnext:\npopStack byte\n"),
];

/// Starting values for $90, $91 and $95.
const STATES: &[(u8, u8, u8)] = &[
    (0, 0, 0),
    (3, 5, 1),
    (5, 3, 0),
    (3, 3, 1),
    (0xff, 0x02, 0),
    (0x80, 0x80, 1),
];

fn compile(source: &str, fuse: bool) -> (Output, SessionStats) {
    let program = parse_program(source).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let options = CompileOptions {
        fuse,
        ..CompileOptions::default()
    };
    let output = Compiler::new(&session, options).compile(&program).unwrap();
    (output, session.stats())
}

fn machine(state: (u8, u8, u8)) -> Machine {
    let mut m = Machine::new();
    m.write(0x90, state.0);
    m.write(0x91, state.1);
    m.write(0x95, state.2);
    m.write(0x92, 0x5a);
    m.write(0x0300, 0xa5);
    // A value for `popStack` to discard.
    m.push(0x11);
    m
}

/// RAM with the reserved scratch bytes masked out.
fn observable_ram(m: &Machine) -> Vec<u8> {
    let mut ram = m.ram();
    let start = RESERVED_BASE as usize;
    for byte in &mut ram[start..start + RESERVED_SLOTS as usize] {
        *byte = 0;
    }
    ram
}

fn run(output: &Output, state: (u8, u8, u8)) -> (Halt, Vec<u8>, Vec<u8>) {
    let mut m = machine(state);
    let halt = m.run(&output.statements).unwrap();
    (halt, observable_ram(&m), m.stack())
}

#[test]
fn test_every_rule_preserves_memory_and_stack() {
    let _ = env_logger::builder().is_test(true).try_init();

    for (rule, source) in CASES {
        let (primitive, _) = compile(source, false);
        let (fused, stats) = compile(source, true);
        assert!(
            stats.rewrites_per_rule.contains_key(rule),
            "{} did not fire for:\n{}",
            rule,
            source
        );
        assert!(fused.insts.len() < primitive.insts.len());

        for state in STATES {
            let expected = run(&primitive, *state);
            let actual = run(&fused, *state);
            assert_eq!(actual, expected, "{} diverges from {:?}", rule, state);
        }
    }
}

#[test]
fn test_every_rule_is_covered() {
    for rule in vilc::fusion::RULES.iter() {
        assert!(
            CASES.iter().any(|(name, _)| *name == rule.name),
            "no equivalence case for {}",
            rule.name
        );
    }
}

#[test]
fn test_fused_code_is_smaller() {
    for (rule, source) in CASES {
        let (primitive, _) = compile(source, false);
        let (fused, _) = compile(source, true);
        assert!(
            fused.rom_bytes() < primitive.rom_bytes(),
            "{}: {} bytes fused, {} bytes primitive",
            rule,
            fused.rom_bytes(),
            primitive.rom_bytes()
        );
    }
}
