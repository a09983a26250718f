//! Behavioural tests of compiled programs, executed on the reference 6502 model.

use bumpalo::Bump;
use vilc::compiler::{CompileOptions, Compiler, Output};
use vilc::core::{CompilationSession, Diagnostic, ErrorKind};
use vilc::mos6502::{Halt, Machine};
use vilc::text::parse_program;
use vilc::vil::InstKind;

fn compile_with(source: &str, options: CompileOptions) -> Result<Output, Diagnostic> {
    let program = parse_program(source).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    Compiler::new(&session, options).compile(&program)
}

fn compile(source: &str) -> Output {
    compile_with(source, CompileOptions::default()).unwrap()
}

fn run(output: &Output, setup: impl FnOnce(&mut Machine)) -> Machine {
    let mut m = Machine::new();
    setup(&mut m);
    assert_eq!(m.run(&output.statements).unwrap(), Halt::End);
    m
}

#[test]
fn test_add_wraps_modulo_256() {
    let _ = env_logger::builder().is_test(true).try_init();

    for (a, b) in [(0u8, 0u8), (1, 2), (200, 100), (255, 1), (128, 128), (255, 255)] {
        let output = compile(&format!(
            "pushConstant #{}:byte\npushConstant #{}:byte\naddFromStack byte, byte\n",
            a, b
        ));
        let m = run(&output, |_| {});
        assert_eq!(m.stack(), vec![a.wrapping_add(b)], "{} + {}", a, b);
    }
}

#[test]
fn test_compare_greater_than_is_strict() {
    for (a, b, expected) in [(5u8, 3u8, 1u8), (3, 5, 0), (3, 3, 0), (0, 255, 0), (255, 0, 1)] {
        let output = compile(&format!(
            "pushConstant #{}:byte\npushConstant #{}:byte\ncompareGreaterThanFromStack byte, byte\n",
            a, b
        ));
        let m = run(&output, |_| {});
        assert_eq!(m.stack(), vec![expected], "{} > {}", a, b);
    }
}

#[test]
fn test_fused_compare_matches_stack_compare() {
    for value in [0u8, 2, 3, 4, 255] {
        let output = compile(
            "pushGlobal $90:byte\npushConstant #3:byte\ncompareGreaterThanFromStack byte, byte\n\
             popToGlobal $91:bool, bool\n",
        );
        assert_eq!(output.insts.len(), 1);
        let m = run(&output, |m| m.write(0x90, value));
        assert_eq!(m.read(0x91), (value > 3) as u8, "{} > 3", value);
    }
}

#[test]
fn test_increment_fires_only_for_small_self_updates() {
    let source = |src: u16, amount: u8, dst: u16| {
        format!(
            "pushGlobal ${:02x}:byte\npushConstant #{}:byte\naddFromStack byte, byte\n\
             popToGlobal ${:02x}:byte, byte\n",
            src, amount, dst
        )
    };

    for amount in [1, 2] {
        let output = compile(&source(0x90, amount, 0x90));
        assert_eq!(output.insts.len(), 1);
        assert_eq!(output.insts[0].kind(), InstKind::IncrementGlobal);
        let m = run(&output, |m| m.write(0x90, 0xff));
        assert_eq!(m.read(0x90), 0xffu8.wrapping_add(amount));
    }

    let output = compile(&source(0x90, 3, 0x90));
    assert_eq!(output.insts[0].kind(), InstKind::AddFromGlobalAndConstantToGlobal);
    assert!(output.asm().contains("ADC #$03"));
    let m = run(&output, |m| m.write(0x90, 10));
    assert_eq!(m.read(0x90), 13);

    let output = compile(&source(0x90, 1, 0x91));
    assert_eq!(output.insts[0].kind(), InstKind::AddFromGlobalAndConstantToGlobal);
}

#[test]
fn test_truncating_store_keeps_low_bytes() {
    let output = compile("pushConstant #4660:byte@2\npopToGlobal $90:byte, byte@2\n");
    let m = run(&output, |_| {});
    assert_eq!(m.read(0x90), 0x34);
    assert_eq!(m.read(0x91), 0);
    assert!(m.stack().is_empty());
}

#[test]
fn test_size_mismatch_on_pointer_store_is_rejected() {
    let err = parse_program("pushGlobal $94:byte*\npopToGlobal $96:byte*@2, byte*\n").unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("UnsupportedSize"));
}

#[test]
fn test_end_to_end_add_fuses_without_stack_traffic() {
    let output = compile(
        "pushConstant #10:byte\npushGlobal $90:byte\naddFromStack byte, byte\n\
         popToGlobal $91:byte, byte\n",
    );
    assert_eq!(output.insts.len(), 1);
    assert_eq!(output.insts[0].kind(), InstKind::AddFromGlobalAndConstantToGlobal);
    let asm = output.asm();
    assert!(!asm.contains("PHA"), "{}", asm);
    assert!(!asm.contains("PLA"), "{}", asm);

    for x in [0u8, 5, 250] {
        let m = run(&output, |m| m.write(0x90, x));
        assert_eq!(m.read(0x91), x.wrapping_add(10));
        assert!(m.stack().is_empty());
    }
}

#[test]
fn test_loop_counts_down() {
    let output = compile(
        "top:\n\
         pushGlobal $90:byte\npushConstant #1:byte\nsubFromStack byte, byte\n\
         popToGlobal $90:byte, byte\n\
         pushGlobal $91:byte\npushConstant #1:byte\naddFromStack byte, byte\n\
         popToGlobal $91:byte, byte\n\
         pushGlobal $90:byte\npushConstant #0:byte\ncompareGreaterThanFromStack byte, byte\n\
         branchTrueFromStack top, bool\n",
    );
    let kinds: Vec<_> = output.insts.iter().map(|i| i.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            InstKind::Label,
            InstKind::DecrementGlobal,
            InstKind::IncrementGlobal,
            InstKind::BranchIfGreaterThanFromGlobalAndConstant,
        ]
    );
    let m = run(&output, |m| m.write(0x90, 7));
    assert_eq!(m.read(0x90), 0);
    assert_eq!(m.read(0x91), 7);
}

#[test]
fn test_call_and_return() {
    let output = compile(
        "callVoid helper\nbranch done\n\
         helper:\npushConstant #42:byte\npopToGlobal $90:byte, byte\nreturnFromCall\n\
         done:\n",
    );
    let m = run(&output, |_| {});
    assert_eq!(m.read(0x90), 42);
    assert_eq!(m.sp, 0xff);
}

#[test]
fn test_pointer_round_trip() {
    let output = compile(
        ".type point 3\n\
         pushConstant #7:byte\npopToGlobal [*$94:point*]+2:byte, byte\n\
         pushGlobal [*$94:point*]+2:byte\npushConstant #1:byte\naddFromStack byte, byte\n\
         popToGlobal $90:byte, byte\n",
    );
    let m = run(&output, |m| m.write(0x94, 0xa0));
    assert_eq!(m.read(0xa2), 7);
    assert_eq!(m.read(0x90), 8);
}

#[test]
fn test_rom_lookup_by_stack_index() {
    let output = compile("pushConstant #2:byte\npushGlobal DATA[s]:byte\npopToGlobal $90:byte, byte\n");
    let m = run(&output, |m| {
        m.define_symbol("DATA", 0x0400);
        m.load(0x0400, &[10, 20, 30, 40]);
    });
    assert_eq!(m.read(0x90), 30);
}

#[test]
fn test_ambiguous_fusion_is_reported() {
    let err = compile_with(
        "pushGlobal $96:byte*@2\nbranchTrueFromStack l, bool\n",
        CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AmbiguousFusion);
    assert_eq!(err.index, 0);
}

#[test]
fn test_errors_name_the_input_instruction_after_fusion() {
    let err = compile_with(
        "pushGlobal $90:byte\npushConstant #1:byte\naddFromStack byte, byte\n\
         popToGlobal $90:byte, byte\n\
         pushGlobal $91:byte\npopToGlobal $92:byte, byte\n\
         pushConstant #1:byte\nbranchTrueFromStack l, bool\n",
        CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert_eq!(err.index, 7);
    assert!(err.to_string().starts_with("TypeMismatch at instruction 7"));
}
