// This module wires the backend stages into one pipeline. A program is first validated
// instruction by instruction against its type registry, then optionally rewritten by the
// fusion engine, then checked by the stack verifier, and finally expanded into 6502
// statements. Each stage reports failures as a Diagnostic carrying the index of the
// offending instruction in the input program; the fusion engine hands back the input
// origin of every surviving instruction and later stages are mapped through it. The
// session records instruction counts before and after fusion together with the emitted
// statement count and ROM size.

//! End-to-end compilation pipeline.

use crate::core::error::Diagnostic;
use crate::core::session::CompilationSession;
use crate::fusion::{fuse, Fused};
use crate::mos6502::emit::Emitter;
use crate::mos6502::isa::{encoded_len, Statement};
use crate::text::printer::print_statements;
use crate::vil::builder::validate;
use crate::vil::verifier::verify_insts;
use crate::vil::{Inst, Program};
use log::info;

/// Default cap on fusion passes.
pub const DEFAULT_MAX_PASSES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Run the fusion engine.
    pub fuse: bool,
    /// Precede each expansion with a comment naming its instruction.
    pub annotate: bool,
    pub max_passes: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            fuse: true,
            annotate: false,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

/// Result of compiling one program.
#[derive(Debug, Clone)]
pub struct Output {
    /// The instruction stream after fusion.
    pub insts: Vec<Inst>,
    pub statements: Vec<Statement>,
}

impl Output {
    pub fn rom_bytes(&self) -> usize {
        encoded_len(&self.statements)
    }

    /// Assembler source of the emitted statements.
    pub fn asm(&self) -> String {
        print_statements(&self.statements)
    }
}

pub struct Compiler<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    options: CompileOptions,
}

impl<'s, 'arena> Compiler<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>, options: CompileOptions) -> Self {
        Self { session, options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile(&self, program: &Program) -> Result<Output, Diagnostic> {
        for (index, inst) in program.insts.iter().enumerate() {
            validate(inst, &program.types).map_err(|e| e.at(index))?;
        }
        self.session.record_program_in(program.len());

        let Fused { insts, origins } = if self.options.fuse {
            fuse(
                self.session,
                &program.types,
                program.insts.clone(),
                self.options.max_passes,
            )?
        } else {
            Fused {
                insts: program.insts.clone(),
                origins: (0..program.len()).collect(),
            }
        };
        self.session.record_program_out(insts.len());

        verify_insts(&insts).map_err(|d| d.at_origin(&origins))?;

        let statements = Emitter::with_annotations(self.options.annotate)
            .emit_program(&insts)
            .map_err(|d| d.at_origin(&origins))?;
        let rom_bytes = encoded_len(&statements);
        self.session.record_emitted(statements.len(), rom_bytes);

        info!(
            "compiled {} instructions into {} ({} statements, {} ROM bytes)",
            program.len(),
            insts.len(),
            statements.len(),
            rom_bytes
        );
        Ok(Output { insts, statements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::text::parser::parse_program;
    use crate::vil::InstKind;
    use bumpalo::Bump;

    const INCREMENT: &str = "pushGlobal $90:byte
pushConstant #1:byte
addFromStack byte, byte
popToGlobal $90:byte, byte
";

    fn compile(text: &str, options: CompileOptions) -> Result<Output, Diagnostic> {
        let program = parse_program(text).unwrap();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        Compiler::new(&session, options).compile(&program)
    }

    #[test]
    fn test_fused_increment() {
        let output = compile(INCREMENT, CompileOptions::default()).unwrap();
        assert_eq!(output.insts.len(), 1);
        assert_eq!(output.insts[0].kind(), InstKind::IncrementGlobal);
        assert_eq!(output.asm(), "\tINC $90\n");
        assert_eq!(output.rom_bytes(), 2);
    }

    #[test]
    fn test_unfused_keeps_stack_traffic() {
        let options = CompileOptions {
            fuse: false,
            ..CompileOptions::default()
        };
        let output = compile(INCREMENT, options).unwrap();
        assert_eq!(output.insts.len(), 4);
        assert!(output.asm().contains("PHA"));
        assert!(output.rom_bytes() > 2);
    }

    #[test]
    fn test_annotations() {
        let options = CompileOptions {
            annotate: true,
            ..CompileOptions::default()
        };
        let output = compile(INCREMENT, options).unwrap();
        assert!(output.asm().starts_with("\t; incrementGlobal\n"));
    }

    #[test]
    fn test_verifier_runs_after_fusion() {
        let diag = compile(
            "pushConstant #1:byte\nbranchTrueFromStack l, bool\n",
            CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(diag.kind, ErrorKind::TypeMismatch);
        assert_eq!(diag.index, 1);
    }

    #[test]
    fn test_error_after_rewrite_names_input_instruction() {
        let diag = compile(
            "pushConstant #1:byte\npopToGlobal $90:byte, byte\n\
             pushConstant #1:byte\nbranchTrueFromStack l, bool\n",
            CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(diag.kind, ErrorKind::TypeMismatch);
        assert_eq!(diag.index, 3);
    }

    #[test]
    fn test_session_records_counts() {
        let program = parse_program(INCREMENT).unwrap();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        Compiler::new(&session, CompileOptions::default())
            .compile(&program)
            .unwrap();
        let stats = session.stats();
        assert_eq!(stats.programs_compiled, 1);
        assert_eq!(stats.instructions_in, 4);
        assert_eq!(stats.instructions_out, 1);
        assert_eq!(stats.rom_bytes, 2);
    }
}
