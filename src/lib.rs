//! vilc - VIL stack IR to 6502 backend.
//!
//! Lowers a typed stack-machine intermediate language into 6502 statement
//! sequences for a flat-addressed 8-bit target with a hardware stack, three
//! registers and a small reserved zero-page scratch region. A peephole fusion
//! engine first collapses push/operate/pop chains into memory-to-memory
//! composites so the common cases never touch the hardware stack.
//!
//! # Primary Usage
//!
//! ```ignore
//! use vilc::compiler::{CompileOptions, Compiler};
//! use vilc::core::CompilationSession;
//! use vilc::text::parse_program;
//! use bumpalo::Bump;
//!
//! let program = parse_program("pushGlobal $90:byte\npopToGlobal $91:byte, byte\n")?;
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let output = Compiler::new(&session, CompileOptions::default()).compile(&program)?;
//! print!("{}", output.asm());
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Types, operands, reserved slots, errors and the session
//! - [`vil`] - Instruction set, catalog, builder and stack verifier
//! - [`fusion`] - Peephole fusion rules and the fixed-point driver
//! - [`mos6502`] - Statement model, addressing, emitter and reference executor
//! - [`text`] - Textual VIL parser, printers and the file-test checker
//! - [`compiler`] - Pipeline driver

pub mod compiler;
pub mod core;
pub mod fusion;
pub mod mos6502;
pub mod text;
pub mod vil;

pub use crate::compiler::{CompileOptions, Compiler, Output};
pub use crate::core::{
    CompilationSession, CompileError, CompileResult, Diagnostic, ErrorKind, Operand, SessionStats,
    Type, TypeRegistry,
};
pub use crate::vil::{Builder, Catalog, Inst, InstKind, Program, StackSlot};
