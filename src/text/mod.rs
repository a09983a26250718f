// This module holds the textual surfaces of the backend: the VIL parser used by the command
// line and the file tests, the printers for VIL and for emitted assembly, and the
// FileCheck-style harness that drives the file tests.

//! Textual VIL and assembly.

pub mod check;
pub mod parser;
pub mod printer;

pub use check::{CheckDirective, RunDirective, TestRunner, TestSpec};
pub use parser::{parse_program, ParseError};
pub use printer::{print_insts, print_program, print_statements};
