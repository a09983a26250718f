// This module gathers the leaf infrastructure of the VIL backend that every other stage
// shares: the error types, the type and size resolver with its registry, the operand
// descriptors, the reserved scratch slot pool with the CPU register indices, and the
// arena-backed compilation session. None of these depend on the instruction set, the fusion
// engine or the 6502 emitter.

//! Core VIL backend infrastructure.
//!
//! # Key Components
//!
//! ## Types (`types`)
//! - Closed type universe with parity-encoded pointers
//! - Result-type and store-rule resolution
//!
//! ## Operands (`operand`)
//! - Constants, globals, fields, pointer dereferences and ROM elements
//!
//! ## Reserved slots (`reserved`)
//! - Fixed zero-page scratch bytes and register indices
//!
//! ## Session Management (`session`)
//! - Arena allocation using `bumpalo`
//! - Fusion and emission statistics

pub mod error;
pub mod operand;
pub mod reserved;
pub mod session;
pub mod types;

pub use error::{CompileError, CompileResult, Diagnostic, ErrorKind};

pub use operand::{Operand, OperandKind, RomIndex};

pub use reserved::{Register, ReservedSlots, ScratchSlot, SlotSet};

pub use session::{CompilationSession, SessionStats};

pub use types::{StoreKind, Type, TypeOp, TypeRegistry};
