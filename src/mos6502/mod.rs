// This module groups the 6502 backend: the statement model, operand addressing, the
// per-instruction expansion templates, and a reference executor used to check them.

pub mod addressing;
pub mod emit;
pub mod isa;
pub mod sim;

pub use emit::Emitter;
pub use isa::{Address, Mnemonic, Mode, Statement};
pub use sim::{Halt, Machine, SimError};
