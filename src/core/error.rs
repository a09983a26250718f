// This module defines the error types for the VIL backend using the thiserror crate for
// idiomatic Rust error handling. CompileError is the main error enum and has one variant per
// failure kind the backend can raise: incompatible operand types, operand sizes the target
// does not support yet, unknown type encodings, CPU register indices out of range, broken
// internal invariants, and fusion rules whose guards see contradictory metadata. Every
// variant carries the context needed to explain the failure. Diagnostic is the structured
// form handed to callers of the pipeline: it pairs the error kind with the index of the
// offending instruction. All errors are fatal for the compilation unit; nothing is retried
// and nothing is downgraded to a best-effort code path.

//! Error types for the VIL backend.
//!
//! Using thiserror for more idiomatic error handling.

use std::fmt;
use thiserror::Error;

/// Main error type for resolving, fusing and emitting VIL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Type mismatch: {reason}")]
    TypeMismatch { reason: String },

    #[error("Unsupported size: {reason}")]
    UnsupportedSize { reason: String },

    #[error("Unknown type: {name}")]
    UnknownType { name: String },

    #[error("Invalid register index: {index}")]
    InvalidRegisterIndex { index: u8 },

    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("Ambiguous fusion in rule `{rule}`: {reason}")]
    AmbiguousFusion { rule: &'static str, reason: String },
}

impl CompileError {
    pub fn type_mismatch(reason: impl Into<String>) -> Self {
        CompileError::TypeMismatch { reason: reason.into() }
    }

    pub fn unsupported_size(reason: impl Into<String>) -> Self {
        CompileError::UnsupportedSize { reason: reason.into() }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        CompileError::InvariantViolation { reason: reason.into() }
    }

    /// The kind of this error, without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            CompileError::UnsupportedSize { .. } => ErrorKind::UnsupportedSize,
            CompileError::UnknownType { .. } => ErrorKind::UnknownType,
            CompileError::InvalidRegisterIndex { .. } => ErrorKind::InvalidRegisterIndex,
            CompileError::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            CompileError::AmbiguousFusion { .. } => ErrorKind::AmbiguousFusion,
        }
    }

    /// Attach the index of the instruction that raised this error.
    pub fn at(self, index: usize) -> Diagnostic {
        Diagnostic {
            kind: self.kind(),
            index,
            message: self.to_string(),
        }
    }
}

/// Error kinds, as reported in a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeMismatch,
    UnsupportedSize,
    UnknownType,
    InvalidRegisterIndex,
    InvariantViolation,
    AmbiguousFusion,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::UnsupportedSize => "UnsupportedSize",
            ErrorKind::UnknownType => "UnknownType",
            ErrorKind::InvalidRegisterIndex => "InvalidRegisterIndex",
            ErrorKind::InvariantViolation => "InvariantViolation",
            ErrorKind::AmbiguousFusion => "AmbiguousFusion",
        };
        f.write_str(name)
    }
}

/// A fatal error surfaced to the caller of the pipeline.
///
/// `index` is the position of the offending instruction in the input program.
/// Errors raised on a fused window name the window's first input instruction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at instruction {index}: {message}")]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub index: usize,
    pub message: String,
}

impl Diagnostic {
    /// Translate a position in a rewritten stream back to its input index.
    pub fn at_origin(mut self, origins: &[usize]) -> Self {
        if let Some(&origin) = origins.get(self.index) {
            self.index = origin;
        }
        self
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
