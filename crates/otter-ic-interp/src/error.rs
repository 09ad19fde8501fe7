//! Interpreter errors
//!
//! These report malformed programs. Guard failures and call-out errors are
//! ordinary [`crate::Outcome`]s, never errors.

use otter_ic_ir::{IrError, OperandKind};
use thiserror::Error;

/// Errors that can occur while interpreting a stub program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpreterError {
    /// Program or stub data failed to decode
    #[error("Decode error: {0}")]
    Decode(#[from] IrError),

    /// Operand read with a kind it does not hold
    #[error("Operand {operand}: expected {}, found {}", .expected.name(), .found.name())]
    KindMismatch {
        /// Operand index
        operand: u8,
        /// Kind the op declared
        expected: OperandKind,
        /// Kind the operand holds
        found: OperandKind,
    },

    /// Operand read before any op defined it
    #[error("Operand {0} read before definition")]
    Uninitialized(u8),

    /// Operand defined twice in one execution
    #[error("Operand {0} defined twice")]
    Redefined(u8),

    /// Operand id past the program's operand count
    #[error("Operand {operand} out of range (num_operands={len})")]
    OperandOutOfRange {
        /// Operand index
        operand: u8,
        /// Declared operand count
        len: usize,
    },

    /// Wrong number of input values
    #[error("Expected {expected} inputs, got {found}")]
    InputCount {
        /// Declared inputs
        expected: usize,
        /// Provided inputs
        found: usize,
    },

    /// Slot offset that does not name a slot of the object
    #[error("Invalid slot offset {0}")]
    InvalidSlotOffset(i32),

    /// Op arguments the generator should never produce
    #[error("Malformed op: {0}")]
    Malformed(String),
}

/// Result type for interpreter operations
pub type Result<T> = std::result::Result<T, InterpreterError>;
