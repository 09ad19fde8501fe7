//! IR errors

use thiserror::Error;

/// Errors that can occur while decoding or building a stub program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    /// Opcode byte with no entry in the op table
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Program ended in the middle of an op or before its terminal
    #[error("Unexpected end of stub program at offset {offset}")]
    UnexpectedEnd {
        /// Byte offset where more input was expected
        offset: usize,
    },

    /// Value type byte outside the tag range
    #[error("Invalid value type: {0}")]
    InvalidValueType(u8),

    /// Guard class kind byte outside the known kinds
    #[error("Invalid guard class kind: {0}")]
    InvalidGuardClassKind(u8),

    /// Stub field offset past the end of the data blob
    #[error("Stub field offset {offset} out of bounds (len={len})")]
    FieldOutOfBounds {
        /// Byte offset that was requested
        offset: u32,
        /// Length of the blob in bytes
        len: usize,
    },

    /// Stub field read with a type it was not declared with
    #[error("Stub field at offset {offset} has type {found:?}, expected {expected:?}")]
    FieldTypeMismatch {
        /// Byte offset of the field
        offset: u32,
        /// Type the reader asked for
        expected: crate::StubFieldType,
        /// Type the field was written with
        found: crate::StubFieldType,
    },

    /// More than 256 operands or fields
    #[error("Too many operands or stub fields")]
    TooManyOperands,

    /// Writer finished without a terminal op
    #[error("Stub program does not end with ReturnFromIc")]
    MissingTerminal,
}

/// Result type for IR operations
pub type Result<T> = std::result::Result<T, IrError>;
