//! # Otter IC IR
//!
//! This crate defines the inline-cache intermediate representation used by
//! Otter's property and call-site caches.
//!
//! ## Design Principles
//!
//! - **Typed operands**: every operand id carries a static kind, narrowing
//!   guards define new ids instead of mutating old ones
//! - **One op table**: [`for_each_cache_op!`] drives the opcode enum, the
//!   decoder, the writer and the handler trait shared by both backends
//! - **Forward only**: a stub program is read once, left to right, and ends at
//!   the `ReturnFromIc` terminal

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod op;
pub mod operand;
pub mod reader;
pub mod stub;
pub mod types;
pub mod writer;

pub use error::{IrError, Result};
pub use op::{CacheOp, CacheOpHandler, Op, dispatch};
pub use operand::{
    BigIntOperandId, BooleanOperandId, Int32OperandId, IntPtrOperandId, NumberOperandId,
    ObjOperandId, OperandId, OperandKind, StringOperandId, SymbolOperandId, TypedOperandId,
    ValOperandId, ValueTagOperandId,
};
pub use reader::StubReader;
pub use stub::{StubData, StubField, StubFieldType, StubProgram};
pub use types::{GuardClassKind, ValueType};
pub use writer::StubWriter;

/// Size in bytes of one stub data word.
pub const STUB_WORD_SIZE: u32 = 8;
