//! Forward-only stub program cursor

use crate::error::{IrError, Result};
use crate::op::Op;
use crate::operand::OperandId;
use crate::stub::{StubField, StubProgram};

/// Reads ops from a stub program, left to right, with no backtracking.
#[derive(Debug, Clone)]
pub struct StubReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> StubReader<'a> {
    /// Cursor at the start of `program`.
    pub fn new(program: &'a StubProgram) -> Self {
        Self::from_bytes(program.code())
    }

    /// Cursor over a raw byte stream.
    pub fn from_bytes(code: &'a [u8]) -> Self {
        Self { code, pos: 0 }
    }

    /// Whether any bytes remain.
    #[inline]
    pub fn more(&self) -> bool {
        self.pos < self.code.len()
    }

    /// Current byte offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Decode the next op.
    pub fn read_op(&mut self) -> Result<Op> {
        Op::decode(self)
    }

    /// Read one byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .code
            .get(self.pos)
            .ok_or(IrError::UnexpectedEnd { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a little-endian `i32` immediate.
    pub fn read_i32(&mut self) -> Result<i32> {
        let end = self.pos + 4;
        let bytes = self
            .code
            .get(self.pos..end)
            .ok_or(IrError::UnexpectedEnd { offset: self.pos })?;
        let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.pos = end;
        Ok(value)
    }

    /// Read an operand id.
    pub fn read_operand_id(&mut self) -> Result<OperandId> {
        self.read_byte().map(OperandId)
    }

    /// Read a stub field reference (encoded as a word index).
    pub fn read_field_offset(&mut self) -> Result<StubField> {
        self.read_byte().map(StubField::from_index)
    }
}
