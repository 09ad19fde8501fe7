//! Stub program builder.
//!
//! One emit method per op is generated from the op table (see [`crate::op`]).

use crate::error::{IrError, Result};
use crate::op::Op;
use crate::operand::{KindedOperandId, OperandId, ValOperandId};
use crate::stub::{StubData, StubField, StubFieldType, StubProgram};

/// Builds a [`StubProgram`] and its [`StubData`] side blob.
#[derive(Debug, Clone)]
pub struct StubWriter {
    code: Vec<u8>,
    data: StubData,
    num_inputs: u8,
    next_operand: u16,
    terminated: bool,
    overflowed: bool,
}

impl StubWriter {
    /// Writer for a program taking `num_inputs` boxed values.
    pub fn new(num_inputs: u8) -> Self {
        Self {
            code: Vec::new(),
            data: StubData::new(),
            num_inputs,
            next_operand: u16::from(num_inputs),
            terminated: false,
            overflowed: false,
        }
    }

    /// Operand id of input `index`.
    pub fn input(&self, index: u8) -> ValOperandId {
        debug_assert!(index < self.num_inputs, "input {index} out of range");
        ValOperandId::new(index)
    }

    /// Allocate a fresh operand id of kind `T`.
    pub fn new_operand<T: KindedOperandId>(&mut self) -> T {
        let index = match u8::try_from(self.next_operand) {
            Ok(index) => index,
            Err(_) => {
                self.overflowed = true;
                u8::MAX
            }
        };
        self.next_operand += 1;
        T::from_id(OperandId(index))
    }

    /// Append a stub data field.
    pub fn add_field(&mut self, ty: StubFieldType, word: u64) -> StubField {
        match self.data.push(ty, word) {
            Ok(field) => field,
            Err(_) => {
                self.overflowed = true;
                StubField::from_index(u8::MAX)
            }
        }
    }

    /// Append an int32 field.
    pub fn add_int32_field(&mut self, value: i32) -> StubField {
        self.add_field(StubFieldType::RawInt32, value as i64 as u64)
    }

    /// Append an already-built op.
    pub fn write_op(&mut self, op: Op) {
        debug_assert!(!self.terminated, "op written after terminal");
        op.encode(&mut self.code);
        if op.opcode().is_terminal() {
            self.terminated = true;
        }
    }

    /// Number of operand ids allocated so far.
    pub fn num_operands(&self) -> usize {
        self.next_operand as usize
    }

    /// Finish the program.
    pub fn finish(self) -> Result<(StubProgram, StubData)> {
        if self.overflowed || self.next_operand > 256 {
            return Err(IrError::TooManyOperands);
        }
        if !self.terminated {
            return Err(IrError::MissingTerminal);
        }
        let program = StubProgram::from_parts(self.code, self.next_operand, self.num_inputs);
        Ok((program, self.data))
    }
}
