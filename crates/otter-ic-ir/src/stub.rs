//! Stub programs and their side data blob

use serde::{Deserialize, Serialize};

use crate::STUB_WORD_SIZE;
use crate::error::{IrError, Result};

/// Byte offset of a field in a [`StubData`] blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StubField(pub u32);

impl StubField {
    /// Field for the given word index
    #[inline]
    pub const fn from_index(index: u8) -> Self {
        Self(index as u32 * STUB_WORD_SIZE)
    }

    /// Byte offset into the blob
    #[inline]
    pub const fn offset(self) -> u32 {
        self.0
    }

    /// Word index into the blob
    #[inline]
    pub const fn word_index(self) -> usize {
        (self.0 / STUB_WORD_SIZE) as usize
    }
}

/// Declared type of a stub data word. Drives decoding checks and GC tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StubFieldType {
    /// Plain 32-bit integer (stored sign-extended)
    RawInt32,
    /// Plain 64-bit integer
    RawInt64,
    /// Untraced pointer
    RawPointer,
    /// Shape descriptor pointer
    Shape,
    /// Class descriptor pointer (static, untraced)
    Class,
    /// Object pointer
    Object,
    /// Boxed value
    Value,
}

impl StubFieldType {
    /// Whether the word may hold a heap reference the GC must see.
    pub const fn is_traced(self) -> bool {
        matches!(
            self,
            StubFieldType::Shape | StubFieldType::Object | StubFieldType::Value
        )
    }
}

/// Decoded view of a stub data word.
pub trait FromStubWord: Sized {
    /// Field type this view reads.
    const FIELD_TYPE: StubFieldType;

    /// Decode the raw word.
    fn from_word(word: u64) -> Self;
}

impl FromStubWord for i32 {
    const FIELD_TYPE: StubFieldType = StubFieldType::RawInt32;

    fn from_word(word: u64) -> Self {
        word as i64 as i32
    }
}

impl FromStubWord for i64 {
    const FIELD_TYPE: StubFieldType = StubFieldType::RawInt64;

    fn from_word(word: u64) -> Self {
        word as i64
    }
}

/// Per-stub constants: small integers, descriptor pointers and boxed values.
///
/// Stored as 8-byte words so compiled code can address fields at
/// `base + offset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubData {
    words: Vec<u64>,
    types: Vec<StubFieldType>,
}

impl StubData {
    /// Empty blob
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a word, returning its field reference.
    pub fn push(&mut self, ty: StubFieldType, word: u64) -> Result<StubField> {
        let index = u8::try_from(self.words.len()).map_err(|_| IrError::TooManyOperands)?;
        self.words.push(word);
        self.types.push(ty);
        Ok(StubField::from_index(index))
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the blob has no fields.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Base pointer of the word array, passed to compiled stubs.
    pub fn as_ptr(&self) -> *const u64 {
        self.words.as_ptr()
    }

    /// Declared type of every field, in order.
    pub fn field_types(&self) -> &[StubFieldType] {
        &self.types
    }

    fn word(&self, field: StubField) -> Result<(u64, StubFieldType)> {
        let index = field.word_index();
        match (self.words.get(index), self.types.get(index)) {
            (Some(word), Some(ty)) => Ok((*word, *ty)),
            _ => Err(IrError::FieldOutOfBounds {
                offset: field.offset(),
                len: self.words.len() * STUB_WORD_SIZE as usize,
            }),
        }
    }

    /// Raw word regardless of declared type.
    pub fn get_raw_word(&self, field: StubField) -> Result<u64> {
        self.word(field).map(|(word, _)| word)
    }

    /// Raw word as a signed 64-bit integer.
    pub fn get_raw_int64(&self, field: StubField) -> Result<i64> {
        self.get_raw_word(field).map(|word| word as i64)
    }

    /// Typed word, checked against the declared field type.
    pub fn get_field<T: FromStubWord>(&self, field: StubField) -> Result<T> {
        self.get_typed_word(field, T::FIELD_TYPE).map(T::from_word)
    }

    /// Raw word, checked against `expected`.
    pub fn get_typed_word(&self, field: StubField, expected: StubFieldType) -> Result<u64> {
        let (word, found) = self.word(field)?;
        if found != expected {
            return Err(IrError::FieldTypeMismatch {
                offset: field.offset(),
                expected,
                found,
            });
        }
        Ok(word)
    }

    /// Iterate `(field, type, word)` for fields the GC must trace.
    pub fn traced_words(&self) -> impl Iterator<Item = (StubField, StubFieldType, u64)> + '_ {
        self.words
            .iter()
            .zip(self.types.iter())
            .enumerate()
            .filter(|(_, (_, ty))| ty.is_traced())
            .map(|(index, (word, ty))| (StubField::from_index(index as u8), *ty, *word))
    }
}

/// A finished stub program: the op byte stream plus its operand layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubProgram {
    pub(crate) code: Vec<u8>,
    pub(crate) num_operands: u16,
    pub(crate) num_inputs: u8,
}

impl StubProgram {
    /// Build from raw parts. The code must end with `ReturnFromIc`.
    pub fn from_parts(code: Vec<u8>, num_operands: u16, num_inputs: u8) -> Self {
        Self {
            code,
            num_operands,
            num_inputs,
        }
    }

    /// Encoded op stream.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Number of operand ids used by the program (inputs included).
    pub fn num_operands(&self) -> usize {
        self.num_operands as usize
    }

    /// Number of `Value` inputs; they occupy ids `0..num_inputs`.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs as usize
    }

    /// Decode the program up to and including its terminal op. Bytes past
    /// the terminal op are never read.
    pub fn ops(&self) -> Result<Vec<crate::Op>> {
        let mut reader = crate::StubReader::new(self);
        let mut ops = Vec::new();
        while reader.more() {
            let op = reader.read_op()?;
            ops.push(op);
            if op.opcode().is_terminal() {
                break;
            }
        }
        Ok(ops)
    }
}
