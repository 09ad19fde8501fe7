//! Immediate argument types: value tags and guard class kinds

use serde::{Deserialize, Serialize};

use crate::error::{IrError, Result};

/// Runtime type tag of a boxed value.
///
/// The numbering is part of the wire format and of the `ValueTag` payload
/// produced by `LoadValueTag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    /// IEEE double (any bit pattern, NaN included)
    Double = 0,
    /// 32-bit integer
    Int32 = 1,
    /// `true` / `false`
    Boolean = 2,
    /// `undefined`
    Undefined = 3,
    /// `null`
    Null = 4,
    /// Engine-internal magic value (elements hole)
    Magic = 5,
    /// String reference
    String = 6,
    /// Symbol reference
    Symbol = 7,
    /// BigInt reference
    BigInt = 8,
    /// Object reference
    Object = 9,
}

impl ValueType {
    /// All tags, in numeric order.
    pub const ALL: [ValueType; 10] = [
        ValueType::Double,
        ValueType::Int32,
        ValueType::Boolean,
        ValueType::Undefined,
        ValueType::Null,
        ValueType::Magic,
        ValueType::String,
        ValueType::Symbol,
        ValueType::BigInt,
        ValueType::Object,
    ];

    /// Decode from a byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        Self::ALL
            .get(byte as usize)
            .copied()
            .ok_or(IrError::InvalidValueType(byte))
    }

    /// Encode as a byte.
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether values of this type are JS numbers.
    #[inline]
    pub const fn is_number(self) -> bool {
        matches!(self, ValueType::Double | ValueType::Int32)
    }

    /// Whether the payload of this type is a heap pointer.
    #[inline]
    pub const fn is_gc_thing(self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::Symbol | ValueType::BigInt | ValueType::Object
        )
    }

    /// Tag name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Double => "double",
            ValueType::Int32 => "int32",
            ValueType::Boolean => "boolean",
            ValueType::Undefined => "undefined",
            ValueType::Null => "null",
            ValueType::Magic => "magic",
            ValueType::String => "string",
            ValueType::Symbol => "symbol",
            ValueType::BigInt => "bigint",
            ValueType::Object => "object",
        }
    }
}

/// Class families that `GuardClass` can name without a stub field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GuardClassKind {
    /// Ordinary object
    PlainObject = 0,
    /// Array exotic object
    Array = 1,
    /// RegExp instance
    RegExp = 2,
    /// ArrayBuffer instance
    ArrayBuffer = 3,
    /// Ordinary function
    Function = 4,
    /// Bound function exotic object
    BoundFunction = 5,
    /// Set instance
    Set = 6,
    /// Map instance
    Map = 7,
}

impl GuardClassKind {
    /// All kinds, in numeric order.
    pub const ALL: [GuardClassKind; 8] = [
        GuardClassKind::PlainObject,
        GuardClassKind::Array,
        GuardClassKind::RegExp,
        GuardClassKind::ArrayBuffer,
        GuardClassKind::Function,
        GuardClassKind::BoundFunction,
        GuardClassKind::Set,
        GuardClassKind::Map,
    ];

    /// Decode from a byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        Self::ALL
            .get(byte as usize)
            .copied()
            .ok_or(IrError::InvalidGuardClassKind(byte))
    }

    /// Encode as a byte.
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self as u8
    }
}
