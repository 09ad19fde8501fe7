//! Stub program operands

use serde::{Deserialize, Serialize};

use crate::types::ValueType;

/// Untyped operand id (0-255), scoped to one stub program
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct OperandId(pub u8);

impl OperandId {
    /// Create a new operand id
    #[inline]
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Get operand index
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl From<u8> for OperandId {
    fn from(index: u8) -> Self {
        Self(index)
    }
}

/// Static kind of an operand id.
///
/// Kinds form a narrowing lattice: `Value` is the widest, `Number` holds
/// `Int32`, and every other kind is a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    /// Any boxed value
    Value,
    /// Object reference
    Object,
    /// String reference
    String,
    /// Symbol reference
    Symbol,
    /// BigInt reference
    BigInt,
    /// Unboxed boolean
    Boolean,
    /// Unboxed 32-bit integer
    Int32,
    /// Int32 or double
    Number,
    /// Pointer-sized integer
    IntPtr,
    /// Type tag of a value
    ValueTag,
    /// Value with a statically known tag
    Typed,
}

impl OperandKind {
    /// Whether every value admissible for `self` is admissible for `wider`.
    pub const fn narrows(self, wider: OperandKind) -> bool {
        use OperandKind::*;
        match (self, wider) {
            (IntPtr, IntPtr) | (ValueTag, ValueTag) => true,
            (IntPtr, _) | (ValueTag, _) => false,
            (_, Value) => true,
            (Int32, Number) | (Number, Number) => true,
            (a, b) => a as u8 == b as u8,
        }
    }

    /// Kind name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            OperandKind::Value => "value",
            OperandKind::Object => "object",
            OperandKind::String => "string",
            OperandKind::Symbol => "symbol",
            OperandKind::BigInt => "bigint",
            OperandKind::Boolean => "boolean",
            OperandKind::Int32 => "int32",
            OperandKind::Number => "number",
            OperandKind::IntPtr => "intptr",
            OperandKind::ValueTag => "value-tag",
            OperandKind::Typed => "typed",
        }
    }
}

/// Operand id newtypes that carry a static [`OperandKind`].
pub trait KindedOperandId: Copy {
    /// Kind of operands named by this id type.
    const KIND: OperandKind;

    /// Wrap an untyped id.
    fn from_id(id: OperandId) -> Self;

    /// Untyped id.
    fn id(self) -> OperandId;
}

macro_rules! kinded_operand_ids {
    ($($(#[$meta:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
            #[repr(transparent)]
            pub struct $name(pub OperandId);

            impl $name {
                /// Create from a raw index
                #[inline]
                pub const fn new(index: u8) -> Self {
                    Self(OperandId(index))
                }

                /// Get operand index
                #[inline]
                pub const fn index(self) -> u8 {
                    self.0.0
                }
            }

            impl KindedOperandId for $name {
                const KIND: OperandKind = OperandKind::$kind;

                #[inline]
                fn from_id(id: OperandId) -> Self {
                    Self(id)
                }

                #[inline]
                fn id(self) -> OperandId {
                    self.0
                }
            }

            impl From<$name> for OperandId {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )*
    };
}

kinded_operand_ids! {
    /// Operand holding any boxed value
    ValOperandId => Value;
    /// Operand holding an object
    ObjOperandId => Object;
    /// Operand holding a string
    StringOperandId => String;
    /// Operand holding a symbol
    SymbolOperandId => Symbol;
    /// Operand holding a BigInt
    BigIntOperandId => BigInt;
    /// Operand holding an unboxed boolean
    BooleanOperandId => Boolean;
    /// Operand holding an unboxed int32
    Int32OperandId => Int32;
    /// Operand holding an int32 or a double
    NumberOperandId => Number;
    /// Operand holding a pointer-sized integer
    IntPtrOperandId => IntPtr;
    /// Operand holding a value type tag
    ValueTagOperandId => ValueTag;
}

impl From<ValOperandId> for NumberOperandId {
    fn from(id: ValOperandId) -> Self {
        Self(id.0)
    }
}

impl From<Int32OperandId> for NumberOperandId {
    fn from(id: Int32OperandId) -> Self {
        Self(id.0)
    }
}

/// An operand paired with the tag its value is known to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedOperandId {
    id: OperandId,
    ty: ValueType,
}

impl TypedOperandId {
    /// Pair an operand with its known tag
    #[inline]
    pub const fn new(id: OperandId, ty: ValueType) -> Self {
        Self { id, ty }
    }

    /// Underlying operand
    #[inline]
    pub const fn id(self) -> OperandId {
        self.id
    }

    /// Known tag
    #[inline]
    pub const fn value_type(self) -> ValueType {
        self.ty
    }
}

impl From<ObjOperandId> for TypedOperandId {
    fn from(id: ObjOperandId) -> Self {
        Self::new(id.0, ValueType::Object)
    }
}

impl From<StringOperandId> for TypedOperandId {
    fn from(id: StringOperandId) -> Self {
        Self::new(id.0, ValueType::String)
    }
}

impl From<SymbolOperandId> for TypedOperandId {
    fn from(id: SymbolOperandId) -> Self {
        Self::new(id.0, ValueType::Symbol)
    }
}

impl From<BigIntOperandId> for TypedOperandId {
    fn from(id: BigIntOperandId) -> Self {
        Self::new(id.0, ValueType::BigInt)
    }
}

impl From<BooleanOperandId> for TypedOperandId {
    fn from(id: BooleanOperandId) -> Self {
        Self::new(id.0, ValueType::Boolean)
    }
}

impl From<Int32OperandId> for TypedOperandId {
    fn from(id: Int32OperandId) -> Self {
        Self::new(id.0, ValueType::Int32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_id() {
        let id = ObjOperandId::new(3);
        assert_eq!(id.index(), 3);
        assert_eq!(OperandId::from(id), OperandId(3));
        assert_eq!(<ObjOperandId as KindedOperandId>::KIND, OperandKind::Object);
    }

    #[test]
    fn test_narrowing_lattice() {
        assert!(OperandKind::Object.narrows(OperandKind::Value));
        assert!(OperandKind::Int32.narrows(OperandKind::Number));
        assert!(OperandKind::Number.narrows(OperandKind::Value));
        assert!(!OperandKind::Value.narrows(OperandKind::Object));
        assert!(!OperandKind::String.narrows(OperandKind::Number));
        assert!(!OperandKind::IntPtr.narrows(OperandKind::Value));
        assert!(OperandKind::ValueTag.narrows(OperandKind::ValueTag));
    }

    #[test]
    fn test_typed_operand() {
        let typed = TypedOperandId::from(Int32OperandId::new(7));
        assert_eq!(typed.id(), OperandId(7));
        assert_eq!(typed.value_type(), ValueType::Int32);
    }
}
