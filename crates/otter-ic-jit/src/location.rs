//! Where an operand lives during code generation.

use otter_ic_ir::{OperandKind, ValueType};

use crate::registers::{FloatRegister, Register, ValueReg};

/// The unboxed representation held in a payload register.
///
/// Int32 payloads are kept sign-extended to 64 bits, booleans as 0 or 1,
/// heap references as raw cell pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// 32-bit integer
    Int32,
    /// Boolean
    Boolean,
    /// Object pointer
    Object,
    /// String pointer
    String,
    /// Symbol pointer
    Symbol,
    /// BigInt pointer
    BigInt,
    /// Pointer-sized integer (no boxed form)
    IntPtr,
    /// `ValueType` byte (no boxed form)
    ValueTag,
}

impl PayloadType {
    /// Tag of the boxed form. `None` for payloads that cannot be boxed as is.
    pub const fn value_type(self) -> Option<ValueType> {
        Some(match self {
            PayloadType::Int32 => ValueType::Int32,
            PayloadType::Boolean => ValueType::Boolean,
            PayloadType::Object => ValueType::Object,
            PayloadType::String => ValueType::String,
            PayloadType::Symbol => ValueType::Symbol,
            PayloadType::BigInt => ValueType::BigInt,
            PayloadType::IntPtr | PayloadType::ValueTag => return None,
        })
    }

    /// Payload form of a boxed tag, for tags that have one.
    pub const fn from_value_type(ty: ValueType) -> Option<Self> {
        Some(match ty {
            ValueType::Int32 => PayloadType::Int32,
            ValueType::Boolean => PayloadType::Boolean,
            ValueType::Object => PayloadType::Object,
            ValueType::String => PayloadType::String,
            ValueType::Symbol => PayloadType::Symbol,
            ValueType::BigInt => PayloadType::BigInt,
            _ => return None,
        })
    }

    /// Payload form of an operand kind. `Value`, `Number` and `Typed`
    /// operands are kept boxed.
    pub const fn from_kind(kind: OperandKind) -> Option<Self> {
        Some(match kind {
            OperandKind::Int32 => PayloadType::Int32,
            OperandKind::Boolean => PayloadType::Boolean,
            OperandKind::Object => PayloadType::Object,
            OperandKind::String => PayloadType::String,
            OperandKind::Symbol => PayloadType::Symbol,
            OperandKind::BigInt => PayloadType::BigInt,
            OperandKind::IntPtr => PayloadType::IntPtr,
            OperandKind::ValueTag => PayloadType::ValueTag,
            _ => return None,
        })
    }
}

/// Current home of one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperandLocation {
    /// Not defined yet, or dead
    #[default]
    Uninitialized,
    /// Unboxed payload in a register
    PayloadReg {
        /// Register
        reg: Register,
        /// Representation
        ty: PayloadType,
    },
    /// Boxed value in a register
    ValueReg(ValueReg),
    /// Unboxed payload spilled to a stack slot
    PayloadStack {
        /// Spill slot index
        slot: u32,
        /// Representation
        ty: PayloadType,
    },
    /// Boxed value spilled to a stack slot
    ValueStack {
        /// Spill slot index
        slot: u32,
    },
    /// Unboxed double in a float register
    FloatReg(FloatRegister),
    /// Unboxed double spilled to a stack slot
    FloatStack {
        /// Spill slot index
        slot: u32,
    },
}

impl OperandLocation {
    /// Register backing this location, if it is register resident.
    pub const fn register(self) -> Option<Register> {
        match self {
            OperandLocation::PayloadReg { reg, .. } => Some(reg),
            OperandLocation::ValueReg(ValueReg(reg)) => Some(reg),
            _ => None,
        }
    }

    /// Float register backing this location.
    pub const fn float_register(self) -> Option<FloatRegister> {
        match self {
            OperandLocation::FloatReg(reg) => Some(reg),
            _ => None,
        }
    }

    /// Spill slot backing this location, if it is on the stack.
    pub const fn spill_slot(self) -> Option<u32> {
        match self {
            OperandLocation::PayloadStack { slot, .. }
            | OperandLocation::ValueStack { slot }
            | OperandLocation::FloatStack { slot } => Some(slot),
            _ => None,
        }
    }

    /// Whether the operand currently has a home.
    pub const fn is_initialized(self) -> bool {
        !matches!(self, OperandLocation::Uninitialized)
    }
}
