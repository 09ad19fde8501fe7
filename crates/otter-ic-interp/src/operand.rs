//! Tagged operand storage.
//!
//! One [`OperandValue`] per operand id, sized from the program and reset on
//! every execution. Each id is written once; reads check the stored kind.

use otter_ic_ir::{
    BigIntOperandId, BooleanOperandId, Int32OperandId, IntPtrOperandId, NumberOperandId,
    ObjOperandId, OperandId, OperandKind, StringOperandId, SymbolOperandId, ValOperandId,
    ValueTagOperandId, ValueType,
};
use otter_ic_object::{BigIntRef, CellRef, ObjectRef, StringRef, SymbolRef, Trace, Tracer, Value};

use crate::error::{InterpreterError, Result};

/// The value an operand holds during one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperandValue {
    /// Not yet defined
    #[default]
    Uninitialized,
    /// Boxed value of unknown type
    Value(Value),
    /// Object reference
    Object(ObjectRef),
    /// String reference
    String(StringRef),
    /// Symbol reference
    Symbol(SymbolRef),
    /// BigInt reference
    BigInt(BigIntRef),
    /// Boolean
    Boolean(bool),
    /// 32-bit integer
    Int32(i32),
    /// Pointer-sized integer
    IntPtr(i64),
    /// Type tag of a value
    ValueTag(ValueType),
}

impl OperandValue {
    /// Kind held, `None` while uninitialized.
    pub fn kind(&self) -> Option<OperandKind> {
        Some(match self {
            OperandValue::Uninitialized => return None,
            OperandValue::Value(_) => OperandKind::Value,
            OperandValue::Object(_) => OperandKind::Object,
            OperandValue::String(_) => OperandKind::String,
            OperandValue::Symbol(_) => OperandKind::Symbol,
            OperandValue::BigInt(_) => OperandKind::BigInt,
            OperandValue::Boolean(_) => OperandKind::Boolean,
            OperandValue::Int32(_) => OperandKind::Int32,
            OperandValue::IntPtr(_) => OperandKind::IntPtr,
            OperandValue::ValueTag(_) => OperandKind::ValueTag,
        })
    }

    /// The held value boxed, for kinds that box without conversion.
    pub fn boxed(&self) -> Option<Value> {
        match *self {
            OperandValue::Value(v) => Some(v),
            OperandValue::Object(o) => Some(Value::object(o)),
            OperandValue::String(s) => Some(Value::string(s)),
            OperandValue::Symbol(s) => Some(Value::symbol(s)),
            OperandValue::BigInt(b) => Some(Value::bigint(b)),
            OperandValue::Boolean(b) => Some(Value::boolean(b)),
            OperandValue::Int32(i) => Some(Value::int32(i)),
            OperandValue::IntPtr(_) | OperandValue::ValueTag(_) | OperandValue::Uninitialized => {
                None
            }
        }
    }

    /// Static tag of a payload kind. `None` for boxed values and non-value
    /// kinds.
    pub fn payload_type(&self) -> Option<ValueType> {
        match self {
            OperandValue::Object(_) => Some(ValueType::Object),
            OperandValue::String(_) => Some(ValueType::String),
            OperandValue::Symbol(_) => Some(ValueType::Symbol),
            OperandValue::BigInt(_) => Some(ValueType::BigInt),
            OperandValue::Boolean(_) => Some(ValueType::Boolean),
            OperandValue::Int32(_) => Some(ValueType::Int32),
            _ => None,
        }
    }
}

macro_rules! typed_reads {
    ($($(#[$meta:meta])* $method:ident($id:ty) -> $out:ty = $variant:ident, $kind:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $method(&self, id: $id) -> Result<$out> {
                match *self.get(id.0)? {
                    OperandValue::$variant(v) => Ok(v),
                    ref other => Err(self.mismatch(id.0, OperandKind::$kind, other)),
                }
            }
        )*
    };
}

/// Operand array for one execution.
#[derive(Debug, Clone)]
pub struct OperandStorage {
    values: Vec<OperandValue>,
}

impl OperandStorage {
    /// Storage for `len` operands, all uninitialized.
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![OperandValue::Uninitialized; len],
        }
    }

    /// Number of operand slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no operand slots.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw slot, including uninitialized ones.
    pub fn slot(&self, id: OperandId) -> Option<&OperandValue> {
        self.values.get(id.index() as usize)
    }

    /// Define `id`. Fails if it was already defined in this execution.
    pub fn define(&mut self, id: OperandId, value: OperandValue) -> Result<()> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(id.index() as usize)
            .ok_or(InterpreterError::OperandOutOfRange {
                operand: id.index(),
                len,
            })?;
        if !matches!(slot, OperandValue::Uninitialized) {
            return Err(InterpreterError::Redefined(id.index()));
        }
        *slot = value;
        Ok(())
    }

    /// Defined slot for `id`.
    pub fn get(&self, id: OperandId) -> Result<&OperandValue> {
        match self.slot(id) {
            None => Err(InterpreterError::OperandOutOfRange {
                operand: id.index(),
                len: self.values.len(),
            }),
            Some(OperandValue::Uninitialized) => Err(InterpreterError::Uninitialized(id.index())),
            Some(value) => Ok(value),
        }
    }

    fn mismatch(&self, id: OperandId, expected: OperandKind, found: &OperandValue) -> InterpreterError {
        match found.kind() {
            Some(found) => InterpreterError::KindMismatch {
                operand: id.index(),
                expected,
                found,
            },
            None => InterpreterError::Uninitialized(id.index()),
        }
    }

    typed_reads! {
        /// Boxed value operand.
        value(ValOperandId) -> Value = Value, Value;
        /// Object operand.
        object(ObjOperandId) -> ObjectRef = Object, Object;
        /// String operand.
        string(StringOperandId) -> StringRef = String, String;
        /// Symbol operand.
        symbol(SymbolOperandId) -> SymbolRef = Symbol, Symbol;
        /// BigInt operand.
        bigint(BigIntOperandId) -> BigIntRef = BigInt, BigInt;
        /// Boolean operand.
        boolean(BooleanOperandId) -> bool = Boolean, Boolean;
        /// Int32 operand.
        int32(Int32OperandId) -> i32 = Int32, Int32;
        /// IntPtr operand.
        intptr(IntPtrOperandId) -> i64 = IntPtr, IntPtr;
        /// Value tag operand.
        value_tag(ValueTagOperandId) -> ValueType = ValueTag, ValueTag;
    }

    /// Whether a number operand currently holds an int32 payload.
    pub fn is_int32(&self, id: NumberOperandId) -> Result<bool> {
        Ok(match *self.get(id.0)? {
            OperandValue::Int32(_) => true,
            OperandValue::Value(v) => v.is_int32(),
            _ => false,
        })
    }

    /// Number operand as a double. An int32 payload converts; a boxed value
    /// must hold a number.
    pub fn number(&self, id: NumberOperandId) -> Result<f64> {
        match *self.get(id.0)? {
            OperandValue::Int32(i) => Ok(f64::from(i)),
            OperandValue::Value(v) => v.to_number().ok_or_else(|| {
                InterpreterError::Malformed(format!(
                    "operand {} read as number holds {}",
                    id.0.index(),
                    v.value_type().name()
                ))
            }),
            ref other => Err(self.mismatch(id.0, OperandKind::Number, other)),
        }
    }
}

impl Trace for OperandStorage {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for value in &self.values {
            match *value {
                OperandValue::Value(v) => tracer.mark_value(v),
                OperandValue::Object(o) => tracer.mark_cell(CellRef::Object(o)),
                OperandValue::String(s) => tracer.mark_cell(CellRef::String(s)),
                OperandValue::Symbol(s) => tracer.mark_cell(CellRef::Symbol(s)),
                OperandValue::BigInt(b) => tracer.mark_cell(CellRef::BigInt(b)),
                _ => {}
            }
        }
    }
}
