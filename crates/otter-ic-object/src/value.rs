//! NaN-boxed values.
//!
//! # Encoding
//!
//! ```text
//! double       raw IEEE bits (every NaN is stored as TAG_NAN)
//! int32        0x7FF8_0001_xxxx_xxxx
//! undefined    0x7FF8_0000_0000_0000
//! null         0x7FF8_0000_0000_0001
//! true         0x7FF8_0000_0000_0002
//! false        0x7FF8_0000_0000_0003
//! hole         0x7FF8_0000_0000_0004
//! NaN          0x7FFA_0000_0000_0000
//! object       0x7FFC_pppp_pppp_pppp
//! string       0x7FFD_pppp_pppp_pppp
//! symbol       0x7FFE_pppp_pppp_pppp
//! bigint       0x7FFF_pppp_pppp_pppp
//! ```
//!
//! A word is a double when `bits & QUIET_NAN != QUIET_NAN` or it equals
//! `TAG_NAN`. Compiled stubs test tags with the same constants.

use std::fmt;

use otter_ic_ir::ValueType;

use crate::object::ObjectRef;
use crate::string::{BigIntRef, StringRef, SymbolRef};

/// Quiet NaN prefix; boxed non-double values all carry it.
pub const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;
/// Mask of the 16-bit tag.
pub const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
/// Mask of the 48-bit pointer payload.
pub const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
/// Mask of the high 32 bits used for the int32 tag test.
pub const INT32_TAG_MASK: u64 = 0xFFFF_FFFF_0000_0000;

/// `undefined`
pub const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
/// `null`
pub const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
/// `true`
pub const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
/// `false`
pub const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
/// Dense elements hole
pub const TAG_HOLE: u64 = 0x7FF8_0000_0000_0004;
/// Canonical NaN (distinct from undefined)
pub const TAG_NAN: u64 = 0x7FFA_0000_0000_0000;
/// Int32 tag (high 32 bits)
pub const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
/// Object pointer tag
pub const TAG_OBJECT: u64 = 0x7FFC_0000_0000_0000;
/// String pointer tag
pub const TAG_STRING: u64 = 0x7FFD_0000_0000_0000;
/// Symbol pointer tag
pub const TAG_SYMBOL: u64 = 0x7FFE_0000_0000_0000;
/// BigInt pointer tag
pub const TAG_BIGINT: u64 = 0x7FFF_0000_0000_0000;

/// A NaN-boxed value.
///
/// Pointer payloads are borrowed from a [`crate::Heap`]; a `Value` does not
/// keep its referent alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    /// `undefined`
    #[inline]
    pub const fn undefined() -> Self {
        Self(TAG_UNDEFINED)
    }

    /// `null`
    #[inline]
    pub const fn null() -> Self {
        Self(TAG_NULL)
    }

    /// Elements hole
    #[inline]
    pub const fn hole() -> Self {
        Self(TAG_HOLE)
    }

    /// Boolean
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        if b { Self(TAG_TRUE) } else { Self(TAG_FALSE) }
    }

    /// 32-bit integer
    #[inline]
    pub const fn int32(n: i32) -> Self {
        Self(TAG_INT32 | (n as u32 as u64))
    }

    /// Double, kept as a double even when integral. NaNs are canonicalized.
    #[inline]
    pub fn double(n: f64) -> Self {
        if n.is_nan() {
            return Self(TAG_NAN);
        }
        Self(n.to_bits())
    }

    /// Number: int32 when `n` is an integral value in range (and not -0.0),
    /// otherwise a double.
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && (n != 0.0 || n.is_sign_positive())
        {
            return Self::int32(n as i32);
        }
        Self::double(n)
    }

    /// Object reference
    #[inline]
    pub fn object(obj: ObjectRef) -> Self {
        Self(TAG_OBJECT | (obj.as_ptr() as u64 & PAYLOAD_MASK))
    }

    /// String reference
    #[inline]
    pub fn string(s: StringRef) -> Self {
        Self(TAG_STRING | (s.as_ptr() as u64 & PAYLOAD_MASK))
    }

    /// Symbol reference
    #[inline]
    pub fn symbol(s: SymbolRef) -> Self {
        Self(TAG_SYMBOL | (s.as_ptr() as u64 & PAYLOAD_MASK))
    }

    /// BigInt reference
    #[inline]
    pub fn bigint(b: BigIntRef) -> Self {
        Self(TAG_BIGINT | (b.as_ptr() as u64 & PAYLOAD_MASK))
    }

    /// Reinterpret raw bits.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Whether this word is a double.
    #[inline]
    pub const fn is_double(self) -> bool {
        (self.0 & QUIET_NAN) != QUIET_NAN || self.0 == TAG_NAN
    }

    /// Whether this is an int32.
    #[inline]
    pub const fn is_int32(self) -> bool {
        (self.0 & INT32_TAG_MASK) == TAG_INT32
    }

    /// Whether this is an int32 or a double.
    #[inline]
    pub const fn is_number(self) -> bool {
        self.is_int32() || self.is_double()
    }

    /// Whether this is `undefined`.
    #[inline]
    pub const fn is_undefined(self) -> bool {
        self.0 == TAG_UNDEFINED
    }

    /// Whether this is `null`.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == TAG_NULL
    }

    /// Whether this is `null` or `undefined`.
    #[inline]
    pub const fn is_null_or_undefined(self) -> bool {
        self.is_null() || self.is_undefined()
    }

    /// Whether this is a boolean.
    #[inline]
    pub const fn is_boolean(self) -> bool {
        self.0 == TAG_TRUE || self.0 == TAG_FALSE
    }

    /// Whether this is the elements hole.
    #[inline]
    pub const fn is_hole(self) -> bool {
        self.0 == TAG_HOLE
    }

    /// Whether this is an object.
    #[inline]
    pub const fn is_object(self) -> bool {
        (self.0 & TAG_MASK) == TAG_OBJECT
    }

    /// Whether this is a string.
    #[inline]
    pub const fn is_string(self) -> bool {
        (self.0 & TAG_MASK) == TAG_STRING
    }

    /// Whether this is a symbol.
    #[inline]
    pub const fn is_symbol(self) -> bool {
        (self.0 & TAG_MASK) == TAG_SYMBOL
    }

    /// Whether this is a BigInt.
    #[inline]
    pub const fn is_bigint(self) -> bool {
        (self.0 & TAG_MASK) == TAG_BIGINT
    }

    /// Runtime tag. Words outside the encoding report `Magic`.
    pub const fn value_type(self) -> ValueType {
        if self.is_double() {
            return ValueType::Double;
        }
        if self.is_int32() {
            return ValueType::Int32;
        }
        match self.0 & TAG_MASK {
            TAG_OBJECT => ValueType::Object,
            TAG_STRING => ValueType::String,
            TAG_SYMBOL => ValueType::Symbol,
            TAG_BIGINT => ValueType::BigInt,
            _ => match self.0 {
                TAG_UNDEFINED => ValueType::Undefined,
                TAG_NULL => ValueType::Null,
                TAG_TRUE | TAG_FALSE => ValueType::Boolean,
                _ => ValueType::Magic,
            },
        }
    }

    /// Int32 payload.
    #[inline]
    pub const fn as_int32(self) -> Option<i32> {
        if self.is_int32() {
            Some(self.0 as u32 as i32)
        } else {
            None
        }
    }

    /// Double payload (doubles only, int32 is not converted).
    #[inline]
    pub fn as_double(self) -> Option<f64> {
        if !self.is_double() {
            None
        } else if self.0 == TAG_NAN {
            Some(f64::NAN)
        } else {
            Some(f64::from_bits(self.0))
        }
    }

    /// Numeric value; int32 payloads are converted to double.
    #[inline]
    pub fn to_number(self) -> Option<f64> {
        match self.as_int32() {
            Some(n) => Some(f64::from(n)),
            None => self.as_double(),
        }
    }

    /// Boolean payload.
    #[inline]
    pub const fn as_boolean(self) -> Option<bool> {
        match self.0 {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Object payload.
    #[inline]
    pub fn as_object(self) -> Option<ObjectRef> {
        if self.is_object() {
            ObjectRef::from_raw((self.0 & PAYLOAD_MASK) as *mut _)
        } else {
            None
        }
    }

    /// String payload.
    #[inline]
    pub fn as_string(self) -> Option<StringRef> {
        if self.is_string() {
            StringRef::from_raw((self.0 & PAYLOAD_MASK) as *mut _)
        } else {
            None
        }
    }

    /// Symbol payload.
    #[inline]
    pub fn as_symbol(self) -> Option<SymbolRef> {
        if self.is_symbol() {
            SymbolRef::from_raw((self.0 & PAYLOAD_MASK) as *mut _)
        } else {
            None
        }
    }

    /// BigInt payload.
    #[inline]
    pub fn as_bigint(self) -> Option<BigIntRef> {
        if self.is_bigint() {
            BigIntRef::from_raw((self.0 & PAYLOAD_MASK) as *mut _)
        } else {
            None
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type() {
            ValueType::Double => write!(f, "Double({:?})", self.as_double().unwrap_or(f64::NAN)),
            ValueType::Int32 => write!(f, "Int32({})", self.0 as u32 as i32),
            ValueType::Boolean => write!(f, "Boolean({})", self.0 == TAG_TRUE),
            ValueType::Undefined => f.write_str("Undefined"),
            ValueType::Null => f.write_str("Null"),
            ValueType::String => match self.as_string() {
                Some(s) => write!(f, "String({:?})", s.to_rust_string()),
                None => f.write_str("String(?)"),
            },
            ty => write!(f, "{}({:#x})", ty.name(), self.0 & PAYLOAD_MASK),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(Value::undefined().value_type(), ValueType::Undefined);
        assert_eq!(Value::null().value_type(), ValueType::Null);
        assert_eq!(Value::boolean(true).value_type(), ValueType::Boolean);
        assert_eq!(Value::hole().value_type(), ValueType::Magic);
        assert_eq!(Value::int32(-7).value_type(), ValueType::Int32);
        assert_eq!(Value::double(1.5).value_type(), ValueType::Double);
        assert_eq!(Value::double(-1.5).value_type(), ValueType::Double);
        assert_eq!(Value::double(f64::NEG_INFINITY).value_type(), ValueType::Double);
    }

    #[test]
    fn test_nan_is_canonical_double() {
        let nan = Value::double(f64::NAN);
        assert_eq!(nan.to_bits(), TAG_NAN);
        assert!(nan.is_double());
        assert!(nan.is_number());
        assert!(nan.as_double().unwrap().is_nan());
        let negative_nan = Value::double(f64::from_bits(0xFFF8_0000_0000_0001));
        assert_eq!(negative_nan.to_bits(), TAG_NAN);
    }

    #[test]
    fn test_int32_payload() {
        assert_eq!(Value::int32(-1).as_int32(), Some(-1));
        assert_eq!(Value::int32(i32::MIN).as_int32(), Some(i32::MIN));
        assert_eq!(Value::int32(5).to_number(), Some(5.0));
        assert_eq!(Value::int32(5).as_double(), None);
    }

    #[test]
    fn test_number_prefers_int32_but_keeps_negative_zero() {
        assert!(Value::number(3.0).is_int32());
        assert!(Value::number(3.5).is_double());
        let neg_zero = Value::number(-0.0);
        assert!(neg_zero.is_double());
        assert!(neg_zero.as_double().unwrap().is_sign_negative());
        assert!(Value::number(4294967296.0).is_double());
    }

    #[test]
    fn test_booleans() {
        assert_eq!(Value::boolean(true).as_boolean(), Some(true));
        assert_eq!(Value::boolean(false).as_boolean(), Some(false));
        assert_eq!(Value::null().as_boolean(), None);
        assert_eq!(TAG_FALSE - TAG_TRUE, 1);
    }
}
