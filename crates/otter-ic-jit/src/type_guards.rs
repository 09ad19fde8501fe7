//! NaN-boxing helpers for compiled stubs.
//!
//! Tag tests, boxing and unboxing in Cranelift IR. Every test here decides
//! exactly what the matching `otter_ic_object::Value` predicate decides for the
//! same word.
//!
//! Predicates return a Cranelift `i8` (0 or 1).

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};
use cranelift_frontend::FunctionBuilder;
use otter_ic_ir::ValueType;
use otter_ic_object::value as boxing;

use crate::location::PayloadType;

pub(crate) const QUIET_NAN: i64 = boxing::QUIET_NAN as i64;
pub(crate) const TAG_MASK: i64 = boxing::TAG_MASK as i64;
pub(crate) const PAYLOAD_MASK: i64 = boxing::PAYLOAD_MASK as i64;
const INT32_TAG_MASK: i64 = boxing::INT32_TAG_MASK as i64;
const LOW32_MASK: i64 = 0x0000_0000_FFFF_FFFF;

pub(crate) const TAG_INT32: i64 = boxing::TAG_INT32 as i64;
pub(crate) const TAG_UNDEFINED: i64 = boxing::TAG_UNDEFINED as i64;
pub(crate) const TAG_NULL: i64 = boxing::TAG_NULL as i64;
pub(crate) const TAG_TRUE: i64 = boxing::TAG_TRUE as i64;
pub(crate) const TAG_FALSE: i64 = boxing::TAG_FALSE as i64;
pub(crate) const TAG_NAN: i64 = boxing::TAG_NAN as i64;
pub(crate) const TAG_OBJECT: i64 = boxing::TAG_OBJECT as i64;
pub(crate) const TAG_STRING: i64 = boxing::TAG_STRING as i64;
pub(crate) const TAG_SYMBOL: i64 = boxing::TAG_SYMBOL as i64;
pub(crate) const TAG_BIGINT: i64 = boxing::TAG_BIGINT as i64;

/// Bits of the canonical `f64::NAN`.
const CANONICAL_NAN_BITS: i64 = 0x7FF8_0000_0000_0000;

/// Memory flags for heap and frame accesses. Stubs only touch aligned words
/// that their guards proved live.
pub(crate) fn trusted() -> MemFlags {
    MemFlags::trusted()
}

// ---------------------------------------------------------------------------
// Tag tests
// ---------------------------------------------------------------------------

/// Emit: is this word an int32?
pub(crate) fn emit_is_int32(builder: &mut FunctionBuilder, val: Value) -> Value {
    let tag = builder.ins().band_imm(val, INT32_TAG_MASK);
    builder.ins().icmp_imm(IntCC::Equal, tag, TAG_INT32)
}

/// Emit: is this word a double? Raw IEEE bits, or the canonical NaN tag.
pub(crate) fn emit_is_double(builder: &mut FunctionBuilder, val: Value) -> Value {
    let prefix = builder.ins().band_imm(val, QUIET_NAN);
    let raw = builder.ins().icmp_imm(IntCC::NotEqual, prefix, QUIET_NAN);
    let nan = builder.ins().icmp_imm(IntCC::Equal, val, TAG_NAN);
    builder.ins().bor(raw, nan)
}

/// Emit: is this word an int32 or a double?
pub(crate) fn emit_is_number(builder: &mut FunctionBuilder, val: Value) -> Value {
    let is_i32 = emit_is_int32(builder, val);
    let is_f64 = emit_is_double(builder, val);
    builder.ins().bor(is_i32, is_f64)
}

/// Emit: does the 16-bit pointer tag equal `tag`?
fn emit_has_pointer_tag(builder: &mut FunctionBuilder, val: Value, tag: i64) -> Value {
    let bits = builder.ins().band_imm(val, TAG_MASK);
    builder.ins().icmp_imm(IntCC::Equal, bits, tag)
}

/// Emit: is this a boolean?
fn emit_is_boolean(builder: &mut FunctionBuilder, val: Value) -> Value {
    let t = builder.ins().icmp_imm(IntCC::Equal, val, TAG_TRUE);
    let f = builder.ins().icmp_imm(IntCC::Equal, val, TAG_FALSE);
    builder.ins().bor(t, f)
}

/// Emit: does this word have runtime tag `ty`?
pub(crate) fn emit_has_type(builder: &mut FunctionBuilder, val: Value, ty: ValueType) -> Value {
    match ty {
        ValueType::Double => emit_is_double(builder, val),
        ValueType::Int32 => emit_is_int32(builder, val),
        ValueType::Boolean => emit_is_boolean(builder, val),
        ValueType::Undefined => builder.ins().icmp_imm(IntCC::Equal, val, TAG_UNDEFINED),
        ValueType::Null => builder.ins().icmp_imm(IntCC::Equal, val, TAG_NULL),
        ValueType::Object => emit_has_pointer_tag(builder, val, TAG_OBJECT),
        ValueType::String => emit_has_pointer_tag(builder, val, TAG_STRING),
        ValueType::Symbol => emit_has_pointer_tag(builder, val, TAG_SYMBOL),
        ValueType::BigInt => emit_has_pointer_tag(builder, val, TAG_BIGINT),
        ValueType::Magic => {
            let tag = emit_value_tag(builder, val);
            builder
                .ins()
                .icmp_imm(IntCC::Equal, tag, i64::from(ValueType::Magic.to_byte()))
        }
    }
}

/// Emit the `ValueType` byte of a word, widened to i64.
///
/// Built back to front as a select chain so the first matching test wins,
/// in the same order `Value::value_type` checks.
pub(crate) fn emit_value_tag(builder: &mut FunctionBuilder, val: Value) -> Value {
    let order = [
        ValueType::Double,
        ValueType::Int32,
        ValueType::Object,
        ValueType::String,
        ValueType::Symbol,
        ValueType::BigInt,
        ValueType::Undefined,
        ValueType::Null,
        ValueType::Boolean,
    ];
    let mut tag = builder
        .ins()
        .iconst(types::I64, i64::from(ValueType::Magic.to_byte()));
    for ty in order.into_iter().rev() {
        let hit = emit_has_type(builder, val, ty);
        let this = builder.ins().iconst(types::I64, i64::from(ty.to_byte()));
        tag = builder.ins().select(hit, this, tag);
    }
    tag
}

// ---------------------------------------------------------------------------
// Boxing / unboxing
// ---------------------------------------------------------------------------

/// Unbox an int32 as a sign-extended i64 payload.
pub(crate) fn emit_unbox_int32(builder: &mut FunctionBuilder, val: Value) -> Value {
    let low = builder.ins().ireduce(types::I32, val);
    builder.ins().sextend(types::I64, low)
}

/// Box the low 32 bits of an i64 payload as an int32.
pub(crate) fn emit_box_int32(builder: &mut FunctionBuilder, payload: Value) -> Value {
    let low = builder.ins().band_imm(payload, LOW32_MASK);
    builder.ins().bor_imm(low, TAG_INT32)
}

/// Convert a 0/1 i64 payload to a boxed boolean.
///
/// `TAG_TRUE = TAG_FALSE - 1`, so `boxed = TAG_FALSE - payload`.
pub(crate) fn emit_box_boolean(builder: &mut FunctionBuilder, payload: Value) -> Value {
    let false_val = builder.ins().iconst(types::I64, TAG_FALSE);
    builder.ins().isub(false_val, payload)
}

/// Strip the tag of a word known to have payload type `ty`.
pub(crate) fn emit_unbox_payload(builder: &mut FunctionBuilder, val: Value, ty: PayloadType) -> Value {
    match ty {
        PayloadType::Int32 => emit_unbox_int32(builder, val),
        PayloadType::Boolean => {
            let is_true = builder.ins().icmp_imm(IntCC::Equal, val, TAG_TRUE);
            builder.ins().uextend(types::I64, is_true)
        }
        PayloadType::Object | PayloadType::String | PayloadType::Symbol | PayloadType::BigInt => {
            builder.ins().band_imm(val, PAYLOAD_MASK)
        }
        // Already raw.
        PayloadType::IntPtr | PayloadType::ValueTag => val,
    }
}

/// Tag a payload of type `ty`. IntPtr and ValueTag payloads have no boxed
/// form and are returned unchanged; the emitter never asks for them.
pub(crate) fn emit_box_payload(builder: &mut FunctionBuilder, payload: Value, ty: PayloadType) -> Value {
    let tag = match ty {
        PayloadType::Int32 => return emit_box_int32(builder, payload),
        PayloadType::Boolean => return emit_box_boolean(builder, payload),
        PayloadType::IntPtr | PayloadType::ValueTag => return payload,
        PayloadType::Object => TAG_OBJECT,
        PayloadType::String => TAG_STRING,
        PayloadType::Symbol => TAG_SYMBOL,
        PayloadType::BigInt => TAG_BIGINT,
    };
    let bits = builder.ins().band_imm(payload, PAYLOAD_MASK);
    builder.ins().bor_imm(bits, tag)
}

/// Unbox a word known to be a double.
pub(crate) fn emit_unbox_double(builder: &mut FunctionBuilder, val: Value) -> Value {
    let is_nan = builder.ins().icmp_imm(IntCC::Equal, val, TAG_NAN);
    let canonical = builder.ins().iconst(types::I64, CANONICAL_NAN_BITS);
    let bits = builder.ins().select(is_nan, canonical, val);
    builder.ins().bitcast(types::F64, MemFlags::new(), bits)
}

/// Unbox a word known to be an int32 or a double, as a double.
pub(crate) fn emit_unbox_number(builder: &mut FunctionBuilder, val: Value) -> Value {
    let is_i32 = emit_is_int32(builder, val);
    let low = builder.ins().ireduce(types::I32, val);
    let as_int = builder.ins().fcvt_from_sint(types::F64, low);
    let as_double = emit_unbox_double(builder, val);
    builder.ins().select(is_i32, as_int, as_double)
}

/// Box a double, canonicalizing NaN.
pub(crate) fn emit_box_double(builder: &mut FunctionBuilder, d: Value) -> Value {
    let bits = builder.ins().bitcast(types::I64, MemFlags::new(), d);
    let is_nan = builder.ins().fcmp(FloatCC::Unordered, d, d);
    let nan = builder.ins().iconst(types::I64, TAG_NAN);
    builder.ins().select(is_nan, nan, bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_ic_object::Value as JsValue;

    #[test]
    fn test_constants_match_object_encoding() {
        assert_eq!(TAG_INT32 as u64, JsValue::int32(0).to_bits());
        assert_eq!(TAG_UNDEFINED as u64, JsValue::undefined().to_bits());
        assert_eq!(TAG_NULL as u64, JsValue::null().to_bits());
        assert_eq!(TAG_TRUE as u64, JsValue::boolean(true).to_bits());
        assert_eq!(TAG_FALSE as u64, JsValue::boolean(false).to_bits());
        assert_eq!(TAG_NAN as u64, JsValue::double(f64::NAN).to_bits());
        assert_eq!(TAG_TRUE, TAG_FALSE - 1);
        assert_eq!(CANONICAL_NAN_BITS as u64, f64::NAN.to_bits());
    }
}
