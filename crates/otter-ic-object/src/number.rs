//! Numeric coercions used by index and truncation guards.
//!
//! Compiled stubs must reproduce these bit for bit.

/// Exclusive upper bound of doubles that convert to an intptr.
const INTPTR_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// `d` as an int32 when it is exactly an int32. `-0.0` converts to `0`.
pub fn number_equals_int32(d: f64) -> Option<i32> {
    if !(d >= i32::MIN as f64 && d <= i32::MAX as f64) {
        return None;
    }
    let i = d as i32;
    if f64::from(i) == d { Some(i) } else { None }
}

/// `d` as an intptr when it is exactly an intptr. `-0.0` converts to `0`.
pub fn number_equals_intptr(d: f64) -> Option<i64> {
    if !(d >= -INTPTR_LIMIT && d < INTPTR_LIMIT) {
        return None;
    }
    let i = d as i64;
    if i as f64 == d { Some(i) } else { None }
}

/// `d` truncated toward zero when the result fits an intptr. NaN and
/// infinities do not.
pub fn number_truncates_to_intptr(d: f64) -> Option<i64> {
    if !(d >= -INTPTR_LIMIT && d < INTPTR_LIMIT) {
        return None;
    }
    Some(d as i64)
}

/// Uint8Clamped conversion of a double: NaN to 0, round half to even,
/// clamp to `0..=255`.
pub fn clamp_double_to_uint8(d: f64) -> i32 {
    if d.is_nan() || d <= 0.0 {
        return 0;
    }
    if d >= 255.0 {
        return 255;
    }
    d.round_ties_even() as i32
}

/// Uint8Clamped conversion of an int32.
pub fn clamp_int32_to_uint8(i: i32) -> i32 {
    i.clamp(0, 255)
}
