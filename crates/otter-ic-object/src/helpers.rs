//! `extern "C"` call-out entry points for compiled stubs.
//!
//! Every helper has the same shape: `(ctx, a, b, c) -> u64`. Object and
//! string arguments arrive as unboxed payloads (raw cell pointers), int32
//! arguments in the low 32 bits. The return value is the boxed IC result, or
//! [`EXCEPTION_SENTINEL`] after the error was stored in
//! [`IcContext::pending_exception`].

use crate::callouts;
use crate::context::{IcContext, RuntimeError};
use crate::object::{JsObject, ObjectRef};
use crate::string::{JsString, StringRef};
use crate::value::Value;

/// Returned by a helper that raised. Lives in NaN space and is never a valid
/// boxed value.
pub const EXCEPTION_SENTINEL: u64 = 0x7FFB_0000_0000_0000;

/// Helper calling convention.
pub type HelperFn = unsafe extern "C" fn(*mut IcContext, u64, u64, u64) -> u64;

#[inline]
fn finish(ctx: &mut IcContext, result: Result<Value, RuntimeError>) -> u64 {
    match result {
        Ok(value) => value.to_bits(),
        Err(error) => {
            ctx.set_pending_exception(error);
            EXCEPTION_SENTINEL
        }
    }
}

#[inline]
fn regexp_args(regexp: u64, input: u64) -> Result<(ObjectRef, StringRef), RuntimeError> {
    let regexp = ObjectRef::from_raw(regexp as *mut JsObject).ok_or(RuntimeError::NotARegExp)?;
    let input = StringRef::from_raw(input as *mut JsString).ok_or(RuntimeError::NotARegExp)?;
    Ok((regexp, input))
}

/// `RegExpMatcher(regexp, input, lastIndex)`.
///
/// # Safety
///
/// `ctx` must point to a live context; `regexp` and `input` must be pointers
/// to cells owned by its heap.
pub unsafe extern "C" fn ic_regexp_matcher(
    ctx: *mut IcContext,
    regexp: u64,
    input: u64,
    last_index: u64,
) -> u64 {
    // SAFETY: guaranteed by the caller.
    let ctx = unsafe { &mut *ctx };
    let result = regexp_args(regexp, input).and_then(|(regexp, input)| {
        callouts::regexp_matcher(ctx.heap_mut(), regexp, input, last_index as i32)
    });
    finish(ctx, result)
}

/// `RegExpSearcher(regexp, input, lastIndex)`.
///
/// # Safety
///
/// Same contract as [`ic_regexp_matcher`].
pub unsafe extern "C" fn ic_regexp_searcher(
    ctx: *mut IcContext,
    regexp: u64,
    input: u64,
    last_index: u64,
) -> u64 {
    // SAFETY: guaranteed by the caller.
    let ctx = unsafe { &mut *ctx };
    let result = regexp_args(regexp, input).and_then(|(regexp, input)| {
        callouts::regexp_searcher(regexp, input, last_index as i32).map(Value::int32)
    });
    finish(ctx, result)
}

/// `RegExpTester(regexp, input, lastIndex)`.
///
/// # Safety
///
/// Same contract as [`ic_regexp_matcher`].
pub unsafe extern "C" fn ic_regexp_tester(
    ctx: *mut IcContext,
    regexp: u64,
    input: u64,
    last_index: u64,
) -> u64 {
    // SAFETY: guaranteed by the caller.
    let ctx = unsafe { &mut *ctx };
    let result = regexp_args(regexp, input).and_then(|(regexp, input)| {
        callouts::regexp_tester(regexp, input, last_index as i32).map(Value::int32)
    });
    finish(ctx, result)
}

/// `SubstringKernel(string, begin, length)`.
///
/// # Safety
///
/// `ctx` must point to a live context; `string` must point to a string owned
/// by its heap.
pub unsafe extern "C" fn ic_substring_kernel(
    ctx: *mut IcContext,
    string: u64,
    begin: u64,
    length: u64,
) -> u64 {
    // SAFETY: guaranteed by the caller.
    let ctx = unsafe { &mut *ctx };
    let Some(string) = StringRef::from_raw(string as *mut JsString) else {
        return finish(ctx, Err(RuntimeError::SubstringOutOfRange {
            begin: begin as i32,
            length: length as i32,
            len: 0,
        }));
    };
    let result = callouts::substring_kernel(ctx.heap_mut(), string, begin as i32, length as i32)
        .map(Value::string);
    finish(ctx, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_not_a_value() {
        let v = Value::from_bits(EXCEPTION_SENTINEL);
        assert!(!v.is_double());
        assert!(!v.is_int32());
        assert!(!v.is_object());
        assert!(!v.is_string());
    }

    #[test]
    fn test_tester_helper_boxes_int32() {
        let mut ctx = IcContext::new();
        let re = ctx.heap_mut().new_regexp("b", "").unwrap();
        let input = ctx.heap_mut().new_string("abc");
        let bits = unsafe {
            ic_regexp_tester(&mut ctx, re.to_word(), input.as_ptr() as u64, 0)
        };
        assert_eq!(Value::from_bits(bits), Value::int32(2));
    }

    #[test]
    fn test_helper_error_sets_pending_exception() {
        let mut ctx = IcContext::new();
        let s = ctx.heap_mut().new_string("abc");
        let bits = unsafe { ic_substring_kernel(&mut ctx, s.as_ptr() as u64, 2, 5) };
        assert_eq!(bits, EXCEPTION_SENTINEL);
        assert!(matches!(
            ctx.take_pending_exception(),
            Some(RuntimeError::SubstringOutOfRange { .. })
        ));
    }

    #[test]
    fn test_negative_last_index_is_sign_extended() {
        let mut ctx = IcContext::new();
        let re = ctx.heap_mut().new_regexp("b", "").unwrap();
        let input = ctx.heap_mut().new_string("abc");
        let bits = unsafe {
            ic_regexp_searcher(&mut ctx, re.to_word(), input.as_ptr() as u64, (-1i64) as u64)
        };
        assert_eq!(bits, EXCEPTION_SENTINEL);
        assert_eq!(
            ctx.pending_exception(),
            Some(&RuntimeError::InvalidLastIndex(-1))
        );
    }
}
