//! Fallible call-outs invoked by IC actions.
//!
//! The interpreter calls these directly; compiled stubs reach them through
//! the `extern "C"` wrappers in [`crate::helpers`].

use crate::context::RuntimeError;
use crate::heap::Heap;
use crate::object::ObjectRef;
use crate::regexp::RegExpMatch;
use crate::string::StringRef;
use crate::value::Value;

/// Searcher result when no match was found.
pub const SEARCHER_NO_MATCH: i32 = -1;
/// Searcher result when the match bounds do not fit the packed encoding.
pub const SEARCHER_NOT_PACKABLE: i32 = -2;
/// Bits per packed searcher position.
pub const SEARCHER_POSITION_BITS: u32 = 15;

fn exec(
    regexp: ObjectRef,
    input: StringRef,
    last_index: i32,
) -> Result<Option<RegExpMatch>, RuntimeError> {
    let data = regexp.regexp_data().ok_or(RuntimeError::NotARegExp)?;
    data.exec_at(&input, last_index)
}

/// Match `regexp` against `input` from `last_index`.
///
/// Returns `null` or an array whose elements are the whole match followed by
/// the captures (`undefined` for groups that did not participate).
pub fn regexp_matcher(
    heap: &mut Heap,
    regexp: ObjectRef,
    input: StringRef,
    last_index: i32,
) -> Result<Value, RuntimeError> {
    let Some(found) = exec(regexp, input, last_index)? else {
        return Ok(Value::null());
    };
    let units = input.units();
    let mut elements = Vec::with_capacity(found.captures.len() + 1);
    elements.push(Value::string(
        heap.new_string_from_utf16(units[found.range.clone()].to_vec()),
    ));
    for capture in &found.captures {
        elements.push(match capture {
            Some(range) => Value::string(heap.new_string_from_utf16(units[range.clone()].to_vec())),
            None => Value::undefined(),
        });
    }
    let index = found.range.start as i32;
    Ok(Value::object(heap.new_match_result(elements, index, input)))
}

/// Search `input` from `last_index`.
///
/// Returns [`SEARCHER_NO_MATCH`], or `start | end << 15` when both bounds are
/// below `2^15`, or [`SEARCHER_NOT_PACKABLE`].
pub fn regexp_searcher(
    regexp: ObjectRef,
    input: StringRef,
    last_index: i32,
) -> Result<i32, RuntimeError> {
    let Some(found) = exec(regexp, input, last_index)? else {
        return Ok(SEARCHER_NO_MATCH);
    };
    let limit = 1usize << SEARCHER_POSITION_BITS;
    if found.range.start >= limit || found.range.end >= limit {
        return Ok(SEARCHER_NOT_PACKABLE);
    }
    Ok((found.range.start | (found.range.end << SEARCHER_POSITION_BITS)) as i32)
}

/// Test `input` from `last_index`. Returns the match end (the next
/// `lastIndex`) or `-1`.
pub fn regexp_tester(
    regexp: ObjectRef,
    input: StringRef,
    last_index: i32,
) -> Result<i32, RuntimeError> {
    Ok(match exec(regexp, input, last_index)? {
        Some(found) => found.range.end as i32,
        None => -1,
    })
}

/// The substring `[begin, begin + length)` of `string`.
pub fn substring_kernel(
    heap: &mut Heap,
    string: StringRef,
    begin: i32,
    length: i32,
) -> Result<StringRef, RuntimeError> {
    let len = string.len();
    let out_of_range = RuntimeError::SubstringOutOfRange { begin, length, len };
    let (Ok(start), Ok(count)) = (usize::try_from(begin), usize::try_from(length)) else {
        return Err(out_of_range);
    };
    let end = start.checked_add(count).ok_or(out_of_range.clone())?;
    if end > len {
        return Err(out_of_range);
    }
    Ok(heap.new_string_from_utf16(string.units()[start..end].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::MATCH_RESULT_INDEX_SLOT;

    #[test]
    fn test_matcher_builds_result_array() {
        let mut heap = Heap::new();
        let re = heap.new_regexp("(a)(x)?b", "").unwrap();
        let input = heap.new_string("zzab");
        let result = regexp_matcher(&mut heap, re, input, 0).unwrap();
        let array = result.as_object().unwrap();
        assert_eq!(array.elements_len(), 3);
        assert_eq!(
            array.element(0).unwrap().as_string().unwrap().to_rust_string(),
            "ab"
        );
        assert!(array.element(2).unwrap().is_undefined());
        assert_eq!(
            array.fixed_slot(MATCH_RESULT_INDEX_SLOT),
            Some(Value::int32(2))
        );
    }

    #[test]
    fn test_matcher_no_match_is_null() {
        let mut heap = Heap::new();
        let re = heap.new_regexp("q", "").unwrap();
        let input = heap.new_string("abc");
        assert_eq!(regexp_matcher(&mut heap, re, input, 0), Ok(Value::null()));
    }

    #[test]
    fn test_searcher_packs_bounds() {
        let mut heap = Heap::new();
        let re = heap.new_regexp("cd", "").unwrap();
        let input = heap.new_string("abcde");
        assert_eq!(regexp_searcher(re, input, 0), Ok(2 | (4 << 15)));
        assert_eq!(regexp_searcher(re, input, 3), Ok(SEARCHER_NO_MATCH));
    }

    #[test]
    fn test_tester_returns_end() {
        let mut heap = Heap::new();
        let re = heap.new_regexp("b+", "").unwrap();
        let input = heap.new_string("abbbc");
        assert_eq!(regexp_tester(re, input, 0), Ok(4));
        assert_eq!(regexp_tester(re, input, -3), Err(RuntimeError::InvalidLastIndex(-3)));
    }

    #[test]
    fn test_call_on_plain_object_fails() {
        let mut heap = Heap::new();
        let arr = heap.new_array(Vec::new());
        let input = heap.new_string("a");
        assert_eq!(regexp_tester(arr, input, 0), Err(RuntimeError::NotARegExp));
    }

    #[test]
    fn test_substring_bounds() {
        let mut heap = Heap::new();
        let s = heap.new_string("hello");
        let sub = substring_kernel(&mut heap, s, 1, 3).unwrap();
        assert_eq!(sub.to_rust_string(), "ell");
        assert!(substring_kernel(&mut heap, s, 3, 3).is_err());
        assert!(substring_kernel(&mut heap, s, -1, 1).is_err());
        assert_eq!(
            substring_kernel(&mut heap, s, 5, 0).unwrap().to_rust_string(),
            ""
        );
    }
}
