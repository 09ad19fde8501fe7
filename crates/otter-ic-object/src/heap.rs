//! Arena that owns every cell reachable from IC operands.
//!
//! Cells are boxed individually so their addresses never move; refs handed out
//! by the heap stay valid until the heap is dropped. There is no collection:
//! tracing (see [`crate::gc`]) only reports what a collector would keep.

use std::ptr::NonNull;

use num_bigint::BigInt;

use crate::context::RuntimeError;
use crate::object::{JsObject, MAX_FIXED_SLOTS, ObjectPayload, ObjectRef};
use crate::regexp::{REGEXP_FLAGS_SLOT, RegExpData, RegExpFlags};
use crate::shape::{ARRAY_CLASS, Class, REGEXP_CLASS, Shape, ShapeRef};
use crate::string::{BigIntRef, JsBigInt, JsString, JsSymbol, StringRef, SymbolRef};
use crate::value::Value;

/// Fixed slot of a match result array holding the match index.
pub const MATCH_RESULT_INDEX_SLOT: usize = 0;
/// Fixed slot of a match result array holding the input string.
pub const MATCH_RESULT_INPUT_SLOT: usize = 1;

fn alloc<T>(cells: &mut Vec<NonNull<T>>, value: T) -> NonNull<T> {
    let ptr = NonNull::from(Box::leak(Box::new(value)));
    cells.push(ptr);
    ptr
}

fn free_all<T>(cells: &mut Vec<NonNull<T>>) {
    for ptr in cells.drain(..) {
        // SAFETY: every pointer came from `Box::leak` in `alloc` and is
        // freed exactly once, here.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// Cell arena.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<NonNull<JsObject>>,
    shapes: Vec<NonNull<Shape>>,
    strings: Vec<NonNull<JsString>>,
    symbols: Vec<NonNull<JsSymbol>>,
    bigints: Vec<NonNull<JsBigInt>>,
    next_shape_id: u32,
    array_shape: Option<ShapeRef>,
    regexp_shape: Option<ShapeRef>,
    match_result_shape: Option<ShapeRef>,
}

impl Heap {
    /// Empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a shape. `num_fixed_slots` is capped at [`MAX_FIXED_SLOTS`].
    pub fn new_shape(
        &mut self,
        class: &'static Class,
        proto: Option<ObjectRef>,
        num_fixed_slots: u32,
        slot_span: u32,
    ) -> ShapeRef {
        let num_fixed_slots = num_fixed_slots.min(MAX_FIXED_SLOTS as u32);
        let id = self.next_shape_id;
        self.next_shape_id += 1;
        let shape = Shape::new(
            class,
            proto,
            num_fixed_slots,
            slot_span.max(num_fixed_slots),
            id,
        );
        #[cfg(feature = "heap_logging")]
        tracing::trace!(id, class = class.name, "new shape");
        ShapeRef::new(alloc(&mut self.shapes, shape))
    }

    /// Allocate an object with `shape`; every slot starts as `undefined`.
    pub fn new_object(&mut self, shape: ShapeRef) -> ObjectRef {
        self.new_object_with(shape, Vec::new(), ObjectPayload::None)
    }

    fn new_object_with(
        &mut self,
        shape: ShapeRef,
        elements: Vec<Value>,
        payload: ObjectPayload,
    ) -> ObjectRef {
        ObjectRef::new(alloc(
            &mut self.objects,
            JsObject::new(shape, elements, payload),
        ))
    }

    /// Allocate an array with the given dense elements.
    pub fn new_array(&mut self, elements: Vec<Value>) -> ObjectRef {
        let shape = match self.array_shape {
            Some(shape) => shape,
            None => {
                let shape = self.new_shape(&ARRAY_CLASS, None, 0, 0);
                self.array_shape = Some(shape);
                shape
            }
        };
        self.new_object_with(shape, elements, ObjectPayload::None)
    }

    /// Allocate a RegExp object. Its flags are stored as an int32 in
    /// [`REGEXP_FLAGS_SLOT`].
    pub fn new_regexp(&mut self, source: &str, flags: &str) -> Result<ObjectRef, RuntimeError> {
        let flags = RegExpFlags::parse(flags)?;
        let data = RegExpData::compile(source, flags)?;
        let shape = match self.regexp_shape {
            Some(shape) => shape,
            None => {
                let shape = self.new_shape(&REGEXP_CLASS, None, 2, 2);
                self.regexp_shape = Some(shape);
                shape
            }
        };
        let obj = self.new_object_with(shape, Vec::new(), ObjectPayload::RegExp(Box::new(data)));
        obj.set_fixed_slot(REGEXP_FLAGS_SLOT, Value::int32(flags.bits() as i32));
        Ok(obj)
    }

    /// Allocate a match result array: captures as elements, index and input
    /// in fixed slots.
    pub fn new_match_result(
        &mut self,
        elements: Vec<Value>,
        index: i32,
        input: StringRef,
    ) -> ObjectRef {
        let shape = match self.match_result_shape {
            Some(shape) => shape,
            None => {
                let shape = self.new_shape(&ARRAY_CLASS, None, 2, 2);
                self.match_result_shape = Some(shape);
                shape
            }
        };
        let obj = self.new_object_with(shape, elements, ObjectPayload::None);
        obj.set_fixed_slot(MATCH_RESULT_INDEX_SLOT, Value::int32(index));
        obj.set_fixed_slot(MATCH_RESULT_INPUT_SLOT, Value::string(input));
        obj
    }

    /// Allocate a string from Rust text.
    pub fn new_string(&mut self, s: &str) -> StringRef {
        StringRef::new(alloc(&mut self.strings, JsString::from_rust_str(s)))
    }

    /// Allocate a string from UTF-16 code units.
    pub fn new_string_from_utf16(&mut self, units: Vec<u16>) -> StringRef {
        StringRef::new(alloc(&mut self.strings, JsString::from_utf16(units)))
    }

    /// Allocate a symbol.
    pub fn new_symbol(&mut self, description: Option<&str>) -> SymbolRef {
        SymbolRef::new(alloc(
            &mut self.symbols,
            JsSymbol::new(description.map(str::to_string)),
        ))
    }

    /// Allocate a BigInt.
    pub fn new_bigint(&mut self, value: BigInt) -> BigIntRef {
        BigIntRef::new(alloc(&mut self.bigints, JsBigInt::new(value)))
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of live strings.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        free_all(&mut self.objects);
        free_all(&mut self.shapes);
        free_all(&mut self.strings);
        free_all(&mut self.symbols);
        free_all(&mut self.bigints);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::PLAIN_OBJECT_CLASS;

    #[test]
    fn test_objects_start_undefined() {
        let mut heap = Heap::new();
        let shape = heap.new_shape(&PLAIN_OBJECT_CLASS, None, 2, 4);
        let obj = heap.new_object(shape);
        assert_eq!(obj.fixed_slot(0), Some(Value::undefined()));
        assert_eq!(obj.dynamic_slot(1), Some(Value::undefined()));
        assert_eq!(obj.dynamic_slot(2), None);
        assert_eq!(shape.num_dynamic_slots(), 2);
    }

    #[test]
    fn test_slot_writes_are_visible() {
        let mut heap = Heap::new();
        let shape = heap.new_shape(&PLAIN_OBJECT_CLASS, None, 1, 2);
        let obj = heap.new_object(shape);
        assert!(obj.set_fixed_slot(0, Value::int32(42)));
        assert!(obj.set_dynamic_slot(0, Value::boolean(true)));
        assert!(!obj.set_dynamic_slot(5, Value::null()));
        assert_eq!(obj.fixed_slot(0), Some(Value::int32(42)));
        assert_eq!(obj.dynamic_slot(0), Some(Value::boolean(true)));
    }

    #[test]
    fn test_shapes_are_distinct_even_when_equal() {
        let mut heap = Heap::new();
        let a = heap.new_shape(&PLAIN_OBJECT_CLASS, None, 1, 1);
        let b = heap.new_shape(&PLAIN_OBJECT_CLASS, None, 1, 1);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_arrays_share_a_shape() {
        let mut heap = Heap::new();
        let a = heap.new_array(vec![Value::int32(1)]);
        let b = heap.new_array(vec![Value::hole(), Value::int32(2)]);
        assert_eq!(a.shape(), b.shape());
        assert_eq!(b.elements_len(), 2);
        assert!(b.element(0).unwrap().is_hole());
        assert_eq!(b.element(2), None);
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn test_regexp_flags_slot() {
        let mut heap = Heap::new();
        let re = heap.new_regexp("a+", "gi").unwrap();
        let flags = re.fixed_slot(REGEXP_FLAGS_SLOT).unwrap().as_int32().unwrap();
        assert_eq!(
            flags as u32,
            RegExpFlags::GLOBAL | RegExpFlags::IGNORE_CASE
        );
        assert!(re.regexp_data().is_some());
        assert!(heap.new_regexp("(", "").is_err());
    }
}
