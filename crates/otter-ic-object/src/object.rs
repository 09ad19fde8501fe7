//! Objects with a fixed, `#[repr(C)]` layout.
//!
//! Compiled stubs read objects directly through the offsets exported here:
//!
//! ```text
//! 0   shape            *const Shape
//! 8   slots            *mut Value   (out-of-line slots)
//! 16  elements         *mut Value   (dense elements)
//! 24  elements_len     u32
//! 28  slots_len        u32
//! 32  fixed slots      [Value; MAX_FIXED_SLOTS]
//! ..  payload          (not read by compiled code)
//! ```

use std::cell::Cell;
use std::mem::offset_of;
use std::ptr::NonNull;

use crate::regexp::RegExpData;
use crate::shape::{Class, ShapeRef};
use crate::value::Value;

/// Number of inline slots every object reserves.
pub const MAX_FIXED_SLOTS: usize = 8;

/// Byte offset of the shape pointer.
pub const OFFSET_OF_SHAPE: i32 = offset_of!(JsObject, shape) as i32;
/// Byte offset of the out-of-line slots pointer.
pub const OFFSET_OF_SLOTS: i32 = offset_of!(JsObject, slots) as i32;
/// Byte offset of the dense elements pointer.
pub const OFFSET_OF_ELEMENTS: i32 = offset_of!(JsObject, elements) as i32;
/// Byte offset of the dense elements length.
pub const OFFSET_OF_ELEMENTS_LENGTH: i32 = offset_of!(JsObject, elements_len) as i32;
/// Byte offset of fixed slot 0.
pub const OFFSET_OF_FIXED_SLOTS: i32 = offset_of!(JsObject, fixed_slots) as i32;

/// Out-of-line data that compiled code never touches.
#[derive(Debug, Default)]
pub enum ObjectPayload {
    /// No extra data
    #[default]
    None,
    /// Compiled regular expression
    RegExp(Box<RegExpData>),
}

/// A heap object.
#[repr(C)]
pub struct JsObject {
    shape: Cell<ShapeRef>,
    slots: *mut Value,
    elements: *mut Value,
    elements_len: u32,
    slots_len: u32,
    fixed_slots: [Cell<Value>; MAX_FIXED_SLOTS],
    payload: ObjectPayload,
}

fn leak_values(values: Vec<Value>) -> (*mut Value, u32) {
    let len = values.len() as u32;
    if len == 0 {
        return (std::ptr::null_mut(), 0);
    }
    (Box::into_raw(values.into_boxed_slice()) as *mut Value, len)
}

/// # Safety
///
/// `ptr`/`len` must come from `leak_values` and not have been freed.
unsafe fn free_values(ptr: *mut Value, len: u32) {
    if !ptr.is_null() {
        // SAFETY: guaranteed by the caller.
        drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len as usize)) });
    }
}

impl JsObject {
    pub(crate) fn new(shape: ShapeRef, elements: Vec<Value>, payload: ObjectPayload) -> Self {
        let (slots, slots_len) =
            leak_values(vec![Value::undefined(); shape.num_dynamic_slots() as usize]);
        let (elements, elements_len) = leak_values(elements);
        Self {
            shape: Cell::new(shape),
            slots,
            elements,
            elements_len,
            slots_len,
            fixed_slots: std::array::from_fn(|_| Cell::new(Value::undefined())),
            payload,
        }
    }

    /// Current shape.
    #[inline]
    pub fn shape(&self) -> ShapeRef {
        self.shape.get()
    }

    /// Replace the shape (used to model shape transitions). The new shape must
    /// not need more dynamic slots than the object already has.
    pub fn set_shape(&self, shape: ShapeRef) {
        debug_assert!(shape.num_dynamic_slots() <= self.slots_len);
        self.shape.set(shape);
    }

    /// Class, via the shape.
    #[inline]
    pub fn class(&self) -> &'static Class {
        self.shape().class()
    }

    /// Prototype, via the shape.
    #[inline]
    pub fn proto(&self) -> Option<ObjectRef> {
        self.shape().proto()
    }

    /// Byte offset (from the object base) of fixed slot `index`.
    #[inline]
    pub const fn fixed_slot_offset(index: usize) -> i32 {
        OFFSET_OF_FIXED_SLOTS + (index * 8) as i32
    }

    /// Fixed slot index for a byte offset produced by [`Self::fixed_slot_offset`].
    #[inline]
    pub const fn fixed_slot_index_from_offset(offset: i32) -> usize {
        ((offset - OFFSET_OF_FIXED_SLOTS) / 8) as usize
    }

    /// Byte offset (from the slots pointer) of dynamic slot `index`.
    #[inline]
    pub const fn dynamic_slot_offset(index: usize) -> i32 {
        (index * 8) as i32
    }

    /// Dynamic slot index for a byte offset.
    #[inline]
    pub const fn dynamic_slot_index_from_offset(offset: i32) -> usize {
        (offset / 8) as usize
    }

    /// Fixed slot `index`; `None` past the end.
    pub fn fixed_slot(&self, index: usize) -> Option<Value> {
        self.fixed_slots.get(index).map(Cell::get)
    }

    /// Write fixed slot `index`. Returns `false` past the end.
    pub fn set_fixed_slot(&self, index: usize, value: Value) -> bool {
        match self.fixed_slots.get(index) {
            Some(slot) => {
                slot.set(value);
                true
            }
            None => false,
        }
    }

    /// Dynamic slot `index`; `None` past the end.
    pub fn dynamic_slot(&self, index: usize) -> Option<Value> {
        if index >= self.slots_len as usize {
            return None;
        }
        // SAFETY: `slots` owns `slots_len` initialized values.
        Some(unsafe { self.slots.add(index).read() })
    }

    /// Write dynamic slot `index`. Returns `false` past the end.
    pub fn set_dynamic_slot(&self, index: usize, value: Value) -> bool {
        if index >= self.slots_len as usize {
            return false;
        }
        // SAFETY: in bounds; objects are only reachable through shared refs
        // on one thread, mirroring the `Cell`-based fixed slots.
        unsafe { self.slots.add(index).write(value) };
        true
    }

    /// Dense elements length.
    #[inline]
    pub fn elements_len(&self) -> u32 {
        self.elements_len
    }

    /// Dense element `index` (possibly a hole); `None` out of bounds.
    pub fn element(&self, index: usize) -> Option<Value> {
        if index >= self.elements_len as usize {
            return None;
        }
        // SAFETY: `elements` owns `elements_len` initialized values.
        Some(unsafe { self.elements.add(index).read() })
    }

    /// Write dense element `index`. Returns `false` out of bounds.
    pub fn set_element(&self, index: usize, value: Value) -> bool {
        if index >= self.elements_len as usize {
            return false;
        }
        // SAFETY: in bounds, see `set_dynamic_slot`.
        unsafe { self.elements.add(index).write(value) };
        true
    }

    /// Regular expression data, if this is a RegExp.
    pub fn regexp_data(&self) -> Option<&RegExpData> {
        match &self.payload {
            ObjectPayload::RegExp(data) => Some(data),
            ObjectPayload::None => None,
        }
    }
}

impl Drop for JsObject {
    fn drop(&mut self) {
        // SAFETY: both buffers were produced by `leak_values` in `new`.
        unsafe {
            free_values(self.slots, self.slots_len);
            free_values(self.elements, self.elements_len);
        }
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsObject")
            .field("class", &self.class().name)
            .field("shape", &self.shape().id())
            .field("elements_len", &self.elements_len)
            .finish()
    }
}

/// Reference to a heap-owned [`JsObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectRef(NonNull<JsObject>);

impl ObjectRef {
    pub(crate) fn new(ptr: NonNull<JsObject>) -> Self {
        Self(ptr)
    }

    /// Wrap a raw pointer, `None` if null.
    #[inline]
    pub fn from_raw(ptr: *mut JsObject) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Raw pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut JsObject {
        self.0.as_ptr()
    }

    /// Pointer as a stub data word.
    #[inline]
    pub fn to_word(self) -> u64 {
        self.as_ptr() as u64
    }
}

impl std::ops::Deref for ObjectRef {
    type Target = JsObject;

    fn deref(&self) -> &JsObject {
        // SAFETY: object refs are only created by `Heap`, which keeps the
        // allocation alive and unmoved until the heap is dropped.
        unsafe { self.0.as_ref() }
    }
}
