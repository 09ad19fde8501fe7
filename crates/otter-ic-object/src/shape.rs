//! Shapes and classes.
//!
//! Guards compare both by identity: two shapes with identical contents are
//! still different shapes.

use std::mem::offset_of;
use std::ptr::NonNull;

use otter_ic_ir::GuardClassKind;

use crate::object::ObjectRef;

/// Class descriptor. Every class is a `static`, so its address is its identity.
#[derive(Debug)]
#[repr(C)]
pub struct Class {
    /// Class name
    pub name: &'static str,
    /// Guard kind this class answers to
    pub kind: GuardClassKind,
}

/// Ordinary objects
pub static PLAIN_OBJECT_CLASS: Class = Class {
    name: "Object",
    kind: GuardClassKind::PlainObject,
};
/// Arrays
pub static ARRAY_CLASS: Class = Class {
    name: "Array",
    kind: GuardClassKind::Array,
};
/// RegExp instances
pub static REGEXP_CLASS: Class = Class {
    name: "RegExp",
    kind: GuardClassKind::RegExp,
};
/// ArrayBuffer instances
pub static ARRAY_BUFFER_CLASS: Class = Class {
    name: "ArrayBuffer",
    kind: GuardClassKind::ArrayBuffer,
};
/// Functions
pub static FUNCTION_CLASS: Class = Class {
    name: "Function",
    kind: GuardClassKind::Function,
};
/// Bound functions
pub static BOUND_FUNCTION_CLASS: Class = Class {
    name: "BoundFunction",
    kind: GuardClassKind::BoundFunction,
};
/// Set instances
pub static SET_CLASS: Class = Class {
    name: "Set",
    kind: GuardClassKind::Set,
};
/// Map instances
pub static MAP_CLASS: Class = Class {
    name: "Map",
    kind: GuardClassKind::Map,
};

impl Class {
    /// The class a `GuardClass` op with `kind` compares against.
    pub fn for_guard_kind(kind: GuardClassKind) -> &'static Class {
        match kind {
            GuardClassKind::PlainObject => &PLAIN_OBJECT_CLASS,
            GuardClassKind::Array => &ARRAY_CLASS,
            GuardClassKind::RegExp => &REGEXP_CLASS,
            GuardClassKind::ArrayBuffer => &ARRAY_BUFFER_CLASS,
            GuardClassKind::Function => &FUNCTION_CLASS,
            GuardClassKind::BoundFunction => &BOUND_FUNCTION_CLASS,
            GuardClassKind::Set => &SET_CLASS,
            GuardClassKind::Map => &MAP_CLASS,
        }
    }

    /// Address used as the class identity.
    #[inline]
    pub fn as_ptr(&'static self) -> *const Class {
        self
    }

    /// Resolve a class address previously taken with [`Class::as_ptr`].
    pub fn from_ptr(ptr: *const Class) -> Option<&'static Class> {
        GuardClassKind::ALL
            .iter()
            .map(|kind| Class::for_guard_kind(*kind))
            .find(|class| std::ptr::eq(*class, ptr))
    }
}

/// Object layout descriptor.
#[derive(Debug)]
#[repr(C)]
pub struct Shape {
    class: &'static Class,
    proto: Option<ObjectRef>,
    num_fixed_slots: u32,
    slot_span: u32,
    id: u32,
}

/// Byte offset of the class pointer in a shape.
pub const SHAPE_OFFSET_OF_CLASS: i32 = offset_of!(Shape, class) as i32;
/// Byte offset of the prototype pointer in a shape.
pub const SHAPE_OFFSET_OF_PROTO: i32 = offset_of!(Shape, proto) as i32;

impl Shape {
    pub(crate) fn new(
        class: &'static Class,
        proto: Option<ObjectRef>,
        num_fixed_slots: u32,
        slot_span: u32,
        id: u32,
    ) -> Self {
        Self {
            class,
            proto,
            num_fixed_slots,
            slot_span,
            id,
        }
    }

    /// Class of objects with this shape.
    #[inline]
    pub fn class(&self) -> &'static Class {
        self.class
    }

    /// Prototype, `None` for a null prototype.
    #[inline]
    pub fn proto(&self) -> Option<ObjectRef> {
        self.proto
    }

    /// Number of inline slots.
    #[inline]
    pub fn num_fixed_slots(&self) -> u32 {
        self.num_fixed_slots
    }

    /// Total slot count, fixed and dynamic.
    #[inline]
    pub fn slot_span(&self) -> u32 {
        self.slot_span
    }

    /// Number of out-of-line slots.
    #[inline]
    pub fn num_dynamic_slots(&self) -> u32 {
        self.slot_span.saturating_sub(self.num_fixed_slots)
    }

    /// Heap-unique id, for diagnostics.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Reference to a heap-owned [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ShapeRef(NonNull<Shape>);

impl ShapeRef {
    pub(crate) fn new(ptr: NonNull<Shape>) -> Self {
        Self(ptr)
    }

    /// Wrap a raw pointer, `None` if null.
    #[inline]
    pub fn from_raw(ptr: *mut Shape) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Raw pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut Shape {
        self.0.as_ptr()
    }

    /// Pointer as a stub data word.
    #[inline]
    pub fn to_word(self) -> u64 {
        self.as_ptr() as u64
    }
}

impl std::ops::Deref for ShapeRef {
    type Target = Shape;

    fn deref(&self) -> &Shape {
        // SAFETY: shape refs are only created by `Heap`, which keeps the
        // allocation alive and unmoved until the heap is dropped.
        unsafe { self.0.as_ref() }
    }
}
