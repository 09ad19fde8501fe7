//! Garbage collection support
//!
//! Tracing interface for storage that holds heap references across a
//! safepoint: interpreter operand storage, stub data blobs and compiled stubs
//! that baked stub fields into their code. No collector lives here.

use otter_ic_ir::{StubData, StubFieldType};

use crate::object::{JsObject, ObjectRef};
use crate::shape::{Shape, ShapeRef};
use crate::string::{BigIntRef, StringRef, SymbolRef};
use crate::value::Value;

/// A reference to any heap cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellRef {
    /// Object
    Object(ObjectRef),
    /// Shape
    Shape(ShapeRef),
    /// String
    String(StringRef),
    /// Symbol
    Symbol(SymbolRef),
    /// BigInt
    BigInt(BigIntRef),
}

impl CellRef {
    /// Cell a value points to, if any.
    pub fn from_value(value: Value) -> Option<Self> {
        if let Some(obj) = value.as_object() {
            Some(CellRef::Object(obj))
        } else if let Some(s) = value.as_string() {
            Some(CellRef::String(s))
        } else if let Some(s) = value.as_symbol() {
            Some(CellRef::Symbol(s))
        } else {
            value.as_bigint().map(CellRef::BigInt)
        }
    }
}

/// Trait for types that can be traced by the GC
pub trait Trace {
    /// Trace all references in this object
    fn trace(&self, tracer: &mut dyn Tracer);
}

/// Tracer interface for GC marking phase
pub trait Tracer {
    /// Mark a cell as reachable
    fn mark_cell(&mut self, cell: CellRef);

    /// Mark a value as reachable
    fn mark_value(&mut self, value: Value) {
        if let Some(cell) = CellRef::from_value(value) {
            self.mark_cell(cell);
        }
    }
}

impl Trace for Value {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.mark_value(*self);
    }
}

impl Trace for Shape {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(proto) = self.proto() {
            tracer.mark_cell(CellRef::Object(proto));
        }
    }
}

impl Trace for JsObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        let shape = self.shape();
        tracer.mark_cell(CellRef::Shape(shape));
        for index in 0..shape.num_fixed_slots() as usize {
            if let Some(value) = self.fixed_slot(index) {
                tracer.mark_value(value);
            }
        }
        for index in 0..shape.num_dynamic_slots() as usize {
            if let Some(value) = self.dynamic_slot(index) {
                tracer.mark_value(value);
            }
        }
        for index in 0..self.elements_len() as usize {
            if let Some(value) = self.element(index) {
                tracer.mark_value(value);
            }
        }
    }
}

impl Trace for StubData {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for (_, ty, word) in self.traced_words() {
            match ty {
                StubFieldType::Shape => {
                    if let Some(shape) = ShapeRef::from_raw(word as *mut Shape) {
                        tracer.mark_cell(CellRef::Shape(shape));
                    }
                }
                StubFieldType::Object => {
                    if let Some(obj) = ObjectRef::from_raw(word as *mut JsObject) {
                        tracer.mark_cell(CellRef::Object(obj));
                    }
                }
                StubFieldType::Value => tracer.mark_value(Value::from_bits(word)),
                _ => {}
            }
        }
    }
}

/// A tracer that records every marked cell, in order.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    /// Marked cells
    pub marked: Vec<CellRef>,
}

impl Tracer for RecordingTracer {
    fn mark_cell(&mut self, cell: CellRef) {
        self.marked.push(cell);
    }
}
