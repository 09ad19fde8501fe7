//! # Otter IC Object
//!
//! Object model the inline cache engine guards against and acts upon.
//!
//! ## Layout
//!
//! - **NaN-boxing**: every value is one 64-bit word, see [`value`]
//! - **Shapes**: identity-compared, each pointing at a static [`Class`]
//! - **Fixed layout**: objects are `#[repr(C)]` so compiled stubs can read
//!   shape, slots and elements at constant offsets
//! - **Call-outs**: fallible RegExp and substring kernels, with `extern "C"`
//!   entry points for generated code

#![warn(clippy::all)]
#![warn(missing_docs)]
// Unsafe is confined to cell refs, heap frees and helper entry points.
// All unsafe code must have SAFETY comments

pub mod callouts;
pub mod context;
pub mod gc;
pub mod heap;
pub mod helpers;
pub mod number;
pub mod object;
pub mod regexp;
pub mod shape;
pub mod string;
pub mod value;

pub use context::{IcContext, RuntimeError};
pub use gc::{CellRef, RecordingTracer, Trace, Tracer};
pub use heap::Heap;
pub use helpers::EXCEPTION_SENTINEL;
pub use object::{JsObject, ObjectRef};
pub use regexp::RegExpFlags;
pub use shape::{Class, Shape, ShapeRef};
pub use string::{BigIntRef, JsBigInt, JsString, JsSymbol, StringRef, SymbolRef};
pub use value::Value;
