//! # Otter IC Interpreter
//!
//! Executes stub programs directly on boxed values. Used for call sites that
//! are not hot enough to compile, and as the reference every compiled stub
//! must agree with.
//!
//! Storage is created fresh for each run, so one program can be interpreted
//! from several threads at once as long as each run has its own context.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod interpreter;
pub mod operand;

pub use error::{InterpreterError, Result};
pub use interpreter::{Interpreter, Outcome, Step, interpret};
pub use operand::{OperandStorage, OperandValue};
