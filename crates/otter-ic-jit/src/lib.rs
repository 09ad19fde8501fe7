//! # Otter IC JIT
//!
//! Compiles inline cache stub programs to native code with Cranelift.
//!
//! Code generation runs in two stages. The [`emitter`] walks the program with
//! a [`CacheRegisterAllocator`] and records macro-assembler instructions into
//! an [`InstBuffer`]; the [`translator`] lowers that buffer to Cranelift IR.
//! Allocation decisions can be checked against the record alone.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allocator;
pub mod bailout;
pub mod compiler;
pub mod config;
pub mod emitter;
pub mod failure;
pub mod location;
pub mod masm;
pub mod registers;
pub mod runtime_helpers;
pub mod translator;
pub(crate) mod type_guards;

pub use allocator::CacheRegisterAllocator;
pub use bailout::ExitStatus;
pub use compiler::{CompiledStub, JitCompiler, JitError};
pub use config::{JitConfig, StubFieldPolicy};
pub use emitter::{EmitSummary, emit_stub};
pub use location::{OperandLocation, PayloadType};
pub use masm::{Cond, InstBuffer, Label, MacroAssembler, MasmInst, Operand};
pub use registers::{FloatRegister, FloatRegisterSet, Register, RegisterSet, ValueReg};
pub use runtime_helpers::{HelperKind, RuntimeHelpers};
