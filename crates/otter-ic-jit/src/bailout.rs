//! Exit statuses of compiled stubs.
//!
//! A compiled stub returns a small status code instead of a value; the value
//! travels through the `out` pointer.
//!
//! # Exit flow
//!
//! ```text
//! stub body:
//!   guard ── fails ──▶ failure path (restore saved registers)
//!     │                   │
//!     │                   ▼
//!     │              bailout trampoline ── return BAILOUT
//!     ▼
//!   call-out ── returns EXCEPTION_SENTINEL ──▶ exception trampoline
//!     │                                          return EXCEPTION
//!     ▼
//!   ReturnFromIc ── return RETURN (out holds the result)
//! ```
//!
//! A number operand that holds neither an int32 nor a double takes a fourth
//! exit, `MALFORMED`: the program read a value as a number without guarding
//! it.

/// Status code for a stub that ran to `ReturnFromIc`.
pub const STATUS_RETURN: u32 = 0;

/// Status code for a stub that took a guard failure.
pub const STATUS_BAILOUT: u32 = 1;

/// Status code for a stub whose call-out raised.
pub const STATUS_EXCEPTION: u32 = 2;

/// Status code for a stub that read an operand of the wrong kind.
pub const STATUS_MALFORMED: u32 = 3;

/// How a compiled stub exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// Ran to completion; the output slot holds the result.
    Return,
    /// A guard failed; the caller takes the general path.
    Bailout,
    /// A call-out raised; the error is pending on the context.
    Exception,
    /// An operand held a value of the wrong kind. A generator defect.
    Malformed,
}

impl ExitStatus {
    /// Status code returned by native code.
    pub const fn code(self) -> u32 {
        match self {
            ExitStatus::Return => STATUS_RETURN,
            ExitStatus::Bailout => STATUS_BAILOUT,
            ExitStatus::Exception => STATUS_EXCEPTION,
            ExitStatus::Malformed => STATUS_MALFORMED,
        }
    }

    /// Decode a status returned by native code.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            STATUS_RETURN => Some(ExitStatus::Return),
            STATUS_BAILOUT => Some(ExitStatus::Bailout),
            STATUS_EXCEPTION => Some(ExitStatus::Exception),
            STATUS_MALFORMED => Some(ExitStatus::Malformed),
            _ => None,
        }
    }

    /// Name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            ExitStatus::Return => "return",
            ExitStatus::Bailout => "bailout",
            ExitStatus::Exception => "exception",
            ExitStatus::Malformed => "malformed",
        }
    }
}
