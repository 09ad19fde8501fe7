//! Execution context shared by the interpreter and compiled stubs

use thiserror::Error;

use crate::heap::Heap;

/// An error raised by a call-out. Stubs report it as an `Exception` outcome
/// and leave it in [`IcContext::pending_exception`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Pattern or flags failed to compile
    #[error("SyntaxError: invalid regular expression: {0}")]
    RegExpSyntax(String),

    /// Negative lastIndex passed to a RegExp call-out
    #[error("RangeError: invalid lastIndex {0}")]
    InvalidLastIndex(i32),

    /// Substring bounds outside the string
    #[error("RangeError: substring [{begin}, {begin} + {length}) out of range for length {len}")]
    SubstringOutOfRange {
        /// Start index
        begin: i32,
        /// Requested length
        length: i32,
        /// String length
        len: usize,
    },

    /// RegExp call-out on an object without RegExp data
    #[error("TypeError: object is not a RegExp")]
    NotARegExp,
}

/// Heap plus the pending exception slot.
///
/// Compiled stubs receive a `*mut IcContext` and pass it on to helpers.
#[derive(Debug, Default)]
pub struct IcContext {
    heap: Heap,
    pending_exception: Option<RuntimeError>,
}

impl IcContext {
    /// Context with an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Heap.
    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Heap, mutably.
    #[inline]
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Record an error raised by a call-out.
    pub fn set_pending_exception(&mut self, error: RuntimeError) {
        #[cfg(feature = "heap_logging")]
        tracing::debug!(%error, "pending exception");
        self.pending_exception = Some(error);
    }

    /// Pending exception, if any.
    pub fn pending_exception(&self) -> Option<&RuntimeError> {
        self.pending_exception.as_ref()
    }

    /// Take and clear the pending exception.
    pub fn take_pending_exception(&mut self) -> Option<RuntimeError> {
        self.pending_exception.take()
    }

    /// Run a fallible call-out, recording its error as the pending exception.
    pub fn catch<T>(&mut self, f: impl FnOnce(&mut Heap) -> Result<T, RuntimeError>) -> Option<T> {
        match f(&mut self.heap) {
            Ok(value) => Some(value),
            Err(error) => {
                self.set_pending_exception(error);
                None
            }
        }
    }
}
