//! Strings, symbols and BigInts

use std::ptr::NonNull;

use num_bigint::BigInt;

/// UTF-16 string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsString {
    units: Vec<u16>,
}

impl JsString {
    /// From UTF-16 code units.
    pub fn from_utf16(units: Vec<u16>) -> Self {
        Self { units }
    }

    /// From a Rust string.
    pub fn from_rust_str(s: &str) -> Self {
        Self {
            units: s.encode_utf16().collect(),
        }
    }

    /// Code units.
    #[inline]
    pub fn units(&self) -> &[u16] {
        &self.units
    }

    /// Length in code units.
    #[inline]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Lossy conversion for diagnostics and tests.
    pub fn to_rust_string(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }
}

/// Symbol with an optional description.
#[derive(Debug)]
pub struct JsSymbol {
    description: Option<String>,
}

impl JsSymbol {
    pub(crate) fn new(description: Option<String>) -> Self {
        Self { description }
    }

    /// Description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Arbitrary-precision integer.
#[derive(Debug)]
pub struct JsBigInt {
    value: BigInt,
}

impl JsBigInt {
    pub(crate) fn new(value: BigInt) -> Self {
        Self { value }
    }

    /// Numeric value.
    pub fn value(&self) -> &BigInt {
        &self.value
    }
}

macro_rules! cell_ref {
    ($(#[$meta:meta])* $name:ident => $target:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(NonNull<$target>);

        impl $name {
            pub(crate) fn new(ptr: NonNull<$target>) -> Self {
                Self(ptr)
            }

            /// Wrap a raw pointer, `None` if null.
            #[inline]
            pub fn from_raw(ptr: *mut $target) -> Option<Self> {
                NonNull::new(ptr).map(Self)
            }

            /// Raw pointer.
            #[inline]
            pub fn as_ptr(self) -> *mut $target {
                self.0.as_ptr()
            }
        }

        impl std::ops::Deref for $name {
            type Target = $target;

            fn deref(&self) -> &$target {
                // SAFETY: refs are only created by `Heap`, which keeps the
                // allocation alive and unmoved until the heap is dropped.
                unsafe { self.0.as_ref() }
            }
        }
    };
}

cell_ref!(
    /// Reference to a heap-owned [`JsString`].
    StringRef => JsString
);
cell_ref!(
    /// Reference to a heap-owned [`JsSymbol`].
    SymbolRef => JsSymbol
);
cell_ref!(
    /// Reference to a heap-owned [`JsBigInt`].
    BigIntRef => JsBigInt
);
