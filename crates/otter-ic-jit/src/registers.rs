//! Physical register names and availability sets.
//!
//! Registers are abstract: the translator gives each one a stack slot, so the
//! count is a configuration knob rather than a property of the host.

use std::fmt;

/// A general purpose 64-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u8);

/// A double precision float register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FloatRegister(pub u8);

/// A register holding a complete boxed value.
///
/// With 64-bit NaN boxing a value fits in one general register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueReg(pub Register);

impl ValueReg {
    /// The register carrying the boxed bits.
    pub const fn reg(self) -> Register {
        self.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for FloatRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

macro_rules! register_set {
    ($(#[$meta:meta])* $set:ident of $reg:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $set(u32);

        impl $set {
            /// Most registers a set can name.
            pub const CAPACITY: u8 = 32;

            /// The empty set.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Registers `0..count`. Counts past [`Self::CAPACITY`] are capped.
            pub const fn first(count: u8) -> Self {
                if count >= Self::CAPACITY {
                    Self(u32::MAX)
                } else {
                    Self((1u32 << count) - 1)
                }
            }

            /// Whether `reg` is in the set.
            pub const fn contains(self, reg: $reg) -> bool {
                reg.0 < Self::CAPACITY && self.0 & (1 << reg.0) != 0
            }

            /// Add `reg`.
            pub fn insert(&mut self, reg: $reg) {
                if reg.0 < Self::CAPACITY {
                    self.0 |= 1 << reg.0;
                }
            }

            /// Remove `reg`.
            pub fn remove(&mut self, reg: $reg) {
                if reg.0 < Self::CAPACITY {
                    self.0 &= !(1 << reg.0);
                }
            }

            /// Remove and return the lowest numbered register.
            pub fn take_lowest(&mut self) -> Option<$reg> {
                if self.0 == 0 {
                    return None;
                }
                let reg = $reg(self.0.trailing_zeros() as u8);
                self.remove(reg);
                Some(reg)
            }

            /// Whether the set is empty.
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Number of registers in the set.
            pub const fn len(self) -> u32 {
                self.0.count_ones()
            }

            /// Registers in ascending order.
            pub fn iter(self) -> impl Iterator<Item = $reg> {
                (0..Self::CAPACITY)
                    .map($reg)
                    .filter(move |reg| self.contains(*reg))
            }
        }
    };
}

register_set! {
    /// A set of general purpose registers.
    RegisterSet of Register
}

register_set! {
    /// A set of float registers.
    FloatRegisterSet of FloatRegister
}
