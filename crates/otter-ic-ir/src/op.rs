//! The cache op table.
//!
//! [`for_each_cache_op!`] is the single source of truth for every op: its
//! opcode, its argument list and the handler method name. From it this module
//! generates:
//!
//! - [`CacheOp`], the `#[repr(u8)]` opcode enum
//! - [`Op`], a decoded op with typed arguments
//! - [`CacheOpHandler`], one method per op, implemented by the interpreter
//!   and by the compiler's emitter
//! - [`dispatch`], which routes a decoded op to its handler method
//! - the `StubWriter` emit methods
//!
//! A backend that forgets an op fails to compile instead of diverging at run
//! time.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{IrError, Result};
use crate::operand::*;
use crate::reader::StubReader;
use crate::stub::StubField;
use crate::types::{GuardClassKind, ValueType};

/// Invoke `$m!` with the full op table.
///
/// Each entry reads `Name => handler_method { arg: Type, ... };`. Argument
/// order is wire order.
#[macro_export]
macro_rules! for_each_cache_op {
    ($m:ident) => {
        $m! {
            /// Terminal: return the output value
            ReturnFromIc => return_from_ic {};
            /// Narrow a value to an object
            GuardToObject => guard_to_object { input: ValOperandId, result: ObjOperandId };
            /// Bail unless the value is null or undefined
            GuardIsNullOrUndefined => guard_is_null_or_undefined { input: ValOperandId };
            /// Bail unless the value is null
            GuardIsNull => guard_is_null { input: ValOperandId };
            /// Bail unless the value is undefined
            GuardIsUndefined => guard_is_undefined { input: ValOperandId };
            /// Narrow a value to a boolean
            GuardToBoolean => guard_to_boolean { input: ValOperandId, result: BooleanOperandId };
            /// Narrow a value to a string
            GuardToString => guard_to_string { input: ValOperandId, result: StringOperandId };
            /// Narrow a value to a symbol
            GuardToSymbol => guard_to_symbol { input: ValOperandId, result: SymbolOperandId };
            /// Narrow a value to a BigInt
            GuardToBigInt => guard_to_big_int { input: ValOperandId, result: BigIntOperandId };
            /// Bail unless the value is an int32 or a double
            GuardIsNumber => guard_is_number { input: ValOperandId };
            /// Narrow a value to an int32
            GuardToInt32 => guard_to_int32 { input: ValOperandId, result: Int32OperandId };
            /// Narrow a boolean value to 0 or 1
            GuardBooleanToInt32 => guard_boolean_to_int32 { input: ValOperandId, result: Int32OperandId };
            /// Narrow a number that is exactly an int32 (-0.0 becomes 0)
            GuardToInt32Index => guard_to_int32_index { input: ValOperandId, result: Int32OperandId };
            /// Sign-extend an int32 to a pointer-sized integer
            Int32ToIntPtr => int32_to_int_ptr { input: Int32OperandId, result: IntPtrOperandId };
            /// Narrow a number that is exactly an intptr, or substitute -1
            GuardNumberToIntPtrIndex => guard_number_to_int_ptr_index {
                input: NumberOperandId,
                support_oob: bool,
                result: IntPtrOperandId
            };
            /// Narrow a number to an int32, truncating modulo 2^32
            GuardToInt32ModUint32 => guard_to_int32_mod_uint32 { input: ValOperandId, result: Int32OperandId };
            /// Narrow a number to 0..=255
            GuardToUint8Clamped => guard_to_uint8_clamped { input: ValOperandId, result: Int32OperandId };
            /// Bail unless the value has the given non-double tag
            GuardNonDoubleType => guard_non_double_type { input: ValOperandId, value_type: ValueType };
            /// Bail unless the object has the shape in the field
            GuardShape => guard_shape { obj: ObjOperandId, shape: StubField };
            /// Bail unless the object's prototype is the object in the field
            GuardProto => guard_proto { obj: ObjOperandId, proto: StubField };
            /// Bail unless the object has a null prototype
            GuardNullProto => guard_null_proto { obj: ObjOperandId };
            /// Bail unless the object has the class named by `kind`
            GuardClass => guard_class { obj: ObjOperandId, kind: GuardClassKind };
            /// Bail unless the object has the class in the field
            GuardAnyClass => guard_any_class { obj: ObjOperandId, class: StubField };
            /// Output whether the object has the class in the field
            HasClassResult => has_class_result { obj: ObjOperandId, class: StubField };
            /// Output the match result array or null
            CallRegExpMatcherResult => call_reg_exp_matcher_result {
                regexp: ObjOperandId,
                input: StringOperandId,
                last_index: Int32OperandId
            };
            /// Output the packed match position or -1
            CallRegExpSearcherResult => call_reg_exp_searcher_result {
                regexp: ObjOperandId,
                input: StringOperandId,
                last_index: Int32OperandId
            };
            /// Output the match end index or -1
            CallRegExpTesterResult => call_reg_exp_tester_result {
                regexp: ObjOperandId,
                input: StringOperandId,
                last_index: Int32OperandId
            };
            /// Output whether any flag in the mask is set
            RegExpFlagResult => reg_exp_flag_result { regexp: ObjOperandId, flags_mask: i32 };
            /// Output the substring `[begin, begin + length)`
            CallSubstringKernelResult => call_substring_kernel_result {
                string: StringOperandId,
                begin: Int32OperandId,
                length: Int32OperandId
            };
            /// Bail unless the dynamic slot holds exactly the value in the field
            GuardDynamicSlotValue => guard_dynamic_slot_value {
                obj: ObjOperandId,
                offset: StubField,
                value: StubField
            };
            /// Output a fixed slot
            LoadFixedSlotResult => load_fixed_slot_result { obj: ObjOperandId, offset: StubField };
            /// Output a dynamic slot
            LoadDynamicSlotResult => load_dynamic_slot_result { obj: ObjOperandId, offset: StubField };
            /// Define an object operand from a field
            LoadObject => load_object { field: StubField, result: ObjOperandId };
            /// Define an int32 operand from a field
            LoadInt32Constant => load_int32_constant { field: StubField, result: Int32OperandId };
            /// Define the tag of a value
            LoadValueTag => load_value_tag { input: ValOperandId, result: ValueTagOperandId };
            /// Bail if the tags are equal or both numeric
            GuardTagNotEqual => guard_tag_not_equal { lhs: ValueTagOperandId, rhs: ValueTagOperandId };
            /// Output a dense element, bailing on out-of-bounds or holes
            LoadDenseElementResult => load_dense_element_result { obj: ObjOperandId, index: Int32OperandId };
            /// Output the dense elements length
            LoadInt32ArrayLengthResult => load_int32_array_length_result { obj: ObjOperandId };
            /// Output an int32
            LoadInt32Result => load_int32_result { input: Int32OperandId };
            /// Output a boolean constant
            LoadBooleanResult => load_boolean_result { value: bool };
            /// Output undefined
            LoadUndefinedResult => load_undefined_result {};
            /// Output an object
            LoadObjectResult => load_object_result { obj: ObjOperandId };
            /// Output an intptr as a number
            LoadIntPtrResult => load_int_ptr_result { input: IntPtrOperandId };
            /// Output an operand boxed with its known tag
            LoadTypedResult => load_typed_result { input: TypedOperandId };
        }
    };
}

/// An op argument: how it is decoded, encoded, and whether it names an operand.
pub trait CacheArg: Copy {
    /// Decode from the reader cursor.
    fn read(reader: &mut StubReader<'_>) -> Result<Self>;

    /// Encode onto a code buffer.
    fn write(self, out: &mut Vec<u8>);

    /// Operand named by this argument, if any.
    fn operand(self) -> Option<OperandId> {
        None
    }
}

macro_rules! operand_args {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CacheArg for $ty {
                fn read(reader: &mut StubReader<'_>) -> Result<Self> {
                    reader.read_operand_id().map(KindedOperandId::from_id)
                }

                fn write(self, out: &mut Vec<u8>) {
                    out.push(KindedOperandId::id(self).index());
                }

                fn operand(self) -> Option<OperandId> {
                    Some(KindedOperandId::id(self))
                }
            }
        )*
    };
}

operand_args!(
    ValOperandId,
    ObjOperandId,
    StringOperandId,
    SymbolOperandId,
    BigIntOperandId,
    BooleanOperandId,
    Int32OperandId,
    NumberOperandId,
    IntPtrOperandId,
    ValueTagOperandId,
);

impl CacheArg for TypedOperandId {
    fn read(reader: &mut StubReader<'_>) -> Result<Self> {
        let id = reader.read_operand_id()?;
        let ty = ValueType::from_byte(reader.read_byte()?)?;
        Ok(TypedOperandId::new(id, ty))
    }

    fn write(self, out: &mut Vec<u8>) {
        out.push(self.id().index());
        out.push(self.value_type().to_byte());
    }

    fn operand(self) -> Option<OperandId> {
        Some(self.id())
    }
}

impl CacheArg for StubField {
    fn read(reader: &mut StubReader<'_>) -> Result<Self> {
        reader.read_field_offset()
    }

    fn write(self, out: &mut Vec<u8>) {
        out.push(self.word_index() as u8);
    }
}

impl CacheArg for bool {
    fn read(reader: &mut StubReader<'_>) -> Result<Self> {
        reader.read_byte().map(|b| b != 0)
    }

    fn write(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }
}

impl CacheArg for i32 {
    fn read(reader: &mut StubReader<'_>) -> Result<Self> {
        reader.read_i32()
    }

    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl CacheArg for ValueType {
    fn read(reader: &mut StubReader<'_>) -> Result<Self> {
        ValueType::from_byte(reader.read_byte()?)
    }

    fn write(self, out: &mut Vec<u8>) {
        out.push(self.to_byte());
    }
}

impl CacheArg for GuardClassKind {
    fn read(reader: &mut StubReader<'_>) -> Result<Self> {
        GuardClassKind::from_byte(reader.read_byte()?)
    }

    fn write(self, out: &mut Vec<u8>) {
        out.push(self.to_byte());
    }
}

macro_rules! define_cache_ops {
    ($($(#[$meta:meta])* $name:ident => $method:ident { $($arg:ident : $ty:ty),* $(,)? };)*) => {
        /// Cache op opcodes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum CacheOp {
            $($(#[$meta])* $name,)*
        }

        impl CacheOp {
            /// Every opcode, in numeric order.
            pub const ALL: &'static [CacheOp] = &[$(CacheOp::$name,)*];

            /// Decode an opcode byte.
            pub fn from_byte(byte: u8) -> Option<Self> {
                Self::ALL.get(byte as usize).copied()
            }

            /// Encode as a byte.
            #[inline]
            pub const fn to_byte(self) -> u8 {
                self as u8
            }

            /// Op name for diagnostics.
            pub const fn name(self) -> &'static str {
                match self {
                    $(CacheOp::$name => stringify!($name),)*
                }
            }

            /// Whether this op ends the program.
            #[inline]
            pub const fn is_terminal(self) -> bool {
                matches!(self, CacheOp::ReturnFromIc)
            }
        }

        /// A decoded op with typed arguments
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[allow(missing_docs)]
        pub enum Op {
            $($(#[$meta])* $name { $($arg: $ty),* },)*
        }

        impl Op {
            /// Opcode of this op.
            pub const fn opcode(&self) -> CacheOp {
                match self {
                    $(Op::$name { .. } => CacheOp::$name,)*
                }
            }

            pub(crate) fn read_args(opcode: CacheOp, reader: &mut StubReader<'_>) -> Result<Op> {
                match opcode {
                    $(CacheOp::$name => Ok(Op::$name {
                        $($arg: <$ty as CacheArg>::read(reader)?,)*
                    }),)*
                }
            }

            /// Encode this op (opcode then arguments).
            pub fn encode(&self, out: &mut Vec<u8>) {
                out.push(self.opcode().to_byte());
                match *self {
                    $(Op::$name { $($arg),* } => {
                        $(CacheArg::write($arg, out);)*
                    })*
                }
            }

            /// Operands this op reads or defines, in argument order.
            pub fn operands(&self) -> SmallVec<[OperandId; 4]> {
                let mut ids = SmallVec::new();
                match *self {
                    $(Op::$name { $($arg),* } => {
                        $(if let Some(id) = CacheArg::operand($arg) {
                            ids.push(id);
                        })*
                    })*
                }
                ids
            }
        }

        /// One handler method per cache op.
        ///
        /// The interpreter and the compiler both implement this trait, so each
        /// op's contract is realized exactly twice.
        pub trait CacheOpHandler {
            /// What a handler returns.
            type Output;

            $(
                $(#[$meta])*
                fn $method(&mut self, $($arg: $ty),*) -> Self::Output;
            )*
        }

        /// Route a decoded op to its handler method.
        pub fn dispatch<H: CacheOpHandler + ?Sized>(handler: &mut H, op: Op) -> H::Output {
            match op {
                $(Op::$name { $($arg),* } => handler.$method($($arg),*),)*
            }
        }

        impl crate::writer::StubWriter {
            $(
                $(#[$meta])*
                pub fn $method(&mut self, $($arg: $ty),*) {
                    self.write_op(Op::$name { $($arg),* });
                }
            )*
        }
    };
}

for_each_cache_op!(define_cache_ops);

impl Op {
    /// Decode an op at the reader cursor.
    pub fn decode(reader: &mut StubReader<'_>) -> Result<Op> {
        let byte = reader.read_byte()?;
        let opcode = CacheOp::from_byte(byte).ok_or(IrError::UnknownOpcode(byte))?;
        Op::read_args(opcode, reader)
    }
}
