//! Stub program interpreter.
//!
//! Reads one op at a time and dispatches it through [`CacheOpHandler`]. Each
//! handler either continues or ends the run with an [`Outcome`].

use otter_ic_ir::{
    BigIntOperandId, BooleanOperandId, CacheOpHandler, GuardClassKind, Int32OperandId,
    IntPtrOperandId, IrError, NumberOperandId, ObjOperandId, OperandId, StringOperandId,
    StubData, StubField, StubFieldType, StubProgram, StubReader, SymbolOperandId, TypedOperandId,
    ValOperandId, ValueTagOperandId, ValueType, dispatch,
};
use otter_ic_object::callouts;
use otter_ic_object::number::{
    clamp_double_to_uint8, clamp_int32_to_uint8, number_equals_int32, number_equals_intptr,
    number_truncates_to_intptr,
};
use otter_ic_object::object::OFFSET_OF_FIXED_SLOTS;
use otter_ic_object::regexp::REGEXP_FLAGS_SLOT;
use otter_ic_object::{Class, IcContext, JsObject, ObjectRef, Value};

use crate::error::{InterpreterError, Result};
use crate::operand::{OperandStorage, OperandValue};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reached `ReturnFromIc`; carries the output value
    Return(Value),
    /// A guard failed; the caller takes the general path
    Bailout,
    /// A call-out raised; the error is pending on the context
    Exception,
    /// Opcode byte with no handler
    UnsupportedOp,
}

impl Outcome {
    /// Short name for logs and stats.
    pub const fn name(&self) -> &'static str {
        match self {
            Outcome::Return(_) => "return",
            Outcome::Bailout => "bailout",
            Outcome::Exception => "exception",
            Outcome::UnsupportedOp => "unsupported-op",
        }
    }
}

/// Result of one handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Go on to the next op
    Continue,
    /// Stop with this outcome
    Done(Outcome),
}

const BAIL: Result<Step> = Ok(Step::Done(Outcome::Bailout));
const CONTINUE: Result<Step> = Ok(Step::Continue);

/// Interpreter state for one execution of one program.
pub struct Interpreter<'a> {
    program: &'a StubProgram,
    stub_data: &'a StubData,
    ctx: &'a mut IcContext,
    operands: OperandStorage,
    output: Value,
}

impl<'a> Interpreter<'a> {
    /// Fresh state: every operand uninitialized, output `undefined`.
    pub fn new(program: &'a StubProgram, stub_data: &'a StubData, ctx: &'a mut IcContext) -> Self {
        Self {
            program,
            stub_data,
            ctx,
            operands: OperandStorage::new(program.num_operands()),
            output: Value::undefined(),
        }
    }

    /// Operand storage, for inspection after a run.
    pub fn operands(&self) -> &OperandStorage {
        &self.operands
    }

    /// Operand `id` as left by the last run.
    pub fn operand(&self, id: OperandId) -> Option<&OperandValue> {
        self.operands.slot(id)
    }

    /// Output slot.
    pub fn output(&self) -> Value {
        self.output
    }

    /// Run the program on `inputs`.
    pub fn run(&mut self, inputs: &[Value]) -> Result<Outcome> {
        let expected = self.program.num_inputs();
        if inputs.len() != expected {
            return Err(InterpreterError::InputCount {
                expected,
                found: inputs.len(),
            });
        }
        self.operands = OperandStorage::new(self.program.num_operands());
        self.output = Value::undefined();
        for (index, input) in inputs.iter().enumerate() {
            self.operands
                .define(OperandId(index as u8), OperandValue::Value(*input))?;
        }

        let program = self.program;
        let mut reader = StubReader::new(program);
        loop {
            let offset = reader.offset();
            let op = match reader.read_op() {
                Ok(op) => op,
                Err(IrError::UnknownOpcode(byte)) => {
                    tracing::debug!(byte, offset, "ic interpreter: unsupported opcode");
                    return Ok(Outcome::UnsupportedOp);
                }
                Err(err) => return Err(err.into()),
            };
            tracing::trace!(op = op.opcode().name(), offset, "ic interpreter");
            if let Step::Done(outcome) = dispatch(self, op)? {
                if !matches!(outcome, Outcome::Return(_)) {
                    tracing::debug!(
                        outcome = outcome.name(),
                        op = op.opcode().name(),
                        offset,
                        "ic interpreter: stub exited"
                    );
                }
                return Ok(outcome);
            }
        }
    }

    fn define(&mut self, id: OperandId, value: OperandValue) -> Result<Step> {
        self.operands.define(id, value)?;
        CONTINUE
    }

    fn set_output(&mut self, value: Value) -> Result<Step> {
        self.output = value;
        CONTINUE
    }

    fn guard(&self, passed: bool) -> Result<Step> {
        if passed { CONTINUE } else { BAIL }
    }

    fn field_word(&self, field: StubField, ty: StubFieldType) -> Result<u64> {
        Ok(self.stub_data.get_typed_word(field, ty)?)
    }

    fn field_int32(&self, field: StubField) -> Result<i32> {
        Ok(self.stub_data.get_field::<i32>(field)?)
    }

    fn fixed_slot(&self, obj: ObjectRef, offset: i32) -> Result<Value> {
        let relative = offset - OFFSET_OF_FIXED_SLOTS;
        if relative < 0 || relative % 8 != 0 {
            return Err(InterpreterError::InvalidSlotOffset(offset));
        }
        obj.fixed_slot(JsObject::fixed_slot_index_from_offset(offset))
            .ok_or(InterpreterError::InvalidSlotOffset(offset))
    }

    fn dynamic_slot(&self, obj: ObjectRef, offset: i32) -> Result<Value> {
        if offset < 0 || offset % 8 != 0 {
            return Err(InterpreterError::InvalidSlotOffset(offset));
        }
        obj.dynamic_slot(JsObject::dynamic_slot_index_from_offset(offset))
            .ok_or(InterpreterError::InvalidSlotOffset(offset))
    }

    fn class_matches(&self, obj: ObjOperandId, class: StubField) -> Result<bool> {
        let obj = self.operands.object(obj)?;
        let word = self.field_word(class, StubFieldType::Class)?;
        Ok(obj.class().as_ptr() as u64 == word)
    }

    fn call_out(&mut self, result: Option<Value>) -> Result<Step> {
        match result {
            Some(value) => self.set_output(value),
            None => Ok(Step::Done(Outcome::Exception)),
        }
    }

    fn regexp_args(
        &self,
        regexp: ObjOperandId,
        input: StringOperandId,
        last_index: Int32OperandId,
    ) -> Result<(ObjectRef, otter_ic_object::StringRef, i32)> {
        Ok((
            self.operands.object(regexp)?,
            self.operands.string(input)?,
            self.operands.int32(last_index)?,
        ))
    }
}

impl CacheOpHandler for Interpreter<'_> {
    type Output = Result<Step>;

    fn return_from_ic(&mut self) -> Result<Step> {
        Ok(Step::Done(Outcome::Return(self.output)))
    }

    fn guard_to_object(&mut self, input: ValOperandId, result: ObjOperandId) -> Result<Step> {
        match self.operands.value(input)?.as_object() {
            Some(obj) => self.define(result.0, OperandValue::Object(obj)),
            None => BAIL,
        }
    }

    fn guard_is_null_or_undefined(&mut self, input: ValOperandId) -> Result<Step> {
        self.guard(self.operands.value(input)?.is_null_or_undefined())
    }

    fn guard_is_null(&mut self, input: ValOperandId) -> Result<Step> {
        self.guard(self.operands.value(input)?.is_null())
    }

    fn guard_is_undefined(&mut self, input: ValOperandId) -> Result<Step> {
        self.guard(self.operands.value(input)?.is_undefined())
    }

    fn guard_to_boolean(&mut self, input: ValOperandId, result: BooleanOperandId) -> Result<Step> {
        match self.operands.value(input)?.as_boolean() {
            Some(b) => self.define(result.0, OperandValue::Boolean(b)),
            None => BAIL,
        }
    }

    fn guard_to_string(&mut self, input: ValOperandId, result: StringOperandId) -> Result<Step> {
        match self.operands.value(input)?.as_string() {
            Some(s) => self.define(result.0, OperandValue::String(s)),
            None => BAIL,
        }
    }

    fn guard_to_symbol(&mut self, input: ValOperandId, result: SymbolOperandId) -> Result<Step> {
        match self.operands.value(input)?.as_symbol() {
            Some(s) => self.define(result.0, OperandValue::Symbol(s)),
            None => BAIL,
        }
    }

    fn guard_to_big_int(&mut self, input: ValOperandId, result: BigIntOperandId) -> Result<Step> {
        match self.operands.value(input)?.as_bigint() {
            Some(b) => self.define(result.0, OperandValue::BigInt(b)),
            None => BAIL,
        }
    }

    fn guard_is_number(&mut self, input: ValOperandId) -> Result<Step> {
        self.guard(self.operands.value(input)?.is_number())
    }

    fn guard_to_int32(&mut self, input: ValOperandId, result: Int32OperandId) -> Result<Step> {
        match self.operands.value(input)?.as_int32() {
            Some(i) => self.define(result.0, OperandValue::Int32(i)),
            None => BAIL,
        }
    }

    fn guard_boolean_to_int32(
        &mut self,
        input: ValOperandId,
        result: Int32OperandId,
    ) -> Result<Step> {
        match self.operands.value(input)?.as_boolean() {
            Some(b) => self.define(result.0, OperandValue::Int32(i32::from(b))),
            None => BAIL,
        }
    }

    fn guard_to_int32_index(&mut self, input: ValOperandId, result: Int32OperandId) -> Result<Step> {
        let value = self.operands.value(input)?;
        let index = match value.as_int32() {
            Some(i) => Some(i),
            None => value.as_double().and_then(number_equals_int32),
        };
        match index {
            Some(i) => self.define(result.0, OperandValue::Int32(i)),
            None => BAIL,
        }
    }

    fn int32_to_int_ptr(&mut self, input: Int32OperandId, result: IntPtrOperandId) -> Result<Step> {
        let i = self.operands.int32(input)?;
        self.define(result.0, OperandValue::IntPtr(i64::from(i)))
    }

    fn guard_number_to_int_ptr_index(
        &mut self,
        input: NumberOperandId,
        support_oob: bool,
        result: IntPtrOperandId,
    ) -> Result<Step> {
        let d = self.operands.number(input)?;
        match number_equals_intptr(d) {
            Some(i) => self.define(result.0, OperandValue::IntPtr(i)),
            None if support_oob => self.define(result.0, OperandValue::IntPtr(-1)),
            None => BAIL,
        }
    }

    fn guard_to_int32_mod_uint32(
        &mut self,
        input: ValOperandId,
        result: Int32OperandId,
    ) -> Result<Step> {
        let value = self.operands.value(input)?;
        let truncated = match value.as_int32() {
            Some(i) => Some(i),
            None => value
                .as_double()
                .and_then(number_truncates_to_intptr)
                .map(|i| i as i32),
        };
        match truncated {
            Some(i) => self.define(result.0, OperandValue::Int32(i)),
            None => BAIL,
        }
    }

    fn guard_to_uint8_clamped(
        &mut self,
        input: ValOperandId,
        result: Int32OperandId,
    ) -> Result<Step> {
        let value = self.operands.value(input)?;
        let clamped = match value.as_int32() {
            Some(i) => Some(clamp_int32_to_uint8(i)),
            None => value.as_double().map(clamp_double_to_uint8),
        };
        match clamped {
            Some(i) => self.define(result.0, OperandValue::Int32(i)),
            None => BAIL,
        }
    }

    fn guard_non_double_type(&mut self, input: ValOperandId, value_type: ValueType) -> Result<Step> {
        if value_type == ValueType::Double {
            return Err(InterpreterError::Malformed(
                "GuardNonDoubleType with type double".to_string(),
            ));
        }
        self.guard(self.operands.value(input)?.value_type() == value_type)
    }

    fn guard_shape(&mut self, obj: ObjOperandId, shape: StubField) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        let expected = self.field_word(shape, StubFieldType::Shape)?;
        self.guard(obj.shape().to_word() == expected)
    }

    fn guard_proto(&mut self, obj: ObjOperandId, proto: StubField) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        let expected = self.field_word(proto, StubFieldType::Object)?;
        self.guard(obj.proto().map_or(0, ObjectRef::to_word) == expected)
    }

    fn guard_null_proto(&mut self, obj: ObjOperandId) -> Result<Step> {
        self.guard(self.operands.object(obj)?.proto().is_none())
    }

    fn guard_class(&mut self, obj: ObjOperandId, kind: GuardClassKind) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        self.guard(std::ptr::eq(obj.class(), Class::for_guard_kind(kind)))
    }

    fn guard_any_class(&mut self, obj: ObjOperandId, class: StubField) -> Result<Step> {
        let matches = self.class_matches(obj, class)?;
        self.guard(matches)
    }

    fn has_class_result(&mut self, obj: ObjOperandId, class: StubField) -> Result<Step> {
        let matches = self.class_matches(obj, class)?;
        self.set_output(Value::boolean(matches))
    }

    fn call_reg_exp_matcher_result(
        &mut self,
        regexp: ObjOperandId,
        input: StringOperandId,
        last_index: Int32OperandId,
    ) -> Result<Step> {
        let (regexp, input, last_index) = self.regexp_args(regexp, input, last_index)?;
        let result = self
            .ctx
            .catch(|heap| callouts::regexp_matcher(heap, regexp, input, last_index));
        self.call_out(result)
    }

    fn call_reg_exp_searcher_result(
        &mut self,
        regexp: ObjOperandId,
        input: StringOperandId,
        last_index: Int32OperandId,
    ) -> Result<Step> {
        let (regexp, input, last_index) = self.regexp_args(regexp, input, last_index)?;
        let result = self
            .ctx
            .catch(|_| callouts::regexp_searcher(regexp, input, last_index).map(Value::int32));
        self.call_out(result)
    }

    fn call_reg_exp_tester_result(
        &mut self,
        regexp: ObjOperandId,
        input: StringOperandId,
        last_index: Int32OperandId,
    ) -> Result<Step> {
        let (regexp, input, last_index) = self.regexp_args(regexp, input, last_index)?;
        let result = self
            .ctx
            .catch(|_| callouts::regexp_tester(regexp, input, last_index).map(Value::int32));
        self.call_out(result)
    }

    fn reg_exp_flag_result(&mut self, regexp: ObjOperandId, flags_mask: i32) -> Result<Step> {
        let regexp = self.operands.object(regexp)?;
        let flags = regexp
            .fixed_slot(REGEXP_FLAGS_SLOT)
            .map_or(0, |v| v.to_bits() as u32 as i32);
        self.set_output(Value::boolean(flags & flags_mask != 0))
    }

    fn call_substring_kernel_result(
        &mut self,
        string: StringOperandId,
        begin: Int32OperandId,
        length: Int32OperandId,
    ) -> Result<Step> {
        let string = self.operands.string(string)?;
        let begin = self.operands.int32(begin)?;
        let length = self.operands.int32(length)?;
        let result = self.ctx.catch(|heap| {
            callouts::substring_kernel(heap, string, begin, length).map(Value::string)
        });
        self.call_out(result)
    }

    fn guard_dynamic_slot_value(
        &mut self,
        obj: ObjOperandId,
        offset: StubField,
        value: StubField,
    ) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        let offset = self.field_int32(offset)?;
        let expected = self.field_word(value, StubFieldType::Value)?;
        let actual = self.dynamic_slot(obj, offset)?;
        self.guard(actual.to_bits() == expected)
    }

    fn load_fixed_slot_result(&mut self, obj: ObjOperandId, offset: StubField) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        let offset = self.field_int32(offset)?;
        let value = self.fixed_slot(obj, offset)?;
        self.set_output(value)
    }

    fn load_dynamic_slot_result(&mut self, obj: ObjOperandId, offset: StubField) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        let offset = self.field_int32(offset)?;
        let value = self.dynamic_slot(obj, offset)?;
        self.set_output(value)
    }

    fn load_object(&mut self, field: StubField, result: ObjOperandId) -> Result<Step> {
        let word = self.field_word(field, StubFieldType::Object)?;
        let obj = ObjectRef::from_raw(word as *mut JsObject).ok_or_else(|| {
            InterpreterError::Malformed(format!("null object field at offset {}", field.offset()))
        })?;
        self.define(result.0, OperandValue::Object(obj))
    }

    fn load_int32_constant(&mut self, field: StubField, result: Int32OperandId) -> Result<Step> {
        let value = self.field_int32(field)?;
        self.define(result.0, OperandValue::Int32(value))
    }

    fn load_value_tag(&mut self, input: ValOperandId, result: ValueTagOperandId) -> Result<Step> {
        let tag = self.operands.value(input)?.value_type();
        self.define(result.0, OperandValue::ValueTag(tag))
    }

    fn guard_tag_not_equal(&mut self, lhs: ValueTagOperandId, rhs: ValueTagOperandId) -> Result<Step> {
        let lhs = self.operands.value_tag(lhs)?;
        let rhs = self.operands.value_tag(rhs)?;
        self.guard(lhs != rhs && !(lhs.is_number() && rhs.is_number()))
    }

    fn load_dense_element_result(&mut self, obj: ObjOperandId, index: Int32OperandId) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        let index = self.operands.int32(index)?;
        if index as u32 >= obj.elements_len() {
            return BAIL;
        }
        match obj.element(index as u32 as usize) {
            Some(value) if !value.is_hole() => self.set_output(value),
            _ => BAIL,
        }
    }

    fn load_int32_array_length_result(&mut self, obj: ObjOperandId) -> Result<Step> {
        let len = self.operands.object(obj)?.elements_len();
        match i32::try_from(len) {
            Ok(len) => self.set_output(Value::int32(len)),
            Err(_) => BAIL,
        }
    }

    fn load_int32_result(&mut self, input: Int32OperandId) -> Result<Step> {
        let i = self.operands.int32(input)?;
        self.set_output(Value::int32(i))
    }

    fn load_boolean_result(&mut self, value: bool) -> Result<Step> {
        self.set_output(Value::boolean(value))
    }

    fn load_undefined_result(&mut self) -> Result<Step> {
        self.set_output(Value::undefined())
    }

    fn load_object_result(&mut self, obj: ObjOperandId) -> Result<Step> {
        let obj = self.operands.object(obj)?;
        self.set_output(Value::object(obj))
    }

    fn load_int_ptr_result(&mut self, input: IntPtrOperandId) -> Result<Step> {
        let i = self.operands.intptr(input)?;
        let value = match i32::try_from(i) {
            Ok(small) => Value::int32(small),
            Err(_) => Value::double(i as f64),
        };
        self.set_output(value)
    }

    fn load_typed_result(&mut self, input: TypedOperandId) -> Result<Step> {
        let stored = *self.operands.get(input.id())?;
        if let Some(found) = stored.payload_type() {
            if found != input.value_type() {
                return Err(InterpreterError::Malformed(format!(
                    "operand {} typed {} holds {}",
                    input.id().index(),
                    input.value_type().name(),
                    found.name()
                )));
            }
        }
        let value = stored.boxed().ok_or_else(|| {
            InterpreterError::Malformed(format!(
                "operand {} has no boxed form",
                input.id().index()
            ))
        })?;
        self.set_output(value)
    }
}

/// Interpret `program` once against fresh operand storage.
pub fn interpret(
    program: &StubProgram,
    stub_data: &StubData,
    inputs: &[Value],
    ctx: &mut IcContext,
) -> Result<Outcome> {
    Interpreter::new(program, stub_data, ctx).run(inputs)
}
