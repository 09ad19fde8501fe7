//! Op catalog emitter.
//!
//! [`emit_stub`] decodes a program, runs the liveness pre-pass and lowers
//! each op to macro-assembler instructions through [`CacheOpHandler`]. Guards
//! and call-outs branch to exit paths; after the last op the exit paths and
//! one trampoline per exit status are appended.
//!
//! # Stub layout
//!
//! ```text
//!   *out = undefined
//!   load live inputs
//!   op 0 .. op n            guards and call-outs jump to exit paths
//!   ret RETURN              (ReturnFromIc)
//! exit_k:
//!   restore saved floats
//!   jmp bailout | exception | malformed
//! bailout:
//!   ret BAILOUT
//! exception:
//!   ret EXCEPTION
//! malformed:
//!   ret MALFORMED
//! ```

use otter_ic_ir::{
    BigIntOperandId, BooleanOperandId, CacheOpHandler, GuardClassKind, Int32OperandId,
    IntPtrOperandId, IrError, NumberOperandId, ObjOperandId, Op, OperandId, StringOperandId,
    StubData, StubField, StubFieldType, StubProgram, StubReader, SymbolOperandId, TypedOperandId,
    ValOperandId, ValueTagOperandId, ValueType, dispatch,
};
use otter_ic_object::Class;
use otter_ic_object::Value;
use otter_ic_object::object::{
    JsObject, MAX_FIXED_SLOTS, OFFSET_OF_ELEMENTS, OFFSET_OF_ELEMENTS_LENGTH, OFFSET_OF_FIXED_SLOTS,
    OFFSET_OF_SHAPE, OFFSET_OF_SLOTS,
};
use otter_ic_object::regexp::REGEXP_FLAGS_SLOT;
use otter_ic_object::shape::{SHAPE_OFFSET_OF_CLASS, SHAPE_OFFSET_OF_PROTO};
use otter_ic_object::value::TAG_HOLE;

use crate::allocator::CacheRegisterAllocator;
use crate::bailout::ExitStatus;
use crate::compiler::JitError;
use crate::config::{JitConfig, StubFieldPolicy};
use crate::failure::FailurePaths;
use crate::location::PayloadType;
use crate::masm::{Cond, Label, MacroAssembler, MasmInst, Operand};
use crate::registers::{FloatRegister, Register, ValueReg};
use crate::runtime_helpers::HelperKind;

/// Facts about an emitted stub the translator needs to size its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitSummary {
    /// Ops emitted, terminal included
    pub ops: usize,
    /// Distinct exit paths
    pub failure_paths: usize,
    /// Spill slots used
    pub spill_slots: u32,
    /// Float save slots used
    pub float_save_slots: u32,
    /// Whether the stub calls runtime helpers
    pub calls_helpers: bool,
}

/// Lower `program` into `masm`.
pub fn emit_stub<A: MacroAssembler>(
    program: &StubProgram,
    stub_data: &StubData,
    config: &JitConfig,
    masm: &mut A,
) -> Result<EmitSummary, JitError> {
    let ops = decode_ops(program)?;
    if program.num_inputs() > program.num_operands() {
        return Err(JitError::Malformed(format!(
            "{} inputs but only {} operands",
            program.num_inputs(),
            program.num_operands()
        )));
    }
    let alloc = CacheRegisterAllocator::new(&ops, program.num_operands(), config)?;
    let mut emitter = Emitter {
        masm,
        alloc,
        stub_data,
        config,
        failures: FailurePaths::new(),
        calls_helpers: false,
    };
    emitter.prologue(program.num_inputs())?;
    for (index, op) in ops.iter().enumerate() {
        emitter.alloc.next_op(emitter.masm, index);
        dispatch(&mut emitter, *op)?;
        emitter.alloc.check_no_aliasing()?;
    }
    emitter.epilogue();

    let summary = EmitSummary {
        ops: ops.len(),
        failure_paths: emitter.failures.len(),
        spill_slots: emitter.alloc.spill_slots_used(),
        float_save_slots: emitter.alloc.float_save_slots_used(),
        calls_helpers: emitter.calls_helpers,
    };
    tracing::debug!(
        ops = summary.ops,
        failure_paths = summary.failure_paths,
        spill_slots = summary.spill_slots,
        "emitted stub"
    );
    Ok(summary)
}

/// Decode up to and including the first terminal op.
fn decode_ops(program: &StubProgram) -> Result<Vec<Op>, JitError> {
    let mut reader = StubReader::new(program);
    let mut ops = Vec::new();
    while reader.more() {
        match reader.read_op() {
            Ok(op) => {
                let terminal = op.opcode().is_terminal();
                ops.push(op);
                if terminal {
                    return Ok(ops);
                }
            }
            Err(IrError::UnknownOpcode(opcode)) => {
                return Err(JitError::UnsupportedOp {
                    index: ops.len(),
                    opcode,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(IrError::MissingTerminal.into())
}

struct Emitter<'a, A: MacroAssembler> {
    masm: &'a mut A,
    alloc: CacheRegisterAllocator,
    stub_data: &'a StubData,
    config: &'a JitConfig,
    failures: FailurePaths,
    calls_helpers: bool,
}

impl<A: MacroAssembler> Emitter<'_, A> {
    fn prologue(&mut self, num_inputs: usize) -> Result<(), JitError> {
        let tmp = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::MovImm {
            dst: tmp,
            imm: Value::undefined().to_bits(),
        });
        self.masm.emit(MasmInst::StoreOutput { src: tmp });
        self.alloc.release_reg(tmp);
        self.alloc.init_inputs(self.masm, num_inputs)
    }

    fn epilogue(&mut self) {
        self.failures.emit(self.masm);
    }

    /// Label for leaving with `exit` from code emitted now.
    fn exit_path(&mut self, exit: ExitStatus) -> Label {
        self.failures.add(self.masm, exit, self.alloc.saved_floats())
    }

    /// Failure label for a guard emitted now.
    fn failure(&mut self) -> Label {
        self.exit_path(ExitStatus::Bailout)
    }

    /// A stub field as an immediate or a register, per the field policy.
    fn field_operand(&mut self, field: StubField, ty: StubFieldType) -> Result<Operand, JitError> {
        let word = self.stub_data.get_typed_word(field, ty)?;
        self.word_operand(field, word as i64)
    }

    fn int32_field_operand(&mut self, field: StubField) -> Result<(i32, Operand), JitError> {
        let value = self.stub_data.get_field::<i32>(field)?;
        Ok((value, self.word_operand(field, i64::from(value))?))
    }

    fn word_operand(&mut self, field: StubField, value: i64) -> Result<Operand, JitError> {
        match self.config.field_policy {
            StubFieldPolicy::Constant => Ok(Operand::Imm(value)),
            StubFieldPolicy::Address => {
                let reg = self.alloc.allocate_reg(self.masm)?;
                self.masm.emit(MasmInst::LoadStubWord {
                    dst: reg,
                    offset: field.offset(),
                });
                Ok(Operand::Reg(reg))
            }
        }
    }

    fn release_operand(&mut self, operand: Operand) {
        if let Operand::Reg(reg) = operand {
            self.alloc.release_reg(reg);
        }
    }

    /// Register to zero under mis-speculation when `obj` outlives the guard.
    fn spectre_reg(&self, obj: ObjOperandId, reg: Register) -> Option<Register> {
        (self.config.spectre_mitigations && self.alloc.used_after_current(obj.0)).then_some(reg)
    }

    fn store_output(&mut self, reg: Register) {
        self.masm.emit(MasmInst::StoreOutput { src: reg });
    }

    fn store_output_imm(&mut self, value: Value) -> Result<(), JitError> {
        let tmp = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::MovImm {
            dst: tmp,
            imm: value.to_bits(),
        });
        self.store_output(tmp);
        Ok(())
    }

    /// Bail unless `input` has tag `ty`, skipping the test when an earlier
    /// guard proved it.
    fn guard_type(&mut self, input: ValOperandId, ty: ValueType) -> Result<ValueReg, JitError> {
        let known = self.alloc.known_type(input.0);
        let value = self.alloc.use_value_reg(self.masm, input.0)?;
        if known != Some(ty) {
            let fail = self.failure();
            self.masm.emit(MasmInst::BranchTestType {
                cond: Cond::NotEqual,
                value: value.reg(),
                ty,
                target: fail,
            });
            self.alloc.set_known_type(input.0, ty);
        }
        Ok(value)
    }

    fn guard_to_payload(
        &mut self,
        input: ValOperandId,
        result: OperandId,
        ty: PayloadType,
    ) -> Result<(), JitError> {
        let tag = ty
            .value_type()
            .ok_or_else(|| JitError::Malformed(format!("{ty:?} has no boxed form")))?;
        let value = self.guard_type(input, tag)?;
        let dst = self.alloc.define_payload_reg(self.masm, result, ty)?;
        self.masm.emit(MasmInst::UnboxPayload {
            src: value.reg(),
            dst,
            ty,
        });
        Ok(())
    }

    /// Shared shape of the int32-or-double guards: an int32 unboxes into
    /// `dst`, a double is handed to `convert` in a float register, anything
    /// else leaves through `non_number`.
    fn int32_or_double(
        &mut self,
        input: ValOperandId,
        dst: Register,
        non_number: ExitStatus,
        convert: impl FnOnce(&mut Self, FloatRegister) -> Result<(), JitError>,
    ) -> Result<(), JitError> {
        if self.alloc.known_type(input.0) == Some(ValueType::Double) {
            return self.known_double(input, convert);
        }
        let value = self.alloc.use_value_reg(self.masm, input.0)?;
        if self.alloc.known_type(input.0) == Some(ValueType::Int32) {
            self.masm.emit(MasmInst::UnboxPayload {
                src: value.reg(),
                dst,
                ty: PayloadType::Int32,
            });
            return Ok(());
        }
        let not_int = self.masm.new_label();
        let done = self.masm.new_label();
        self.masm.emit(MasmInst::BranchTestType {
            cond: Cond::NotEqual,
            value: value.reg(),
            ty: ValueType::Int32,
            target: not_int,
        });
        self.masm.emit(MasmInst::UnboxPayload {
            src: value.reg(),
            dst,
            ty: PayloadType::Int32,
        });
        self.masm.jump(done);

        self.masm.bind(not_int);
        let fail = self.exit_path(non_number);
        self.masm.emit(MasmInst::BranchTestType {
            cond: Cond::NotEqual,
            value: value.reg(),
            ty: ValueType::Double,
            target: fail,
        });
        self.double_path(value, convert)?;
        self.masm.bind(done);
        Ok(())
    }

    /// Hand an operand proven to be a double to `convert`. The double stays
    /// unboxed in its float register for later ops.
    fn known_double(
        &mut self,
        input: ValOperandId,
        convert: impl FnOnce(&mut Self, FloatRegister) -> Result<(), JitError>,
    ) -> Result<(), JitError> {
        let f = self.alloc.use_number(self.masm, input.0)?;
        convert(self, f)?;
        self.alloc.release_float(self.masm, f);
        Ok(())
    }

    fn double_path(
        &mut self,
        value: ValueReg,
        convert: impl FnOnce(&mut Self, FloatRegister) -> Result<(), JitError>,
    ) -> Result<(), JitError> {
        let f = self.alloc.allocate_float(self.masm)?;
        self.masm.emit(MasmInst::UnboxDouble {
            src: value.reg(),
            dst: f,
        });
        convert(self, f)?;
        self.alloc.release_float(self.masm, f);
        Ok(())
    }

    fn load_shape_word(&mut self, obj: Register, field_offset: i32) -> Result<Register, JitError> {
        let tmp = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::Load64 {
            dst: tmp,
            base: obj,
            offset: Operand::Imm(i64::from(OFFSET_OF_SHAPE)),
        });
        self.masm.emit(MasmInst::Load64 {
            dst: tmp,
            base: tmp,
            offset: Operand::Imm(i64::from(field_offset)),
        });
        Ok(tmp)
    }

    fn guard_class_operand(&mut self, obj: ObjOperandId, class: Operand) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let scratch = self.alloc.allocate_reg(self.masm)?;
        let fail = self.failure();
        let spectre_reg_to_zero = self.spectre_reg(obj, reg);
        self.masm.emit(MasmInst::BranchTestObjClass {
            cond: Cond::NotEqual,
            obj: reg,
            class,
            scratch,
            spectre_reg_to_zero,
            target: fail,
        });
        self.alloc.release_reg(scratch);
        self.release_operand(class);
        Ok(())
    }

    fn call_out(&mut self, helper: HelperKind, args: [OperandId; 3]) -> Result<(), JitError> {
        let mut regs = [Register(0); 3];
        for (reg, id) in regs.iter_mut().zip(args) {
            *reg = self.alloc.use_register(self.masm, id)?;
        }
        let dst = self.alloc.allocate_reg(self.masm)?;
        let exception = self.exit_path(ExitStatus::Exception);
        self.calls_helpers = true;
        self.masm.emit(MasmInst::CallHelper {
            helper,
            args: regs,
            dst,
            exception,
        });
        self.store_output(dst);
        Ok(())
    }

    fn check_fixed_slot_offset(offset: i32) -> Result<(), JitError> {
        let relative = offset - OFFSET_OF_FIXED_SLOTS;
        if relative < 0 || relative % 8 != 0 || relative / 8 >= MAX_FIXED_SLOTS as i32 {
            return Err(JitError::Malformed(format!("invalid fixed slot offset {offset}")));
        }
        Ok(())
    }

    fn check_dynamic_slot_offset(offset: i32) -> Result<(), JitError> {
        if offset < 0 || offset % 8 != 0 {
            return Err(JitError::Malformed(format!("invalid dynamic slot offset {offset}")));
        }
        Ok(())
    }

    /// `dst = obj->slots[offset]`
    fn load_dynamic_slot(&mut self, obj: Register, offset: Operand) -> Result<Register, JitError> {
        let tmp = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::Load64 {
            dst: tmp,
            base: obj,
            offset: Operand::Imm(i64::from(OFFSET_OF_SLOTS)),
        });
        self.masm.emit(MasmInst::Load64 {
            dst: tmp,
            base: tmp,
            offset,
        });
        Ok(tmp)
    }

    fn box_to_output(&mut self, src: Register, ty: PayloadType) -> Result<(), JitError> {
        let tmp = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::BoxPayload { src, dst: tmp, ty });
        self.store_output(tmp);
        Ok(())
    }
}

impl<A: MacroAssembler> CacheOpHandler for Emitter<'_, A> {
    type Output = Result<(), JitError>;

    fn return_from_ic(&mut self) -> Result<(), JitError> {
        self.masm.emit(MasmInst::Ret(ExitStatus::Return));
        Ok(())
    }

    fn guard_to_object(&mut self, input: ValOperandId, result: ObjOperandId) -> Result<(), JitError> {
        self.guard_to_payload(input, result.0, PayloadType::Object)
    }

    fn guard_is_null_or_undefined(&mut self, input: ValOperandId) -> Result<(), JitError> {
        if matches!(
            self.alloc.known_type(input.0),
            Some(ValueType::Null | ValueType::Undefined)
        ) {
            return Ok(());
        }
        let value = self.alloc.use_value_reg(self.masm, input.0)?;
        let ok = self.masm.new_label();
        let fail = self.failure();
        self.masm.emit(MasmInst::BranchTestType {
            cond: Cond::Equal,
            value: value.reg(),
            ty: ValueType::Undefined,
            target: ok,
        });
        self.masm.emit(MasmInst::BranchTestType {
            cond: Cond::NotEqual,
            value: value.reg(),
            ty: ValueType::Null,
            target: fail,
        });
        self.masm.bind(ok);
        Ok(())
    }

    fn guard_is_null(&mut self, input: ValOperandId) -> Result<(), JitError> {
        self.guard_type(input, ValueType::Null).map(drop)
    }

    fn guard_is_undefined(&mut self, input: ValOperandId) -> Result<(), JitError> {
        self.guard_type(input, ValueType::Undefined).map(drop)
    }

    fn guard_to_boolean(&mut self, input: ValOperandId, result: BooleanOperandId) -> Result<(), JitError> {
        self.guard_to_payload(input, result.0, PayloadType::Boolean)
    }

    fn guard_to_string(&mut self, input: ValOperandId, result: StringOperandId) -> Result<(), JitError> {
        self.guard_to_payload(input, result.0, PayloadType::String)
    }

    fn guard_to_symbol(&mut self, input: ValOperandId, result: SymbolOperandId) -> Result<(), JitError> {
        self.guard_to_payload(input, result.0, PayloadType::Symbol)
    }

    fn guard_to_big_int(&mut self, input: ValOperandId, result: BigIntOperandId) -> Result<(), JitError> {
        self.guard_to_payload(input, result.0, PayloadType::BigInt)
    }

    fn guard_is_number(&mut self, input: ValOperandId) -> Result<(), JitError> {
        if matches!(
            self.alloc.known_type(input.0),
            Some(ValueType::Int32 | ValueType::Double)
        ) {
            return Ok(());
        }
        let value = self.alloc.use_value_reg(self.masm, input.0)?;
        let fail = self.failure();
        self.masm.emit(MasmInst::BranchTestNumber {
            cond: Cond::NotEqual,
            value: value.reg(),
            target: fail,
        });
        Ok(())
    }

    fn guard_to_int32(&mut self, input: ValOperandId, result: Int32OperandId) -> Result<(), JitError> {
        self.guard_to_payload(input, result.0, PayloadType::Int32)
    }

    fn guard_boolean_to_int32(
        &mut self,
        input: ValOperandId,
        result: Int32OperandId,
    ) -> Result<(), JitError> {
        let value = self.guard_type(input, ValueType::Boolean)?;
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::Int32)?;
        // A boolean payload is already 0 or 1.
        self.masm.emit(MasmInst::UnboxPayload {
            src: value.reg(),
            dst,
            ty: PayloadType::Boolean,
        });
        Ok(())
    }

    fn guard_to_int32_index(
        &mut self,
        input: ValOperandId,
        result: Int32OperandId,
    ) -> Result<(), JitError> {
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::Int32)?;
        self.int32_or_double(input, dst, ExitStatus::Bailout, |this, f| {
            let fail = this.failure();
            this.masm.emit(MasmInst::DoubleToInt32Exact { src: f, dst, fail });
            Ok(())
        })
    }

    fn int32_to_int_ptr(&mut self, input: Int32OperandId, result: IntPtrOperandId) -> Result<(), JitError> {
        let src = self.alloc.use_register(self.masm, input.0)?;
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::IntPtr)?;
        self.masm.emit(MasmInst::Int32ToIntPtr { src, dst });
        Ok(())
    }

    fn guard_number_to_int_ptr_index(
        &mut self,
        input: NumberOperandId,
        support_oob: bool,
        result: IntPtrOperandId,
    ) -> Result<(), JitError> {
        match self.alloc.payload_type(input.0) {
            Some(PayloadType::Int32) => {
                let src = self.alloc.use_register(self.masm, input.0)?;
                let dst = self
                    .alloc
                    .define_payload_reg(self.masm, result.0, PayloadType::IntPtr)?;
                self.masm.emit(MasmInst::Int32ToIntPtr { src, dst });
                return Ok(());
            }
            Some(ty) => {
                return Err(JitError::Malformed(format!(
                    "operand {} read as number holds {ty:?}",
                    input.0.index()
                )));
            }
            None => {}
        }

        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::IntPtr)?;
        // Int32 payloads are kept sign-extended, so the int32 path already
        // yields the intptr. A number operand holding anything else is a
        // generator defect, not a guard failure.
        self.int32_or_double(ValOperandId(input.0), dst, ExitStatus::Malformed, |this, f| {
            if support_oob {
                let oob = this.masm.new_label();
                let converted = this.masm.new_label();
                this.masm.emit(MasmInst::DoubleToIntPtrExact { src: f, dst, fail: oob });
                this.masm.jump(converted);
                this.masm.bind(oob);
                this.masm.emit(MasmInst::MovImm {
                    dst,
                    imm: (-1i64) as u64,
                });
                this.masm.bind(converted);
            } else {
                let fail = this.failure();
                this.masm.emit(MasmInst::DoubleToIntPtrExact { src: f, dst, fail });
            }
            Ok(())
        })
    }

    fn guard_to_int32_mod_uint32(
        &mut self,
        input: ValOperandId,
        result: Int32OperandId,
    ) -> Result<(), JitError> {
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::Int32)?;
        self.int32_or_double(input, dst, ExitStatus::Bailout, |this, f| {
            let fail = this.failure();
            this.masm.emit(MasmInst::TruncateDoubleModUint32 { src: f, dst, fail });
            Ok(())
        })
    }

    fn guard_to_uint8_clamped(
        &mut self,
        input: ValOperandId,
        result: Int32OperandId,
    ) -> Result<(), JitError> {
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::Int32)?;
        if self.alloc.known_type(input.0) == Some(ValueType::Double) {
            return self.known_double(input, |this, f| {
                this.masm.emit(MasmInst::ClampDoubleToUint8 { src: f, dst });
                Ok(())
            });
        }
        let value = self.alloc.use_value_reg(self.masm, input.0)?;
        let done = self.masm.new_label();
        let is_double = self.masm.new_label();
        self.masm.emit(MasmInst::BranchTestType {
            cond: Cond::NotEqual,
            value: value.reg(),
            ty: ValueType::Int32,
            target: is_double,
        });
        self.masm.emit(MasmInst::UnboxPayload {
            src: value.reg(),
            dst,
            ty: PayloadType::Int32,
        });
        self.masm.emit(MasmInst::ClampInt32ToUint8 { reg: dst });
        self.masm.jump(done);
        self.masm.bind(is_double);
        let fail = self.failure();
        self.masm.emit(MasmInst::BranchTestType {
            cond: Cond::NotEqual,
            value: value.reg(),
            ty: ValueType::Double,
            target: fail,
        });
        self.double_path(value, |this, f| {
            this.masm.emit(MasmInst::ClampDoubleToUint8 { src: f, dst });
            Ok(())
        })?;
        self.masm.bind(done);
        Ok(())
    }

    fn guard_non_double_type(&mut self, input: ValOperandId, value_type: ValueType) -> Result<(), JitError> {
        if value_type == ValueType::Double {
            return Err(JitError::Malformed(
                "GuardNonDoubleType with type double".to_string(),
            ));
        }
        self.guard_type(input, value_type).map(drop)
    }

    fn guard_shape(&mut self, obj: ObjOperandId, shape: StubField) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let expected = self.field_operand(shape, StubFieldType::Shape)?;
        let scratch = self.alloc.allocate_reg(self.masm)?;
        let fail = self.failure();
        let spectre_reg_to_zero = self.spectre_reg(obj, reg);
        self.masm.emit(MasmInst::BranchTestObjShape {
            cond: Cond::NotEqual,
            obj: reg,
            shape: expected,
            scratch,
            spectre_reg_to_zero,
            target: fail,
        });
        self.alloc.release_reg(scratch);
        self.release_operand(expected);
        Ok(())
    }

    fn guard_proto(&mut self, obj: ObjOperandId, proto: StubField) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let expected = self.field_operand(proto, StubFieldType::Object)?;
        let actual = self.load_shape_word(reg, SHAPE_OFFSET_OF_PROTO)?;
        let fail = self.failure();
        self.masm.emit(MasmInst::BranchPtr {
            cond: Cond::NotEqual,
            lhs: actual,
            rhs: expected,
            target: fail,
        });
        self.alloc.release_reg(actual);
        self.release_operand(expected);
        Ok(())
    }

    fn guard_null_proto(&mut self, obj: ObjOperandId) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let actual = self.load_shape_word(reg, SHAPE_OFFSET_OF_PROTO)?;
        let fail = self.failure();
        self.masm.emit(MasmInst::BranchPtr {
            cond: Cond::NotEqual,
            lhs: actual,
            rhs: Operand::Imm(0),
            target: fail,
        });
        self.alloc.release_reg(actual);
        Ok(())
    }

    fn guard_class(&mut self, obj: ObjOperandId, kind: GuardClassKind) -> Result<(), JitError> {
        let class = Class::for_guard_kind(kind).as_ptr() as i64;
        self.guard_class_operand(obj, Operand::Imm(class))
    }

    fn guard_any_class(&mut self, obj: ObjOperandId, class: StubField) -> Result<(), JitError> {
        let class = self.field_operand(class, StubFieldType::Class)?;
        self.guard_class_operand(obj, class)
    }

    fn has_class_result(&mut self, obj: ObjOperandId, class: StubField) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let expected = self.field_operand(class, StubFieldType::Class)?;
        let actual = self.load_shape_word(reg, SHAPE_OFFSET_OF_CLASS)?;
        self.masm.emit(MasmInst::CmpSet {
            cond: Cond::Equal,
            lhs: actual,
            rhs: expected,
            dst: actual,
        });
        self.masm.emit(MasmInst::BoxPayload {
            src: actual,
            dst: actual,
            ty: PayloadType::Boolean,
        });
        self.store_output(actual);
        Ok(())
    }

    fn call_reg_exp_matcher_result(
        &mut self,
        regexp: ObjOperandId,
        input: StringOperandId,
        last_index: Int32OperandId,
    ) -> Result<(), JitError> {
        self.call_out(HelperKind::RegExpMatcher, [regexp.0, input.0, last_index.0])
    }

    fn call_reg_exp_searcher_result(
        &mut self,
        regexp: ObjOperandId,
        input: StringOperandId,
        last_index: Int32OperandId,
    ) -> Result<(), JitError> {
        self.call_out(HelperKind::RegExpSearcher, [regexp.0, input.0, last_index.0])
    }

    fn call_reg_exp_tester_result(
        &mut self,
        regexp: ObjOperandId,
        input: StringOperandId,
        last_index: Int32OperandId,
    ) -> Result<(), JitError> {
        self.call_out(HelperKind::RegExpTester, [regexp.0, input.0, last_index.0])
    }

    fn reg_exp_flag_result(&mut self, regexp: ObjOperandId, flags_mask: i32) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, regexp.0)?;
        let flags = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::Load64 {
            dst: flags,
            base: reg,
            offset: Operand::Imm(i64::from(JsObject::fixed_slot_offset(REGEXP_FLAGS_SLOT))),
        });
        // Flags are an int32 value; the mask only sees its low 32 bits.
        self.masm.emit(MasmInst::AndImm {
            reg: flags,
            imm: u64::from(flags_mask as u32),
        });
        self.masm.emit(MasmInst::CmpSet {
            cond: Cond::NotEqual,
            lhs: flags,
            rhs: Operand::Imm(0),
            dst: flags,
        });
        self.box_to_output(flags, PayloadType::Boolean)
    }

    fn call_substring_kernel_result(
        &mut self,
        string: StringOperandId,
        begin: Int32OperandId,
        length: Int32OperandId,
    ) -> Result<(), JitError> {
        self.call_out(HelperKind::SubstringKernel, [string.0, begin.0, length.0])
    }

    fn guard_dynamic_slot_value(
        &mut self,
        obj: ObjOperandId,
        offset: StubField,
        value: StubField,
    ) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let (raw, offset) = self.int32_field_operand(offset)?;
        Self::check_dynamic_slot_offset(raw)?;
        let actual = self.load_dynamic_slot(reg, offset)?;
        self.release_operand(offset);
        let expected = self.field_operand(value, StubFieldType::Value)?;
        let fail = self.failure();
        self.masm.emit(MasmInst::BranchPtr {
            cond: Cond::NotEqual,
            lhs: actual,
            rhs: expected,
            target: fail,
        });
        self.alloc.release_reg(actual);
        self.release_operand(expected);
        Ok(())
    }

    fn load_fixed_slot_result(&mut self, obj: ObjOperandId, offset: StubField) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let (raw, offset) = self.int32_field_operand(offset)?;
        Self::check_fixed_slot_offset(raw)?;
        let tmp = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::Load64 {
            dst: tmp,
            base: reg,
            offset,
        });
        self.store_output(tmp);
        Ok(())
    }

    fn load_dynamic_slot_result(&mut self, obj: ObjOperandId, offset: StubField) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let (raw, offset) = self.int32_field_operand(offset)?;
        Self::check_dynamic_slot_offset(raw)?;
        let value = self.load_dynamic_slot(reg, offset)?;
        self.store_output(value);
        Ok(())
    }

    fn load_object(&mut self, field: StubField, result: ObjOperandId) -> Result<(), JitError> {
        let word = self.stub_data.get_typed_word(field, StubFieldType::Object)?;
        if word == 0 {
            return Err(JitError::Malformed(format!(
                "null object field at offset {}",
                field.offset()
            )));
        }
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::Object)?;
        match self.config.field_policy {
            StubFieldPolicy::Constant => self.masm.emit(MasmInst::MovImm { dst, imm: word }),
            StubFieldPolicy::Address => self.masm.emit(MasmInst::LoadStubWord {
                dst,
                offset: field.offset(),
            }),
        }
        Ok(())
    }

    fn load_int32_constant(&mut self, field: StubField, result: Int32OperandId) -> Result<(), JitError> {
        let value = self.stub_data.get_field::<i32>(field)?;
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::Int32)?;
        match self.config.field_policy {
            StubFieldPolicy::Constant => self.masm.emit(MasmInst::MovImm {
                dst,
                imm: i64::from(value) as u64,
            }),
            StubFieldPolicy::Address => self.masm.emit(MasmInst::LoadStubWord {
                dst,
                offset: field.offset(),
            }),
        }
        Ok(())
    }

    fn load_value_tag(&mut self, input: ValOperandId, result: ValueTagOperandId) -> Result<(), JitError> {
        if let Some(ty) = self.alloc.known_type(input.0) {
            let dst = self
                .alloc
                .define_payload_reg(self.masm, result.0, PayloadType::ValueTag)?;
            self.masm.emit(MasmInst::MovImm {
                dst,
                imm: u64::from(ty.to_byte()),
            });
            return Ok(());
        }
        let value = self.alloc.use_value_reg(self.masm, input.0)?;
        let dst = self
            .alloc
            .define_payload_reg(self.masm, result.0, PayloadType::ValueTag)?;
        self.masm.emit(MasmInst::LoadValueTag {
            src: value.reg(),
            dst,
        });
        Ok(())
    }

    fn guard_tag_not_equal(&mut self, lhs: ValueTagOperandId, rhs: ValueTagOperandId) -> Result<(), JitError> {
        let lhs = self.alloc.use_register(self.masm, lhs.0)?;
        let rhs = self.alloc.use_register(self.masm, rhs.0)?;
        let fail = self.failure();
        let ok = self.masm.new_label();
        self.masm.emit(MasmInst::BranchPtr {
            cond: Cond::Equal,
            lhs,
            rhs: Operand::Reg(rhs),
            target: fail,
        });
        // Double and Int32 are the tags 0 and 1; two numbers compare equal.
        let last_number_tag = i64::from(ValueType::Int32.to_byte());
        self.masm.emit(MasmInst::BranchPtr {
            cond: Cond::Above,
            lhs,
            rhs: Operand::Imm(last_number_tag),
            target: ok,
        });
        self.masm.emit(MasmInst::BranchPtr {
            cond: Cond::BelowOrEqual,
            lhs: rhs,
            rhs: Operand::Imm(last_number_tag),
            target: fail,
        });
        self.masm.bind(ok);
        Ok(())
    }

    fn load_dense_element_result(&mut self, obj: ObjOperandId, index: Int32OperandId) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let index = self.alloc.use_register(self.masm, index.0)?;
        let length = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::Load32 {
            dst: length,
            base: reg,
            offset: OFFSET_OF_ELEMENTS_LENGTH,
        });
        let fail = self.failure();
        self.masm.emit(MasmInst::Branch32 {
            cond: Cond::AboveOrEqual,
            lhs: index,
            rhs: Operand::Reg(length),
            target: fail,
        });
        let index = if self.config.spectre_mitigations {
            self.masm.emit(MasmInst::SpectreMaskIndex {
                index,
                length,
                dst: length,
            });
            length
        } else {
            index
        };
        let value = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::Load64 {
            dst: value,
            base: reg,
            offset: Operand::Imm(i64::from(OFFSET_OF_ELEMENTS)),
        });
        self.masm.emit(MasmInst::LoadIndexed64 {
            dst: value,
            base: value,
            index,
        });
        self.masm.emit(MasmInst::BranchPtr {
            cond: Cond::Equal,
            lhs: value,
            rhs: Operand::Imm(TAG_HOLE as i64),
            target: fail,
        });
        self.store_output(value);
        Ok(())
    }

    fn load_int32_array_length_result(&mut self, obj: ObjOperandId) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        let length = self.alloc.allocate_reg(self.masm)?;
        self.masm.emit(MasmInst::Load32 {
            dst: length,
            base: reg,
            offset: OFFSET_OF_ELEMENTS_LENGTH,
        });
        let fail = self.failure();
        self.masm.emit(MasmInst::Branch32 {
            cond: Cond::Above,
            lhs: length,
            rhs: Operand::Imm(i64::from(i32::MAX)),
            target: fail,
        });
        self.masm.emit(MasmInst::BoxPayload {
            src: length,
            dst: length,
            ty: PayloadType::Int32,
        });
        self.store_output(length);
        Ok(())
    }

    fn load_int32_result(&mut self, input: Int32OperandId) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, input.0)?;
        self.box_to_output(reg, PayloadType::Int32)
    }

    fn load_boolean_result(&mut self, value: bool) -> Result<(), JitError> {
        self.store_output_imm(Value::boolean(value))
    }

    fn load_undefined_result(&mut self) -> Result<(), JitError> {
        self.store_output_imm(Value::undefined())
    }

    fn load_object_result(&mut self, obj: ObjOperandId) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, obj.0)?;
        self.box_to_output(reg, PayloadType::Object)
    }

    fn load_int_ptr_result(&mut self, input: IntPtrOperandId) -> Result<(), JitError> {
        let reg = self.alloc.use_register(self.masm, input.0)?;
        let boxed = self.alloc.allocate_reg(self.masm)?;
        let scratch = self.alloc.allocate_float(self.masm)?;
        self.masm.emit(MasmInst::BoxIntPtr {
            src: reg,
            dst: boxed,
            scratch,
        });
        self.alloc.release_float(self.masm, scratch);
        self.store_output(boxed);
        Ok(())
    }

    fn load_typed_result(&mut self, input: TypedOperandId) -> Result<(), JitError> {
        let id = input.id();
        match self.alloc.payload_type(id) {
            Some(ty) => {
                if ty.value_type() != Some(input.value_type()) {
                    return Err(JitError::Malformed(format!(
                        "operand {} typed {} holds {ty:?}",
                        id.index(),
                        input.value_type().name()
                    )));
                }
                let reg = self.alloc.use_register(self.masm, id)?;
                self.box_to_output(reg, ty)
            }
            None => {
                let value = self.alloc.use_value_reg(self.masm, id)?;
                self.store_output(value.reg());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masm::InstBuffer;
    use otter_ic_ir::StubWriter;

    fn emit(writer: StubWriter, config: &JitConfig) -> (InstBuffer, EmitSummary) {
        let (program, data) = writer.finish().unwrap();
        let mut masm = InstBuffer::new();
        let summary = emit_stub(&program, &data, config, &mut masm).unwrap();
        (masm, summary)
    }

    fn guard_object(writer: &mut StubWriter, input: ValOperandId) -> ObjOperandId {
        let obj = writer.new_operand();
        writer.guard_to_object(input, obj);
        obj
    }

    fn shape_slot_stub(writer: &mut StubWriter) {
        let v0 = writer.input(0);
        let obj = guard_object(writer, v0);
        let shape = writer.add_field(StubFieldType::Shape, 0x1000);
        writer.guard_shape(obj, shape);
        let offset = writer.add_int32_field(JsObject::fixed_slot_offset(0));
        writer.load_fixed_slot_result(obj, offset);
        writer.return_from_ic();
    }

    #[test]
    fn test_guards_share_one_failure_path() {
        let mut writer = StubWriter::new(1);
        shape_slot_stub(&mut writer);
        let (masm, summary) = emit(writer, &JitConfig::default());

        assert_eq!(summary.failure_paths, 1);
        assert_eq!(masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Bailout))), 1);
        assert_eq!(masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Return))), 1);
        assert_eq!(masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Exception))), 0);
        assert!(!summary.calls_helpers);
    }

    #[test]
    fn test_output_starts_undefined() {
        let mut writer = StubWriter::new(0);
        writer.return_from_ic();
        let (masm, _) = emit(writer, &JitConfig::default());
        assert_eq!(
            masm.insts(),
            &[
                MasmInst::MovImm {
                    dst: Register(0),
                    imm: Value::undefined().to_bits()
                },
                MasmInst::StoreOutput { src: Register(0) },
                MasmInst::Ret(ExitStatus::Return),
            ]
        );
    }

    #[test]
    fn test_spectre_zeroing_only_for_live_objects() {
        let mut writer = StubWriter::new(1);
        shape_slot_stub(&mut writer);
        let (masm, _) = emit(writer, &JitConfig::default());
        let zeroed: Vec<_> = masm
            .insts()
            .iter()
            .filter_map(|i| match i {
                MasmInst::BranchTestObjShape {
                    spectre_reg_to_zero,
                    ..
                } => Some(*spectre_reg_to_zero),
                _ => None,
            })
            .collect();
        assert_eq!(zeroed.len(), 1);
        assert!(zeroed[0].is_some());

        // The object dies at the guard: nothing to protect.
        let mut writer = StubWriter::new(1);
        let v0 = writer.input(0);
        let obj = guard_object(&mut writer, v0);
        let shape = writer.add_field(StubFieldType::Shape, 0x1000);
        writer.guard_shape(obj, shape);
        writer.return_from_ic();
        let (masm, _) = emit(writer, &JitConfig::default());
        assert_eq!(
            masm.count(|i| matches!(
                i,
                MasmInst::BranchTestObjShape {
                    spectre_reg_to_zero: None,
                    ..
                }
            )),
            1
        );

        let mut writer = StubWriter::new(1);
        shape_slot_stub(&mut writer);
        let (masm, _) = emit(writer, &JitConfig::default().with_spectre_mitigations(false));
        assert_eq!(
            masm.count(|i| matches!(
                i,
                MasmInst::BranchTestObjShape {
                    spectre_reg_to_zero: Some(_),
                    ..
                }
            )),
            0
        );
    }

    #[test]
    fn test_field_policy_controls_immediates() {
        let mut writer = StubWriter::new(1);
        shape_slot_stub(&mut writer);
        let (program, data) = writer.finish().unwrap();

        let mut constant = InstBuffer::new();
        emit_stub(&program, &data, &JitConfig::default(), &mut constant).unwrap();
        assert_eq!(constant.count(|i| matches!(i, MasmInst::LoadStubWord { .. })), 0);
        assert_eq!(
            constant.count(|i| matches!(
                i,
                MasmInst::BranchTestObjShape {
                    shape: Operand::Imm(0x1000),
                    ..
                }
            )),
            1
        );

        let mut address = InstBuffer::new();
        let config = JitConfig::default().with_field_policy(StubFieldPolicy::Address);
        emit_stub(&program, &data, &config, &mut address).unwrap();
        assert_eq!(address.count(|i| matches!(i, MasmInst::LoadStubWord { .. })), 2);
    }

    #[test]
    fn test_known_type_skips_repeated_tag_test() {
        let mut writer = StubWriter::new(1);
        let v0 = writer.input(0);
        guard_object(&mut writer, v0);
        guard_object(&mut writer, v0);
        writer.guard_non_double_type(v0, ValueType::Object);
        writer.return_from_ic();
        let (masm, _) = emit(writer, &JitConfig::default());
        assert_eq!(masm.count(|i| matches!(i, MasmInst::BranchTestType { .. })), 1);
    }

    #[test]
    fn test_double_guard_saves_float_on_its_failure_path() {
        let mut writer = StubWriter::new(1);
        let v0 = writer.input(0);
        let index: Int32OperandId = writer.new_operand();
        writer.guard_to_int32_index(v0, index);
        writer.load_int32_result(index);
        writer.return_from_ic();
        let (masm, summary) = emit(writer, &JitConfig::default());

        // Not-a-number bails with nothing saved; an inexact double bails with
        // the scratch float saved.
        assert_eq!(summary.failure_paths, 2);
        assert_eq!(summary.float_save_slots, 1);
        assert_eq!(masm.count(|i| matches!(i, MasmInst::SaveFloat { .. })), 1);
        assert_eq!(masm.count(|i| matches!(i, MasmInst::RestoreFloat { .. })), 2);
    }

    #[test]
    fn test_number_operand_of_wrong_kind_exits_malformed() {
        let mut writer = StubWriter::new(1);
        let index: IntPtrOperandId = writer.new_operand();
        writer.guard_number_to_int_ptr_index(writer.input(0).into(), false, index);
        writer.load_int_ptr_result(index);
        writer.return_from_ic();
        let (masm, _) = emit(writer, &JitConfig::default());
        // An inexact double still bails.
        assert_eq!(masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Malformed))), 1);
        assert_eq!(masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Bailout))), 1);

        let mut writer = StubWriter::new(1);
        let index: Int32OperandId = writer.new_operand();
        writer.guard_to_int32_index(writer.input(0), index);
        writer.load_int32_result(index);
        writer.return_from_ic();
        let (masm, _) = emit(writer, &JitConfig::default());
        assert_eq!(masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Malformed))), 0);
    }

    #[test]
    fn test_call_outs_get_exception_trampoline() {
        let mut writer = StubWriter::new(3);
        let v0 = writer.input(0);
        let v1 = writer.input(1);
        let v2 = writer.input(2);
        let re = guard_object(&mut writer, v0);
        let s: StringOperandId = writer.new_operand();
        writer.guard_to_string(v1, s);
        let i: Int32OperandId = writer.new_operand();
        writer.guard_to_int32(v2, i);
        writer.call_reg_exp_tester_result(re, s, i);
        writer.return_from_ic();
        let (masm, summary) = emit(writer, &JitConfig::default());
        assert!(summary.calls_helpers);
        assert_eq!(masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Exception))), 1);
        assert_eq!(
            masm.count(|i| matches!(
                i,
                MasmInst::CallHelper {
                    helper: HelperKind::RegExpTester,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_unknown_opcode_is_unsupported() {
        let program = StubProgram::from_parts(vec![0xEE], 0, 0);
        let mut masm = InstBuffer::new();
        let err = emit_stub(&program, &StubData::new(), &JitConfig::default(), &mut masm)
            .unwrap_err();
        assert!(matches!(
            err,
            JitError::UnsupportedOp {
                index: 0,
                opcode: 0xEE
            }
        ));
    }

    #[test]
    fn test_missing_terminal_is_rejected() {
        let mut code = Vec::new();
        Op::LoadUndefinedResult {}.encode(&mut code);
        let program = StubProgram::from_parts(code, 0, 0);
        let mut masm = InstBuffer::new();
        assert!(matches!(
            emit_stub(&program, &StubData::new(), &JitConfig::default(), &mut masm),
            Err(JitError::Decode(IrError::MissingTerminal))
        ));
    }

    #[test]
    fn test_bad_fixed_slot_offset_is_malformed() {
        let mut writer = StubWriter::new(1);
        let v0 = writer.input(0);
        let obj = guard_object(&mut writer, v0);
        let offset = writer.add_int32_field(4);
        writer.load_fixed_slot_result(obj, offset);
        writer.return_from_ic();
        let (program, data) = writer.finish().unwrap();
        let mut masm = InstBuffer::new();
        assert!(matches!(
            emit_stub(&program, &data, &JitConfig::default(), &mut masm),
            Err(JitError::Malformed(_))
        ));
    }

    mod allocation {
        use super::*;
        use otter_ic_ir::{Int32OperandId, ValueTagOperandId};
        use proptest::prelude::*;

        /// Build a straight-line program from `(kind, input)` steps.
        fn random_program(num_inputs: u8, steps: &[(u8, u8)]) -> StubWriter {
            let mut writer = StubWriter::new(num_inputs);
            let mut ints: Vec<Int32OperandId> = Vec::new();
            let mut objects: Vec<ObjOperandId> = Vec::new();
            let mut tags: Vec<ValueTagOperandId> = Vec::new();
            for &(kind, input) in steps {
                let input = writer.input(input % num_inputs);
                match kind % 5 {
                    0 => {
                        let n = writer.new_operand();
                        writer.guard_to_int32(input, n);
                        ints.push(n);
                    }
                    1 => objects.push(guard_object(&mut writer, input)),
                    2 => {
                        let tag = writer.new_operand();
                        writer.load_value_tag(input, tag);
                        tags.push(tag);
                    }
                    3 => writer.guard_is_number(input),
                    _ => {
                        if let [.., lhs, rhs] = tags[..] {
                            writer.guard_tag_not_equal(lhs, rhs);
                        }
                    }
                }
            }
            if let Some(&n) = ints.last() {
                writer.load_int32_result(n);
            } else if let Some(&obj) = objects.last() {
                writer.load_object_result(obj);
            }
            writer.return_from_ic();
            writer
        }

        proptest! {
            #[test]
            fn prop_allocation_never_aliases(
                num_inputs in 1u8..5,
                steps in proptest::collection::vec((any::<u8>(), any::<u8>()), 1..12),
                registers in 2u8..8,
            ) {
                let (program, data) = random_program(num_inputs, &steps)
                    .finish()
                    .expect("program should finish");
                let config = JitConfig::default().with_general_registers(registers);
                let mut masm = InstBuffer::new();
                match emit_stub(&program, &data, &config, &mut masm) {
                    Ok(summary) => {
                        prop_assert!(summary.spill_slots <= config.spill_slots);
                        prop_assert_eq!(
                            masm.count(|i| matches!(i, MasmInst::Ret(ExitStatus::Return))),
                            1
                        );
                    }
                    Err(JitError::AllocatorExhausted { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
            }
        }
    }
}
