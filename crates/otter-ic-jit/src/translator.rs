//! Macro-assembler to Cranelift IR translation.
//!
//! Abstract registers, float registers, spill slots and float save slots all
//! become 8-byte explicit stack slots; Cranelift's own allocator maps them to
//! machine registers. Every label becomes a block. A conditional branch ends
//! its block and continues in a fresh fallthrough block.
//!
//! The generated function has the signature
//! `extern "C" fn(ctx, inputs, stub_data, out) -> u32` where the return value
//! is an [`ExitStatus`](crate::ExitStatus) code.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{
    Block, InstBuilder, StackSlot, StackSlotData, StackSlotKind, Value, types,
};
use cranelift_frontend::FunctionBuilder;
use otter_ic_object::EXCEPTION_SENTINEL;
use otter_ic_object::object::OFFSET_OF_SHAPE;
use otter_ic_object::shape::SHAPE_OFFSET_OF_CLASS;

use crate::compiler::JitError;
use crate::config::JitConfig;
use crate::emitter::EmitSummary;
use crate::masm::{Cond, InstBuffer, Label, MasmInst, Operand};
use crate::registers::{FloatRegister, Register};
use crate::runtime_helpers::HelperRefs;
use crate::type_guards::{self, trusted};

/// Exclusive upper bound of doubles that convert to an intptr.
const INTPTR_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn int_cc(cond: Cond) -> IntCC {
    match cond {
        Cond::Equal => IntCC::Equal,
        Cond::NotEqual => IntCC::NotEqual,
        Cond::LessThan => IntCC::SignedLessThan,
        Cond::LessThanOrEqual => IntCC::SignedLessThanOrEqual,
        Cond::GreaterThan => IntCC::SignedGreaterThan,
        Cond::GreaterThanOrEqual => IntCC::SignedGreaterThanOrEqual,
        Cond::Below => IntCC::UnsignedLessThan,
        Cond::BelowOrEqual => IntCC::UnsignedLessThanOrEqual,
        Cond::Above => IntCC::UnsignedGreaterThan,
        Cond::AboveOrEqual => IntCC::UnsignedGreaterThanOrEqual,
    }
}

/// Branch on a tag test: `Equal` branches when it holds, `NotEqual` when not.
fn test_polarity(cond: Cond) -> Result<bool, JitError> {
    match cond {
        Cond::Equal => Ok(true),
        Cond::NotEqual => Ok(false),
        other => Err(JitError::Malformed(format!(
            "tag test with condition {other:?}"
        ))),
    }
}

fn explicit_slots(builder: &mut FunctionBuilder<'_>, count: usize) -> Vec<StackSlot> {
    (0..count)
        .map(|_| {
            builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 8, 3))
        })
        .collect()
}

struct Frame {
    regs: Vec<StackSlot>,
    floats: Vec<StackSlot>,
    spills: Vec<StackSlot>,
    float_saves: Vec<StackSlot>,
}

impl Frame {
    fn slot(slots: &[StackSlot], index: usize, what: &str) -> Result<StackSlot, JitError> {
        slots
            .get(index)
            .copied()
            .ok_or_else(|| JitError::Malformed(format!("{what} {index} outside the frame")))
    }
}

struct Translator<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    helpers: &'a HelperRefs,
    frame: Frame,
    blocks: Vec<Block>,
    bound: Vec<bool>,
    referenced: Vec<bool>,
    ctx: Value,
    inputs: Value,
    stub_data: Value,
    out: Value,
    /// Whether the current block already ends in a terminator.
    terminated: bool,
}

/// Translate a finished instruction buffer into the function `builder` is
/// building.
pub(crate) fn translate_stub(
    builder: &mut FunctionBuilder<'_>,
    masm: &InstBuffer,
    summary: &EmitSummary,
    config: &JitConfig,
    helpers: &HelperRefs,
) -> Result<(), JitError> {
    let frame = Frame {
        regs: explicit_slots(builder, usize::from(config.general_registers)),
        floats: explicit_slots(builder, usize::from(config.float_registers)),
        spills: explicit_slots(builder, summary.spill_slots as usize),
        float_saves: explicit_slots(builder, summary.float_save_slots as usize),
    };
    let labels = masm.label_count() as usize;
    let blocks = (0..labels).map(|_| builder.create_block()).collect();

    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    let params = builder.block_params(entry).to_vec();
    let [ctx, inputs, stub_data, out] = params[..] else {
        return Err(JitError::Malformed(format!(
            "stub signature has {} params",
            params.len()
        )));
    };

    let zero = builder.ins().iconst(types::I64, 0);
    for &slot in &frame.regs {
        builder.ins().stack_store(zero, slot, 0);
    }
    let fzero = builder.ins().f64const(0.0);
    for &slot in &frame.floats {
        builder.ins().stack_store(fzero, slot, 0);
    }

    let mut translator = Translator {
        builder,
        helpers,
        frame,
        blocks,
        bound: vec![false; labels],
        referenced: vec![false; labels],
        ctx,
        inputs,
        stub_data,
        out,
        terminated: false,
    };
    for inst in masm.insts() {
        translator.lower(*inst)?;
    }
    translator.finish()
}

impl Translator<'_, '_> {
    fn finish(self) -> Result<(), JitError> {
        if !self.terminated {
            return Err(JitError::Malformed("stub falls off its end".to_string()));
        }
        for (index, (bound, referenced)) in self.bound.iter().zip(&self.referenced).enumerate() {
            if *referenced && !*bound {
                return Err(JitError::Malformed(format!("label {index} is never bound")));
            }
        }
        self.builder.seal_all_blocks();
        Ok(())
    }

    fn block(&mut self, label: Label) -> Result<Block, JitError> {
        let index = label.0 as usize;
        let block = self
            .blocks
            .get(index)
            .copied()
            .ok_or_else(|| JitError::Malformed(format!("label {index} was never created")))?;
        self.referenced[index] = true;
        Ok(block)
    }

    /// Make sure instructions land in an open block.
    fn ensure_open(&mut self) {
        if self.terminated {
            let dead = self.builder.create_block();
            self.builder.switch_to_block(dead);
            self.terminated = false;
        }
    }

    /// Branch to `label` when `cond` (an i8) is nonzero; fall through otherwise.
    fn branch_if(&mut self, cond: Value, label: Label) -> Result<(), JitError> {
        let target = self.block(label)?;
        let next = self.builder.create_block();
        self.builder.ins().brif(cond, target, &[], next, &[]);
        self.builder.switch_to_block(next);
        Ok(())
    }

    fn branch_unless(&mut self, cond: Value, label: Label) -> Result<(), JitError> {
        let target = self.block(label)?;
        let next = self.builder.create_block();
        self.builder.ins().brif(cond, next, &[], target, &[]);
        self.builder.switch_to_block(next);
        Ok(())
    }

    fn read(&mut self, reg: Register) -> Result<Value, JitError> {
        let slot = Frame::slot(&self.frame.regs, usize::from(reg.0), "register")?;
        Ok(self.builder.ins().stack_load(types::I64, slot, 0))
    }

    fn write(&mut self, reg: Register, value: Value) -> Result<(), JitError> {
        let slot = Frame::slot(&self.frame.regs, usize::from(reg.0), "register")?;
        self.builder.ins().stack_store(value, slot, 0);
        Ok(())
    }

    fn read_float(&mut self, reg: FloatRegister) -> Result<Value, JitError> {
        let slot = Frame::slot(&self.frame.floats, usize::from(reg.0), "float register")?;
        Ok(self.builder.ins().stack_load(types::F64, slot, 0))
    }

    fn write_float(&mut self, reg: FloatRegister, value: Value) -> Result<(), JitError> {
        let slot = Frame::slot(&self.frame.floats, usize::from(reg.0), "float register")?;
        self.builder.ins().stack_store(value, slot, 0);
        Ok(())
    }

    fn operand(&mut self, operand: Operand) -> Result<Value, JitError> {
        match operand {
            Operand::Reg(reg) => self.read(reg),
            Operand::Imm(imm) => Ok(self.builder.ins().iconst(types::I64, imm)),
        }
    }

    fn low32(&mut self, value: Value) -> Value {
        self.builder.ins().ireduce(types::I32, value)
    }

    fn load64(&mut self, base: Value, offset: i32) -> Value {
        self.builder.ins().load(types::I64, trusted(), base, offset)
    }

    /// Zero `reg` under mis-speculation past a not-taken object guard whose
    /// taken condition is `cond`.
    fn spectre_zero(&mut self, cond: Value, reg: Option<Register>) -> Result<(), JitError> {
        if let Some(reg) = reg {
            let value = self.read(reg)?;
            let zero = self.builder.ins().iconst(types::I64, 0);
            let masked = self.builder.ins().select_spectre_guard(cond, zero, value);
            self.write(reg, masked)?;
        }
        Ok(())
    }

    /// Check `lo <= d <= hi` (or `< hi` when `hi_exclusive`); NaN fails.
    fn double_in_range(&mut self, d: Value, lo: f64, hi: f64, hi_exclusive: bool) -> Value {
        let lo = self.builder.ins().f64const(lo);
        let hi = self.builder.ins().f64const(hi);
        let above = self
            .builder
            .ins()
            .fcmp(FloatCC::GreaterThanOrEqual, d, lo);
        let hi_cc = if hi_exclusive {
            FloatCC::LessThan
        } else {
            FloatCC::LessThanOrEqual
        };
        let below = self.builder.ins().fcmp(hi_cc, d, hi);
        self.builder.ins().band(above, below)
    }

    fn lower(&mut self, inst: MasmInst) -> Result<(), JitError> {
        if let MasmInst::Bind(label) = inst {
            let block = self.block(label)?;
            let index = label.0 as usize;
            if self.bound[index] {
                return Err(JitError::Malformed(format!("label {index} bound twice")));
            }
            self.bound[index] = true;
            if !self.terminated {
                self.builder.ins().jump(block, &[]);
            }
            self.builder.switch_to_block(block);
            self.terminated = false;
            return Ok(());
        }
        self.ensure_open();

        match inst {
            MasmInst::Bind(_) => {}
            MasmInst::Jump(label) => {
                let block = self.block(label)?;
                self.builder.ins().jump(block, &[]);
                self.terminated = true;
            }
            MasmInst::Ret(status) => {
                let code = self.builder.ins().iconst(types::I32, i64::from(status.code()));
                self.builder.ins().return_(&[code]);
                self.terminated = true;
            }

            MasmInst::LoadInput { dst, index } => {
                let v = self.load64(self.inputs, i32::from(index) * 8);
                self.write(dst, v)?;
            }
            MasmInst::StoreOutput { src } => {
                let v = self.read(src)?;
                self.builder.ins().store(trusted(), v, self.out, 0);
            }
            MasmInst::MovImm { dst, imm } => {
                let v = self.builder.ins().iconst(types::I64, imm as i64);
                self.write(dst, v)?;
            }
            MasmInst::Mov { dst, src } => {
                let v = self.read(src)?;
                self.write(dst, v)?;
            }
            MasmInst::LoadStubWord { dst, offset } => {
                let offset = i32::try_from(offset)
                    .map_err(|_| JitError::Malformed(format!("stub field offset {offset}")))?;
                let v = self.load64(self.stub_data, offset);
                self.write(dst, v)?;
            }
            MasmInst::Load64 { dst, base, offset } => {
                let base = self.read(base)?;
                let v = match offset {
                    Operand::Imm(imm) => {
                        let imm = i32::try_from(imm)
                            .map_err(|_| JitError::Malformed(format!("load offset {imm}")))?;
                        self.load64(base, imm)
                    }
                    Operand::Reg(reg) => {
                        let offset = self.read(reg)?;
                        let addr = self.builder.ins().iadd(base, offset);
                        self.load64(addr, 0)
                    }
                };
                self.write(dst, v)?;
            }
            MasmInst::Load32 { dst, base, offset } => {
                let base = self.read(base)?;
                let v = self.builder.ins().uload32(trusted(), base, offset);
                self.write(dst, v)?;
            }
            MasmInst::LoadIndexed64 { dst, base, index } => {
                let base = self.read(base)?;
                let index = self.read(index)?;
                let index = self.low32(index);
                let index = self.builder.ins().uextend(types::I64, index);
                let scaled = self.builder.ins().ishl_imm(index, 3);
                let addr = self.builder.ins().iadd(base, scaled);
                let v = self.load64(addr, 0);
                self.write(dst, v)?;
            }

            MasmInst::Spill { slot, src } => {
                let stack = Frame::slot(&self.frame.spills, slot as usize, "spill slot")?;
                let v = self.read(src)?;
                self.builder.ins().stack_store(v, stack, 0);
            }
            MasmInst::Restore { dst, slot } => {
                let stack = Frame::slot(&self.frame.spills, slot as usize, "spill slot")?;
                let v = self.builder.ins().stack_load(types::I64, stack, 0);
                self.write(dst, v)?;
            }
            MasmInst::SpillFloat { slot, src } => {
                let stack = Frame::slot(&self.frame.spills, slot as usize, "spill slot")?;
                let v = self.read_float(src)?;
                self.builder.ins().stack_store(v, stack, 0);
            }
            MasmInst::ReloadFloat { dst, slot } => {
                let stack = Frame::slot(&self.frame.spills, slot as usize, "spill slot")?;
                let v = self.builder.ins().stack_load(types::F64, stack, 0);
                self.write_float(dst, v)?;
            }
            MasmInst::SaveFloat { src, slot } => {
                let stack = Frame::slot(&self.frame.float_saves, slot as usize, "float save slot")?;
                let v = self.read_float(src)?;
                self.builder.ins().stack_store(v, stack, 0);
            }
            MasmInst::RestoreFloat { dst, slot } => {
                let stack = Frame::slot(&self.frame.float_saves, slot as usize, "float save slot")?;
                let v = self.builder.ins().stack_load(types::F64, stack, 0);
                self.write_float(dst, v)?;
            }

            MasmInst::BranchTestType {
                cond,
                value,
                ty,
                target,
            } => {
                let when = test_polarity(cond)?;
                let v = self.read(value)?;
                let hit = type_guards::emit_has_type(self.builder, v, ty);
                if when {
                    self.branch_if(hit, target)?;
                } else {
                    self.branch_unless(hit, target)?;
                }
            }
            MasmInst::BranchTestNumber {
                cond,
                value,
                target,
            } => {
                let when = test_polarity(cond)?;
                let v = self.read(value)?;
                let hit = type_guards::emit_is_number(self.builder, v);
                if when {
                    self.branch_if(hit, target)?;
                } else {
                    self.branch_unless(hit, target)?;
                }
            }
            MasmInst::Branch32 {
                cond,
                lhs,
                rhs,
                target,
            } => {
                let l = self.read(lhs)?;
                let l = self.low32(l);
                let r = self.operand(rhs)?;
                let r = self.low32(r);
                let c = self.builder.ins().icmp(int_cc(cond), l, r);
                self.branch_if(c, target)?;
            }
            MasmInst::BranchPtr {
                cond,
                lhs,
                rhs,
                target,
            } => {
                let l = self.read(lhs)?;
                let r = self.operand(rhs)?;
                let c = self.builder.ins().icmp(int_cc(cond), l, r);
                self.branch_if(c, target)?;
            }
            MasmInst::BranchTestObjShape {
                cond,
                obj,
                shape,
                scratch,
                spectre_reg_to_zero,
                target,
            } => {
                let o = self.read(obj)?;
                let actual = self.load64(o, OFFSET_OF_SHAPE);
                self.write(scratch, actual)?;
                let expected = self.operand(shape)?;
                let c = self.builder.ins().icmp(int_cc(cond), actual, expected);
                self.branch_if(c, target)?;
                self.spectre_zero(c, spectre_reg_to_zero)?;
            }
            MasmInst::BranchTestObjClass {
                cond,
                obj,
                class,
                scratch,
                spectre_reg_to_zero,
                target,
            } => {
                let o = self.read(obj)?;
                let shape = self.load64(o, OFFSET_OF_SHAPE);
                let actual = self.load64(shape, SHAPE_OFFSET_OF_CLASS);
                self.write(scratch, actual)?;
                let expected = self.operand(class)?;
                let c = self.builder.ins().icmp(int_cc(cond), actual, expected);
                self.branch_if(c, target)?;
                self.spectre_zero(c, spectre_reg_to_zero)?;
            }

            MasmInst::CmpSet {
                cond,
                lhs,
                rhs,
                dst,
            } => {
                let l = self.read(lhs)?;
                let r = self.operand(rhs)?;
                let c = self.builder.ins().icmp(int_cc(cond), l, r);
                let v = self.builder.ins().uextend(types::I64, c);
                self.write(dst, v)?;
            }
            MasmInst::AndImm { reg, imm } => {
                let v = self.read(reg)?;
                let v = self.builder.ins().band_imm(v, imm as i64);
                self.write(reg, v)?;
            }
            MasmInst::UnboxPayload { src, dst, ty } => {
                let v = self.read(src)?;
                let v = type_guards::emit_unbox_payload(self.builder, v, ty);
                self.write(dst, v)?;
            }
            MasmInst::BoxPayload { src, dst, ty } => {
                let v = self.read(src)?;
                let v = type_guards::emit_box_payload(self.builder, v, ty);
                self.write(dst, v)?;
            }
            MasmInst::LoadValueTag { src, dst } => {
                let v = self.read(src)?;
                let tag = type_guards::emit_value_tag(self.builder, v);
                self.write(dst, tag)?;
            }
            MasmInst::UnboxDouble { src, dst } => {
                let v = self.read(src)?;
                let d = type_guards::emit_unbox_double(self.builder, v);
                self.write_float(dst, d)?;
            }
            MasmInst::BoxDouble { src, dst } => {
                let d = self.read_float(src)?;
                let boxed = type_guards::emit_box_double(self.builder, d);
                self.write(dst, boxed)?;
            }
            MasmInst::UnboxNumber { src, dst } => {
                let v = self.read(src)?;
                let d = type_guards::emit_unbox_number(self.builder, v);
                self.write_float(dst, d)?;
            }
            MasmInst::Int32ToDouble { src, dst } => {
                let v = self.read(src)?;
                let i = self.low32(v);
                let d = self.builder.ins().fcvt_from_sint(types::F64, i);
                self.write_float(dst, d)?;
            }
            MasmInst::DoubleToInt32Exact { src, dst, fail } => {
                let d = self.read_float(src)?;
                let ok = self.double_in_range(d, f64::from(i32::MIN), f64::from(i32::MAX), false);
                self.branch_unless(ok, fail)?;
                let i = self.builder.ins().fcvt_to_sint_sat(types::I32, d);
                let back = self.builder.ins().fcvt_from_sint(types::F64, i);
                let exact = self.builder.ins().fcmp(FloatCC::Equal, back, d);
                let payload = self.builder.ins().sextend(types::I64, i);
                self.write(dst, payload)?;
                self.branch_unless(exact, fail)?;
            }
            MasmInst::DoubleToIntPtrExact { src, dst, fail } => {
                let d = self.read_float(src)?;
                let ok = self.double_in_range(d, -INTPTR_LIMIT, INTPTR_LIMIT, true);
                self.branch_unless(ok, fail)?;
                let i = self.builder.ins().fcvt_to_sint_sat(types::I64, d);
                let back = self.builder.ins().fcvt_from_sint(types::F64, i);
                let exact = self.builder.ins().fcmp(FloatCC::Equal, back, d);
                self.write(dst, i)?;
                self.branch_unless(exact, fail)?;
            }
            MasmInst::TruncateDoubleModUint32 { src, dst, fail } => {
                let d = self.read_float(src)?;
                let ok = self.double_in_range(d, -INTPTR_LIMIT, INTPTR_LIMIT, true);
                self.branch_unless(ok, fail)?;
                let i = self.builder.ins().fcvt_to_sint_sat(types::I64, d);
                let low = self.low32(i);
                let payload = self.builder.ins().sextend(types::I64, low);
                self.write(dst, payload)?;
            }
            MasmInst::ClampDoubleToUint8 { src, dst } => {
                let d = self.read_float(src)?;
                let rounded = self.builder.ins().nearest(d);
                let lo = self.builder.ins().f64const(0.0);
                let hi = self.builder.ins().f64const(255.0);
                let clamped = self.builder.ins().fmax(rounded, lo);
                let clamped = self.builder.ins().fmin(clamped, hi);
                // NaN survives fmax/fmin and saturates to 0.
                let i = self.builder.ins().fcvt_to_sint_sat(types::I32, clamped);
                let payload = self.builder.ins().sextend(types::I64, i);
                self.write(dst, payload)?;
            }
            MasmInst::ClampInt32ToUint8 { reg } => {
                let v = self.read(reg)?;
                let i = self.low32(v);
                let lo = self.builder.ins().iconst(types::I32, 0);
                let hi = self.builder.ins().iconst(types::I32, 255);
                let i = self.builder.ins().smax(i, lo);
                let i = self.builder.ins().smin(i, hi);
                let payload = self.builder.ins().sextend(types::I64, i);
                self.write(reg, payload)?;
            }
            MasmInst::Int32ToIntPtr { src, dst } => {
                let v = self.read(src)?;
                let i = self.low32(v);
                let payload = self.builder.ins().sextend(types::I64, i);
                self.write(dst, payload)?;
            }
            MasmInst::BoxIntPtr { src, dst, scratch } => {
                let i = self.read(src)?;
                let low = self.low32(i);
                let widened = self.builder.ins().sextend(types::I64, low);
                let fits = self.builder.ins().icmp(IntCC::Equal, widened, i);
                let as_int = type_guards::emit_box_int32(self.builder, i);
                let d = self.builder.ins().fcvt_from_sint(types::F64, i);
                self.write_float(scratch, d)?;
                let as_double = type_guards::emit_box_double(self.builder, d);
                let boxed = self.builder.ins().select(fits, as_int, as_double);
                self.write(dst, boxed)?;
            }
            MasmInst::SpectreMaskIndex { index, length, dst } => {
                let i = self.read(index)?;
                let len = self.read(length)?;
                let i32v = self.low32(i);
                let len32 = self.low32(len);
                let oob = self
                    .builder
                    .ins()
                    .icmp(IntCC::UnsignedGreaterThanOrEqual, i32v, len32);
                let zero = self.builder.ins().iconst(types::I64, 0);
                let masked = self.builder.ins().select_spectre_guard(oob, zero, i);
                self.write(dst, masked)?;
            }
            MasmInst::CallHelper {
                helper,
                args,
                dst,
                exception,
            } => {
                let func = self.helpers.require(helper)?;
                let mut call_args = vec![self.ctx];
                for reg in args {
                    call_args.push(self.read(reg)?);
                }
                let call = self.builder.ins().call(func, &call_args);
                let result = self.builder.inst_results(call)[0];
                self.write(dst, result)?;
                let raised = self.builder.ins().icmp_imm(
                    IntCC::Equal,
                    result,
                    EXCEPTION_SENTINEL as i64,
                );
                self.branch_if(raised, exception)?;
            }
        }
        Ok(())
    }
}
