//! Operand location allocator.
//!
//! Tracks where every live operand sits while the emitter walks the program
//! once, front to back. Registers come from a fixed pool and are handed out
//! lowest first. When the pool is empty the operand with the lowest id that
//! the current op does not touch is spilled to the lowest free stack slot.
//! Operands are freed after their last use, which a liveness pre-pass
//! computes up front.
//!
//! Float registers follow the same rules. An operand proven to hold a double
//! can live unboxed in one across ops and is spilled like any other operand.
//!
//! The allocator never emits control flow; it only asks the macro-assembler
//! to move, box and unbox.

use otter_ic_ir::{Op, OperandId, ValueType};
use smallvec::SmallVec;

use crate::compiler::JitError;
use crate::config::JitConfig;
use crate::location::{OperandLocation, PayloadType};
use crate::masm::{MacroAssembler, MasmInst};
use crate::registers::{FloatRegister, FloatRegisterSet, Register, RegisterSet, ValueReg};

/// Float registers saved while in use, with their save slots. Failure paths
/// must restore exactly these before leaving the stub.
pub type SavedFloats = SmallVec<[(FloatRegister, u32); 2]>;

/// Register allocator for one stub compilation.
#[derive(Debug)]
pub struct CacheRegisterAllocator {
    locations: Vec<OperandLocation>,
    known_types: Vec<Option<ValueType>>,
    defined: Vec<bool>,
    last_use: Vec<Option<usize>>,
    available: RegisterSet,
    available_floats: FloatRegisterSet,
    current_op: Option<usize>,
    current_op_regs: RegisterSet,
    current_op_floats: FloatRegisterSet,
    scratch_regs: RegisterSet,
    scratch_floats: FloatRegisterSet,
    spill_slots: Vec<bool>,
    spill_high_water: u32,
    save_floats: bool,
    saved_floats: SavedFloats,
    float_save_high_water: u32,
}

impl CacheRegisterAllocator {
    /// Allocator for `ops` over `num_operands` ids.
    pub fn new(ops: &[Op], num_operands: usize, config: &JitConfig) -> Result<Self, JitError> {
        let mut last_use = vec![None; num_operands];
        for (index, op) in ops.iter().enumerate() {
            for id in op.operands() {
                let slot = last_use.get_mut(id.index() as usize).ok_or_else(|| {
                    JitError::Malformed(format!(
                        "op {index} names operand {} of {num_operands}",
                        id.index()
                    ))
                })?;
                *slot = Some(index);
            }
        }
        Ok(Self {
            locations: vec![OperandLocation::Uninitialized; num_operands],
            known_types: vec![None; num_operands],
            defined: vec![false; num_operands],
            last_use,
            available: RegisterSet::first(config.general_registers),
            available_floats: FloatRegisterSet::first(config.float_registers),
            current_op: None,
            current_op_regs: RegisterSet::empty(),
            current_op_floats: FloatRegisterSet::empty(),
            scratch_regs: RegisterSet::empty(),
            scratch_floats: FloatRegisterSet::empty(),
            spill_slots: vec![false; config.spill_slots as usize],
            spill_high_water: 0,
            save_floats: config.save_scratch_float,
            saved_floats: SavedFloats::new(),
            float_save_high_water: 0,
        })
    }

    /// Load the live inputs into registers. Inputs no op uses stay
    /// uninitialized.
    pub fn init_inputs<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        num_inputs: usize,
    ) -> Result<(), JitError> {
        for index in 0..num_inputs {
            let id = OperandId(index as u8);
            self.check_define(id)?;
            self.current_op_regs = RegisterSet::empty();
            if self.last_use[index].is_none() {
                continue;
            }
            let reg = self.take_register(masm)?;
            masm.emit(MasmInst::LoadInput { dst: reg, index: index as u8 });
            self.locations[index] = OperandLocation::ValueReg(ValueReg(reg));
        }
        Ok(())
    }

    /// Start op `index`: release the previous op's scratch registers and
    /// free every operand whose last use is behind us.
    pub fn next_op<A: MacroAssembler>(&mut self, masm: &mut A, index: usize) {
        for reg in self.scratch_regs.iter() {
            self.available.insert(reg);
        }
        self.scratch_regs = RegisterSet::empty();
        self.current_op = Some(index);
        self.current_op_regs = RegisterSet::empty();
        self.current_op_floats = FloatRegisterSet::empty();

        for id in 0..self.locations.len() {
            let dead = self.last_use[id].is_none_or(|last| last < index);
            if dead && self.locations[id].is_initialized() {
                self.free_location(masm, self.locations[id]);
                self.locations[id] = OperandLocation::Uninitialized;
            }
        }
    }

    /// Current location of `id`.
    pub fn location(&self, id: OperandId) -> OperandLocation {
        self.locations
            .get(id.index() as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Tag proven by an earlier guard, if any.
    pub fn known_type(&self, id: OperandId) -> Option<ValueType> {
        self.known_types.get(id.index() as usize).copied().flatten()
    }

    /// Record a tag proven by a guard.
    pub fn set_known_type(&mut self, id: OperandId, ty: ValueType) {
        if let Some(slot) = self.known_types.get_mut(id.index() as usize) {
            *slot = Some(ty);
        }
    }

    /// Payload representation of `id`, if it is held unboxed.
    pub fn payload_type(&self, id: OperandId) -> Option<PayloadType> {
        match self.location(id) {
            OperandLocation::PayloadReg { ty, .. } | OperandLocation::PayloadStack { ty, .. } => {
                Some(ty)
            }
            _ => None,
        }
    }

    /// Whether an op after the current one reads `id`.
    pub fn used_after_current(&self, id: OperandId) -> bool {
        let last = self.last_use.get(id.index() as usize).copied().flatten();
        match (last, self.current_op) {
            (Some(last), Some(current)) => last > current,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Scratch register for the current op. Released by [`Self::release_reg`]
    /// or at the next op.
    pub fn allocate_reg<A: MacroAssembler>(&mut self, masm: &mut A) -> Result<Register, JitError> {
        let reg = self.take_register(masm)?;
        self.scratch_regs.insert(reg);
        Ok(reg)
    }

    /// Return a scratch register to the pool.
    pub fn release_reg(&mut self, reg: Register) {
        if self.scratch_regs.contains(reg) {
            self.scratch_regs.remove(reg);
            self.current_op_regs.remove(reg);
            self.available.insert(reg);
        }
    }

    /// Bind a new operand to a register holding a boxed value.
    pub fn define_value_reg<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        id: OperandId,
    ) -> Result<ValueReg, JitError> {
        self.check_define(id)?;
        let reg = self.take_register(masm)?;
        self.locations[id.index() as usize] = OperandLocation::ValueReg(ValueReg(reg));
        Ok(ValueReg(reg))
    }

    /// Bind a new operand to a register holding a payload of type `ty`.
    pub fn define_payload_reg<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        id: OperandId,
        ty: PayloadType,
    ) -> Result<Register, JitError> {
        self.check_define(id)?;
        let reg = self.take_register(masm)?;
        self.locations[id.index() as usize] = OperandLocation::PayloadReg { reg, ty };
        if let Some(tag) = ty.value_type() {
            self.set_known_type(id, tag);
        }
        Ok(reg)
    }

    /// `id` as a boxed value in a register. Payloads are boxed in place.
    pub fn use_value_reg<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        id: OperandId,
    ) -> Result<ValueReg, JitError> {
        let index = self.checked_index(id)?;
        let reg = match self.locations[index] {
            OperandLocation::ValueReg(ValueReg(reg)) => reg,
            OperandLocation::PayloadReg { reg, ty } => {
                self.box_in_place(masm, id, reg, ty)?;
                reg
            }
            OperandLocation::ValueStack { slot } => {
                let reg = self.take_register(masm)?;
                masm.emit(MasmInst::Restore { dst: reg, slot });
                self.free_spill_slot(slot);
                reg
            }
            OperandLocation::PayloadStack { slot, ty } => {
                let reg = self.take_register(masm)?;
                masm.emit(MasmInst::Restore { dst: reg, slot });
                self.free_spill_slot(slot);
                self.box_in_place(masm, id, reg, ty)?;
                reg
            }
            OperandLocation::FloatReg(f) => {
                let reg = self.take_register(masm)?;
                masm.emit(MasmInst::BoxDouble { src: f, dst: reg });
                self.return_float(masm, f);
                reg
            }
            OperandLocation::FloatStack { slot } => {
                let f = self.take_float(masm)?;
                masm.emit(MasmInst::ReloadFloat { dst: f, slot });
                self.free_spill_slot(slot);
                let reg = self.take_register(masm)?;
                masm.emit(MasmInst::BoxDouble { src: f, dst: reg });
                self.return_float(masm, f);
                reg
            }
            OperandLocation::Uninitialized => return Err(self.not_live(id)),
        };
        self.locations[index] = OperandLocation::ValueReg(ValueReg(reg));
        self.current_op_regs.insert(reg);
        Ok(ValueReg(reg))
    }

    /// `id` as an unboxed payload in a register. A boxed operand is unboxed in
    /// place, which needs a guard to have proven its tag.
    pub fn use_register<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        id: OperandId,
    ) -> Result<Register, JitError> {
        let index = self.checked_index(id)?;
        let (reg, ty) = match self.locations[index] {
            OperandLocation::PayloadReg { reg, ty } => (reg, ty),
            OperandLocation::ValueReg(ValueReg(reg)) => {
                let ty = self.proven_payload(id)?;
                masm.emit(MasmInst::UnboxPayload { src: reg, dst: reg, ty });
                (reg, ty)
            }
            OperandLocation::PayloadStack { slot, ty } => {
                let reg = self.take_register(masm)?;
                masm.emit(MasmInst::Restore { dst: reg, slot });
                self.free_spill_slot(slot);
                (reg, ty)
            }
            OperandLocation::ValueStack { slot } => {
                let ty = self.proven_payload(id)?;
                let reg = self.take_register(masm)?;
                masm.emit(MasmInst::Restore { dst: reg, slot });
                self.free_spill_slot(slot);
                masm.emit(MasmInst::UnboxPayload { src: reg, dst: reg, ty });
                (reg, ty)
            }
            OperandLocation::FloatReg(_) | OperandLocation::FloatStack { .. } => {
                return Err(JitError::AllocatorInvariant(format!(
                    "operand {} holds a double, not a payload",
                    id.index()
                )));
            }
            OperandLocation::Uninitialized => return Err(self.not_live(id)),
        };
        self.locations[index] = OperandLocation::PayloadReg { reg, ty };
        self.current_op_regs.insert(reg);
        Ok(reg)
    }

    /// `id` as a double in a float register.
    ///
    /// An operand proven to be a double moves into a float register and
    /// stays there for later ops; registers obtained for it earlier in the
    /// same op are invalidated. Anything else converts into a scratch float
    /// register, which the caller hands back with [`Self::release_float`].
    pub fn use_number<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        id: OperandId,
    ) -> Result<FloatRegister, JitError> {
        let index = self.checked_index(id)?;
        match self.locations[index] {
            OperandLocation::FloatReg(reg) => {
                self.current_op_floats.insert(reg);
                Ok(reg)
            }
            OperandLocation::FloatStack { slot } => {
                let reg = self.take_float(masm)?;
                masm.emit(MasmInst::ReloadFloat { dst: reg, slot });
                self.free_spill_slot(slot);
                self.locations[index] = OperandLocation::FloatReg(reg);
                Ok(reg)
            }
            OperandLocation::PayloadReg { ty: PayloadType::Int32, .. }
            | OperandLocation::PayloadStack { ty: PayloadType::Int32, .. } => {
                let src = self.use_register(masm, id)?;
                let dst = self.allocate_float(masm)?;
                masm.emit(MasmInst::Int32ToDouble { src, dst });
                Ok(dst)
            }
            OperandLocation::PayloadReg { ty, .. } | OperandLocation::PayloadStack { ty, .. } => {
                Err(JitError::AllocatorInvariant(format!(
                    "operand {} read as number holds {ty:?}",
                    id.index()
                )))
            }
            OperandLocation::ValueReg(_) | OperandLocation::ValueStack { .. } => {
                let known_double = self.known_type(id) == Some(ValueType::Double);
                let ValueReg(src) = self.use_value_reg(masm, id)?;
                if known_double {
                    let dst = self.take_float(masm)?;
                    masm.emit(MasmInst::UnboxDouble { src, dst });
                    self.current_op_regs.remove(src);
                    self.available.insert(src);
                    self.locations[index] = OperandLocation::FloatReg(dst);
                    Ok(dst)
                } else {
                    let dst = self.allocate_float(masm)?;
                    masm.emit(MasmInst::UnboxNumber { src, dst });
                    Ok(dst)
                }
            }
            OperandLocation::Uninitialized => Err(self.not_live(id)),
        }
    }

    /// Scratch float register for the current op. Saved first when float
    /// registers belong to the caller.
    pub fn allocate_float<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
    ) -> Result<FloatRegister, JitError> {
        let reg = self.take_float(masm)?;
        self.scratch_floats.insert(reg);
        Ok(reg)
    }

    /// Restore and return a scratch float register. Registers bound to an
    /// operand are left alone.
    pub fn release_float<A: MacroAssembler>(&mut self, masm: &mut A, reg: FloatRegister) {
        if self.scratch_floats.contains(reg) {
            self.scratch_floats.remove(reg);
            self.return_float(masm, reg);
        }
    }

    /// Float registers a failure path taken now must restore.
    pub fn saved_floats(&self) -> &SavedFloats {
        &self.saved_floats
    }

    /// Spill slots the stub needs.
    pub fn spill_slots_used(&self) -> u32 {
        self.spill_high_water
    }

    /// Float save slots the stub needs.
    pub fn float_save_slots_used(&self) -> u32 {
        self.float_save_high_water
    }

    /// Check that no register or spill slot backs two live operands, and
    /// that none of them is also marked free.
    pub fn check_no_aliasing(&self) -> Result<(), JitError> {
        let mut seen = RegisterSet::empty();
        let mut slots = vec![false; self.spill_slots.len()];
        for (id, loc) in self.locations.iter().enumerate() {
            if let Some(reg) = loc.register() {
                if seen.contains(reg) || self.available.contains(reg) {
                    return Err(JitError::AllocatorInvariant(format!(
                        "register {reg} of operand {id} is aliased or free"
                    )));
                }
                seen.insert(reg);
            }
            if let Some(slot) = loc.spill_slot() {
                let taken = slots.get_mut(slot as usize).ok_or_else(|| {
                    JitError::AllocatorInvariant(format!("spill slot {slot} out of range"))
                })?;
                if *taken || !self.spill_slots[slot as usize] {
                    return Err(JitError::AllocatorInvariant(format!(
                        "spill slot {slot} of operand {id} is aliased or free"
                    )));
                }
                *taken = true;
            }
        }
        for reg in self.scratch_regs.iter() {
            if seen.contains(reg) || self.available.contains(reg) {
                return Err(JitError::AllocatorInvariant(format!(
                    "scratch register {reg} is also bound or free"
                )));
            }
        }

        let mut seen_floats = FloatRegisterSet::empty();
        for (id, loc) in self.locations.iter().enumerate() {
            if let Some(reg) = loc.float_register() {
                if seen_floats.contains(reg)
                    || self.available_floats.contains(reg)
                    || self.scratch_floats.contains(reg)
                {
                    return Err(JitError::AllocatorInvariant(format!(
                        "float register {reg} of operand {id} is aliased, scratch or free"
                    )));
                }
                seen_floats.insert(reg);
            }
        }
        for reg in self.scratch_floats.iter() {
            if self.available_floats.contains(reg) {
                return Err(JitError::AllocatorInvariant(format!(
                    "scratch float register {reg} is also free"
                )));
            }
        }
        Ok(())
    }

    fn checked_index(&self, id: OperandId) -> Result<usize, JitError> {
        let index = id.index() as usize;
        if index < self.locations.len() {
            Ok(index)
        } else {
            Err(JitError::Malformed(format!(
                "operand {index} out of range (len={})",
                self.locations.len()
            )))
        }
    }

    fn check_define(&mut self, id: OperandId) -> Result<(), JitError> {
        let index = self.checked_index(id)?;
        if std::mem::replace(&mut self.defined[index], true) {
            return Err(JitError::AllocatorInvariant(format!(
                "operand {index} defined twice"
            )));
        }
        Ok(())
    }

    fn not_live(&self, id: OperandId) -> JitError {
        JitError::AllocatorInvariant(format!(
            "operand {} used before its definition or after its last use",
            id.index()
        ))
    }

    fn proven_payload(&self, id: OperandId) -> Result<PayloadType, JitError> {
        self.known_type(id)
            .and_then(PayloadType::from_value_type)
            .ok_or_else(|| {
                JitError::AllocatorInvariant(format!(
                    "operand {} unboxed without a guard proving its tag",
                    id.index()
                ))
            })
    }

    fn box_in_place<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        id: OperandId,
        reg: Register,
        ty: PayloadType,
    ) -> Result<(), JitError> {
        let tag = ty.value_type().ok_or_else(|| {
            JitError::AllocatorInvariant(format!(
                "operand {} holds {ty:?}, which has no boxed form",
                id.index()
            ))
        })?;
        masm.emit(MasmInst::BoxPayload { src: reg, dst: reg, ty });
        self.set_known_type(id, tag);
        Ok(())
    }

    /// A register for the current op, spilling if the pool is empty.
    fn take_register<A: MacroAssembler>(&mut self, masm: &mut A) -> Result<Register, JitError> {
        let reg = match self.available.take_lowest() {
            Some(reg) => reg,
            None => self.spill_victim(masm)?,
        };
        self.current_op_regs.insert(reg);
        Ok(reg)
    }

    fn spill_victim<A: MacroAssembler>(&mut self, masm: &mut A) -> Result<Register, JitError> {
        let victim = self.locations.iter().enumerate().find_map(|(id, loc)| {
            loc.register()
                .filter(|reg| !self.current_op_regs.contains(*reg))
                .map(|reg| (id, *loc, reg))
        });
        let exhausted = JitError::AllocatorExhausted {
            op: self.current_op,
        };
        let Some((id, loc, reg)) = victim else {
            return Err(exhausted);
        };
        let slot = self.take_spill_slot().ok_or(exhausted)?;
        masm.emit(MasmInst::Spill { slot, src: reg });
        self.locations[id] = match loc {
            OperandLocation::PayloadReg { ty, .. } => OperandLocation::PayloadStack { slot, ty },
            _ => OperandLocation::ValueStack { slot },
        };
        tracing::trace!(operand = id, %reg, slot, "spilled operand");
        Ok(reg)
    }

    /// A float register for the current op, spilling a double if the pool
    /// is empty.
    fn take_float<A: MacroAssembler>(&mut self, masm: &mut A) -> Result<FloatRegister, JitError> {
        let reg = match self.available_floats.take_lowest() {
            Some(reg) => {
                if self.save_floats {
                    let slot = self.free_float_save_slot();
                    masm.emit(MasmInst::SaveFloat { src: reg, slot });
                    self.saved_floats.push((reg, slot));
                    self.float_save_high_water = self.float_save_high_water.max(slot + 1);
                }
                reg
            }
            None => self.spill_float_victim(masm)?,
        };
        self.current_op_floats.insert(reg);
        Ok(reg)
    }

    fn spill_float_victim<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
    ) -> Result<FloatRegister, JitError> {
        let victim = self.locations.iter().enumerate().find_map(|(id, loc)| {
            loc.float_register()
                .filter(|reg| !self.current_op_floats.contains(*reg))
                .map(|reg| (id, reg))
        });
        let exhausted = JitError::AllocatorExhausted {
            op: self.current_op,
        };
        let Some((id, reg)) = victim else {
            return Err(exhausted);
        };
        let slot = self.take_spill_slot().ok_or(exhausted)?;
        masm.emit(MasmInst::SpillFloat { slot, src: reg });
        self.locations[id] = OperandLocation::FloatStack { slot };
        tracing::trace!(operand = id, %reg, slot, "spilled double");
        Ok(reg)
    }

    /// Give a float register back, restoring the caller's contents if they
    /// were saved.
    fn return_float<A: MacroAssembler>(&mut self, masm: &mut A, reg: FloatRegister) {
        if let Some(pos) = self.saved_floats.iter().position(|(r, _)| *r == reg) {
            let (_, slot) = self.saved_floats.remove(pos);
            masm.emit(MasmInst::RestoreFloat { dst: reg, slot });
        }
        self.current_op_floats.remove(reg);
        self.available_floats.insert(reg);
    }

    fn free_float_save_slot(&self) -> u32 {
        let mut slot = 0;
        while self.saved_floats.iter().any(|&(_, used)| used == slot) {
            slot += 1;
        }
        slot
    }

    fn take_spill_slot(&mut self) -> Option<u32> {
        let slot = self.spill_slots.iter().position(|used| !used)? as u32;
        self.spill_slots[slot as usize] = true;
        self.spill_high_water = self.spill_high_water.max(slot + 1);
        Some(slot)
    }

    fn free_location<A: MacroAssembler>(&mut self, masm: &mut A, loc: OperandLocation) {
        if let Some(reg) = loc.register() {
            self.available.insert(reg);
        }
        if let Some(reg) = loc.float_register() {
            self.return_float(masm, reg);
        }
        if let Some(slot) = loc.spill_slot() {
            self.free_spill_slot(slot);
        }
    }

    fn free_spill_slot(&mut self, slot: u32) {
        if let Some(used) = self.spill_slots.get_mut(slot as usize) {
            *used = false;
        }
    }
}
