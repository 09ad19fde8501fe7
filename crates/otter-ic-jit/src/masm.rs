//! Macro-assembler interface.
//!
//! The emitter speaks [`MasmInst`], a small register-level instruction set
//! over abstract registers, labels and stub field offsets. [`InstBuffer`]
//! records the instructions; the translator lowers a finished buffer to
//! Cranelift IR.
//!
//! Conventions shared by every backend:
//!
//! - Int32 payloads are sign-extended to 64 bits, booleans are 0 or 1.
//! - Branches fall through when not taken.
//! - `Branch32` compares the low 32 bits; `BranchPtr` the full register.

use otter_ic_ir::ValueType;

use crate::bailout::ExitStatus;
use crate::location::PayloadType;
use crate::registers::{FloatRegister, Register};
use crate::runtime_helpers::HelperKind;

/// A branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// A register or immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Register
    Reg(Register),
    /// Immediate
    Imm(i64),
}

/// Comparison condition. `Below`/`Above` are unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Cond {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Below,
    BelowOrEqual,
    Above,
    AboveOrEqual,
}

impl Cond {
    /// The condition that holds exactly when `self` does not.
    pub const fn negate(self) -> Self {
        match self {
            Cond::Equal => Cond::NotEqual,
            Cond::NotEqual => Cond::Equal,
            Cond::LessThan => Cond::GreaterThanOrEqual,
            Cond::LessThanOrEqual => Cond::GreaterThan,
            Cond::GreaterThan => Cond::LessThanOrEqual,
            Cond::GreaterThanOrEqual => Cond::LessThan,
            Cond::Below => Cond::AboveOrEqual,
            Cond::BelowOrEqual => Cond::Above,
            Cond::Above => Cond::BelowOrEqual,
            Cond::AboveOrEqual => Cond::Below,
        }
    }
}

/// One macro-assembler instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum MasmInst {
    /// Bind a label here.
    Bind(Label),
    /// Unconditional jump.
    Jump(Label),
    /// Return from the stub with a status.
    Ret(ExitStatus),

    /// `dst = inputs[index]`
    LoadInput { dst: Register, index: u8 },
    /// `*out = src`
    StoreOutput { src: Register },
    /// `dst = imm`
    MovImm { dst: Register, imm: u64 },
    /// `dst = src`
    Mov { dst: Register, src: Register },
    /// `dst = *(stub_data + offset)`
    LoadStubWord { dst: Register, offset: u32 },
    /// `dst = *(u64*)(base + offset)`
    Load64 {
        dst: Register,
        base: Register,
        offset: Operand,
    },
    /// `dst = *(u32*)(base + offset)`, zero-extended
    Load32 {
        dst: Register,
        base: Register,
        offset: i32,
    },
    /// `dst = *(u64*)(base + index * 8)` with `index` read as a u32
    LoadIndexed64 {
        dst: Register,
        base: Register,
        index: Register,
    },

    /// Store a register to a spill slot.
    Spill { slot: u32, src: Register },
    /// Load a register from a spill slot.
    Restore { dst: Register, slot: u32 },
    /// Store a float register to a spill slot.
    SpillFloat { slot: u32, src: FloatRegister },
    /// Load a float register from a spill slot.
    ReloadFloat { dst: FloatRegister, slot: u32 },
    /// Save a caller-owned float register.
    SaveFloat { src: FloatRegister, slot: u32 },
    /// Restore a caller-owned float register.
    RestoreFloat { dst: FloatRegister, slot: u32 },

    /// Branch if `value`'s tag compares `cond` (`Equal`/`NotEqual`) to `ty`.
    BranchTestType {
        cond: Cond,
        value: Register,
        ty: ValueType,
        target: Label,
    },
    /// Branch if `value` is (`Equal`) or is not (`NotEqual`) a number.
    BranchTestNumber {
        cond: Cond,
        value: Register,
        target: Label,
    },
    /// 32-bit compare and branch.
    Branch32 {
        cond: Cond,
        lhs: Register,
        rhs: Operand,
        target: Label,
    },
    /// 64-bit compare and branch.
    BranchPtr {
        cond: Cond,
        lhs: Register,
        rhs: Operand,
        target: Label,
    },
    /// Branch if `obj`'s shape compares `cond` to `shape`. When
    /// `spectre_reg_to_zero` is set, that register is zeroed on the
    /// not-taken path under mis-speculation.
    BranchTestObjShape {
        cond: Cond,
        obj: Register,
        shape: Operand,
        scratch: Register,
        spectre_reg_to_zero: Option<Register>,
        target: Label,
    },
    /// Branch if `obj`'s class compares `cond` to `class`.
    BranchTestObjClass {
        cond: Cond,
        obj: Register,
        class: Operand,
        scratch: Register,
        spectre_reg_to_zero: Option<Register>,
        target: Label,
    },

    /// `dst = (lhs cond rhs) ? 1 : 0`, 64-bit compare
    CmpSet {
        cond: Cond,
        lhs: Register,
        rhs: Operand,
        dst: Register,
    },
    /// `reg &= imm`
    AndImm { reg: Register, imm: u64 },
    /// Strip the tag of a value known to have type `ty`.
    UnboxPayload {
        src: Register,
        dst: Register,
        ty: PayloadType,
    },
    /// Tag a payload of type `ty`.
    BoxPayload {
        src: Register,
        dst: Register,
        ty: PayloadType,
    },
    /// `dst = ValueType` byte of `src`.
    LoadValueTag { src: Register, dst: Register },
    /// Unbox a value known to be a double.
    UnboxDouble { src: Register, dst: FloatRegister },
    /// Box a double, canonicalizing NaN.
    BoxDouble { src: FloatRegister, dst: Register },
    /// Unbox a value known to be an int32 or a double as a double.
    UnboxNumber { src: Register, dst: FloatRegister },
    /// Convert an int32 payload to a double.
    Int32ToDouble { src: Register, dst: FloatRegister },
    /// Convert a double that is exactly an int32, else jump to `fail`.
    DoubleToInt32Exact {
        src: FloatRegister,
        dst: Register,
        fail: Label,
    },
    /// Convert a double that is exactly an intptr, else jump to `fail`.
    DoubleToIntPtrExact {
        src: FloatRegister,
        dst: Register,
        fail: Label,
    },
    /// Truncate a double to an intptr and keep its low 32 bits as an int32
    /// payload. Jumps to `fail` for NaN, infinities and out of range values.
    TruncateDoubleModUint32 {
        src: FloatRegister,
        dst: Register,
        fail: Label,
    },
    /// Uint8Clamped conversion of a double.
    ClampDoubleToUint8 { src: FloatRegister, dst: Register },
    /// Uint8Clamped conversion of an int32 payload, in place.
    ClampInt32ToUint8 { reg: Register },
    /// Sign-extend an int32 payload.
    Int32ToIntPtr { src: Register, dst: Register },
    /// Box an intptr as an int32 when it fits, else as a double.
    BoxIntPtr {
        src: Register,
        dst: Register,
        scratch: FloatRegister,
    },
    /// `dst = index <u length ? index : 0`, immune to speculation.
    SpectreMaskIndex {
        index: Register,
        length: Register,
        dst: Register,
    },
    /// Call a runtime helper with the context and three arguments. Jumps to
    /// `exception` when the helper returns the exception sentinel.
    CallHelper {
        helper: HelperKind,
        args: [Register; 3],
        dst: Register,
        exception: Label,
    },
}

/// Something that accepts macro-assembler instructions.
pub trait MacroAssembler {
    /// A fresh, unbound label.
    fn new_label(&mut self) -> Label;

    /// Append one instruction.
    fn emit(&mut self, inst: MasmInst);

    /// Bind `label` at the current position.
    fn bind(&mut self, label: Label) {
        self.emit(MasmInst::Bind(label));
    }

    /// Jump to `label`.
    fn jump(&mut self, label: Label) {
        self.emit(MasmInst::Jump(label));
    }
}

/// Record-only macro-assembler.
#[derive(Debug, Clone, Default)]
pub struct InstBuffer {
    insts: Vec<MasmInst>,
    labels: u32,
}

impl InstBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded instructions, in order.
    pub fn insts(&self) -> &[MasmInst] {
        &self.insts
    }

    /// Number of labels handed out.
    pub fn label_count(&self) -> u32 {
        self.labels
    }

    /// Number of recorded instructions matching `pred`.
    pub fn count(&self, pred: impl Fn(&MasmInst) -> bool) -> usize {
        self.insts.iter().filter(|inst| pred(inst)).count()
    }
}

impl MacroAssembler for InstBuffer {
    fn new_label(&mut self) -> Label {
        let label = Label(self.labels);
        self.labels += 1;
        label
    }

    fn emit(&mut self, inst: MasmInst) {
        self.insts.push(inst);
    }
}
