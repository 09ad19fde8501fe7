//! Guard failure and exit paths.
//!
//! Leaving a stub early jumps to an exit path that undoes whatever the
//! allocator perturbed at that point, then jumps to the trampoline for its
//! exit status. Exits that need the same restoration share a path; each
//! status gets one trampoline.

use smallvec::SmallVec;

use crate::allocator::SavedFloats;
use crate::bailout::ExitStatus;
use crate::masm::{Label, MacroAssembler, MasmInst};

#[derive(Debug)]
struct FailurePath {
    label: Label,
    exit: ExitStatus,
    saved_floats: SavedFloats,
}

/// Exit paths registered while emitting one stub.
#[derive(Debug, Default)]
pub struct FailurePaths {
    paths: Vec<FailurePath>,
}

impl FailurePaths {
    /// No paths yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Label for leaving with `exit` while `saved_floats` are saved. Reuses
    /// an existing path with the same exit and restoration.
    pub fn add<A: MacroAssembler>(
        &mut self,
        masm: &mut A,
        exit: ExitStatus,
        saved_floats: &SavedFloats,
    ) -> Label {
        if let Some(path) = self
            .paths
            .iter()
            .find(|p| p.exit == exit && p.saved_floats == *saved_floats)
        {
            return path.label;
        }
        let label = masm.new_label();
        self.paths.push(FailurePath {
            label,
            exit,
            saved_floats: saved_floats.clone(),
        });
        label
    }

    /// Number of distinct paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the stub never leaves early.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Emit every path followed by the trampolines they jump to.
    pub fn emit<A: MacroAssembler>(&self, masm: &mut A) {
        let mut trampolines: SmallVec<[(ExitStatus, Label); 3]> = SmallVec::new();
        for path in &self.paths {
            let trampoline = match trampolines.iter().find(|(exit, _)| *exit == path.exit) {
                Some(&(_, label)) => label,
                None => {
                    let label = masm.new_label();
                    trampolines.push((path.exit, label));
                    label
                }
            };
            masm.bind(path.label);
            for &(reg, slot) in path.saved_floats.iter().rev() {
                masm.emit(MasmInst::RestoreFloat { dst: reg, slot });
            }
            masm.jump(trampoline);
        }
        for (exit, label) in trampolines {
            masm.bind(label);
            masm.emit(MasmInst::Ret(exit));
        }
    }
}
