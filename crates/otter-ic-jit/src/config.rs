//! Compiler configuration.

/// How stub fields reach compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StubFieldPolicy {
    /// Bake field values into the code as immediates.
    #[default]
    Constant,
    /// Load fields from the stub data pointer at run time, so the code can be
    /// shared by stubs that differ only in their data.
    Address,
}

/// Knobs for one [`crate::JitCompiler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// General purpose registers available to the allocator.
    pub general_registers: u8,
    /// Float registers for doubles and scratch use.
    pub float_registers: u8,
    /// Spill slots available once registers run out.
    pub spill_slots: u32,
    /// Emit spectre mitigations on object guards and element loads.
    pub spectre_mitigations: bool,
    /// Where stub field values come from.
    pub field_policy: StubFieldPolicy,
    /// Float registers belong to the caller and are saved around their use.
    pub save_scratch_float: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            general_registers: 8,
            float_registers: 2,
            spill_slots: 16,
            spectre_mitigations: true,
            field_policy: StubFieldPolicy::Constant,
            save_scratch_float: true,
        }
    }
}

impl JitConfig {
    /// Set the general register count.
    pub fn with_general_registers(mut self, count: u8) -> Self {
        self.general_registers = count;
        self
    }

    /// Set the spill slot limit.
    pub fn with_spill_slots(mut self, count: u32) -> Self {
        self.spill_slots = count;
        self
    }

    /// Enable or disable spectre mitigations.
    pub fn with_spectre_mitigations(mut self, enabled: bool) -> Self {
        self.spectre_mitigations = enabled;
        self
    }

    /// Set the stub field policy.
    pub fn with_field_policy(mut self, policy: StubFieldPolicy) -> Self {
        self.field_policy = policy;
        self
    }
}
