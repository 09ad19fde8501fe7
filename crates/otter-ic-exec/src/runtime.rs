//! Stub tiering: interpret cold stubs, compile hot ones, give up on stubs
//! that keep bailing.

use std::sync::atomic::{AtomicU64, Ordering};

use otter_ic_interp::{InterpreterError, Outcome, interpret};
use otter_ic_ir::{StubData, StubProgram};
use otter_ic_jit::{CompiledStub, ExitStatus, JitCompiler, JitError};
use otter_ic_object::{IcContext, Value};

use crate::env::RuntimeOptions;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Errors from [`IcRuntime::execute`]. Guard failures and call-out errors
/// are outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Wrong number of inputs for the stub.
    #[error("expected {expected} inputs, got {found}")]
    InputCount {
        /// Declared inputs
        expected: usize,
        /// Provided inputs
        found: usize,
    },

    /// The interpreter rejected the program.
    #[error("interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),

    /// Compiled code rejected its arguments.
    #[error("compiled stub error: {0}")]
    Jit(#[from] JitError),
}

/// Where a stub currently runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubTier {
    /// Interpreted, counting towards compilation.
    Interpreted,
    /// Running native code.
    Compiled,
    /// Compilation failed; interpreted from now on.
    InterpreterOnly,
    /// Bailed too often; callers take the general path directly.
    Disabled,
}

impl StubTier {
    /// Name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            StubTier::Interpreted => "interpreted",
            StubTier::Compiled => "compiled",
            StubTier::InterpreterOnly => "interpreter-only",
            StubTier::Disabled => "disabled",
        }
    }
}

/// A stub program attached to one call site.
#[derive(Debug)]
pub struct IcStub {
    program: StubProgram,
    data: StubData,
    tier: StubTier,
    interpreted_runs: u32,
    consecutive_bailouts: u32,
    /// Native code and the id of the runtime whose compiler owns it.
    compiled: Option<(u64, CompiledStub)>,
}

impl IcStub {
    /// A fresh stub, starting in the interpreter.
    pub fn new(program: StubProgram, data: StubData) -> Self {
        Self {
            program,
            data,
            tier: StubTier::Interpreted,
            interpreted_runs: 0,
            consecutive_bailouts: 0,
            compiled: None,
        }
    }

    /// Current tier.
    pub fn tier(&self) -> StubTier {
        self.tier
    }

    /// The stub program.
    pub fn program(&self) -> &StubProgram {
        &self.program
    }

    /// The stub data.
    pub fn data(&self) -> &StubData {
        &self.data
    }

    /// Native code for this stub, if compiled.
    pub fn compiled(&self) -> Option<&CompiledStub> {
        self.compiled.as_ref().map(|(_, stub)| stub)
    }

    fn set_tier(&mut self, tier: StubTier) {
        if self.tier != tier {
            tracing::debug!(from = self.tier.name(), to = tier.name(), "stub tier change");
            self.tier = tier;
        }
    }
}

/// Snapshot of runtime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IcRuntimeStats {
    /// Runs through the interpreter.
    pub interpreted_runs: u64,
    /// Runs through native code.
    pub compiled_runs: u64,
    /// Stubs compiled.
    pub compile_successes: u64,
    /// Stubs that failed to compile.
    pub compile_errors: u64,
    /// Bailouts from either tier.
    pub bailouts: u64,
    /// Exceptions from either tier.
    pub exceptions: u64,
    /// Stubs disabled after repeated bailouts.
    pub disabled_stubs: u64,
}

/// Executes stubs and moves them between tiers.
///
/// Native code belongs to the runtime that compiled it. A stub compiled by
/// another runtime is recompiled on its next hot run.
pub struct IcRuntime {
    id: u64,
    options: RuntimeOptions,
    compiler: Option<JitCompiler>,
    compiler_failed: bool,
    stats: IcRuntimeStats,
}

impl IcRuntime {
    /// Runtime configured from the environment.
    pub fn from_env() -> Self {
        Self::new(RuntimeOptions::from_env())
    }

    /// Runtime with explicit options.
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            options,
            compiler: None,
            compiler_failed: false,
            stats: IcRuntimeStats::default(),
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Counter snapshot.
    pub fn stats(&self) -> IcRuntimeStats {
        self.stats
    }

    /// Run `stub` on `inputs`.
    ///
    /// Inputs must be values of `ctx`'s heap, the same contract the
    /// interpreter relies on.
    pub fn execute(
        &mut self,
        stub: &mut IcStub,
        inputs: &[Value],
        ctx: &mut IcContext,
    ) -> Result<Outcome, ExecError> {
        let expected = stub.program.num_inputs();
        if inputs.len() != expected {
            return Err(ExecError::InputCount {
                expected,
                found: inputs.len(),
            });
        }

        if stub.tier == StubTier::Compiled {
            let owned = matches!(&stub.compiled, Some((owner, _)) if *owner == self.id);
            if owned {
                return self.run_compiled(stub, inputs, ctx);
            }
            stub.compiled = None;
            stub.interpreted_runs = 0;
            stub.set_tier(StubTier::Interpreted);
        }

        match stub.tier {
            StubTier::Disabled => Ok(Outcome::Bailout),
            StubTier::Interpreted | StubTier::InterpreterOnly => {
                let outcome = self.run_interpreted(stub, inputs, ctx)?;
                if stub.tier == StubTier::Interpreted {
                    stub.interpreted_runs = stub.interpreted_runs.saturating_add(1);
                    if stub.interpreted_runs >= self.options.hot_threshold {
                        self.tier_up(stub);
                    }
                }
                Ok(outcome)
            }
            StubTier::Compiled => self.run_compiled(stub, inputs, ctx),
        }
    }

    fn run_interpreted(
        &mut self,
        stub: &IcStub,
        inputs: &[Value],
        ctx: &mut IcContext,
    ) -> Result<Outcome, ExecError> {
        let outcome = interpret(&stub.program, &stub.data, inputs, ctx)?;
        self.stats.interpreted_runs = self.stats.interpreted_runs.saturating_add(1);
        self.count_outcome(&outcome);
        Ok(outcome)
    }

    fn run_compiled(
        &mut self,
        stub: &mut IcStub,
        inputs: &[Value],
        ctx: &mut IcContext,
    ) -> Result<Outcome, ExecError> {
        let Some((_, compiled)) = &stub.compiled else {
            return Err(ExecError::Jit(JitError::Malformed(
                "compiled tier without code".to_string(),
            )));
        };
        // SAFETY: `self.compiler` produced this code (owner id checked by the
        // caller) and is still alive; the stub data is the blob it was
        // compiled against; inputs follow the interpreter's heap contract.
        let (status, value) = unsafe { compiled.execute(ctx, inputs, &stub.data) }?;
        self.stats.compiled_runs = self.stats.compiled_runs.saturating_add(1);
        let outcome = match status {
            ExitStatus::Return => Outcome::Return(value),
            ExitStatus::Bailout => Outcome::Bailout,
            ExitStatus::Exception => Outcome::Exception,
            ExitStatus::Malformed => {
                return Err(ExecError::Jit(JitError::Malformed(
                    "compiled stub read an operand of the wrong kind".to_string(),
                )));
            }
        };
        self.count_outcome(&outcome);

        if status == ExitStatus::Bailout {
            stub.consecutive_bailouts = stub.consecutive_bailouts.saturating_add(1);
            if stub.consecutive_bailouts >= self.options.bailout_limit {
                tracing::debug!(
                    bailouts = stub.consecutive_bailouts,
                    "disabling stub after repeated bailouts"
                );
                stub.compiled = None;
                stub.set_tier(StubTier::Disabled);
                self.stats.disabled_stubs = self.stats.disabled_stubs.saturating_add(1);
            }
        } else {
            stub.consecutive_bailouts = 0;
        }
        Ok(outcome)
    }

    fn tier_up(&mut self, stub: &mut IcStub) {
        if !self.options.jit_enabled {
            return;
        }
        let Some(compiler) = self.compiler() else {
            self.stats.compile_errors = self.stats.compile_errors.saturating_add(1);
            stub.set_tier(StubTier::InterpreterOnly);
            return;
        };
        match compiler.compile(&stub.program, &stub.data) {
            Ok(compiled) => {
                self.stats.compile_successes = self.stats.compile_successes.saturating_add(1);
                stub.compiled = Some((self.id, compiled));
                stub.consecutive_bailouts = 0;
                stub.set_tier(StubTier::Compiled);
            }
            Err(error) => {
                tracing::debug!(%error, "stub compile failed, staying in the interpreter");
                self.stats.compile_errors = self.stats.compile_errors.saturating_add(1);
                stub.set_tier(StubTier::InterpreterOnly);
            }
        }
    }

    fn compiler(&mut self) -> Option<&mut JitCompiler> {
        if self.compiler.is_none() && !self.compiler_failed {
            match JitCompiler::new(self.options.jit.clone()) {
                Ok(compiler) => self.compiler = Some(compiler),
                Err(error) => {
                    tracing::debug!(%error, "jit unavailable");
                    self.compiler_failed = true;
                }
            }
        }
        self.compiler.as_mut()
    }

    fn count_outcome(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Bailout => self.stats.bailouts = self.stats.bailouts.saturating_add(1),
            Outcome::Exception => self.stats.exceptions = self.stats.exceptions.saturating_add(1),
            Outcome::Return(_) | Outcome::UnsupportedOp => {}
        }
    }
}

impl Drop for IcRuntime {
    fn drop(&mut self) {
        if self.options.stats {
            let s = self.stats;
            tracing::info!(
                interpreted_runs = s.interpreted_runs,
                compiled_runs = s.compiled_runs,
                compile_successes = s.compile_successes,
                compile_errors = s.compile_errors,
                bailouts = s.bailouts,
                exceptions = s.exceptions,
                disabled_stubs = s.disabled_stubs,
                "ic runtime stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_ic_ir::{Int32OperandId, IntPtrOperandId, StubWriter};

    fn int32_echo() -> IcStub {
        let mut writer = StubWriter::new(1);
        let n = writer.new_operand::<Int32OperandId>();
        writer.guard_to_int32(writer.input(0), n);
        writer.load_int32_result(n);
        writer.return_from_ic();
        let (program, data) = writer.finish().expect("program should finish");
        IcStub::new(program, data)
    }

    fn options(hot_threshold: u32, bailout_limit: u32) -> RuntimeOptions {
        RuntimeOptions {
            hot_threshold,
            bailout_limit,
            ..RuntimeOptions::default()
        }
    }

    #[test]
    fn test_hot_stub_is_compiled_after_threshold() {
        let mut runtime = IcRuntime::new(options(2, 4));
        let mut stub = int32_echo();
        let mut ctx = IcContext::new();
        for i in 0..2 {
            assert_eq!(stub.tier(), StubTier::Interpreted);
            let outcome = runtime.execute(&mut stub, &[Value::int32(i)], &mut ctx);
            assert_eq!(outcome.expect("run should succeed"), Outcome::Return(Value::int32(i)));
        }
        assert_eq!(stub.tier(), StubTier::Compiled);
        let outcome = runtime.execute(&mut stub, &[Value::int32(9)], &mut ctx);
        assert_eq!(outcome.expect("run should succeed"), Outcome::Return(Value::int32(9)));

        let stats = runtime.stats();
        assert_eq!(stats.interpreted_runs, 2);
        assert_eq!(stats.compiled_runs, 1);
        assert_eq!(stats.compile_successes, 1);
    }

    #[test]
    fn test_repeated_bailouts_disable_stub() {
        let mut runtime = IcRuntime::new(options(1, 3));
        let mut stub = int32_echo();
        let mut ctx = IcContext::new();
        runtime
            .execute(&mut stub, &[Value::int32(1)], &mut ctx)
            .expect("run should succeed");
        assert_eq!(stub.tier(), StubTier::Compiled);

        for _ in 0..3 {
            let outcome = runtime.execute(&mut stub, &[Value::null()], &mut ctx);
            assert_eq!(outcome.expect("run should succeed"), Outcome::Bailout);
        }
        assert_eq!(stub.tier(), StubTier::Disabled);
        assert!(stub.compiled().is_none());

        // Disabled stubs no longer run, even for inputs that would pass.
        let outcome = runtime.execute(&mut stub, &[Value::int32(1)], &mut ctx);
        assert_eq!(outcome.expect("run should succeed"), Outcome::Bailout);
        let stats = runtime.stats();
        assert_eq!(stats.disabled_stubs, 1);
        assert_eq!(stats.bailouts, 3);
        assert_eq!(stats.compiled_runs, 3);
    }

    #[test]
    fn test_return_resets_bailout_streak() {
        let mut runtime = IcRuntime::new(options(1, 2));
        let mut stub = int32_echo();
        let mut ctx = IcContext::new();
        for input in [Value::int32(0), Value::null(), Value::int32(1), Value::null()] {
            runtime
                .execute(&mut stub, &[input], &mut ctx)
                .expect("run should succeed");
        }
        assert_eq!(stub.tier(), StubTier::Compiled);
    }

    #[test]
    fn test_compile_failure_falls_back_to_interpreter() {
        let mut opts = options(1, 4);
        opts.jit = opts.jit.with_general_registers(0).with_spill_slots(0);
        let mut runtime = IcRuntime::new(opts);
        let mut stub = int32_echo();
        let mut ctx = IcContext::new();
        for i in 0..3 {
            let outcome = runtime.execute(&mut stub, &[Value::int32(i)], &mut ctx);
            assert_eq!(outcome.expect("run should succeed"), Outcome::Return(Value::int32(i)));
            assert_eq!(stub.tier(), StubTier::InterpreterOnly);
        }
        let stats = runtime.stats();
        assert_eq!(stats.compile_errors, 1);
        assert_eq!(stats.interpreted_runs, 3);
    }

    #[test]
    fn test_disabled_jit_never_compiles() {
        let mut opts = options(1, 4);
        opts.jit_enabled = false;
        let mut runtime = IcRuntime::new(opts);
        let mut stub = int32_echo();
        let mut ctx = IcContext::new();
        for _ in 0..5 {
            runtime
                .execute(&mut stub, &[Value::int32(3)], &mut ctx)
                .expect("run should succeed");
        }
        assert_eq!(stub.tier(), StubTier::Interpreted);
        assert_eq!(runtime.stats().compiled_runs, 0);
    }

    #[test]
    fn test_foreign_code_is_recompiled() {
        let mut first = IcRuntime::new(options(1, 4));
        let mut stub = int32_echo();
        let mut ctx = IcContext::new();
        first
            .execute(&mut stub, &[Value::int32(1)], &mut ctx)
            .expect("run should succeed");
        assert_eq!(stub.tier(), StubTier::Compiled);
        drop(first);

        let mut second = IcRuntime::new(options(1, 4));
        let outcome = second.execute(&mut stub, &[Value::int32(5)], &mut ctx);
        assert_eq!(outcome.expect("run should succeed"), Outcome::Return(Value::int32(5)));
        assert_eq!(second.stats().interpreted_runs, 1);
        assert_eq!(second.stats().compiled_runs, 0);
        assert_eq!(stub.tier(), StubTier::Compiled);
    }

    #[test]
    fn test_unguarded_number_read_is_an_error_in_both_tiers() {
        let mut writer = StubWriter::new(1);
        let index = writer.new_operand::<IntPtrOperandId>();
        writer.guard_number_to_int_ptr_index(writer.input(0).into(), true, index);
        writer.load_int_ptr_result(index);
        writer.return_from_ic();
        let (program, data) = writer.finish().expect("program should finish");
        let mut stub = IcStub::new(program, data);
        let mut runtime = IcRuntime::new(options(1, 4));
        let mut ctx = IcContext::new();

        let result = runtime.execute(&mut stub, &[Value::undefined()], &mut ctx);
        assert!(matches!(
            result,
            Err(ExecError::Interpreter(InterpreterError::Malformed(_)))
        ));
        assert_eq!(stub.tier(), StubTier::Interpreted);

        let outcome = runtime.execute(&mut stub, &[Value::double(3.5)], &mut ctx);
        assert_eq!(outcome.expect("run should succeed"), Outcome::Return(Value::int32(-1)));
        assert_eq!(stub.tier(), StubTier::Compiled);

        let result = runtime.execute(&mut stub, &[Value::boolean(true)], &mut ctx);
        assert!(matches!(result, Err(ExecError::Jit(JitError::Malformed(_)))));
        assert_eq!(stub.tier(), StubTier::Compiled);
        assert_eq!(runtime.stats().bailouts, 0);
    }

    #[test]
    fn test_input_arity_is_checked() {
        let mut runtime = IcRuntime::new(RuntimeOptions::default());
        let mut stub = int32_echo();
        let mut ctx = IcContext::new();
        let result = runtime.execute(&mut stub, &[], &mut ctx);
        assert!(matches!(
            result,
            Err(ExecError::InputCount { expected: 1, found: 0 })
        ));
    }
}
