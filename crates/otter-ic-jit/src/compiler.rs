//! Stub compiler wrapper around Cranelift.

use cranelift_codegen::ir::{AbiParam, UserFuncName, types};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module, ModuleError, default_libcall_names};
use otter_ic_ir::{IrError, StubData, StubFieldType, StubProgram};
use otter_ic_object::{IcContext, Value};

use crate::bailout::ExitStatus;
use crate::config::JitConfig;
use crate::emitter::{EmitSummary, emit_stub};
use crate::masm::InstBuffer;
use crate::runtime_helpers::{HelperFuncIds, HelperRefs, RuntimeHelpers};
use crate::translator;

/// Native entry point of a compiled stub.
type StubFn = unsafe extern "C" fn(*mut IcContext, *const u64, *const u64, *mut u64) -> u32;

/// Errors produced by the stub compiler.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Cranelift module-level error.
    #[error("cranelift module error: {0}")]
    Module(Box<ModuleError>),

    /// Failed to create the JIT builder.
    #[error("jit builder initialization failed: {0}")]
    Builder(String),

    /// Opcode byte the compiler has no lowering for.
    #[error("unsupported op at index {index}: opcode {opcode:#04x}")]
    UnsupportedOp {
        /// Op index in the program
        index: usize,
        /// Raw opcode byte
        opcode: u8,
    },

    /// No register and no spill slot left.
    #[error("register allocator exhausted at op {op:?}")]
    AllocatorExhausted {
        /// Op being emitted, `None` while loading inputs
        op: Option<usize>,
    },

    /// Allocator bookkeeping went inconsistent.
    #[error("register allocator invariant violated: {0}")]
    AllocatorInvariant(String),

    /// Program or stub data the generator should never produce.
    #[error("malformed stub: {0}")]
    Malformed(String),

    /// Program or stub data failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] IrError),
}

impl From<ModuleError> for JitError {
    fn from(value: ModuleError) -> Self {
        Self::Module(Box::new(value))
    }
}

/// A stub compiled to native code.
///
/// The code lives as long as the [`JitCompiler`] that produced it.
#[derive(Debug, Clone)]
pub struct CompiledStub {
    code_ptr: *const u8,
    num_inputs: usize,
    field_types: Vec<StubFieldType>,
    summary: EmitSummary,
}

impl CompiledStub {
    /// Entry pointer of the native code.
    pub fn code_ptr(&self) -> *const u8 {
        self.code_ptr
    }

    /// What the emitter reported for this stub.
    pub fn summary(&self) -> &EmitSummary {
        &self.summary
    }

    /// Run the stub.
    ///
    /// Returns the exit status and the output slot. The output is
    /// `undefined` unless the stub stored a result before exiting.
    ///
    /// # Safety
    ///
    /// The compiler that produced this stub must still be alive. Every
    /// pointer inside `inputs` and `stub_data` must reference a live cell of
    /// `ctx`'s heap, and `stub_data` must be the data the stub was compiled
    /// against or a blob with the same field layout.
    pub unsafe fn execute(
        &self,
        ctx: &mut IcContext,
        inputs: &[Value],
        stub_data: &StubData,
    ) -> Result<(ExitStatus, Value), JitError> {
        if inputs.len() != self.num_inputs {
            return Err(JitError::Malformed(format!(
                "expected {} inputs, got {}",
                self.num_inputs,
                inputs.len()
            )));
        }
        if stub_data.field_types() != self.field_types.as_slice() {
            return Err(JitError::Malformed(
                "stub data layout differs from the compiled layout".to_string(),
            ));
        }
        let words: Vec<u64> = inputs.iter().map(|v| v.to_bits()).collect();
        let mut out = Value::undefined().to_bits();
        let func: StubFn = unsafe {
            // SAFETY: `code_ptr` was produced by `JitCompiler::compile` with
            // the signature `(ctx, inputs, stub_data, out) -> u32`.
            std::mem::transmute::<*const u8, StubFn>(self.code_ptr)
        };
        // SAFETY: the input and output buffers outlive the call; the caller
        // upholds the heap contract.
        let code = unsafe { func(ctx, words.as_ptr(), stub_data.as_ptr(), &mut out) };
        let status = ExitStatus::from_code(code)
            .ok_or_else(|| JitError::Malformed(format!("stub returned status {code}")))?;
        Ok((status, Value::from_bits(out)))
    }
}

/// Cranelift-backed stub compiler.
pub struct JitCompiler {
    module: JITModule,
    function_builder_ctx: FunctionBuilderContext,
    context: cranelift_codegen::Context,
    next_function_id: u64,
    helper_func_ids: HelperFuncIds,
    config: JitConfig,
}

impl JitCompiler {
    /// Compiler for the host ISA, linked against the standard helpers.
    pub fn new(config: JitConfig) -> Result<Self, JitError> {
        Self::new_with_helpers(config, RuntimeHelpers::standard())
    }

    /// Compiler linked against a custom helper table.
    pub fn new_with_helpers(config: JitConfig, helpers: RuntimeHelpers) -> Result<Self, JitError> {
        let mut flags = settings::builder();
        for (name, value) in [
            ("use_colocated_libcalls", "false"),
            ("is_pic", "false"),
            ("opt_level", "speed"),
        ] {
            flags
                .set(name, value)
                .map_err(|e| JitError::Builder(e.to_string()))?;
        }
        let isa = cranelift_native::builder()
            .map_err(|e| JitError::Builder(e.to_string()))?
            .finish(settings::Flags::new(flags))
            .map_err(|e| JitError::Builder(e.to_string()))?;

        let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
        helpers.register_symbols(&mut builder);
        let mut module = JITModule::new(builder);
        let helper_func_ids = HelperFuncIds::declare(&helpers, &mut module)?;
        Ok(Self {
            module,
            function_builder_ctx: FunctionBuilderContext::new(),
            context: cranelift_codegen::Context::new(),
            next_function_id: 0,
            helper_func_ids,
            config,
        })
    }

    /// Configuration stubs are compiled with.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Compile `program` against `stub_data`.
    pub fn compile(
        &mut self,
        program: &StubProgram,
        stub_data: &StubData,
    ) -> Result<CompiledStub, JitError> {
        let mut masm = InstBuffer::new();
        let summary = emit_stub(program, stub_data, &self.config, &mut masm)?;

        let mut signature = self.module.make_signature();
        // Signature: (ctx, inputs, stub_data, out) -> status
        for _ in 0..4 {
            signature.params.push(AbiParam::new(types::I64));
        }
        signature.returns.push(AbiParam::new(types::I32));

        let name = format!("otter_ic_stub_{}", self.next_function_id);
        self.next_function_id = self.next_function_id.saturating_add(1);
        let func_id = self
            .module
            .declare_function(&name, Linkage::Local, &signature)?;

        self.context.func = cranelift_codegen::ir::Function::with_name_signature(
            UserFuncName::user(0, func_id.as_u32()),
            signature,
        );
        let helper_refs =
            HelperRefs::declare(&self.helper_func_ids, &mut self.module, &mut self.context.func);

        let translated = {
            let mut builder =
                FunctionBuilder::new(&mut self.context.func, &mut self.function_builder_ctx);
            let result = translator::translate_stub(
                &mut builder,
                &masm,
                &summary,
                &self.config,
                &helper_refs,
            );
            if result.is_ok() {
                builder.finalize();
            }
            result
        };
        if let Err(error) = translated {
            // An unfinished builder leaves its context dirty.
            self.function_builder_ctx = FunctionBuilderContext::new();
            self.module.clear_context(&mut self.context);
            return Err(error);
        }

        if let Err(error) = self.module.define_function(func_id, &mut self.context) {
            self.module.clear_context(&mut self.context);
            return Err(error.into());
        }
        self.module.clear_context(&mut self.context);
        self.module.finalize_definitions()?;

        let code_ptr = self.module.get_finalized_function(func_id);
        tracing::debug!(
            name = %name,
            insts = masm.insts().len(),
            failure_paths = summary.failure_paths,
            spill_slots = summary.spill_slots,
            "compiled stub"
        );
        Ok(CompiledStub {
            code_ptr,
            num_inputs: program.num_inputs(),
            field_types: stub_data.field_types().to_vec(),
            summary,
        })
    }
}
