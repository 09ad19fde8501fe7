//! Runtime helper plumbing for compiled stubs.
//!
//! Call-out ops cannot run inline; compiled code calls an `extern "C"` entry
//! point from `otter_ic_object::helpers` instead. Every helper takes the
//! context pointer plus three 64-bit arguments and returns a boxed value or
//! the exception sentinel.

use cranelift_codegen::ir::{self, AbiParam, types};
use cranelift_jit::JITBuilder;
use cranelift_module::{FuncId, Linkage, Module};
use otter_ic_object::helpers;

use crate::compiler::JitError;

/// Runtime helpers a stub may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HelperKind {
    /// `RegExpMatcher(regexp, input, lastIndex)`
    RegExpMatcher = 0,
    /// `RegExpSearcher(regexp, input, lastIndex)`
    RegExpSearcher = 1,
    /// `RegExpTester(regexp, input, lastIndex)`
    RegExpTester = 2,
    /// `SubstringKernel(string, begin, length)`
    SubstringKernel = 3,
}

/// Total number of helper kinds.
pub const HELPER_COUNT: usize = 4;

impl HelperKind {
    /// All kinds, indexed by discriminant.
    pub const ALL: [HelperKind; HELPER_COUNT] = [
        HelperKind::RegExpMatcher,
        HelperKind::RegExpSearcher,
        HelperKind::RegExpTester,
        HelperKind::SubstringKernel,
    ];

    /// Symbol the JIT module links against.
    pub fn symbol_name(self) -> &'static str {
        match self {
            Self::RegExpMatcher => "otter_ic_regexp_matcher",
            Self::RegExpSearcher => "otter_ic_regexp_searcher",
            Self::RegExpTester => "otter_ic_regexp_tester",
            Self::SubstringKernel => "otter_ic_substring_kernel",
        }
    }

    /// Arguments after the context pointer.
    pub fn param_count(self) -> usize {
        3
    }

    /// Cranelift signature: `(ctx, a, b, c) -> u64`.
    pub fn make_signature(self, call_conv: cranelift_codegen::isa::CallConv) -> ir::Signature {
        let mut sig = ir::Signature::new(call_conv);
        sig.params.push(AbiParam::new(types::I64));
        for _ in 0..self.param_count() {
            sig.params.push(AbiParam::new(types::I64));
        }
        sig.returns.push(AbiParam::new(types::I64));
        sig
    }
}

/// Function pointer table, indexed by [`HelperKind`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeHelpers {
    ptrs: [Option<*const u8>; HELPER_COUNT],
}

// SAFETY: function pointers are `Send + Sync` by nature.
unsafe impl Send for RuntimeHelpers {}
unsafe impl Sync for RuntimeHelpers {}

impl Default for RuntimeHelpers {
    fn default() -> Self {
        Self {
            ptrs: [None; HELPER_COUNT],
        }
    }
}

impl RuntimeHelpers {
    /// Create an empty helper table (all helpers unset).
    pub fn new() -> Self {
        Self::default()
    }

    /// The object crate's helpers, for every kind.
    pub fn standard() -> Self {
        let table: [helpers::HelperFn; HELPER_COUNT] = [
            helpers::ic_regexp_matcher,
            helpers::ic_regexp_searcher,
            helpers::ic_regexp_tester,
            helpers::ic_substring_kernel,
        ];
        let mut this = Self::new();
        for (kind, f) in HelperKind::ALL.into_iter().zip(table) {
            // SAFETY: every entry has the `HelperFn` signature.
            unsafe { this.set(kind, f as *const u8) };
        }
        this
    }

    /// Set a helper function pointer.
    ///
    /// # Safety
    ///
    /// The pointer must be an `extern "C" fn(*mut IcContext, u64, u64, u64)
    /// -> u64` that honors the helper's contract.
    pub unsafe fn set(&mut self, kind: HelperKind, ptr: *const u8) {
        self.ptrs[kind as usize] = Some(ptr);
    }

    /// Get a helper function pointer.
    pub fn get(&self, kind: HelperKind) -> Option<*const u8> {
        self.ptrs[kind as usize]
    }

    /// Register all set helpers as symbols on the JIT builder.
    pub fn register_symbols(&self, builder: &mut JITBuilder) {
        for kind in HelperKind::ALL {
            if let Some(ptr) = self.get(kind) {
                builder.symbol(kind.symbol_name(), ptr);
            }
        }
    }
}

/// Module-level function ids for declared helper imports.
/// Created once per [`crate::JitCompiler`].
pub(crate) struct HelperFuncIds {
    ids: [Option<FuncId>; HELPER_COUNT],
}

impl HelperFuncIds {
    /// Declare all available helpers as imported functions on the module.
    pub fn declare<M: Module>(helpers: &RuntimeHelpers, module: &mut M) -> Result<Self, JitError> {
        let call_conv = module.isa().default_call_conv();
        let mut ids = [None; HELPER_COUNT];
        for kind in HelperKind::ALL {
            if helpers.get(kind).is_some() {
                let sig = kind.make_signature(call_conv);
                let func_id = module.declare_function(kind.symbol_name(), Linkage::Import, &sig)?;
                ids[kind as usize] = Some(func_id);
            }
        }
        Ok(Self { ids })
    }
}

/// Per-function helper references.
pub(crate) struct HelperRefs {
    refs: [Option<ir::FuncRef>; HELPER_COUNT],
}

impl HelperRefs {
    /// Declare all available helpers into a function's IR.
    pub fn declare<M: Module>(
        func_ids: &HelperFuncIds,
        module: &mut M,
        func: &mut ir::Function,
    ) -> Self {
        let mut refs = [None; HELPER_COUNT];
        for (i, id) in func_ids.ids.iter().enumerate() {
            if let Some(func_id) = id {
                refs[i] = Some(module.declare_func_in_func(*func_id, func));
            }
        }
        Self { refs }
    }

    /// Get the FuncRef, or fail for a helper the compiler was built without.
    pub fn require(&self, kind: HelperKind) -> Result<ir::FuncRef, JitError> {
        self.refs[kind as usize].ok_or_else(|| {
            JitError::Malformed(format!("runtime helper {} is not registered", kind.symbol_name()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_is_complete() {
        let helpers = RuntimeHelpers::standard();
        for kind in HelperKind::ALL {
            assert!(helpers.get(kind).is_some(), "{kind:?}");
            assert_eq!(HelperKind::ALL[kind as usize], kind);
        }
        assert!(RuntimeHelpers::new().get(HelperKind::RegExpTester).is_none());
    }

    #[test]
    fn test_signature_takes_context_and_three_words() {
        let sig = HelperKind::SubstringKernel
            .make_signature(cranelift_codegen::isa::CallConv::SystemV);
        assert_eq!(sig.params.len(), 4);
        assert_eq!(sig.returns.len(), 1);
        assert!(sig.params.iter().all(|p| p.value_type == types::I64));
    }
}
