//! # Otter IC Exec
//!
//! Execution-tier coordination for inline cache stubs:
//! - interpreter warm-up counting
//! - compilation on the hot path, with permanent interpreter fallback
//! - bailout accounting and stub disabling

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod env;
mod runtime;

pub use env::{
    RuntimeOptions, bailout_limit, hot_threshold, is_jit_enabled, is_spectre_enabled,
    is_stats_enabled,
};
pub use runtime::{ExecError, IcRuntime, IcRuntimeStats, IcStub, StubTier};
