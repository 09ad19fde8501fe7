//! Environment configuration.
//!
//! Each variable is read once per process.

use std::sync::OnceLock;

use otter_ic_jit::JitConfig;

/// Default interpreter runs before a stub is compiled.
pub const DEFAULT_HOT_THRESHOLD: u32 = 4;

/// Default consecutive compiled bailouts before a stub is disabled.
pub const DEFAULT_BAILOUT_LIMIT: u32 = 32;

static JIT_ENABLED: OnceLock<bool> = OnceLock::new();
static STATS_ENABLED: OnceLock<bool> = OnceLock::new();
static SPECTRE_ENABLED: OnceLock<bool> = OnceLock::new();
static HOT_THRESHOLD: OnceLock<u32> = OnceLock::new();
static BAILOUT_LIMIT: OnceLock<u32> = OnceLock::new();

pub(crate) fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

fn parse_env_u32(var_name: &str) -> Option<u32> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
}

fn env_flag(var_name: &str) -> Option<bool> {
    std::env::var(var_name).ok().map(|v| parse_env_truthy(&v))
}

/// Whether stubs may be compiled. Set `OTTER_IC_DISABLE_JIT=1` to interpret
/// everything.
pub fn is_jit_enabled() -> bool {
    *JIT_ENABLED.get_or_init(|| !env_flag("OTTER_IC_DISABLE_JIT").unwrap_or(false))
}

/// Whether runtimes log their counters when dropped (`OTTER_IC_STATS`).
pub fn is_stats_enabled() -> bool {
    *STATS_ENABLED.get_or_init(|| env_flag("OTTER_IC_STATS").unwrap_or(false))
}

/// Whether compiled stubs carry spectre mitigations.
///
/// Enabled by default. Set `OTTER_IC_SPECTRE=0` to drop them.
pub fn is_spectre_enabled() -> bool {
    *SPECTRE_ENABLED.get_or_init(|| env_flag("OTTER_IC_SPECTRE").unwrap_or(true))
}

/// Interpreter runs before a stub is compiled.
///
/// Defaults to [`DEFAULT_HOT_THRESHOLD`].
/// Override with `OTTER_IC_HOT_THRESHOLD=<u32>`.
pub fn hot_threshold() -> u32 {
    *HOT_THRESHOLD.get_or_init(|| {
        parse_env_u32("OTTER_IC_HOT_THRESHOLD")
            .filter(|threshold| *threshold > 0)
            .unwrap_or(DEFAULT_HOT_THRESHOLD)
    })
}

/// Consecutive compiled bailouts after which a stub is disabled.
///
/// Defaults to [`DEFAULT_BAILOUT_LIMIT`].
/// Override with `OTTER_IC_BAILOUT_LIMIT=<u32>`.
pub fn bailout_limit() -> u32 {
    *BAILOUT_LIMIT.get_or_init(|| {
        parse_env_u32("OTTER_IC_BAILOUT_LIMIT")
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_BAILOUT_LIMIT)
    })
}

/// Tiering knobs for one [`crate::IcRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Compile hot stubs at all.
    pub jit_enabled: bool,
    /// Interpreter runs before compiling.
    pub hot_threshold: u32,
    /// Consecutive compiled bailouts before disabling.
    pub bailout_limit: u32,
    /// Log counters on drop.
    pub stats: bool,
    /// Compiler configuration.
    pub jit: JitConfig,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            jit_enabled: true,
            hot_threshold: DEFAULT_HOT_THRESHOLD,
            bailout_limit: DEFAULT_BAILOUT_LIMIT,
            stats: false,
            jit: JitConfig::default(),
        }
    }
}

impl RuntimeOptions {
    /// Options from the `OTTER_IC_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            jit_enabled: is_jit_enabled(),
            hot_threshold: hot_threshold(),
            bailout_limit: bailout_limit(),
            stats: is_stats_enabled(),
            jit: JitConfig::default().with_spectre_mitigations(is_spectre_enabled()),
        }
    }
}
