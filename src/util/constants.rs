//! Centralized constants for Lumen runtime configuration
//!
//! All timeout and limit values in one place for easy tuning.
//! Every value here can be overridden from `[runtime]` in the config file.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════
// Execution Timeouts
// ═══════════════════════════════════════════════════════════════

/// Timeout for a single tool invocation
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for LLM inference calls
pub const INFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for establishing HTTP connections
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for an entire run (multi-hour workflows are expected)
pub const RUN_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

// ═══════════════════════════════════════════════════════════════
// Orchestration Limits
// ═══════════════════════════════════════════════════════════════

/// Maximum engine turns per run before it is failed
pub const DEFAULT_MAX_TURNS: u32 = 50;

/// Maximum sub-workflow nesting depth
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Days a terminal checkpoint is kept before `sweep` removes it
pub const DEFAULT_RETENTION_DAYS: u64 = 14;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_positive() {
        assert!(TOOL_TIMEOUT.as_secs() > 0);
        assert!(INFER_TIMEOUT.as_secs() > 0);
        assert!(CONNECT_TIMEOUT.as_secs() > 0);
        assert!(RUN_TIMEOUT > TOOL_TIMEOUT);
    }

    #[test]
    fn limits_are_sane() {
        assert!(DEFAULT_MAX_TURNS > 1);
        assert!(DEFAULT_MAX_DEPTH >= 1);
        assert!(DEFAULT_RETENTION_DAYS >= 1);
    }
}
