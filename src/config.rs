//! Runtime configuration.
//!
//! The relay keeps almost no static configuration: the agent binary and log
//! format come from the CLI, and the two spawn-time knobs come from
//! environment variables that are re-read on every spawn so an external
//! orchestrator can adjust them without a restart.

use tracing::warn;

use crate::jobs::record::SandboxPolicy;

/// Environment variable naming the sandbox policy applied when the caller
/// does not supply one.
pub const DEFAULT_SANDBOX_ENV: &str = "CODEX_RELAY_DEFAULT_SANDBOX";

/// Environment variable overriding the concurrency cap.
pub const MAX_JOBS_ENV: &str = "CODEX_RELAY_MAX_JOBS";

/// Concurrency cap used when [`MAX_JOBS_ENV`] is absent or invalid.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 32;

/// Settings fixed at process startup.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Agent binary invoked for every subagent job (normally `codex`).
    pub codex_bin: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            codex_bin: "codex".to_owned(),
        }
    }
}

/// Server-environment default sandbox policy, if one is configured.
///
/// Unparsable values are ignored with a warning rather than failing the
/// spawn, so a typo in the environment degrades to the built-in default.
#[must_use]
pub fn default_sandbox() -> Option<SandboxPolicy> {
    let raw = std::env::var(DEFAULT_SANDBOX_ENV).ok()?;
    match raw.parse::<SandboxPolicy>() {
        Ok(policy) => Some(policy),
        Err(_) => {
            warn!(
                value = raw.as_str(),
                env = DEFAULT_SANDBOX_ENV,
                "ignoring unrecognized default sandbox policy"
            );
            None
        }
    }
}

/// Concurrency cap consulted at every spawn.
///
/// Invalid or absent values fall back to [`DEFAULT_MAX_CONCURRENT_JOBS`].
/// Zero is treated as invalid; a cap of zero would make every spawn fail.
#[must_use]
pub fn max_concurrent_jobs() -> usize {
    match std::env::var(MAX_JOBS_ENV) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(cap) if cap > 0 => cap,
            _ => {
                warn!(
                    value = raw.as_str(),
                    env = MAX_JOBS_ENV,
                    "ignoring invalid concurrency cap"
                );
                DEFAULT_MAX_CONCURRENT_JOBS
            }
        },
        Err(_) => DEFAULT_MAX_CONCURRENT_JOBS,
    }
}
