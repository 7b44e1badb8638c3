//! Unit tests for sandbox resolution and agent argv construction.
//!
//! Resolution reads the server environment, so tests that touch the default
//! sandbox variable serialize behind a process-local lock.

use std::sync::{Mutex, OnceLock};

use codex_relay::config::DEFAULT_SANDBOX_ENV;
use codex_relay::jobs::manager::{build_codex_args, resolve_effective};
use codex_relay::jobs::record::{
    EffectiveOptions, ReasoningEffort, RequestedOptions, SandboxPolicy,
};

/// Serialize tests that mutate process environment variables.
fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[test]
fn caller_sandbox_wins_over_environment() {
    let _guard = env_lock();
    std::env::set_var(DEFAULT_SANDBOX_ENV, "danger-full-access");

    let effective = resolve_effective(&RequestedOptions {
        sandbox: Some(SandboxPolicy::ReadOnly),
        ..RequestedOptions::default()
    });
    assert_eq!(effective.sandbox, Some(SandboxPolicy::ReadOnly));
    assert!(!effective.use_full_auto);

    std::env::remove_var(DEFAULT_SANDBOX_ENV);
}

#[test]
fn environment_default_applies_when_caller_is_silent() {
    let _guard = env_lock();
    std::env::set_var(DEFAULT_SANDBOX_ENV, "read-only");

    let effective = resolve_effective(&RequestedOptions::default());
    assert_eq!(effective.sandbox, Some(SandboxPolicy::ReadOnly));
    assert!(!effective.use_full_auto);

    std::env::remove_var(DEFAULT_SANDBOX_ENV);
}

#[test]
fn builtin_default_is_workspace_write() {
    let _guard = env_lock();
    std::env::remove_var(DEFAULT_SANDBOX_ENV);

    let effective = resolve_effective(&RequestedOptions::default());
    assert_eq!(effective.sandbox, Some(SandboxPolicy::WorkspaceWrite));
    assert!(!effective.use_full_auto);
}

#[test]
fn full_auto_leaves_sandbox_unset_without_any_default() {
    let _guard = env_lock();
    std::env::remove_var(DEFAULT_SANDBOX_ENV);

    let effective = resolve_effective(&RequestedOptions {
        full_auto: Some(true),
        ..RequestedOptions::default()
    });
    assert_eq!(effective.sandbox, None);
    assert!(effective.use_full_auto);
}

#[test]
fn explicit_sandbox_suppresses_full_auto() {
    let _guard = env_lock();
    std::env::remove_var(DEFAULT_SANDBOX_ENV);

    let effective = resolve_effective(&RequestedOptions {
        sandbox: Some(SandboxPolicy::WorkspaceWrite),
        full_auto: Some(true),
        ..RequestedOptions::default()
    });
    assert_eq!(effective.sandbox, Some(SandboxPolicy::WorkspaceWrite));
    assert!(!effective.use_full_auto);
}

#[test]
fn environment_default_also_suppresses_full_auto() {
    let _guard = env_lock();
    std::env::set_var(DEFAULT_SANDBOX_ENV, "workspace-write");

    let effective = resolve_effective(&RequestedOptions {
        full_auto: Some(true),
        ..RequestedOptions::default()
    });
    assert_eq!(effective.sandbox, Some(SandboxPolicy::WorkspaceWrite));
    assert!(!effective.use_full_auto);

    std::env::remove_var(DEFAULT_SANDBOX_ENV);
}

#[test]
fn unparsable_environment_default_is_ignored() {
    let _guard = env_lock();
    std::env::set_var(DEFAULT_SANDBOX_ENV, "fort-knox");

    let effective = resolve_effective(&RequestedOptions::default());
    assert_eq!(effective.sandbox, Some(SandboxPolicy::WorkspaceWrite));

    std::env::remove_var(DEFAULT_SANDBOX_ENV);
}

#[test]
fn minimal_argv_shape() {
    let args = build_codex_args(
        "Say hello",
        &EffectiveOptions {
            sandbox: Some(SandboxPolicy::WorkspaceWrite),
            ..EffectiveOptions::default()
        },
    );
    assert_eq!(
        args,
        vec![
            "exec",
            "--json",
            "--sandbox",
            "workspace-write",
            "--skip-git-repo-check",
            "Say hello",
        ]
    );
}

#[test]
fn full_argv_order_is_fixed() {
    let args = build_codex_args(
        "do the thing",
        &EffectiveOptions {
            model: Some("gpt-4o".into()),
            reasoning_effort: Some(ReasoningEffort::High),
            sandbox: Some(SandboxPolicy::ReadOnly),
            use_full_auto: false,
            working_directory: Some("/w".into()),
        },
    );
    assert_eq!(
        args,
        vec![
            "exec",
            "--json",
            "--model",
            "gpt-4o",
            "-c",
            "model_reasoning_effort=\"high\"",
            "--sandbox",
            "read-only",
            "-C",
            "/w",
            "--skip-git-repo-check",
            "do the thing",
        ]
    );
}

#[test]
fn full_auto_argv_has_flag_and_no_sandbox() {
    let args = build_codex_args(
        "p",
        &EffectiveOptions {
            use_full_auto: true,
            ..EffectiveOptions::default()
        },
    );
    assert_eq!(
        args,
        vec!["exec", "--json", "--full-auto", "--skip-git-repo-check", "p"]
    );
}

#[test]
fn prompt_is_always_the_last_positional() {
    let prompt = "multi word prompt with \"quotes\" and $VARS";
    let args = build_codex_args(prompt, &EffectiveOptions::default());
    assert_eq!(args.last().map(String::as_str), Some(prompt));
}
