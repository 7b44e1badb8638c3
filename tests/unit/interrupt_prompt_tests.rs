//! Unit tests for interrupt prompt assembly and option overlays.

use codex_relay::jobs::event::{EventKind, NormalizedEvent};
use codex_relay::jobs::interrupt::{apply_overrides, build_respawn_prompt, SpawnOverrides};
use codex_relay::jobs::record::{EffectiveOptions, ReasoningEffort, SandboxPolicy};
use serde_json::json;

#[test]
fn prompt_contains_all_sections_in_order() {
    let tail = vec![
        NormalizedEvent::new(EventKind::Message, json!({ "text": "working on it" })),
        NormalizedEvent::new(EventKind::Progress, json!({ "kind": "turn.started" })),
    ];
    let prompt = build_respawn_prompt("job-9", &tail, "focus only on docs");

    let header_at = prompt
        .find("Prior Context (from interrupted job job-9)")
        .expect("header");
    let message_at = prompt.find("working on it").expect("tail message");
    let updated_at = prompt.find("Updated Instructions").expect("section");
    let new_prompt_at = prompt.find("focus only on docs").expect("new prompt");
    let reminder_at = prompt.find("re-read").expect("refresh reminder");

    assert!(header_at < message_at);
    assert!(message_at < updated_at);
    assert!(updated_at < new_prompt_at);
    assert!(new_prompt_at < reminder_at);
}

#[test]
fn tail_lines_carry_timestamp_and_kind() {
    let event = NormalizedEvent::new(EventKind::Message, json!({ "text": "hello" }));
    let timestamp = event.timestamp.clone();
    let prompt = build_respawn_prompt("j", &[event], "next");

    assert!(prompt.contains(&format!("[{timestamp}] message: hello")));
}

#[test]
fn empty_tail_renders_placeholder() {
    let prompt = build_respawn_prompt("j", &[], "next");
    assert!(prompt.contains("(no captured events)"));
}

#[test]
fn non_text_content_falls_back_to_json() {
    let event = NormalizedEvent::new(EventKind::Progress, json!({ "kind": "spawned" }));
    let prompt = build_respawn_prompt("j", &[event], "next");
    assert!(prompt.contains(r#"{"kind":"spawned"}"#));
}

#[test]
fn long_summaries_are_truncated() {
    let big = "x".repeat(2000);
    let event = NormalizedEvent::new(EventKind::Message, json!({ "text": big }));
    let prompt = build_respawn_prompt("j", &[event], "next");

    let line = prompt
        .lines()
        .find(|line| line.contains("message:"))
        .expect("tail line");
    assert!(line.len() < 600);
    assert!(line.ends_with("..."));
}

#[test]
fn overrides_replace_only_what_they_set() {
    let base = EffectiveOptions {
        model: Some("gpt-4o".into()),
        reasoning_effort: Some(ReasoningEffort::High),
        sandbox: Some(SandboxPolicy::ReadOnly),
        use_full_auto: false,
        working_directory: Some("/w".into()),
    };
    let effective = apply_overrides(
        base,
        SpawnOverrides {
            model: Some("gpt-5".into()),
            ..SpawnOverrides::default()
        },
    );

    assert_eq!(effective.model.as_deref(), Some("gpt-5"));
    assert_eq!(effective.reasoning_effort, Some(ReasoningEffort::High));
    assert_eq!(effective.sandbox, Some(SandboxPolicy::ReadOnly));
    assert_eq!(effective.working_directory.as_deref(), Some("/w"));
}

#[test]
fn sandbox_override_suppresses_inherited_full_auto() {
    let base = EffectiveOptions {
        use_full_auto: true,
        ..EffectiveOptions::default()
    };
    let effective = apply_overrides(
        base,
        SpawnOverrides {
            sandbox: Some(SandboxPolicy::WorkspaceWrite),
            full_auto: Some(true),
            ..SpawnOverrides::default()
        },
    );

    assert_eq!(effective.sandbox, Some(SandboxPolicy::WorkspaceWrite));
    assert!(!effective.use_full_auto);
}

#[test]
fn full_auto_override_holds_when_no_sandbox_is_set() {
    let base = EffectiveOptions::default();
    let effective = apply_overrides(
        base,
        SpawnOverrides {
            full_auto: Some(true),
            ..SpawnOverrides::default()
        },
    );
    assert!(effective.use_full_auto);
    assert_eq!(effective.sandbox, None);
}
