//! Interrupt coordinator flows: inheritance, context injection, refusals.

use codex_relay::jobs::interrupt::{interrupt, InterruptRequest, SpawnOverrides};
use codex_relay::jobs::manager::SpawnRequest;
use codex_relay::jobs::record::{
    JobStatus, ReasoningEffort, RequestedOptions, SandboxPolicy,
};

use super::test_helpers::{plain_request, stub_manager, wait_terminal};

fn interrupt_request(job_id: &str, new_prompt: &str, wait_ms: u64) -> InterruptRequest {
    InterruptRequest {
        job_id: job_id.to_owned(),
        new_prompt: new_prompt.to_owned(),
        wait_ms: Some(wait_ms),
        include_event_tail: None,
        tail_max_events: None,
        overrides: None,
    }
}

/// Stub that announces progress, then sleeps until SIGTERM and exits 137.
const WORKING_THEN_TERM_137: &str = r#"trap 'exit 137' TERM
printf '%s\n' '{"type":"item.completed","item":{"id":"1","type":"agent_message","text":"working on it"}}'
sleep 30 > /dev/null 2>&1 &
wait $!"#;

async fn wait_for_event_count(
    manager: &codex_relay::jobs::manager::JobManager,
    job_id: &str,
    at_least: usize,
) {
    let mut waited = 0;
    while manager.events(job_id, None, 100).expect("events").events.len() < at_least {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        waited += 50;
        assert!(waited < 5_000, "events never arrived for {job_id}");
    }
}

#[tokio::test]
async fn interrupt_inherits_options_and_injects_the_tail() {
    let (manager, _dir) = stub_manager(WORKING_THEN_TERM_137);

    let spawned = manager
        .spawn(SpawnRequest {
            prompt: "original task".to_owned(),
            options: RequestedOptions {
                model: Some("gpt-4o".to_owned()),
                reasoning_effort: Some(ReasoningEffort::High),
                sandbox: Some(SandboxPolicy::ReadOnly),
                working_directory: Some("/w".to_owned()),
                ..RequestedOptions::default()
            },
            label: Some("docs-job".to_owned()),
        })
        .expect("spawn");
    wait_for_event_count(&manager, &spawned.job_id, 2).await;

    let outcome = interrupt(
        &manager,
        interrupt_request(&spawned.job_id, "focus only on docs", 1_000),
    )
    .await
    .expect("interrupt");

    assert!(outcome.respawned, "refused: {:?}", outcome.reason);
    assert_eq!(outcome.previous_job_id, spawned.job_id);
    assert_eq!(outcome.previous_status, JobStatus::Canceled);
    let new_job_id = outcome.new_job_id.expect("new job id");

    // The respawn inherited the effective options and the label.
    let metadata = manager.spawn_metadata(&new_job_id).expect("metadata");
    assert_eq!(metadata.effective.model.as_deref(), Some("gpt-4o"));
    assert_eq!(
        metadata.effective.reasoning_effort,
        Some(ReasoningEffort::High)
    );
    assert_eq!(metadata.effective.sandbox, Some(SandboxPolicy::ReadOnly));
    assert_eq!(metadata.effective.working_directory.as_deref(), Some("/w"));
    assert_eq!(metadata.label.as_deref(), Some("docs-job"));

    // The respawn argv and prompt carry the context sections.
    let page = manager.events(&new_job_id, None, 10).expect("events");
    let args: Vec<String> = page.events[0].content["args"]
        .as_array()
        .expect("args")
        .iter()
        .map(|v| v.as_str().unwrap_or_default().to_owned())
        .collect();
    assert!(args.windows(2).any(|w| w == ["--model", "gpt-4o"]));
    assert!(args.windows(2).any(|w| w == ["--sandbox", "read-only"]));
    assert!(args.windows(2).any(|w| w == ["-C", "/w"]));

    let prompt = args.last().expect("prompt positional");
    assert!(prompt.contains(&format!(
        "Prior Context (from interrupted job {})",
        spawned.job_id
    )));
    assert!(prompt.contains("working on it"));
    assert!(prompt.contains("Updated Instructions"));
    assert!(prompt.contains("focus only on docs"));
    assert!(prompt.contains("re-read"));

    manager.cancel(&new_job_id, true).expect("cancel respawn");
    wait_terminal(&manager, &new_job_id).await;
}

#[tokio::test]
async fn interrupt_refuses_when_job_is_not_running() {
    let (manager, _dir) = stub_manager("exit 0");
    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_terminal(&manager, &spawned.job_id).await;

    let outcome = interrupt(&manager, interrupt_request(&spawned.job_id, "again", 100))
        .await
        .expect("interrupt");

    assert!(!outcome.respawned);
    assert_eq!(outcome.previous_status, JobStatus::Done);
    let reason = outcome.reason.expect("refusal reason");
    assert!(reason.contains("not running"));
    assert!(reason.contains("done"));
    assert!(outcome.new_job_id.is_none());
}

#[tokio::test]
async fn interrupt_refuses_on_natural_completion_during_the_wait() {
    // The child finishes its turn and exits 0 on its own, ignoring SIGTERM
    // long enough for the exit to look natural.
    let body = r#"trap '' TERM
printf '%s\n' '{"type":"turn.completed","usage":{}}'
sleep 0.3
exit 0"#;
    let (manager, _dir) = stub_manager(body);

    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_for_event_count(&manager, &spawned.job_id, 2).await;

    let outcome = interrupt(&manager, interrupt_request(&spawned.job_id, "change", 5_000))
        .await
        .expect("interrupt");

    assert!(!outcome.respawned);
    assert_eq!(outcome.previous_status, JobStatus::Done);
    assert!(outcome
        .reason
        .expect("refusal reason")
        .contains("completed naturally"));

    // No second job was spawned.
    assert_eq!(manager.running_count(), 0);
}

#[tokio::test]
async fn interrupt_applies_overrides_over_inherited_options() {
    let (manager, _dir) = stub_manager(WORKING_THEN_TERM_137);

    let spawned = manager
        .spawn(SpawnRequest {
            prompt: "task".to_owned(),
            options: RequestedOptions {
                model: Some("gpt-4o".to_owned()),
                sandbox: Some(SandboxPolicy::ReadOnly),
                ..RequestedOptions::default()
            },
            label: None,
        })
        .expect("spawn");
    wait_for_event_count(&manager, &spawned.job_id, 2).await;

    let outcome = interrupt(
        &manager,
        InterruptRequest {
            overrides: Some(SpawnOverrides {
                sandbox: Some(SandboxPolicy::WorkspaceWrite),
                ..SpawnOverrides::default()
            }),
            ..interrupt_request(&spawned.job_id, "write now", 1_000)
        },
    )
    .await
    .expect("interrupt");

    let new_job_id = outcome.new_job_id.expect("respawned");
    let metadata = manager.spawn_metadata(&new_job_id).expect("metadata");
    assert_eq!(metadata.effective.sandbox, Some(SandboxPolicy::WorkspaceWrite));
    assert_eq!(metadata.effective.model.as_deref(), Some("gpt-4o"));

    manager.cancel(&new_job_id, true).expect("cancel respawn");
    wait_terminal(&manager, &new_job_id).await;
}

#[tokio::test]
async fn interrupt_without_tail_still_formats_the_prompt() {
    let (manager, _dir) = stub_manager(WORKING_THEN_TERM_137);
    let spawned = manager.spawn(plain_request("task")).expect("spawn");
    wait_for_event_count(&manager, &spawned.job_id, 2).await;

    let outcome = interrupt(
        &manager,
        InterruptRequest {
            include_event_tail: Some(false),
            ..interrupt_request(&spawned.job_id, "redo", 1_000)
        },
    )
    .await
    .expect("interrupt");

    let new_job_id = outcome.new_job_id.expect("respawned");
    let page = manager.events(&new_job_id, None, 10).expect("events");
    let args = page.events[0].content["args"].as_array().expect("args");
    let prompt = args.last().and_then(|v| v.as_str()).expect("prompt");
    assert!(prompt.contains("(no captured events)"));
    assert!(!prompt.contains("working on it"));

    manager.cancel(&new_job_id, true).expect("cancel respawn");
    wait_terminal(&manager, &new_job_id).await;
}

#[tokio::test]
async fn interrupt_of_unknown_job_raises() {
    let (manager, _dir) = stub_manager("exit 0");
    let err = interrupt(&manager, interrupt_request("ghost", "p", 10))
        .await
        .expect_err("unknown job");
    assert!(err.to_string().contains("unknown jobId"));
}
