//! End-to-end lifecycle tests: spawn, stream ingest, termination, readers.

use codex_relay::jobs::event::EventKind;
use codex_relay::jobs::record::{JobStatus, RequestedOptions, SandboxPolicy};
use codex_relay::jobs::manager::SpawnRequest;
use codex_relay::AppError;

use super::test_helpers::{plain_request, stub_manager, wait_terminal, HELLO_AGENT};

#[tokio::test]
async fn happy_path_spawn_to_done() {
    let (manager, _dir) = stub_manager(HELLO_AGENT);

    let spawned = manager
        .spawn(SpawnRequest {
            prompt: "Say hello".to_owned(),
            options: RequestedOptions {
                sandbox: Some(SandboxPolicy::ReadOnly),
                ..RequestedOptions::default()
            },
            label: None,
        })
        .expect("spawn");
    assert_eq!(spawned.status, JobStatus::Running);

    wait_terminal(&manager, &spawned.job_id).await;

    let status = manager.status(&spawned.job_id).expect("status");
    assert_eq!(status.status, JobStatus::Done);
    assert_eq!(status.exit_code, Some(0));
    assert!(status.finished_at.is_some());

    let result = manager.result(&spawned.job_id).expect("result");
    assert_eq!(
        result.last_agent_message.as_deref(),
        Some("hello from subagent")
    );

    let page = manager
        .events(&spawned.job_id, None, 100)
        .expect("events");
    assert!(page.done);
    let kinds: Vec<EventKind> = page.events.iter().map(|ev| ev.kind).collect();
    assert!(kinds.contains(&EventKind::Progress), "spawned event missing");
    assert!(kinds.contains(&EventKind::Message));
    assert_eq!(kinds.last(), Some(&EventKind::Final));

    // The synthetic spawned event is first and names the sandbox.
    let first = &page.events[0];
    assert_eq!(first.content["kind"], "spawned");
    assert_eq!(first.content["effectiveSandbox"], "read-only");
}

#[tokio::test]
async fn spawned_argv_contains_resolved_sandbox() {
    let (manager, _dir) = stub_manager("exit 0");

    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    let page = manager.events(&spawned.job_id, None, 10).expect("events");
    let args = page.events[0].content["args"]
        .as_array()
        .expect("args array")
        .iter()
        .map(|v| v.as_str().unwrap_or_default().to_owned())
        .collect::<Vec<_>>();

    assert!(args.windows(2).any(|w| w == ["--sandbox", "workspace-write"]));
    assert_eq!(args.first().map(String::as_str), Some("exec"));
    assert_eq!(args.get(1).map(String::as_str), Some("--json"));
    assert_eq!(args.last().map(String::as_str), Some("p"));

    wait_terminal(&manager, &spawned.job_id).await;
}

#[tokio::test]
async fn events_paginate_without_gaps_or_duplicates() {
    let body = r#"
for i in 1 2 3 4 5 6 7; do
  printf '{"type":"item.completed","item":{"id":"%s","type":"agent_message","text":"msg-%s"}}\n' "$i" "$i"
done"#;
    let (manager, _dir) = stub_manager(body);

    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_terminal(&manager, &spawned.job_id).await;

    let mut cursor: Option<String> = None;
    let mut collected = Vec::new();
    loop {
        let page = manager
            .events(&spawned.job_id, cursor.as_deref(), 3)
            .expect("events");
        let was_empty = page.events.is_empty();
        collected.extend(page.events);
        cursor = Some(page.next_cursor.clone());
        if page.done && was_empty {
            break;
        }
    }

    let full = manager
        .events(&spawned.job_id, None, 2000)
        .expect("full read");
    assert_eq!(collected.len(), full.events.len());
    for (a, b) in collected.iter().zip(full.events.iter()) {
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.content, b.content);
    }

    // Spawned progress, seven messages, final.
    assert_eq!(full.events.len(), 9);
}

#[tokio::test]
async fn malformed_lines_become_error_events_without_killing_the_job() {
    let body = r#"printf 'not json at all\n'
printf '%s\n' '{"type":"item.completed","item":{"id":"1","type":"agent_message","text":"still here"}}'"#;
    let (manager, _dir) = stub_manager(body);

    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_terminal(&manager, &spawned.job_id).await;

    assert_eq!(
        manager.status(&spawned.job_id).expect("status").status,
        JobStatus::Done
    );

    let page = manager.events(&spawned.job_id, None, 100).expect("events");
    let parse_error = page
        .events
        .iter()
        .find(|ev| ev.content["message"] == "Failed to parse codex JSONL event")
        .expect("parse error event");
    assert_eq!(parse_error.kind, EventKind::Error);
    assert_eq!(parse_error.content["line"], "not json at all");

    let result = manager.result(&spawned.job_id).expect("result");
    assert_eq!(result.last_agent_message.as_deref(), Some("still here"));
}

#[tokio::test]
async fn stderr_is_captured_in_the_tail_only() {
    let body = r#"echo 'diagnostic noise' 1>&2
exit 0"#;
    let (manager, _dir) = stub_manager(body);

    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_terminal(&manager, &spawned.job_id).await;

    let result = manager.result(&spawned.job_id).expect("result");
    assert!(result.stderr_tail.contains("diagnostic noise"));

    // Stderr must not become events.
    let page = manager.events(&spawned.job_id, None, 100).expect("events");
    assert!(page
        .events
        .iter()
        .all(|ev| ev.content["line"] != "diagnostic noise"));
}

#[tokio::test]
async fn nonzero_exit_is_failed_with_fallback_message() {
    let (manager, _dir) = stub_manager("exit 3");

    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_terminal(&manager, &spawned.job_id).await;

    let result = manager.result(&spawned.job_id).expect("result");
    assert_eq!(result.status.status, JobStatus::Failed);
    assert_eq!(result.status.exit_code, Some(3));
    assert!(result.last_agent_message.is_none());
}

#[tokio::test]
async fn unterminated_final_line_is_still_ingested() {
    // printf without the trailing newline; EOF flush must pick it up.
    let body = r#"printf '%s' '{"type":"item.completed","item":{"id":"1","type":"agent_message","text":"no newline"}}'"#;
    let (manager, _dir) = stub_manager(body);

    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_terminal(&manager, &spawned.job_id).await;

    let result = manager.result(&spawned.job_id).expect("result");
    assert_eq!(result.last_agent_message.as_deref(), Some("no newline"));
}

#[tokio::test]
async fn unknown_job_id_raises_not_found() {
    let (manager, _dir) = stub_manager("exit 0");

    match manager.status("no-such-job") {
        Err(AppError::NotFound(msg)) => assert!(msg.contains("no-such-job")),
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(manager.events("no-such-job", None, 10).is_err());
    assert!(manager.cancel("no-such-job", false).is_err());
}

#[tokio::test]
async fn spawn_failure_creates_no_record() {
    let manager = codex_relay::jobs::manager::JobManager::new(
        codex_relay::config::LauncherConfig {
            codex_bin: "/nonexistent/codex-binary".to_owned(),
        },
    );

    match manager.spawn(plain_request("p")) {
        Err(AppError::Spawn(msg)) => assert!(msg.contains("failed to spawn")),
        other => panic!("expected Spawn error, got {other:?}"),
    }
    assert_eq!(manager.running_count(), 0);
}

#[tokio::test]
async fn status_reads_are_stable_between_mutations() {
    let (manager, _dir) = stub_manager(HELLO_AGENT);
    let spawned = manager.spawn(plain_request("p")).expect("spawn");
    wait_terminal(&manager, &spawned.job_id).await;

    let first = manager.status(&spawned.job_id).expect("status");
    let second = manager.status(&spawned.job_id).expect("status");
    assert_eq!(first.status, second.status);
    assert_eq!(first.started_at, second.started_at);
    assert_eq!(first.finished_at, second.finished_at);
    assert_eq!(first.exit_code, second.exit_code);
}
