//! Interrupt coordinator: cancel, bounded wait, respawn with context.
//!
//! Composes the manager's cancel, wait, and spawn-with-effective operations
//! into one policy: stop a running job gracefully, carry a tail of its event
//! stream into a fresh prompt, and relaunch under the same (optionally
//! overridden) effective options. A job that completes naturally while the
//! coordinator is waiting is left alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::event::{EventKind, NormalizedEvent};
use crate::jobs::manager::JobManager;
use crate::jobs::record::{EffectiveOptions, JobStatus, ReasoningEffort, SandboxPolicy};
use crate::Result;

/// Default and maximum wait for the canceled job to exit, in milliseconds.
pub const DEFAULT_WAIT_MS: u64 = 250;
pub const MAX_WAIT_MS: u64 = 60_000;

/// Default and hard cap for the injected event tail length.
pub const DEFAULT_TAIL_MAX_EVENTS: usize = 25;
pub const MAX_TAIL_MAX_EVENTS: usize = 25;

/// Per-line cap applied to event summaries in the respawn prompt.
const SUMMARY_MAX_CHARS: usize = 400;

/// Event kinds worth carrying into the respawn prompt. Tool chatter is
/// omitted; the replacement job will re-run whatever tools it needs.
const TAIL_KINDS: [EventKind; 3] = [EventKind::Message, EventKind::Error, EventKind::Progress];

/// Option overrides overlaid onto the interrupted job's effective options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOverrides {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub sandbox: Option<SandboxPolicy>,
    #[serde(default)]
    pub full_auto: Option<bool>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// Arguments for one interrupt request.
#[derive(Debug, Clone)]
pub struct InterruptRequest {
    pub job_id: String,
    pub new_prompt: String,
    pub wait_ms: Option<u64>,
    pub include_event_tail: Option<bool>,
    pub tail_max_events: Option<usize>,
    pub overrides: Option<SpawnOverrides>,
}

/// Outcome of an interrupt: either a respawn or a structured refusal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptOutcome {
    pub previous_job_id: String,
    pub previous_status: JobStatus,
    pub respawned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl InterruptOutcome {
    fn refusal(job_id: &str, status: JobStatus, reason: String) -> Self {
        Self {
            previous_job_id: job_id.to_owned(),
            previous_status: status,
            respawned: false,
            new_job_id: None,
            reason: Some(reason),
        }
    }
}

/// Interrupt a running job and respawn it with an updated prompt.
///
/// Refuses (rather than erring) when the job is not running, and when the
/// job reached `done` or `failed` on its own during the cancellation wait;
/// in the latter case no second job is spawned. Unknown job ids raise.
pub async fn interrupt(manager: &JobManager, request: InterruptRequest) -> Result<InterruptOutcome> {
    let job_id = request.job_id.as_str();

    let status = manager.status(job_id)?.status;
    if status.is_terminal() {
        return Ok(InterruptOutcome::refusal(
            job_id,
            status,
            format!("job is not running (status={status})"),
        ));
    }

    let metadata = manager.spawn_metadata(job_id)?;

    let include_tail = request.include_event_tail.unwrap_or(true);
    let tail = if include_tail {
        let max = request
            .tail_max_events
            .unwrap_or(DEFAULT_TAIL_MAX_EVENTS)
            .min(MAX_TAIL_MAX_EVENTS);
        manager.event_tail(job_id, max, Some(&TAIL_KINDS))?
    } else {
        Vec::new()
    };

    if !manager.cancel(job_id, false)? {
        // The job slipped into a terminal state between the status read and
        // the cancel; report whatever it is now.
        let now = manager.status(job_id)?.status;
        return Ok(InterruptOutcome::refusal(
            job_id,
            now,
            format!("job is not running (status={now})"),
        ));
    }

    let wait_ms = request.wait_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS);
    if wait_ms > 0 {
        manager.wait_for_exit(job_id, wait_ms).await?;
    }

    let after_wait = manager.status(job_id)?.status;
    if matches!(after_wait, JobStatus::Done | JobStatus::Failed) {
        return Ok(InterruptOutcome::refusal(
            job_id,
            after_wait,
            "job completed naturally while waiting for cancellation".to_owned(),
        ));
    }

    let effective = apply_overrides(metadata.effective, request.overrides.unwrap_or_default());
    let prompt = build_respawn_prompt(job_id, &tail, &request.new_prompt);

    let spawned = manager.spawn_with_effective(
        &prompt,
        metadata.requested,
        effective,
        metadata.label,
    )?;

    Ok(InterruptOutcome {
        previous_job_id: job_id.to_owned(),
        previous_status: after_wait,
        respawned: true,
        new_job_id: Some(spawned.job_id),
        reason: None,
    })
}

/// Overlay overrides onto captured effective options.
///
/// The sandbox-explicit rule is re-applied after the overlay: a set sandbox
/// always suppresses `--full-auto`, whether it came from the original spawn
/// or from the overrides.
#[must_use]
pub fn apply_overrides(base: EffectiveOptions, overrides: SpawnOverrides) -> EffectiveOptions {
    let mut effective = EffectiveOptions {
        model: overrides.model.or(base.model),
        reasoning_effort: overrides.reasoning_effort.or(base.reasoning_effort),
        sandbox: overrides.sandbox.or(base.sandbox),
        use_full_auto: overrides.full_auto.unwrap_or(base.use_full_auto),
        working_directory: overrides.working_directory.or(base.working_directory),
    };
    if effective.sandbox.is_some() {
        effective.use_full_auto = false;
    }
    effective
}

/// Assemble the respawn prompt: prior-context header, formatted event tail,
/// updated instructions, and the refresh reminder.
#[must_use]
pub fn build_respawn_prompt(job_id: &str, tail: &[NormalizedEvent], new_prompt: &str) -> String {
    let mut prompt = format!("Prior Context (from interrupted job {job_id})\n\n");

    if tail.is_empty() {
        prompt.push_str("(no captured events)\n");
    } else {
        for event in tail {
            prompt.push_str(&format!(
                "[{}] {}: {}\n",
                event.timestamp,
                event.kind,
                summarize_content(&event.content)
            ));
        }
    }

    prompt.push_str("\nUpdated Instructions\n\n");
    prompt.push_str(new_prompt);
    prompt.push_str(
        "\n\nBefore editing any file, re-read it first; it may have changed \
         since the interrupted run.",
    );
    prompt
}

/// One-line rendering of an event payload for the prompt tail.
///
/// Prefers a `text` field, then a bare string content; anything else falls
/// back to compact JSON.
fn summarize_content(content: &Value) -> String {
    let text = match content.get("text").and_then(Value::as_str) {
        Some(text) => text.to_owned(),
        None => match content.as_str() {
            Some(text) => text.to_owned(),
            None => content.to_string(),
        },
    };
    truncate_chars(&text.replace('\n', " "), SUMMARY_MAX_CHARS)
}

/// Truncate to at most `max_len` bytes on a char boundary, appending an
/// ellipsis when something was dropped.
fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_owned();
    }
    let limit = max_len.saturating_sub(3);
    let boundary = text
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= limit)
        .last()
        .unwrap_or(0);
    format!("{}...", &text[..boundary])
}
