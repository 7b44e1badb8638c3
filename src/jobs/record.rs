//! Job state, option resolution types, and the per-job record.
//!
//! A [`JobRecord`] is created atomically with a successful spawn and never
//! leaves the registry. All mutable state sits behind one mutex with short,
//! never-awaiting critical sections; readers copy out under the same lock,
//! which is what makes cursor reads over the append-only event vector safe.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::jobs::event::{normalize, EventKind, NormalizedEvent};
use crate::jobs::framer::LineFramer;
use crate::jobs::tail::{TailBuffer, STREAM_TAIL_CAP};

/// Lifecycle status of a subagent job.
///
/// `Running` is the only initial state. The three terminal states are
/// absorbing: no transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Child process is alive and being supervised.
    Running,
    /// Child exited zero without a pending cancellation.
    Done,
    /// Child exited non-zero, or supervision failed.
    Failed,
    /// Cancellation was requested and no turn completed before exit.
    Canceled,
}

impl JobStatus {
    /// Whether the status is one of the three absorbing states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasoning effort forwarded to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Value placed in the `-c model_reasoning_effort="…"` override.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Sandbox policy forwarded to the agent via `--sandbox`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxPolicy {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxPolicy {
    /// Wire and argv name of the policy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WorkspaceWrite => "workspace-write",
            Self::DangerFullAccess => "danger-full-access",
        }
    }
}

impl FromStr for SandboxPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "read-only" => Ok(Self::ReadOnly),
            "workspace-write" => Ok(Self::WorkspaceWrite),
            "danger-full-access" => Ok(Self::DangerFullAccess),
            other => Err(format!("unknown sandbox policy: {other}")),
        }
    }
}

/// Options exactly as the caller requested them, echoed in spawn metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_auto: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Options actually applied to a spawned child after precedence resolution.
///
/// Interrupt respawns inherit these verbatim, so resolution happens exactly
/// once per caller-initiated spawn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxPolicy>,
    /// Whether `--full-auto` is passed. Always false when a sandbox is set.
    #[serde(default)]
    pub use_full_auto: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Caller-requested arguments, resolved options, and the echo-only label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnMetadata {
    pub requested: RequestedOptions,
    pub effective: EffectiveOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Kind of termination signal delivered to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGTERM; the agent flushes and exits on its own schedule.
    Graceful,
    /// SIGKILL; immediate.
    Force,
}

/// Mutable portion of a job record, guarded by the record mutex.
#[derive(Debug)]
struct JobState {
    status: JobStatus,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    exit_signal: Option<i32>,
    cancel_requested: bool,
    turn_completed: bool,
    last_agent_message: Option<String>,
    events: Vec<NormalizedEvent>,
    stdout_tail: TailBuffer,
    stderr_tail: TailBuffer,
    framer: LineFramer,
    spawn_metadata: SpawnMetadata,
}

/// Snapshot of the externally visible status fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Snapshot of the fields the `result` operation returns on top of status.
#[derive(Debug, Clone)]
pub struct ResultSnapshot {
    pub status: StatusSnapshot,
    pub last_agent_message: Option<String>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// One subagent job: identity, completion signal, and guarded state.
#[derive(Debug)]
pub struct JobRecord {
    id: String,
    started_at: DateTime<Utc>,
    kill_tx: mpsc::UnboundedSender<KillSignal>,
    done: CancellationToken,
    state: Mutex<JobState>,
}

impl JobRecord {
    /// Create a record for a freshly spawned child.
    #[must_use]
    pub fn new(
        id: String,
        spawn_metadata: SpawnMetadata,
        kill_tx: mpsc::UnboundedSender<KillSignal>,
    ) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            kill_tx,
            done: CancellationToken::new(),
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                finished_at: None,
                exit_code: None,
                exit_signal: None,
                cancel_requested: false,
                turn_completed: false,
                last_agent_message: None,
                events: Vec::new(),
                stdout_tail: TailBuffer::new(STREAM_TAIL_CAP),
                stderr_tail: TailBuffer::new(STREAM_TAIL_CAP),
                framer: LineFramer::new(),
                spawn_metadata,
            }),
        }
    }

    /// Opaque job identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn timestamp.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Completion signal; fired exactly once, after the terminal event is
    /// appended.
    #[must_use]
    pub fn done_signal(&self) -> &CancellationToken {
        &self.done
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Readers ──────────────────────────────────────────────────────────

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.lock_state().status
    }

    /// Whether the job has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Defensive copy of the status fields.
    #[must_use]
    pub fn status_snapshot(&self) -> StatusSnapshot {
        let state = self.lock_state();
        StatusSnapshot {
            job_id: self.id.clone(),
            status: state.status,
            started_at: self.started_at,
            finished_at: state.finished_at,
            exit_code: state.exit_code,
        }
    }

    /// Defensive copy of the result fields.
    #[must_use]
    pub fn result_snapshot(&self) -> ResultSnapshot {
        let state = self.lock_state();
        ResultSnapshot {
            status: StatusSnapshot {
                job_id: self.id.clone(),
                status: state.status,
                started_at: self.started_at,
                finished_at: state.finished_at,
                exit_code: state.exit_code,
            },
            last_agent_message: state.last_agent_message.clone(),
            stdout_tail: state.stdout_tail.as_text(),
            stderr_tail: state.stderr_tail.as_text(),
        }
    }

    /// Defensive copy of the spawn metadata.
    #[must_use]
    pub fn spawn_metadata(&self) -> SpawnMetadata {
        self.lock_state().spawn_metadata.clone()
    }

    /// Copy the events in `[start, start + max)` plus the vector length and
    /// whether the job is terminal, all under one lock acquisition.
    #[must_use]
    pub fn events_page(&self, start: usize, max: usize) -> (Vec<NormalizedEvent>, usize, bool) {
        let state = self.lock_state();
        let len = state.events.len();
        let begin = start.min(len);
        let end = begin.saturating_add(max).min(len);
        let page = state.events[begin..end].to_vec();
        (page, end, state.status.is_terminal())
    }

    /// Last `max` events, optionally filtered by kind, in original order.
    #[must_use]
    pub fn event_tail(&self, max: usize, kinds: Option<&[EventKind]>) -> Vec<NormalizedEvent> {
        if max == 0 {
            return Vec::new();
        }
        let state = self.lock_state();
        let filtered: Vec<&NormalizedEvent> = state
            .events
            .iter()
            .filter(|ev| kinds.is_none_or(|ks| ks.contains(&ev.kind)))
            .collect();
        let skip = filtered.len().saturating_sub(max);
        filtered.into_iter().skip(skip).cloned().collect()
    }

    // ── Mutators (spawn path, ingest path, cancel, termination) ─────────

    /// Append an already-built event. Used by the manager for the synthetic
    /// `spawned` event; stream events arrive via the ingest methods.
    pub fn append_event(&self, event: NormalizedEvent) {
        self.lock_state().events.push(event);
    }

    /// Ingest a chunk of stdout: tail capture, framing, and normalization.
    pub fn ingest_stdout_chunk(&self, chunk: &[u8]) {
        let mut state = self.lock_state();
        state.stdout_tail.push(chunk);
        let lines = state.framer.push(chunk);
        for line in lines {
            Self::ingest_line(&mut state, &line);
        }
    }

    /// Flush the framer's partial line at stdout EOF.
    pub fn flush_stdout(&self) {
        let mut state = self.lock_state();
        if let Some(line) = state.framer.flush() {
            Self::ingest_line(&mut state, &line);
        }
    }

    /// Ingest a chunk of stderr: tail capture only.
    pub fn ingest_stderr_chunk(&self, chunk: &[u8]) {
        self.lock_state().stderr_tail.push(chunk);
    }

    fn ingest_line(state: &mut JobState, line: &str) {
        let event = match serde_json::from_str::<Value>(line) {
            Ok(raw) => match normalize(&raw) {
                Some(event) => event,
                None => return,
            },
            Err(err) => NormalizedEvent::new(
                EventKind::Error,
                json!({
                    "message": "Failed to parse codex JSONL event",
                    "line": line,
                    "error": err.to_string(),
                }),
            ),
        };

        match event.kind {
            EventKind::Message => {
                if let Some(text) = event.content.get("text").and_then(Value::as_str) {
                    state.last_agent_message = Some(text.to_owned());
                }
            }
            EventKind::Progress => {
                if event.content.get("kind").and_then(Value::as_str) == Some("turn.completed") {
                    state.turn_completed = true;
                }
            }
            _ => {}
        }

        state.events.push(event);
    }

    /// Request cancellation.
    ///
    /// Returns false without side effects when the job is not running.
    /// Otherwise marks the record and asks the supervisor to signal the
    /// child; terminal status is applied only when the child actually exits.
    pub fn request_cancel(&self, force: bool) -> bool {
        {
            let mut state = self.lock_state();
            if state.status.is_terminal() {
                return false;
            }
            state.cancel_requested = true;
        }
        let signal = if force {
            KillSignal::Force
        } else {
            KillSignal::Graceful
        };
        // The supervisor outlives the child; a closed channel means the job
        // already terminated and the cancel is moot.
        let _ = self.kill_tx.send(signal);
        true
    }

    /// Apply child termination: exit fields, terminal status, `final` event.
    ///
    /// Idempotent; only the first call out of `Running` has any effect. A
    /// requested cancel wins over the exit code unless a turn completed,
    /// because the agent traps the termination signal and may exit zero.
    pub fn finalize(&self, exit_code: Option<i32>, exit_signal: Option<i32>) {
        {
            let mut state = self.lock_state();
            if state.status.is_terminal() {
                return;
            }
            state.finished_at = Some(Utc::now());
            state.exit_code = exit_code;
            state.exit_signal = exit_signal;
            state.status = if state.cancel_requested && !state.turn_completed {
                JobStatus::Canceled
            } else if exit_code == Some(0) {
                JobStatus::Done
            } else {
                JobStatus::Failed
            };

            let final_event = NormalizedEvent::new(
                EventKind::Final,
                json!({
                    "jobId": self.id.clone(),
                    "status": state.status.as_str(),
                    "exitCode": state.exit_code,
                    "exitSignal": state.exit_signal,
                    "lastMessage": state.last_agent_message.clone(),
                }),
            );
            state.events.push(final_event);
        }
        self.done.cancel();
    }

    /// Apply a supervision failure that precedes any observed exit.
    ///
    /// The record is closed with an `error` event instead of a `final` one:
    /// `canceled` when a cancel was pending, `failed` otherwise.
    pub fn fail_supervision(&self, message: String) {
        {
            let mut state = self.lock_state();
            if state.status.is_terminal() {
                return;
            }
            state.finished_at = Some(Utc::now());
            state.status = if state.cancel_requested {
                JobStatus::Canceled
            } else {
                JobStatus::Failed
            };
            let event = NormalizedEvent::new(EventKind::Error, json!({ "message": message }));
            state.events.push(event);
        }
        self.done.cancel();
    }
}
