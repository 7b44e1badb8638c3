//! Subagent job manager.
//!
//! Owns the registry of every job ever spawned in this process, launches
//! `codex exec --json` children, attaches the stream readers and the exit
//! supervisor, and implements the reader and wait operations the tool
//! surface exposes.
//!
//! Locking discipline: the registry mutex is held only for map access and
//! for the admission-check-plus-insert pair (spawning a `tokio::process::
//! Command` is synchronous, so no await happens under it). Per-record state
//! has its own mutex inside [`JobRecord`]. The registry lock may take a
//! record lock, never the reverse.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::select_all;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{self, LauncherConfig};
use crate::jobs::event::{EventKind, NormalizedEvent};
use crate::jobs::record::{
    EffectiveOptions, JobRecord, JobStatus, KillSignal, RequestedOptions, ResultSnapshot,
    SandboxPolicy, SpawnMetadata, StatusSnapshot,
};
use crate::{AppError, Result};

/// Read-buffer size for the per-stream reader tasks.
const STREAM_READ_BUF: usize = 8 * 1024;

/// A caller-initiated spawn: prompt, raw options, echo-only label.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub prompt: String,
    pub options: RequestedOptions,
    pub label: Option<String>,
}

/// Payload returned by a successful spawn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnView {
    pub job_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
}

/// One page of a cursor-paginated event read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    pub events: Vec<NormalizedEvent>,
    pub next_cursor: String,
    pub done: bool,
}

/// Outcome of a wait-any race.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitAnyOutcome {
    pub completed_job_id: Option<String>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_job_ids: Vec<String>,
}

/// Resolve raw caller options into the options actually applied to a child.
///
/// Sandbox precedence is caller, then server environment default, then
/// `workspace-write`. The one exception: when the caller asked for full-auto
/// and supplied no sandbox and no environment default exists, the sandbox is
/// left unset and `--full-auto` carries the policy. An explicit sandbox
/// always suppresses `--full-auto`.
#[must_use]
pub fn resolve_effective(requested: &RequestedOptions) -> EffectiveOptions {
    let sandbox = requested.sandbox.or_else(config::default_sandbox);
    let (sandbox, use_full_auto) = match sandbox {
        Some(policy) => (Some(policy), false),
        None if requested.full_auto.unwrap_or(false) => (None, true),
        None => (Some(SandboxPolicy::WorkspaceWrite), false),
    };

    EffectiveOptions {
        model: requested.model.clone(),
        reasoning_effort: requested.reasoning_effort,
        sandbox,
        use_full_auto,
        working_directory: requested.working_directory.clone(),
    }
}

/// Build the agent argument vector for one spawn.
///
/// The order is fixed: `exec --json`, then each configured flag, then
/// `--skip-git-repo-check`, then the prompt as the final positional.
/// Arguments are handed to the child directly (no intermediate shell), so
/// whitespace and metacharacters in the prompt need no quoting.
#[must_use]
pub fn build_codex_args(prompt: &str, effective: &EffectiveOptions) -> Vec<String> {
    let mut args = vec!["exec".to_owned(), "--json".to_owned()];

    if let Some(ref model) = effective.model {
        args.push("--model".to_owned());
        args.push(model.clone());
    }
    if let Some(effort) = effective.reasoning_effort {
        args.push("-c".to_owned());
        args.push(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
    }
    if let Some(sandbox) = effective.sandbox {
        args.push("--sandbox".to_owned());
        args.push(sandbox.as_str().to_owned());
    }
    if effective.use_full_auto {
        args.push("--full-auto".to_owned());
    }
    if let Some(ref dir) = effective.working_directory {
        args.push("-C".to_owned());
        args.push(dir.clone());
    }
    args.push("--skip-git-repo-check".to_owned());
    args.push(prompt.to_owned());
    args
}

/// Parse an opaque events cursor: a non-negative decimal index.
///
/// Anything unparsable, negative, or non-finite clamps to zero.
#[must_use]
pub fn parse_cursor(cursor: Option<&str>) -> usize {
    cursor
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map_or(0, |value| usize::try_from(value).unwrap_or(0))
}

/// Human-readable final-message fallback for a job that never emitted an
/// `agent_message`. Running jobs get an empty string.
#[must_use]
pub fn fallback_final_message(status: JobStatus, exit_code: Option<i32>) -> String {
    let summary = match status {
        JobStatus::Running => return String::new(),
        JobStatus::Done => "The subagent job completed without producing a final message.",
        JobStatus::Failed => "The subagent job failed before it produced a final message.",
        JobStatus::Canceled => "The subagent job was canceled before it produced a final message.",
    };

    let mut text = summary.to_owned();
    if let Some(code) = exit_code {
        text.push_str(&format!("\nExit code: {code}"));
    }
    text.push_str("\nThe captured event stream and stderr tail may hold more detail.");
    text
}

/// Registry and lifecycle owner for every subagent job in this process.
pub struct JobManager {
    launcher: LauncherConfig,
    jobs: Mutex<HashMap<String, Arc<JobRecord>>>,
}

impl JobManager {
    /// Create a manager that launches the given agent binary.
    #[must_use]
    pub fn new(launcher: LauncherConfig) -> Self {
        Self {
            launcher,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<JobRecord>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, job_id: &str) -> Result<Arc<JobRecord>> {
        self.lock_jobs()
            .get(job_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("unknown jobId: {job_id}")))
    }

    /// Number of jobs currently in `running`.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.lock_jobs()
            .values()
            .filter(|record| !record.is_terminal())
            .count()
    }

    // ── Spawn ────────────────────────────────────────────────────────────

    /// Spawn from raw caller options (resolves the effective options).
    pub fn spawn(&self, request: SpawnRequest) -> Result<SpawnView> {
        let effective = resolve_effective(&request.options);
        self.spawn_with_effective(&request.prompt, request.options, effective, request.label)
    }

    /// Spawn from already-resolved options.
    ///
    /// Used by interrupt respawn to inherit a prior job's settings verbatim.
    /// Fails fast, creating no record, when the concurrency cap is reached
    /// or the child cannot be launched.
    pub fn spawn_with_effective(
        &self,
        prompt: &str,
        requested: RequestedOptions,
        effective: EffectiveOptions,
        label: Option<String>,
    ) -> Result<SpawnView> {
        let args = build_codex_args(prompt, &effective);
        let span = info_span!("spawn_job", label = label.as_deref().unwrap_or_default());
        let _guard = span.enter();

        let (record, child, kill_rx) = {
            let mut jobs = self.lock_jobs();

            // Cap and default sandbox are re-read from the environment on
            // every spawn; external orchestration may change them live.
            let cap = config::max_concurrent_jobs();
            let running = jobs.values().filter(|r| !r.is_terminal()).count();
            if running >= cap {
                return Err(AppError::Admission(format!(
                    "too many concurrent jobs: {running} running, cap is {cap}"
                )));
            }

            let mut cmd = Command::new(&self.launcher.codex_bin);
            cmd.args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let child = cmd.spawn().map_err(|err| {
                AppError::Spawn(format!(
                    "failed to spawn agent '{}': {err}",
                    self.launcher.codex_bin
                ))
            })?;

            let (kill_tx, kill_rx) = mpsc::unbounded_channel();
            let record = Arc::new(JobRecord::new(
                Uuid::new_v4().to_string(),
                SpawnMetadata {
                    requested,
                    effective: effective.clone(),
                    label: label.clone(),
                },
                kill_tx,
            ));

            record.append_event(NormalizedEvent::new(
                EventKind::Progress,
                json!({
                    "kind": "spawned",
                    "command": self.launcher.codex_bin.clone(),
                    "args": args,
                    "effectiveSandbox": effective.sandbox.map(SandboxPolicy::as_str),
                    "label": label,
                }),
            ));

            jobs.insert(record.id().to_owned(), Arc::clone(&record));
            (record, child, kill_rx)
        };

        info!(job_id = record.id(), pid = child.id(), "agent process spawned");
        attach_supervision(Arc::clone(&record), child, kill_rx);

        Ok(SpawnView {
            job_id: record.id().to_owned(),
            status: JobStatus::Running,
            started_at: record.started_at(),
        })
    }

    // ── Readers ──────────────────────────────────────────────────────────

    /// Status fields for one job.
    pub fn status(&self, job_id: &str) -> Result<StatusSnapshot> {
        Ok(self.get(job_id)?.status_snapshot())
    }

    /// Status plus last agent message and both stream tails.
    pub fn result(&self, job_id: &str) -> Result<ResultSnapshot> {
        Ok(self.get(job_id)?.result_snapshot())
    }

    /// Requested and effective options plus the echo-only label.
    pub fn spawn_metadata(&self, job_id: &str) -> Result<SpawnMetadata> {
        Ok(self.get(job_id)?.spawn_metadata())
    }

    /// Cursor-paginated event read.
    ///
    /// The cursor is a plain index into the append-only event vector, so
    /// successive reads with returned cursors never skip or duplicate.
    pub fn events(&self, job_id: &str, cursor: Option<&str>, max_events: usize) -> Result<EventsPage> {
        let record = self.get(job_id)?;
        let start = parse_cursor(cursor);
        let (events, end, done) = record.events_page(start, max_events.max(1));
        Ok(EventsPage {
            events,
            next_cursor: end.to_string(),
            done,
        })
    }

    /// Last `max_events` events, optionally filtered by kind.
    pub fn event_tail(
        &self,
        job_id: &str,
        max_events: usize,
        kinds: Option<&[EventKind]>,
    ) -> Result<Vec<NormalizedEvent>> {
        Ok(self.get(job_id)?.event_tail(max_events, kinds))
    }

    // ── Mutators and waits ───────────────────────────────────────────────

    /// Request cancellation; graceful signal by default, immediate kill when
    /// forced. Returns false when the job already terminated.
    pub fn cancel(&self, job_id: &str, force: bool) -> Result<bool> {
        let record = self.get(job_id)?;
        let accepted = record.request_cancel(force);
        debug!(job_id, force, accepted, "cancel requested");
        Ok(accepted)
    }

    /// Wait until the job terminates or `wait_ms` elapses.
    pub async fn wait_for_exit(&self, job_id: &str, wait_ms: u64) -> Result<bool> {
        let record = self.get(job_id)?;
        if record.is_terminal() {
            return Ok(true);
        }
        if wait_ms == 0 {
            return Ok(false);
        }

        let done = record.done_signal().clone();
        match tokio::time::timeout(Duration::from_millis(wait_ms), done.cancelled()).await {
            Ok(()) => Ok(true),
            Err(_) => Ok(record.is_terminal()),
        }
    }

    /// Wait for the first of several jobs to terminate.
    ///
    /// Unknown identifiers are reported, not fatal. An already-terminal job
    /// wins immediately without consuming the timeout.
    pub async fn wait_any(&self, job_ids: &[String], timeout_ms: u64) -> WaitAnyOutcome {
        let mut known = Vec::new();
        let mut missing = Vec::new();
        {
            let jobs = self.lock_jobs();
            for id in job_ids {
                match jobs.get(id) {
                    Some(record) => known.push(Arc::clone(record)),
                    None => missing.push(id.clone()),
                }
            }
        }

        if known.is_empty() {
            return WaitAnyOutcome {
                completed_job_id: None,
                timed_out: false,
                missing_job_ids: missing,
            };
        }

        if let Some(record) = known.iter().find(|record| record.is_terminal()) {
            return WaitAnyOutcome {
                completed_job_id: Some(record.id().to_owned()),
                timed_out: false,
                missing_job_ids: missing,
            };
        }

        let waiters: Vec<_> = known
            .iter()
            .map(|record| {
                let id = record.id().to_owned();
                let done = record.done_signal().clone();
                Box::pin(async move {
                    done.cancelled().await;
                    id
                })
            })
            .collect();

        let race = select_all(waiters);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), race).await {
            Ok((winner, _, _)) => WaitAnyOutcome {
                completed_job_id: Some(winner),
                timed_out: false,
                missing_job_ids: missing,
            },
            Err(_) => WaitAnyOutcome {
                completed_job_id: None,
                timed_out: true,
                missing_job_ids: missing,
            },
        }
    }
}

// ── Child supervision ────────────────────────────────────────────────────

/// Attach the stream readers and the exit supervisor to a spawned child.
fn attach_supervision(
    record: Arc<JobRecord>,
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<KillSignal>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = stdout.map(|out| spawn_stdout_reader(Arc::clone(&record), out));
    let stderr_task = stderr.map(|err| spawn_stderr_reader(Arc::clone(&record), err));

    tokio::spawn(async move {
        // Kill requests are received inside the select but delivered after
        // it, so the wait future's borrow of the child has ended.
        let mut kill_rx_open = true;
        let wait_result = loop {
            let request = tokio::select! {
                result = child.wait() => break result,
                signal = kill_rx.recv(), if kill_rx_open => signal,
            };
            match request {
                Some(signal) => deliver_signal(&mut child, signal),
                None => kill_rx_open = false,
            }
        };

        // Drain both streams to EOF before finalizing, so every event lands
        // ahead of the terminal event and the completion signal.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        match wait_result {
            Ok(status) => {
                let code = status.code();
                let signal = exit_signal_of(&status);
                info!(
                    job_id = record.id(),
                    exit_code = code,
                    exit_signal = signal,
                    "agent process exited"
                );
                record.finalize(code, signal);
            }
            Err(err) => {
                warn!(job_id = record.id(), %err, "failed to await agent process");
                record.fail_supervision(format!("failed to await agent process: {err}"));
            }
        }
    });
}

fn spawn_stdout_reader(record: Arc<JobRecord>, mut stdout: ChildStdout) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; STREAM_READ_BUF];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => record.ingest_stdout_chunk(&buf[..n]),
                Err(err) => {
                    warn!(job_id = record.id(), %err, "stdout read error");
                    break;
                }
            }
        }
        record.flush_stdout();
    })
}

fn spawn_stderr_reader(record: Arc<JobRecord>, mut stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; STREAM_READ_BUF];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => record.ingest_stderr_chunk(&buf[..n]),
                Err(err) => {
                    warn!(job_id = record.id(), %err, "stderr read error");
                    break;
                }
            }
        }
    })
}

/// Deliver a termination signal to the child.
///
/// Graceful delivery is SIGTERM on unix; elsewhere, and whenever the pid is
/// already gone, it degrades to the runtime's kill.
fn deliver_signal(child: &mut Child, signal: KillSignal) {
    if signal == KillSignal::Graceful {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) => return,
                    Err(err) => warn!(pid, %err, "SIGTERM delivery failed, falling back to kill"),
                }
            }
        }
    }

    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to kill agent process");
    }
}

#[cfg(unix)]
fn exit_signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal_of(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
