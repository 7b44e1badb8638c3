//! `subagent_spawn_group` tool handler.
//!
//! Spawns several jobs in one call. Per-job options fall back to the group
//! defaults; each entry succeeds or fails independently, so one rejected
//! spawn (for example at the concurrency cap) never voids the rest. The
//! optional handshake gives each spawned job a brief grace period and then
//! snapshots its earliest events, letting the coordinator confirm liveness
//! without a follow-up call per job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::jobs::event::NormalizedEvent;
use crate::jobs::manager::{JobManager, SpawnRequest};
use crate::jobs::record::{JobStatus, ReasoningEffort, RequestedOptions, SandboxPolicy};
use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args};

/// Grace period before the handshake snapshot, letting the agent emit its
/// first lifecycle events.
const HANDSHAKE_GRACE: Duration = Duration::from_millis(250);

/// Handshake tail length bounds.
pub const DEFAULT_HANDSHAKE_MAX_EVENTS: usize = 10;
pub const MAX_HANDSHAKE_MAX_EVENTS: usize = 25;

/// Option defaults applied to jobs that leave a field unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDefaults {
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

/// One job in a group spawn.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupJobInput {
    pub prompt: String,
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
    #[serde(default)]
    pub label: Option<String>,
}

/// Arguments for one group spawn.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnGroupInput {
    pub jobs: Vec<GroupJobInput>,
    #[serde(default)]
    pub defaults: Option<GroupDefaults>,
    #[serde(default)]
    pub include_handshake: Option<bool>,
    #[serde(default)]
    pub handshake_max_events: Option<i64>,
}

/// Per-job result: a spawned job or an embedded rejection.
#[derive(Debug, Serialize)]
#[serde(rename_all_fields = "camelCase", untagged)]
pub enum GroupEntryView {
    Spawned {
        job_id: String,
        status: JobStatus,
        started_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        handshake: Option<Vec<NormalizedEvent>>,
    },
    Rejected {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

/// Group spawn response payload.
#[derive(Debug, Serialize)]
pub struct SpawnGroupView {
    pub results: Vec<GroupEntryView>,
}

fn merge_request(job: GroupJobInput, defaults: &GroupDefaults) -> SpawnRequest {
    SpawnRequest {
        prompt: job.prompt,
        options: RequestedOptions {
            model: job.model.or_else(|| defaults.model.clone()),
            reasoning_effort: job.reasoning_effort.or(defaults.reasoning_effort),
            sandbox: job.sandbox.or(defaults.sandbox),
            full_auto: job.full_auto.or(defaults.full_auto),
            working_directory: job
                .working_directory
                .or_else(|| defaults.working_directory.clone()),
        },
        label: job.label,
    }
}

/// Spawn every job in the group and, when asked, attach handshake tails.
pub async fn run(manager: &JobManager, input: SpawnGroupInput) -> SpawnGroupView {
    let defaults = input.defaults.unwrap_or_default();
    let include_handshake = input.include_handshake.unwrap_or(false);
    #[allow(clippy::cast_sign_loss)] // Clamped to a non-negative range.
    let handshake_max = input
        .handshake_max_events
        .map_or(DEFAULT_HANDSHAKE_MAX_EVENTS, |n| {
            (n.max(0) as usize).min(MAX_HANDSHAKE_MAX_EVENTS)
        });

    let mut results = Vec::with_capacity(input.jobs.len());
    for job in input.jobs {
        let label = job.label.clone();
        let request = merge_request(job, &defaults);
        match manager.spawn(request) {
            Ok(view) => results.push(GroupEntryView::Spawned {
                job_id: view.job_id,
                status: view.status,
                started_at: view.started_at,
                label,
                handshake: None,
            }),
            Err(err) => results.push(GroupEntryView::Rejected {
                error: err.to_string(),
                label,
            }),
        }
    }

    if include_handshake {
        tokio::time::sleep(HANDSHAKE_GRACE).await;
        for entry in &mut results {
            if let GroupEntryView::Spawned {
                job_id, handshake, ..
            } = entry
            {
                if let Ok(tail) = manager.event_tail(job_id, handshake_max, None) {
                    *handshake = Some(tail);
                }
            }
        }
    }

    SpawnGroupView { results }
}

/// Handle the `subagent_spawn_group` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters. Per-job spawn failures
/// are embedded in the results with their labels echoed.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: SpawnGroupInput = parse_args(context.arguments)?;

    let span = info_span!("subagent_spawn_group", jobs = input.jobs.len());
    async move {
        let view = run(&state.manager, input).await;
        json_result(&view)
    }
    .instrument(span)
    .await
}
