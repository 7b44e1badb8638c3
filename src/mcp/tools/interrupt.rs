//! `subagent_interrupt` tool handler.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::Deserialize;
use tracing::{info_span, Instrument};

use crate::jobs::interrupt::{interrupt, InterruptRequest, SpawnOverrides, MAX_WAIT_MS};
use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args, tool_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterruptInput {
    job_id: String,
    new_prompt: String,
    #[serde(default)]
    wait_ms: Option<i64>,
    #[serde(default)]
    include_event_tail: Option<bool>,
    #[serde(default)]
    tail_max_events: Option<i64>,
    #[serde(default)]
    overrides: Option<SpawnOverrides>,
}

/// Handle the `subagent_interrupt` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters, an unknown job id, or a
/// respawn failure. Non-running and naturally-completed jobs produce a
/// structured refusal instead.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: InterruptInput = parse_args(context.arguments)?;

    #[allow(clippy::cast_sign_loss)] // Clamped to non-negative ranges.
    let request = InterruptRequest {
        job_id: input.job_id.clone(),
        new_prompt: input.new_prompt,
        wait_ms: input
            .wait_ms
            .map(|ms| ms.clamp(0, MAX_WAIT_MS as i64) as u64),
        include_event_tail: input.include_event_tail,
        tail_max_events: input.tail_max_events.map(|n| n.max(0) as usize),
        overrides: input.overrides,
    };

    let span = info_span!("subagent_interrupt", job_id = input.job_id.as_str());
    async move {
        let outcome = interrupt(&state.manager, request).await.map_err(tool_error)?;
        json_result(&outcome)
    }
    .instrument(span)
    .await
}
