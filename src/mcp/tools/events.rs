//! `subagent_events` tool handler.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::Deserialize;

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args, tool_error};

/// Page size applied when the caller does not send `maxEvents`.
const DEFAULT_MAX_EVENTS: i64 = 200;

/// Largest page a single call may request.
const MAX_MAX_EVENTS: i64 = 2000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsInput {
    job_id: String,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    max_events: Option<i64>,
}

/// Handle the `subagent_events` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters or an unknown job id.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: EventsInput = parse_args(context.arguments)?;

    let max_events = input
        .max_events
        .unwrap_or(DEFAULT_MAX_EVENTS)
        .clamp(1, MAX_MAX_EVENTS);
    #[allow(clippy::cast_sign_loss)] // Clamped to a positive range above.
    let max_events = max_events as usize;

    let page = state
        .manager
        .events(&input.job_id, input.cursor.as_deref(), max_events)
        .map_err(tool_error)?;
    json_result(&page)
}
