//! `subagent_status` tool handler.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::Deserialize;

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args, tool_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusInput {
    job_id: String,
}

/// Handle the `subagent_status` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters or an unknown job id.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: StatusInput = parse_args(context.arguments)?;

    let snapshot = state.manager.status(&input.job_id).map_err(tool_error)?;
    json_result(&snapshot)
}
