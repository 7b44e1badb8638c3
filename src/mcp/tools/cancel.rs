//! `subagent_cancel` tool handler.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args, tool_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelInput {
    job_id: String,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct CancelView {
    success: bool,
}

/// Handle the `subagent_cancel` tool call.
///
/// Cancelling a job that already terminated is a structured
/// `{success: false}` rather than an error.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters or an unknown job id.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: CancelInput = parse_args(context.arguments)?;

    let success = state
        .manager
        .cancel(&input.job_id, input.force)
        .map_err(tool_error)?;
    json_result(&CancelView { success })
}
