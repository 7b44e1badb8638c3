//! `subagent_wait_any` tool handler.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::Deserialize;

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args};

/// Hard cap on the wait window: five minutes.
const MAX_TIMEOUT_MS: i64 = 300_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitAnyInput {
    job_ids: Vec<String>,
    #[serde(default)]
    timeout_ms: Option<i64>,
}

/// Handle the `subagent_wait_any` tool call.
///
/// Negative timeouts clamp to zero (an immediate check). Unknown job ids
/// are echoed back in `missingJobIds`, not treated as errors.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: WaitAnyInput = parse_args(context.arguments)?;

    let timeout_ms = input.timeout_ms.unwrap_or(0).clamp(0, MAX_TIMEOUT_MS);
    #[allow(clippy::cast_sign_loss)] // Clamped to a non-negative range above.
    let timeout_ms = timeout_ms as u64;

    let outcome = state.manager.wait_any(&input.job_ids, timeout_ms).await;
    json_result(&outcome)
}
