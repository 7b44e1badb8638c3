//! `subagent_spawn` tool handler.
//!
//! Spawns one asynchronous subagent job and returns its identifier without
//! waiting for any output.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::Deserialize;
use tracing::{info_span, Instrument};

use crate::jobs::manager::SpawnRequest;
use crate::jobs::record::{ReasoningEffort, RequestedOptions, SandboxPolicy};
use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args, tool_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpawnInput {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    sandbox: Option<SandboxPolicy>,
    #[serde(default)]
    full_auto: Option<bool>,
    #[serde(default)]
    working_directory: Option<String>,
    #[serde(default)]
    label: Option<String>,
}

impl SpawnInput {
    fn into_request(self) -> SpawnRequest {
        SpawnRequest {
            prompt: self.prompt,
            options: RequestedOptions {
                model: self.model,
                reasoning_effort: self.reasoning_effort,
                sandbox: self.sandbox,
                full_auto: self.full_auto,
                working_directory: self.working_directory,
            },
            label: self.label,
        }
    }
}

/// Handle the `subagent_spawn` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters, the concurrency cap, or
/// a child launch failure.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: SpawnInput = parse_args(context.arguments)?;

    let span = info_span!("subagent_spawn", label = input.label.as_deref().unwrap_or_default());
    async move {
        let view = state.manager.spawn(input.into_request()).map_err(tool_error)?;
        json_result(&view)
    }
    .instrument(span)
    .await
}
