//! `subagent_result` tool handler.
//!
//! Two views: `finalMessage` (the default) returns the last agent message as
//! plain text, with a canonical fallback for jobs that terminated without
//! one; `full` returns status fields plus the message and both stream tails.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::{CallToolResult, Content};
use serde::{Deserialize, Serialize};

use crate::jobs::manager::fallback_final_message;
use crate::jobs::record::{JobStatus, ResultSnapshot};
use crate::mcp::handler::RelayServer;
use crate::mcp::tools::{json_result, parse_args, tool_error};

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
enum ResultViewKind {
    Full,
    #[default]
    FinalMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultInput {
    job_id: String,
    #[serde(default)]
    view: ResultViewKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FullResultView {
    job_id: String,
    status: JobStatus,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    final_message: String,
    stdout_tail: String,
    stderr_tail: String,
}

/// The final-message text for a snapshot, with the status-specific fallback
/// when the job never emitted an `agent_message`.
fn final_message_of(snapshot: &ResultSnapshot) -> String {
    match snapshot.last_agent_message {
        Some(ref message) => message.clone(),
        None => fallback_final_message(snapshot.status.status, snapshot.status.exit_code),
    }
}

/// Handle the `subagent_result` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on invalid parameters or an unknown job id.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: ResultInput = parse_args(context.arguments)?;

    let snapshot = state.manager.result(&input.job_id).map_err(tool_error)?;
    let final_message = final_message_of(&snapshot);

    match input.view {
        ResultViewKind::FinalMessage => {
            Ok(CallToolResult::success(vec![Content::text(final_message)]))
        }
        ResultViewKind::Full => json_result(&FullResultView {
            job_id: snapshot.status.job_id,
            status: snapshot.status.status,
            started_at: snapshot.status.started_at,
            finished_at: snapshot.status.finished_at,
            exit_code: snapshot.status.exit_code,
            final_message,
            stdout_tail: snapshot.stdout_tail,
            stderr_tail: snapshot.stderr_tail,
        }),
    }
}
