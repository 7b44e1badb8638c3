//! MCP tool handlers for the subagent job surface.

pub mod cancel;
pub mod events;
pub mod interrupt;
pub mod result;
pub mod spawn;
pub mod spawn_group;
pub mod status;
pub mod wait_any;

use serde::de::DeserializeOwned;

use crate::AppError;

/// Deserialize a tool's argument object into its typed input struct.
pub(crate) fn parse_args<T: DeserializeOwned>(
    args: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<T, rmcp::ErrorData> {
    serde_json::from_value(serde_json::Value::Object(args.unwrap_or_default()))
        .map_err(|err| rmcp::ErrorData::invalid_params(format!("invalid parameters: {err}"), None))
}

/// Map a core error onto the MCP error surface.
///
/// Reference and admission problems are the caller's to fix; everything
/// else is an internal failure.
pub(crate) fn tool_error(err: AppError) -> rmcp::ErrorData {
    match err {
        AppError::NotFound(_) | AppError::Admission(_) | AppError::Config(_) => {
            rmcp::ErrorData::invalid_params(err.to_string(), None)
        }
        other => rmcp::ErrorData::internal_error(other.to_string(), None),
    }
}

/// Wrap a serializable payload as a single-item JSON tool result.
pub(crate) fn json_result<T: serde::Serialize>(
    payload: &T,
) -> Result<rmcp::model::CallToolResult, rmcp::ErrorData> {
    let value = serde_json::to_value(payload).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to serialize response: {err}"), None)
    })?;
    let content = rmcp::model::Content::json(value).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to encode response: {err}"), None)
    })?;
    Ok(rmcp::model::CallToolResult::success(vec![content]))
}
