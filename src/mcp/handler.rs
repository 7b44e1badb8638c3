//! MCP server handler, shared application state, and tool router.

use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ListToolsResult, PaginatedRequestParam, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use tracing::info_span;

use crate::jobs::manager::JobManager;

/// Shared application state accessible by all MCP tool handlers.
pub struct AppState {
    /// Subagent job manager; owns every job for the process lifetime.
    pub manager: Arc<JobManager>,
}

/// MCP server implementation exposing the eight subagent tools.
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    /// Create a new MCP server bound to shared application state.
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Access the shared application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    fn tool_router() -> ToolRouter<Self> {
        let mut router = ToolRouter::new();

        for tool in Self::all_tools() {
            let name = tool.name.to_string();
            match name.as_str() {
                "subagent_spawn" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::spawn::handle(context))
                    }));
                }
                "subagent_spawn_group" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::spawn_group::handle(context))
                    }));
                }
                "subagent_status" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::status::handle(context))
                    }));
                }
                "subagent_result" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::result::handle(context))
                    }));
                }
                "subagent_events" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::events::handle(context))
                    }));
                }
                "subagent_cancel" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::cancel::handle(context))
                    }));
                }
                "subagent_wait_any" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::wait_any::handle(context))
                    }));
                }
                "subagent_interrupt" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::interrupt::handle(context))
                    }));
                }
                _ => {
                    router.add_route(ToolRoute::new_dyn(tool, |_context| {
                        Box::pin(async {
                            Err(rmcp::ErrorData::internal_error(
                                "tool not implemented",
                                None,
                            ))
                        })
                    }));
                }
            }
        }

        router
    }

    /// Convert a `serde_json::Value::Object` into the `Arc<Map>` expected by `Tool`.
    fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::default()),
        }
    }

    #[allow(clippy::too_many_lines)] // Tool definitions are intentionally verbose for clarity.
    fn all_tools() -> Vec<Tool> {
        let option_properties = serde_json::json!({
            "model": { "type": "string" },
            "reasoningEffort": { "type": "string", "enum": ["low", "medium", "high"] },
            "sandbox": { "type": "string", "enum": ["read-only", "workspace-write", "danger-full-access"] },
            "fullAuto": { "type": "boolean" },
            "workingDirectory": { "type": "string" }
        });
        let mut job_properties = serde_json::json!({
            "prompt": { "type": "string" },
            "label": { "type": "string" }
        });
        if let (Some(job), Some(opts)) = (job_properties.as_object_mut(), option_properties.as_object())
        {
            for (key, value) in opts {
                job.insert(key.clone(), value.clone());
            }
        }

        vec![
            Tool {
                name: "subagent_spawn".into(),
                description: Some(
                    "Spawn an asynchronous codex subagent job. Returns a job ID \
                     immediately; poll with subagent_status / subagent_events."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": job_properties.clone(),
                    "required": ["prompt"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "subagent_spawn_group".into(),
                description: Some(
                    "Spawn several subagent jobs in one call, with shared option \
                     defaults and an optional early-event handshake per job."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "jobs": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": job_properties.clone(),
                                "required": ["prompt"]
                            }
                        },
                        "defaults": { "type": "object", "properties": option_properties.clone() },
                        "includeHandshake": { "type": "boolean", "default": false },
                        "handshakeMaxEvents": { "type": "integer", "default": 10, "maximum": 25 }
                    },
                    "required": ["jobs"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "subagent_status".into(),
                description: Some("Read the status of a subagent job.".into()),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" }
                    },
                    "required": ["jobId"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "subagent_result".into(),
                description: Some(
                    "Read a job's result: the final agent message, or the full view \
                     with status and stdout/stderr tails."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" },
                        "view": { "type": "string", "enum": ["full", "finalMessage"], "default": "finalMessage" }
                    },
                    "required": ["jobId"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "subagent_events".into(),
                description: Some(
                    "Read normalized job events incrementally with an opaque cursor. \
                     Pass the returned nextCursor to resume without gaps."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" },
                        "cursor": { "type": "string" },
                        "maxEvents": { "type": "integer", "default": 200, "maximum": 2000 }
                    },
                    "required": ["jobId"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "subagent_cancel".into(),
                description: Some(
                    "Cancel a running subagent job: graceful termination by default, \
                     immediate kill with force."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" },
                        "force": { "type": "boolean", "default": false }
                    },
                    "required": ["jobId"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "subagent_wait_any".into(),
                description: Some(
                    "Wait until the first of several subagent jobs terminates, or the \
                     timeout elapses."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "jobIds": { "type": "array", "items": { "type": "string" } },
                        "timeoutMs": { "type": "integer", "default": 0, "maximum": 300_000 }
                    },
                    "required": ["jobIds"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "subagent_interrupt".into(),
                description: Some(
                    "Interrupt a running job and respawn it with updated instructions, \
                     carrying a tail of its event stream as prior context."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" },
                        "newPrompt": { "type": "string" },
                        "waitMs": { "type": "integer", "default": 250, "maximum": 60_000 },
                        "includeEventTail": { "type": "boolean", "default": true },
                        "tailMaxEvents": { "type": "integer", "default": 25, "maximum": 25 },
                        "overrides": { "type": "object", "properties": option_properties }
                    },
                    "required": ["jobId", "newPrompt"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                title: None,
            },
        ]
    }
}

impl ServerHandler for RelayServer {
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let router = Self::tool_router();
        let _span = info_span!("call_tool", tool = %request.name).entered();

        async move {
            router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        let tools = Self::all_tools();

        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }
}
