//! Normalized event taxonomy and the codex JSONL classifier.
//!
//! `codex exec --json` emits one JSON object per stdout line. The raw schema
//! is versioned by the agent; the relay folds every line into six stable
//! kinds so coordinators never depend on the agent's wire format. The
//! classifier is stateless: the `tool_call` / `tool_result` split is decided
//! solely by the `item.completed` wrapper, never by prior events.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Stable classification of a subagent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Agent-authored message text.
    Message,
    /// Lifecycle or informational progress.
    Progress,
    /// A tool invocation has started or updated.
    ToolCall,
    /// A tool invocation has completed.
    ToolResult,
    /// Agent-reported or relay-detected error.
    Error,
    /// Synthetic terminal event appended by the relay at job termination.
    Final,
}

impl EventKind {
    /// Wire name of the kind, as used in event payloads and prompt tails.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Progress => "progress",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
            Self::Final => "final",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record in a job's event stream.
///
/// Immutable once appended. `timestamp` is assigned when the relay ingested
/// the line, not when the agent claims to have emitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Event classification.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Kind-specific structured payload.
    pub content: Value,
    /// RFC-3339 ingest timestamp.
    pub timestamp: String,
}

impl NormalizedEvent {
    /// Build an event stamped with the current ingest time.
    #[must_use]
    pub fn new(kind: EventKind, content: Value) -> Self {
        Self {
            kind,
            content,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Classify one decoded stdout line into zero or one normalized event.
///
/// Returns `None` only when `raw` is not an object or lacks a string `type`
/// field. Every other input, including unknown types, produces an event;
/// unknown shapes degrade to `progress` so nothing the agent says is lost.
#[must_use]
pub fn normalize(raw: &Value) -> Option<NormalizedEvent> {
    let (kind, content) = classify(raw)?;
    Some(NormalizedEvent::new(kind, content))
}

/// Pure classification backing [`normalize`].
#[must_use]
pub fn classify(raw: &Value) -> Option<(EventKind, Value)> {
    let obj = raw.as_object()?;
    let event_type = obj.get("type")?.as_str()?;

    let classified = match event_type {
        "thread.started" => (
            EventKind::Progress,
            json!({ "threadId": obj.get("thread_id").cloned().unwrap_or(Value::Null) }),
        ),
        "turn.started" => (EventKind::Progress, json!({ "kind": "turn.started" })),
        "turn.completed" => (
            EventKind::Progress,
            json!({
                "kind": "turn.completed",
                "usage": obj.get("usage").cloned().unwrap_or(Value::Null),
            }),
        ),
        "turn.failed" => (
            EventKind::Error,
            json!({
                "kind": "turn.failed",
                "error": obj.get("error").cloned().unwrap_or(Value::Null),
            }),
        ),
        "error" => (EventKind::Error, raw.clone()),
        "item.started" | "item.updated" | "item.completed" => {
            classify_item(event_type, obj.get("item"))
        }
        _ => (EventKind::Progress, raw.clone()),
    };

    Some(classified)
}

/// Classify an `item.*` wrapper by its nested `item.type`.
fn classify_item(wrapper: &str, item: Option<&Value>) -> (EventKind, Value) {
    let completed = wrapper == "item.completed";
    let item = item.cloned().unwrap_or(Value::Null);
    let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();

    let field = |name: &str| item.get(name).cloned().unwrap_or(Value::Null);
    // Started and updated wrappers are calls in flight; only the completed
    // wrapper is a result.
    let call_or_result = if completed {
        EventKind::ToolResult
    } else {
        EventKind::ToolCall
    };

    match item_type {
        "agent_message" => (
            EventKind::Message,
            json!({
                "kind": wrapper,
                "itemType": item_type,
                "itemId": field("id"),
                "text": field("text"),
            }),
        ),
        "reasoning" => (
            EventKind::Progress,
            json!({
                "kind": wrapper,
                "itemType": item_type,
                "itemId": field("id"),
                "text": field("text"),
            }),
        ),
        "command_execution" => (
            call_or_result,
            json!({
                "command": field("command"),
                "status": field("status"),
                "exitCode": field("exit_code"),
            }),
        ),
        "file_change" => (
            call_or_result,
            json!({
                "changes": field("changes"),
                "status": field("status"),
            }),
        ),
        "mcp_tool_call" => (
            call_or_result,
            json!({
                "server": field("server"),
                "tool": field("tool"),
                "status": field("status"),
                "arguments": field("arguments"),
                "result": field("result"),
                "error": field("error"),
            }),
        ),
        "web_search" => (call_or_result, json!({ "query": field("query") })),
        "todo_list" => (EventKind::Progress, json!({ "items": field("items") })),
        "error" => (EventKind::Error, json!({ "message": field("message") })),
        _ => (
            EventKind::Progress,
            json!({ "kind": wrapper, "item": item }),
        ),
    }
}
