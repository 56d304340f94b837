// Tool call and tool result types
//
// ToolCall keeps `arguments` as the raw JSON string the provider produced.
// Streaming providers emit arguments fragment by fragment; the string is only
// parsed at dispatch time, inside the tool executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A finalized tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id (correlates the tool result)
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments as a raw JSON string (OpenAI semantics)
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// An incremental tool-call shard from a streaming provider
///
/// Fragments sharing an `index` belong to the same call: `id` overwrites,
/// `name` and `arguments` concatenate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    /// A fragment carrying the call id and name (typically the first shard)
    pub fn opening(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        }
    }

    /// A fragment carrying only an arguments shard
    pub fn arguments(index: u32, arguments: impl Into<String>) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: Some(arguments.into()),
        }
    }
}

/// JSON-schema description of a tool, as sent to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the tool arguments
    pub parameters: Value,
}

/// The value returned by one tool invocation
///
/// `content` is the string fed back to the LLM; `output` is the structured
/// payload for downstream consumers. Tool executors always produce exactly
/// one ToolResult per call; failures are encoded, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub tool_call_id: String,
    pub input_args: Value,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToolResult {
    /// Elapsed wall-clock duration
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_constructors() {
        let open = ToolCallFragment::opening(0, "call_1", "echo");
        assert_eq!(open.id.as_deref(), Some("call_1"));
        assert_eq!(open.name.as_deref(), Some("echo"));
        assert!(open.arguments.is_none());

        let args = ToolCallFragment::arguments(0, "{\"msg\":");
        assert!(args.id.is_none());
        assert_eq!(args.arguments.as_deref(), Some("{\"msg\":"));
    }

    #[test]
    fn test_tool_call_serialization() {
        let call = ToolCall::new("c1", "ls", r#"{"path":"."}"#);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["id"], "c1");
        assert_eq!(json["arguments"], r#"{"path":"."}"#);
    }
}
