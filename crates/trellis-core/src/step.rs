// Step domain types
//
// A Step is a single recorded event in a conversation trajectory. The
// ordered Steps of a session are, after the adapter projection, exactly the
// message list the LLM sees. `(session_id, sequence)` is the identity the
// store upserts by; `id` is opaque.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::RunnableType;
use crate::tool_types::ToolCall;

/// Message role of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s {
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        }
    }
}

/// Per-step metrics (LLM timing, token usage, tool timing)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_exec_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// A single recorded event in a session trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub session_id: Uuid,
    pub run_id: Uuid,
    /// Monotonic within session_id; `(session_id, sequence)` is unique
    pub sequence: i64,
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Assistant steps only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool steps only: the assistant tool call this result answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool steps only: tool name, stored redundantly for queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    // Workflow placement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,

    // Runnable binding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_type: Option<RunnableType>,

    // Observability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub depth: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
    pub created_at: DateTime<Utc>,
}

impl Step {
    /// Bare step with no workflow or observability placement.
    /// Steps minted inside a run go through `StepFactory` instead.
    pub fn new(session_id: Uuid, run_id: Uuid, sequence: i64, role: MessageRole) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            run_id,
            sequence,
            role,
            content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
            workflow_id: None,
            node_id: None,
            parent_run_id: None,
            branch_key: None,
            iteration: None,
            runnable_id: None,
            runnable_type: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            depth: 0,
            metrics: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    pub fn is_tool(&self) -> bool {
        self.role == MessageRole::Tool
    }

    /// Whether this assistant step requested tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}
