// LLM driver abstraction
//
// The runtime consumes any streaming chat-completions interface through
// LlmDriver. A chunk is the provider-agnostic projection {content,
// tool_calls, usage}; fragment accumulation stays out of drivers and lives
// in the step executor, so drivers pass tool-call shards through raw.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::step::MessageRole;
use crate::tool_types::{ToolCall, ToolCallFragment, ToolSchema};

/// A message in provider wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// One streamed chunk from the provider
#[derive(Debug, Clone, Default)]
pub struct LlmChunk {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallFragment>>,
    pub usage: Option<LlmUsage>,
}

impl LlmChunk {
    pub fn content(chunk: impl Into<String>) -> Self {
        Self {
            content: Some(chunk.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(fragments: Vec<ToolCallFragment>) -> Self {
        Self {
            tool_calls: Some(fragments),
            ..Self::default()
        }
    }

    pub fn usage(usage: LlmUsage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    /// Whether this chunk carries assistant output (content or tool calls)
    pub fn has_output(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_empty())
            || self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

/// Type alias for the streamed LLM response
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmChunk>> + Send>>;

/// Trait for streaming LLM drivers
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Start a streaming chat completion
    async fn stream(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<&[ToolSchema]>,
    ) -> Result<LlmStream>;

    /// Model identifier, recorded in step metrics
    fn model_name(&self) -> &str;

    /// Provider label, recorded in step metrics
    fn provider(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_has_output() {
        assert!(!LlmChunk::default().has_output());
        assert!(!LlmChunk::content("").has_output());
        assert!(LlmChunk::content("hi").has_output());
        assert!(LlmChunk::tool_calls(vec![ToolCallFragment::opening(0, "c1", "ls")]).has_output());
        assert!(!LlmChunk::usage(LlmUsage::default()).has_output());
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = LlmMessage::user("Hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Hi");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }
}
