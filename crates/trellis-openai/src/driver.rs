// OpenAI protocol LLM driver
//
// Streams chat completions from any OpenAI-compatible endpoint over SSE.
// Chunks are projected into the core's {content, tool_calls, usage} shape;
// tool-call fragments are forwarded raw, keyed by index, for the step
// executor's accumulator to merge.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use tracing::debug;

use trellis_core::{
    AgentError, LlmChunk, LlmDriver, LlmMessage, LlmStream, LlmUsage, MessageRole, Result,
    ToolCallFragment, ToolSchema,
};

use crate::types::{
    ChatFunction, ChatFunctionCall, ChatMessage, ChatRequest, ChatTool, ChatToolCall, StreamChunk,
    StreamOptions,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Streaming driver for OpenAI-compatible chat-completions endpoints
#[derive(Clone)]
pub struct OpenAiProtocolDriver {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiProtocolDriver {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Create a driver from the OPENAI_API_KEY environment variable
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::llm("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    /// Point the driver at a custom OpenAI-compatible endpoint
    pub fn with_base_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn convert_role(role: MessageRole) -> &'static str {
        match role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    fn convert_message(msg: &LlmMessage) -> ChatMessage {
        ChatMessage {
            role: Self::convert_role(msg.role).to_string(),
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| ChatToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: ChatFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<ChatTool> {
        tools
            .iter()
            .map(|tool| ChatTool {
                r#type: "function".to_string(),
                function: ChatFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }

    fn project_chunk(chunk: StreamChunk) -> LlmChunk {
        let mut projected = LlmChunk::default();

        if let Some(usage) = chunk.usage {
            projected.usage = Some(LlmUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                projected.content = Some(content);
            }
            if let Some(tool_calls) = choice.delta.tool_calls {
                let fragments: Vec<ToolCallFragment> = tool_calls
                    .into_iter()
                    .map(|tc| {
                        let function = tc.function.unwrap_or_default();
                        ToolCallFragment {
                            index: tc.index,
                            id: tc.id,
                            name: function.name,
                            arguments: function.arguments,
                        }
                    })
                    .collect();
                if !fragments.is_empty() {
                    projected.tool_calls = Some(fragments);
                }
            }
        }

        projected
    }
}

#[async_trait]
impl LlmDriver for OpenAiProtocolDriver {
    async fn stream(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<&[ToolSchema]>,
    ) -> Result<LlmStream> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            tools: tools
                .filter(|t| !t.is_empty())
                .map(Self::convert_tools),
        };

        debug!(model = %self.model, messages = request.messages.len(), "openai_stream_request");

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::llm(format!("Failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::llm(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        let event_stream = response.bytes_stream().eventsource();

        let chunks: LlmStream = Box::pin(event_stream.filter_map(|result| async move {
            match result {
                Ok(event) => {
                    if event.data == "[DONE]" {
                        return None;
                    }
                    match serde_json::from_str::<StreamChunk>(&event.data) {
                        Ok(chunk) => {
                            let projected = OpenAiProtocolDriver::project_chunk(chunk);
                            if projected.content.is_none()
                                && projected.tool_calls.is_none()
                                && projected.usage.is_none()
                            {
                                None
                            } else {
                                Some(Ok(projected))
                            }
                        }
                        Err(e) => Some(Err(AgentError::llm(format!(
                            "Failed to parse stream chunk: {e}"
                        )))),
                    }
                }
                Err(e) => Some(Err(AgentError::llm(format!("Stream error: {e}")))),
            }
        }));

        Ok(chunks)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

impl std::fmt::Debug for OpenAiProtocolDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProtocolDriver")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::ToolCall;

    #[test]
    fn test_debug_redacts_api_key() {
        let driver = OpenAiProtocolDriver::new("sk-secret", "gpt-4o");
        let debug = format!("{driver:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_message_conversion_preserves_tool_shape() {
        let msg = LlmMessage {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall::new("c1", "ls", r#"{"path":"."}"#)]),
            tool_call_id: None,
            name: None,
        };

        let converted = OpenAiProtocolDriver::convert_message(&msg);
        let json = serde_json::to_value(&converted).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["tool_calls"][0]["id"], "c1");
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "ls");
        assert_eq!(json["tool_calls"][0]["function"]["arguments"], r#"{"path":"."}"#);
    }

    #[test]
    fn test_project_chunk_usage_only() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
        )
        .unwrap();

        let projected = OpenAiProtocolDriver::project_chunk(chunk);
        assert!(projected.content.is_none());
        assert_eq!(projected.usage.unwrap().total_tokens, Some(7));
    }
}
