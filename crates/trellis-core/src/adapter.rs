// Step adapter - projection of Steps into LLM messages
//
// The adapter is a pure function of role, content, tool_calls, tool_call_id
// and name. All other step fields are runtime metadata and never reach the
// provider payload.

use tracing::warn;

use crate::error::{AgentError, Result};
use crate::llm::LlmMessage;
use crate::step::{MessageRole, Step};

pub struct StepAdapter;

impl StepAdapter {
    /// Convert one step into its LLM message
    pub fn to_llm_message(step: &Step) -> LlmMessage {
        match step.role {
            MessageRole::Assistant => LlmMessage {
                role: MessageRole::Assistant,
                content: step.content.clone(),
                tool_calls: step
                    .tool_calls
                    .as_ref()
                    .filter(|tc| !tc.is_empty())
                    .cloned(),
                tool_call_id: None,
                name: None,
            },
            MessageRole::Tool => LlmMessage {
                role: MessageRole::Tool,
                content: step.content.clone(),
                tool_calls: None,
                tool_call_id: step.tool_call_id.clone(),
                name: step.name.clone(),
            },
            role => LlmMessage {
                role,
                content: step.content.clone(),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
        }
    }

    /// Project an ordered step list into the LLM message list
    pub fn steps_to_messages(steps: &[Step]) -> Vec<LlmMessage> {
        steps.iter().map(Self::to_llm_message).collect()
    }
}

/// Validate that a message list is a well-formed conversation: every tool
/// message's tool_call_id must refer to a tool call of an earlier assistant
/// message.
pub fn validate_messages(messages: &[LlmMessage]) -> Result<()> {
    let mut seen_call_ids: Vec<&str> = Vec::new();

    for (i, msg) in messages.iter().enumerate() {
        match msg.role {
            MessageRole::Assistant => {
                if let Some(calls) = &msg.tool_calls {
                    seen_call_ids.extend(calls.iter().map(|c| c.id.as_str()));
                }
            }
            MessageRole::Tool => {
                let call_id = msg.tool_call_id.as_deref().ok_or_else(|| {
                    AgentError::config(format!("tool message {i} missing tool_call_id"))
                })?;
                if !seen_call_ids.contains(&call_id) {
                    warn!(message_index = i, tool_call_id = call_id, "orphan_tool_message");
                    return Err(AgentError::config(format!(
                        "tool message {i} references unknown tool_call_id {call_id}"
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_types::ToolCall;
    use uuid::Uuid;

    fn step(role: MessageRole) -> Step {
        Step::new(Uuid::now_v7(), Uuid::now_v7(), 1, role)
    }

    #[test]
    fn test_user_projection() {
        let mut s = step(MessageRole::User);
        s.content = Some("Hi".into());

        let msg = StepAdapter::to_llm_message(&s);
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content.as_deref(), Some("Hi"));
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn test_assistant_with_tools_projection() {
        let mut s = step(MessageRole::Assistant);
        s.content = None;
        s.tool_calls = Some(vec![ToolCall::new("c1", "ls", "{}")]);

        let msg = StepAdapter::to_llm_message(&s);
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.tool_calls.as_ref().unwrap().len(), 1);
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn test_assistant_empty_tool_calls_omitted() {
        let mut s = step(MessageRole::Assistant);
        s.tool_calls = Some(vec![]);

        let msg = StepAdapter::to_llm_message(&s);
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn test_tool_projection() {
        let mut s = step(MessageRole::Tool);
        s.content = Some("a.txt".into());
        s.tool_call_id = Some("c1".into());
        s.name = Some("ls".into());

        let msg = StepAdapter::to_llm_message(&s);
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(msg.name.as_deref(), Some("ls"));
    }

    #[test]
    fn test_metadata_never_leaks() {
        let mut s = step(MessageRole::User);
        s.content = Some("Hi".into());
        s.workflow_id = Some("wf".into());
        s.node_id = Some("n1".into());

        let json = serde_json::to_value(StepAdapter::to_llm_message(&s)).unwrap();
        assert!(json.get("workflow_id").is_none());
        assert!(json.get("node_id").is_none());
        assert!(json.get("sequence").is_none());
    }

    #[test]
    fn test_validate_accepts_tool_after_assistant() {
        let mut assistant = step(MessageRole::Assistant);
        assistant.tool_calls = Some(vec![ToolCall::new("c1", "ls", "{}")]);
        let mut tool = step(MessageRole::Tool);
        tool.tool_call_id = Some("c1".into());
        tool.content = Some("ok".into());

        let messages = StepAdapter::steps_to_messages(&[assistant, tool]);
        assert!(validate_messages(&messages).is_ok());
    }

    #[test]
    fn test_validate_rejects_orphan_tool_message() {
        let mut tool = step(MessageRole::Tool);
        tool.tool_call_id = Some("ghost".into());

        let messages = StepAdapter::steps_to_messages(&[tool]);
        assert!(validate_messages(&messages).is_err());
    }
}
