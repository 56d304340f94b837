// Tool executor - parse, dispatch, batch
//
// Every tool call produces exactly one ToolResult; argument parse failures,
// unknown tools, and tool-level errors are encoded, never propagated. A
// batch runs concurrently only when every member resolves to a
// concurrency-safe tool, otherwise serially. Either way results come back
// in tool_call order; the step loop records Tool Steps in that order.

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::control::AbortSignal;
use crate::tool_types::{ToolCall, ToolResult};
use crate::tools::{ToolExecution, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a single tool call
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ExecutionContext,
        signal: &AbortSignal,
    ) -> ToolResult {
        let started_at = Utc::now();

        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                return Self::error_result(call, Value::Null, format!("Invalid JSON arguments: {e}"), started_at);
            }
        };

        debug!(tool_name = %call.name, tool_call_id = %call.id, "executing_tool");

        let outcome = match self
            .registry
            .execute_guarded(&call.name, args.clone(), ctx, signal)
            .await
        {
            Some(outcome) => outcome,
            None => {
                return Self::error_result(
                    call,
                    args,
                    format!("Tool {} not found", call.name),
                    started_at,
                );
            }
        };

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        match outcome {
            ToolExecution::Success { content, output } => {
                debug!(tool_name = %call.name, duration_ms, "tool_execution_completed");
                ToolResult {
                    tool_name: call.name.clone(),
                    tool_call_id: call.id.clone(),
                    input_args: args,
                    content,
                    output,
                    error: None,
                    is_success: true,
                    started_at,
                    finished_at,
                    duration_ms,
                }
            }
            ToolExecution::Error(message) => {
                debug!(tool_name = %call.name, error = %message, "tool_execution_failed");
                ToolResult {
                    tool_name: call.name.clone(),
                    tool_call_id: call.id.clone(),
                    input_args: args,
                    content: message.clone(),
                    output: None,
                    error: Some(message),
                    is_success: false,
                    started_at,
                    finished_at,
                    duration_ms,
                }
            }
        }
    }

    /// Execute a batch of tool calls, preserving input order in the results.
    ///
    /// The whole batch runs in parallel only when every member is
    /// concurrency safe; a single unsafe member serializes the batch.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        ctx: &ExecutionContext,
        signal: &AbortSignal,
    ) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        let parallel = self
            .registry
            .all_concurrency_safe(calls.iter().map(|c| c.name.as_str()));

        if parallel {
            join_all(calls.iter().map(|call| self.execute(call, ctx, signal))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call, ctx, signal).await);
            }
            results
        }
    }

    fn error_result(
        call: &ToolCall,
        input_args: Value,
        error: String,
        started_at: chrono::DateTime<Utc>,
    ) -> ToolResult {
        let finished_at = Utc::now();
        ToolResult {
            tool_name: call.name.clone(),
            tool_call_id: call.id.clone(),
            input_args,
            content: error.clone(),
            output: None,
            error: Some(error),
            is_success: false,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        }
    }
}
