// RunnableTool - adapter exposing a Runnable as a Tool
//
// Gives the LLM the ability to delegate to another agent or workflow.
// Nested execution shares the caller's session and wire; events from the
// child run flow into the same stream, distinguished by parent_run_id and
// depth. Two guards keep recursion finite: the call stack carried in
// context metadata (cycle check, evaluated first) and a depth limit.
// Failures never escape the tool boundary.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::control::AbortSignal;
use crate::runnable::Runnable;
use crate::tools::{Tool, ToolExecution};

/// Default maximum nesting depth for runnable delegation
pub const DEFAULT_MAX_DEPTH: u32 = 5;

pub struct RunnableTool {
    runnable: Arc<dyn Runnable>,
    name: String,
    description: String,
    max_depth: u32,
}

impl RunnableTool {
    pub fn new(runnable: Arc<dyn Runnable>) -> Self {
        let name = format!("call_{}", runnable.id());
        let description = format!("Delegate a task to {}", runnable.id());
        Self {
            runnable,
            name,
            description,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Convert a Runnable into a Tool with an optional description
pub fn as_tool(runnable: Arc<dyn Runnable>, description: Option<&str>) -> RunnableTool {
    let tool = RunnableTool::new(runnable);
    match description {
        Some(description) => tool.with_description(description),
        None => tool,
    }
}

#[async_trait]
impl Tool for RunnableTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task to delegate to this agent/workflow"
                },
                "context": {
                    "type": "string",
                    "description": "Optional additional context for the task"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ExecutionContext,
        _signal: &AbortSignal,
    ) -> ToolExecution {
        let task = args.get("task").and_then(Value::as_str).unwrap_or("");
        let extra_context = args.get("context").and_then(Value::as_str).unwrap_or("");

        let call_stack = ctx.call_stack();
        let target = self.runnable.id();

        // Cycle check first: a self or mutual reference is reported as such
        // even when the depth limit would also fire.
        if call_stack.iter().any(|frame| frame == target) {
            let chain = call_stack.join(" -> ");
            warn!(runnable_id = target, chain = %chain, "runnable_cycle_detected");
            return ToolExecution::error(format!(
                "Circular reference detected: {target} is already in call chain. Call chain: {chain} -> {target}"
            ));
        }

        let depth = ctx.depth + 1;
        if depth > self.max_depth {
            warn!(runnable_id = target, depth, "runnable_depth_exceeded");
            return ToolExecution::error(format!(
                "Maximum nesting depth ({}) exceeded",
                self.max_depth
            ));
        }

        let input = if extra_context.is_empty() {
            task.to_string()
        } else {
            format!("{task}\n\nContext: {extra_context}")
        };

        // Child run: fresh run_id, same session and wire, one level deeper.
        // The child pushes its own call-stack frame at run entry.
        let child_ctx = ctx.child().depth(depth).build();

        debug!(
            runnable_id = target,
            parent_run_id = %ctx.run_id,
            child_run_id = %child_ctx.run_id,
            depth,
            "runnable_tool_delegating"
        );

        match self.runnable.run(&input, &child_ctx).await {
            Ok(output) => ToolExecution::success(output.response),
            Err(err) => ToolExecution::error(format!("Error executing {target}: {err}")),
        }
    }
}
