// Tool abstraction
//
// Tools are defined via the Tool trait and registered with a ToolRegistry.
// A tool reports whether it is concurrency safe; the registry wraps unsafe
// tools in a per-instance lock so two executions are never in flight
// simultaneously, even across runs. Tools return a ToolExecution outcome;
// the tool executor shapes it into a full ToolResult with ids and timing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::context::ExecutionContext;
use crate::control::AbortSignal;
use crate::tool_types::ToolSchema;

/// Outcome of a tool invocation, before executor shaping
#[derive(Debug, Clone)]
pub enum ToolExecution {
    /// Successful execution: `content` goes back to the LLM, `output` is the
    /// structured payload for downstream consumers
    Success {
        content: String,
        output: Option<Value>,
    },
    /// Failed execution; the message is shown to the LLM so it can recover
    Error(String),
}

impl ToolExecution {
    pub fn success(content: impl Into<String>) -> Self {
        ToolExecution::Success {
            content: content.into(),
            output: None,
        }
    }

    pub fn success_with_output(content: impl Into<String>, output: Value) -> Self {
        ToolExecution::Success {
            content: content.into(),
            output: Some(output),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolExecution::Error(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecution::Success { .. })
    }
}

/// Trait for tools executable by the step loop
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the LLM uses to invoke the tool
    fn name(&self) -> &str;

    /// Description provided to the LLM
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments
    fn parameters(&self) -> Value;

    /// Whether two executions of this instance may be in flight at once
    fn is_concurrency_safe(&self) -> bool {
        true
    }

    /// Execute with parsed arguments. Implementations must not panic; any
    /// failure is reported as `ToolExecution::Error`. Long-running tools
    /// should poll the abort signal.
    async fn execute(
        &self,
        args: Value,
        ctx: &ExecutionContext,
        signal: &AbortSignal,
    ) -> ToolExecution;

    /// Schema advertised to the LLM
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

struct ToolEntry {
    tool: Arc<dyn Tool>,
    // Present only for non-concurrency-safe tools
    guard: Option<Arc<Mutex<()>>>,
}

/// A registry of tools keyed by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an Arc-wrapped tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let guard = if tool.is_concurrency_safe() {
            None
        } else {
            Some(Arc::new(Mutex::new(())))
        };
        self.tools
            .insert(tool.name().to_string(), Arc::new(ToolEntry { tool, guard }));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for every registered tool
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|entry| entry.tool.schema()).collect()
    }

    /// Whether every named call resolves to a concurrency-safe tool.
    /// Unknown names count as safe: they fail fast without executing.
    pub fn all_concurrency_safe<'a>(&self, names: impl Iterator<Item = &'a str>) -> bool {
        names.into_iter().all(|name| {
            self.tools
                .get(name)
                .map(|entry| entry.tool.is_concurrency_safe())
                .unwrap_or(true)
        })
    }

    /// Execute a registered tool, honoring its per-instance concurrency guard
    pub(crate) async fn execute_guarded(
        &self,
        name: &str,
        args: Value,
        ctx: &ExecutionContext,
        signal: &AbortSignal,
    ) -> Option<ToolExecution> {
        let entry = self.tools.get(name)?;

        let outcome = match &entry.guard {
            Some(guard) => {
                let _held = guard.lock().await;
                entry.tool.execute(args, ctx, signal).await
            }
            None => entry.tool.execute(args, ctx, signal).await,
        };
        Some(outcome)
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for fluent registry construction
#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.registry.register_arc(tool);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

// ============================================================================
// Built-in tools
// ============================================================================

/// Echoes back the provided message; useful for tests and demos
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the provided message."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: Value,
        _ctx: &ExecutionContext,
        _signal: &AbortSignal,
    ) -> ToolExecution {
        let message = args.get("message").and_then(Value::as_str).unwrap_or("");
        ToolExecution::success_with_output(
            message,
            serde_json::json!({ "echoed": message, "length": message.len() }),
        )
    }
}

/// Returns the current date and time
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in ISO 8601 format."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _args: Value,
        _ctx: &ExecutionContext,
        _signal: &AbortSignal,
    ) -> ToolExecution {
        let now = chrono::Utc::now().to_rfc3339();
        ToolExecution::success_with_output(now.clone(), serde_json::json!({ "datetime": now }))
    }
}

/// Always fails; useful for error-path tests
pub struct FailingTool {
    message: String,
}

impl FailingTool {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingTool {
    fn default() -> Self {
        Self::new("Tool execution failed")
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing_tool"
    }

    fn description(&self) -> &str {
        "A tool that always fails (for testing error handling)."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _args: Value,
        _ctx: &ExecutionContext,
        _signal: &AbortSignal,
    ) -> ToolExecution {
        ToolExecution::error(self.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Wire;
    use uuid::Uuid;

    fn test_ctx() -> ExecutionContext {
        ExecutionContext::root(Uuid::now_v7(), Wire::default())
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let ctx = test_ctx();
        let outcome = EchoTool
            .execute(
                serde_json::json!({"message": "Hello, world!"}),
                &ctx,
                &AbortSignal::new(),
            )
            .await;

        match outcome {
            ToolExecution::Success { content, output } => {
                assert_eq!(content, "Hello, world!");
                assert_eq!(output.unwrap()["length"], 13);
            }
            ToolExecution::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn test_failing_tool() {
        let ctx = test_ctx();
        let outcome = FailingTool::new("broken")
            .execute(serde_json::json!({}), &ctx, &AbortSignal::new())
            .await;

        assert!(!outcome.is_success());
    }

    #[test]
    fn test_registry_registration_and_schemas() {
        let registry = ToolRegistry::builder()
            .tool(EchoTool)
            .tool(CurrentTimeTool)
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.has("echo"));
        assert!(registry.has("current_time"));
        assert!(!registry.has("missing"));

        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 2);
    }

    #[test]
    fn test_all_concurrency_safe() {
        struct UnsafeTool;

        #[async_trait]
        impl Tool for UnsafeTool {
            fn name(&self) -> &str {
                "serial_only"
            }
            fn description(&self) -> &str {
                "serialized tool"
            }
            fn parameters(&self) -> Value {
                serde_json::json!({"type": "object"})
            }
            fn is_concurrency_safe(&self) -> bool {
                false
            }
            async fn execute(
                &self,
                _args: Value,
                _ctx: &ExecutionContext,
                _signal: &AbortSignal,
            ) -> ToolExecution {
                ToolExecution::success("ok")
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(UnsafeTool);

        assert!(registry.all_concurrency_safe(["echo"].into_iter()));
        assert!(!registry.all_concurrency_safe(["echo", "serial_only"].into_iter()));
        // Unknown tools fail fast without executing, so they count as safe
        assert!(registry.all_concurrency_safe(["missing"].into_iter()));
    }
}
