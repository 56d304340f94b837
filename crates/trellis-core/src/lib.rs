// Trellis core - agent runtime
//
// A step-pipeline implementation of an agentic loop (LLM call → tool
// execution → repeat) over durable sessions.
//
// Key design decisions:
// - Steps ARE the conversation: the ordered steps of a session project
//   directly onto the LLM message list via StepAdapter
// - Persistence is pluggable through the SessionStore trait; upsert by
//   (session_id, sequence) makes resume replay idempotent
// - Events stream through a per-root-run Wire; nested runs share it
// - Cancellation is cooperative via a latching AbortSignal polled at
//   suspension points
// - Runnables (Agent and the workflow composites) share one run contract
//   and can be re-exposed to the LLM as tools with cycle and depth guards

pub mod adapter;
pub mod agent;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod llm;
pub mod run;
pub mod runnable;
pub mod runnable_tool;
pub mod step;
pub mod store;
pub mod tool_executor;
pub mod tool_types;
pub mod tools;
pub mod wire;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use adapter::{validate_messages, StepAdapter};
pub use agent::{pending_tool_calls, Agent, AgentBuilder};
pub use config::{ExecutionConfig, DEFAULT_MAX_STEPS};
pub use context::{ChildContextBuilder, ExecutionContext, StepFactory};
pub use control::{fork_session, retry_from_sequence, AbortRegistry, AbortSignal};
pub use error::{AgentError, Result};
pub use events::{StepDelta, StepEvent, StepEventPayload};
pub use executor::{ExecutorOutcome, StepExecutor, ToolCallAccumulator};
pub use lifecycle::RunLifecycle;
pub use llm::{LlmChunk, LlmDriver, LlmMessage, LlmStream, LlmUsage};
pub use memory::{FailingLlmDriver, InMemorySessionStore, ScriptedLlmDriver};
pub use run::{Run, RunMetrics, RunOutput, RunStatus, RunnableType};
pub use runnable::Runnable;
pub use runnable_tool::{as_tool, RunnableTool, DEFAULT_MAX_DEPTH};
pub use step::{MessageRole, Step, StepMetrics};
pub use store::{SessionStore, StepFilter, DEFAULT_STEP_LIMIT};
pub use tool_executor::ToolExecutor;
pub use tool_types::{ToolCall, ToolCallFragment, ToolResult, ToolSchema};
pub use tools::{
    CurrentTimeTool, EchoTool, FailingTool, Tool, ToolExecution, ToolRegistry,
    ToolRegistryBuilder,
};
pub use wire::Wire;
