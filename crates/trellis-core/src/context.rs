// Execution context and step factory
//
// ExecutionContext is the immutable per-run bundle: ids, placement inside a
// composite workflow, the shared wire and abort signal, observability
// metadata. Child contexts are derived for nested runs; session_id and wire
// are inherited by default so nested runnables append to the same session
// and stream onto the same wire.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::control::AbortSignal;
use crate::run::RunnableType;
use crate::step::{MessageRole, Step, StepMetrics};
use crate::tool_types::ToolCall;
use crate::wire::Wire;

/// Metadata key carrying the runnable call stack for cycle detection
pub const CALL_STACK_KEY: &str = "_call_stack";
/// Metadata key carrying the branch label inside a ParallelWorkflow
pub const BRANCH_KEY: &str = "branch_key";

/// Immutable per-run execution context
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: Uuid,
    pub run_id: Uuid,
    pub wire: Wire,
    pub abort: AbortSignal,
    pub workflow_id: Option<String>,
    pub node_id: Option<String>,
    pub parent_run_id: Option<Uuid>,
    pub runnable_id: Option<String>,
    pub runnable_type: Option<RunnableType>,
    pub iteration: Option<u32>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub depth: u32,
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Root context for an outermost `Runnable::run` call
    pub fn root(session_id: Uuid, wire: Wire) -> Self {
        Self {
            session_id,
            run_id: Uuid::now_v7(),
            wire,
            abort: AbortSignal::new(),
            workflow_id: None,
            node_id: None,
            parent_run_id: None,
            runnable_id: None,
            runnable_type: None,
            iteration: None,
            trace_id: None,
            span_id: None,
            depth: 0,
            metadata: HashMap::new(),
        }
    }

    /// Root context with an externally owned abort signal
    pub fn root_with_abort(session_id: Uuid, wire: Wire, abort: AbortSignal) -> Self {
        Self {
            abort,
            ..Self::root(session_id, wire)
        }
    }

    /// Derive a child context: fresh run_id, parent_run_id set to this run,
    /// everything else inherited until overridden on the builder.
    pub fn child(&self) -> ChildContextBuilder {
        let mut derived = self.clone();
        derived.parent_run_id = Some(self.run_id);
        derived.run_id = Uuid::now_v7();
        ChildContextBuilder { ctx: derived }
    }

    /// The branch label set by a ParallelWorkflow, if any
    pub fn branch_key(&self) -> Option<&str> {
        self.metadata.get(BRANCH_KEY).and_then(Value::as_str)
    }

    /// The runnable call stack used for cycle detection
    pub fn call_stack(&self) -> Vec<String> {
        self.metadata
            .get(CALL_STACK_KEY)
            .and_then(Value::as_array)
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bind this context to the runnable about to execute in it: sets the
    /// runnable id/type and pushes a call-stack frame for cycle detection.
    pub fn for_runnable(&self, id: &str, runnable_type: RunnableType) -> Self {
        let mut derived = self.with_call_frame(id);
        derived.runnable_id = Some(id.to_string());
        derived.runnable_type = Some(runnable_type);
        derived
    }

    /// This context, with `id` appended to the call stack.
    ///
    /// The stack is immutable-append: each frame clones a fresh list so
    /// sibling branches never observe each other's frames.
    pub fn with_call_frame(&self, id: &str) -> Self {
        let mut stack = self.call_stack();
        stack.push(id.to_string());

        let mut derived = self.clone();
        derived
            .metadata
            .insert(CALL_STACK_KEY.to_string(), Value::from(stack));
        derived
    }
}

/// Builder for derived child contexts
pub struct ChildContextBuilder {
    ctx: ExecutionContext,
}

impl ChildContextBuilder {
    pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.ctx.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.ctx.node_id = Some(node_id.into());
        self
    }

    pub fn runnable(mut self, id: impl Into<String>, runnable_type: RunnableType) -> Self {
        self.ctx.runnable_id = Some(id.into());
        self.ctx.runnable_type = Some(runnable_type);
        self
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.ctx.iteration = Some(iteration);
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.ctx.depth = depth;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ctx.metadata.insert(key.into(), value);
        self
    }

    pub fn branch_key(self, branch_key: impl Into<String>) -> Self {
        self.metadata(BRANCH_KEY, Value::from(branch_key.into()))
    }

    pub fn build(self) -> ExecutionContext {
        self.ctx
    }
}

/// Context-bound step factory.
///
/// Mints steps carrying the context's ids, workflow placement, and
/// observability metadata so call sites only pass what varies.
pub struct StepFactory<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> StepFactory<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }

    fn base(&self, sequence: i64, role: MessageRole) -> Step {
        let ctx = self.ctx;
        Step {
            workflow_id: ctx.workflow_id.clone(),
            node_id: ctx.node_id.clone(),
            parent_run_id: ctx.parent_run_id,
            branch_key: ctx.branch_key().map(str::to_string),
            iteration: ctx.iteration,
            runnable_id: ctx.runnable_id.clone(),
            runnable_type: ctx.runnable_type,
            trace_id: ctx.trace_id.clone(),
            parent_span_id: ctx.span_id.clone(),
            depth: ctx.depth,
            ..Step::new(ctx.session_id, ctx.run_id, sequence, role)
        }
    }

    /// Create a user step
    pub fn user_step(&self, sequence: i64, content: impl Into<String>) -> Step {
        let mut step = self.base(sequence, MessageRole::User);
        step.content = Some(content.into());
        step
    }

    /// Create an assistant step
    pub fn assistant_step(
        &self,
        sequence: i64,
        content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
        metrics: Option<StepMetrics>,
    ) -> Step {
        let mut step = self.base(sequence, MessageRole::Assistant);
        step.content = content;
        step.tool_calls = tool_calls;
        step.metrics = metrics;
        step
    }

    /// Create a tool step
    pub fn tool_step(
        &self,
        sequence: i64,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        metrics: Option<StepMetrics>,
    ) -> Step {
        let mut step = self.base(sequence, MessageRole::Tool);
        step.tool_call_id = Some(tool_call_id.into());
        step.name = Some(name.into());
        step.content = Some(content.into());
        step.metrics = metrics;
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_derivation() {
        let root = ExecutionContext::root(Uuid::now_v7(), Wire::default());
        let child = root
            .child()
            .workflow_id("wf")
            .node_id("n1")
            .runnable("writer", RunnableType::Agent)
            .build();

        assert_eq!(child.session_id, root.session_id);
        assert_ne!(child.run_id, root.run_id);
        assert_eq!(child.parent_run_id, Some(root.run_id));
        assert_eq!(child.workflow_id.as_deref(), Some("wf"));
        assert_eq!(child.node_id.as_deref(), Some("n1"));
        assert_eq!(child.runnable_type, Some(RunnableType::Agent));
    }

    #[test]
    fn test_call_stack_is_immutable_append() {
        let root = ExecutionContext::root(Uuid::now_v7(), Wire::default());
        let a = root.with_call_frame("a");
        let ab = a.with_call_frame("b");
        let ac = a.with_call_frame("c");

        assert!(root.call_stack().is_empty());
        assert_eq!(a.call_stack(), vec!["a"]);
        assert_eq!(ab.call_stack(), vec!["a", "b"]);
        assert_eq!(ac.call_stack(), vec!["a", "c"]);
    }

    #[test]
    fn test_branch_key_via_metadata() {
        let root = ExecutionContext::root(Uuid::now_v7(), Wire::default());
        let branch = root.child().branch_key("branch_b1").build();

        assert_eq!(branch.branch_key(), Some("branch_b1"));
        assert!(root.branch_key().is_none());
    }

    #[test]
    fn test_step_factory_carries_placement() {
        let root = ExecutionContext::root(Uuid::now_v7(), Wire::default());
        let ctx = root
            .child()
            .workflow_id("wf")
            .node_id("n1")
            .branch_key("branch_b1")
            .iteration(3)
            .build();

        let factory = StepFactory::new(&ctx);
        let step = factory.user_step(7, "hello");

        assert_eq!(step.session_id, ctx.session_id);
        assert_eq!(step.run_id, ctx.run_id);
        assert_eq!(step.sequence, 7);
        assert_eq!(step.workflow_id.as_deref(), Some("wf"));
        assert_eq!(step.node_id.as_deref(), Some("n1"));
        assert_eq!(step.branch_key.as_deref(), Some("branch_b1"));
        assert_eq!(step.iteration, Some(3));
        assert_eq!(step.parent_run_id, ctx.parent_run_id);
        assert_eq!(step.content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_tool_step_fields() {
        let ctx = ExecutionContext::root(Uuid::now_v7(), Wire::default());
        let factory = StepFactory::new(&ctx);
        let step = factory.tool_step(2, "call_1", "ls", "a.txt", None);

        assert_eq!(step.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(step.name.as_deref(), Some("ls"));
        assert_eq!(step.role, MessageRole::Tool);
    }
}
