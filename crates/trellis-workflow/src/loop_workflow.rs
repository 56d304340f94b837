// LoopWorkflow - repeated execution of an inner runnable
//
// Runs the inner node up to max_iterations times. Each iteration's output
// is cached under (node_id, iteration) and exposed to the next iteration's
// template as {loop.iteration} and {loop.last.<node_id>}. The continue
// predicate is a pure function over the last output; returning false stops
// the loop. The response is the last iteration's output.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use trellis_core::{
    AbortRegistry, AgentError, ExecutionContext, Result, RunLifecycle, RunMetrics, RunOutput,
    Runnable, RunnableType, SessionStore,
};

use crate::node::WorkflowNode;
use crate::resolver::ContextResolver;
use crate::state::WorkflowState;

type ContinuePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct LoopWorkflow {
    id: String,
    node: WorkflowNode,
    max_iterations: u32,
    continue_predicate: ContinuePredicate,
    store: Arc<dyn SessionStore>,
    registry: Option<AbortRegistry>,
}

impl LoopWorkflow {
    pub fn new(
        id: impl Into<String>,
        node: WorkflowNode,
        max_iterations: u32,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            id: id.into(),
            node,
            max_iterations,
            continue_predicate: Box::new(|_| true),
            store,
            registry: None,
        }
    }

    /// Stop early when the predicate over the iteration's output is false
    pub fn with_continue_predicate(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.continue_predicate = Box::new(predicate);
        self
    }

    pub fn with_abort_registry(mut self, registry: AbortRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    async fn run_inner(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        if self.max_iterations == 0 {
            return Err(AgentError::config(format!(
                "loop workflow {} requires at least one iteration",
                self.id
            )));
        }

        let mut state = WorkflowState::new(ctx.session_id, self.id.clone(), self.store.clone());
        state.load_from_history().await?;

        let mut resolver = ContextResolver::new(ctx.session_id, self.id.clone(), self.store.clone());
        resolver.set_input(input);

        let mut metrics = RunMetrics::default();
        let mut last_outputs: HashMap<String, String> = HashMap::new();
        let mut response = String::new();

        for iteration in 0..self.max_iterations {
            ctx.abort.check()?;

            resolver.set_loop_context(iteration, last_outputs.clone());
            let resolved_input = resolver
                .resolve_template(&self.node.input_template, Some(&state))
                .await?;

            let output = if state.has_output(&self.node.id, Some(iteration)) {
                debug!(
                    workflow_id = %self.id,
                    node_id = %self.node.id,
                    iteration,
                    "loop_iteration_skipped"
                );
                state
                    .get_output(&self.node.id, Some(iteration))
                    .unwrap_or_default()
                    .to_string()
            } else {
                let child_ctx = ctx
                    .child()
                    .workflow_id(self.id.clone())
                    .node_id(self.node.id.clone())
                    .iteration(iteration)
                    .build();

                debug!(
                    workflow_id = %self.id,
                    node_id = %self.node.id,
                    iteration,
                    child_run_id = %child_ctx.run_id,
                    "loop_iteration_started"
                );

                let result = self.node.runnable.run(&resolved_input, &child_ctx).await?;
                metrics.absorb(&result.metrics);
                state.set_output(&self.node.id, result.response.clone(), Some(iteration));
                result.response
            };

            last_outputs.insert(self.node.id.clone(), output.clone());
            response = output;

            if !(self.continue_predicate)(&response) {
                debug!(
                    workflow_id = %self.id,
                    iteration,
                    "loop_stopped_by_predicate"
                );
                break;
            }
        }

        Ok(RunOutput {
            run_id: ctx.run_id,
            response,
            metrics,
        })
    }
}

#[async_trait]
impl Runnable for LoopWorkflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn runnable_type(&self) -> RunnableType {
        RunnableType::Loop
    }

    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        let ctx = ctx.for_runnable(&self.id, RunnableType::Loop);

        let lifecycle = RunLifecycle::start(
            &ctx,
            self.store.as_ref(),
            input,
            &self.id,
            RunnableType::Loop,
            self.registry.clone(),
        )
        .await?;

        let result = self.run_inner(input, &ctx).await;
        lifecycle.finish(self.store.as_ref(), result).await
    }
}
