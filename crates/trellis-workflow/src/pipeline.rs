// PipelineWorkflow - sequential node execution
//
// Nodes run in declaration order. Before a node executes, its input
// template is resolved against the workflow input and prior node outputs;
// a node whose output is already in the workflow state is skipped and its
// cached output reused. The pipeline's response is the final node's output.

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

pub struct PipelineWorkflow {
    id: String,
    nodes: Vec<WorkflowNode>,
    store: Arc<dyn SessionStore>,
    registry: Option<AbortRegistry>,
}

impl PipelineWorkflow {
    pub fn new(id: impl Into<String>, nodes: Vec<WorkflowNode>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            id: id.into(),
            nodes,
            store,
            registry: None,
        }
    }

    pub fn with_abort_registry(mut self, registry: AbortRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    async fn run_inner(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        if self.nodes.is_empty() {
            return Err(AgentError::config(format!(
                "pipeline {} has no nodes",
                self.id
            )));
        }

        let mut state = WorkflowState::new(ctx.session_id, self.id.clone(), self.store.clone());
        state.load_from_history().await?;

        let mut resolver = ContextResolver::new(ctx.session_id, self.id.clone(), self.store.clone());
        resolver.set_input(input);

        let mut metrics = RunMetrics::default();

        for node in &self.nodes {
            ctx.abort.check()?;

            let resolved_input = resolver
                .resolve_template(&node.input_template, Some(&state))
                .await?;

            if state.has_output(&node.id, None) {
                debug!(
                    workflow_id = %self.id,
                    node_id = %node.id,
                    "pipeline_node_skipped"
                );
                continue;
            }

            let child_ctx = ctx
                .child()
                .workflow_id(self.id.clone())
                .node_id(node.id.clone())
                .build();

            debug!(
                workflow_id = %self.id,
                node_id = %node.id,
                child_run_id = %child_ctx.run_id,
                "pipeline_node_started"
            );

            let output = node.runnable.run(&resolved_input, &child_ctx).await?;
            metrics.absorb(&output.metrics);
            state.set_output(&node.id, output.response, None);
        }

        // The final node's output, fresh or cached
        let last = &self.nodes[self.nodes.len() - 1];
        let response = state.get_output(&last.id, None).unwrap_or_default().to_string();

        Ok(RunOutput {
            run_id: ctx.run_id,
            response,
            metrics,
        })
    }
}

#[async_trait]
impl Runnable for PipelineWorkflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn runnable_type(&self) -> RunnableType {
        RunnableType::Pipeline
    }

    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        let ctx = ctx.for_runnable(&self.id, RunnableType::Pipeline);

        let lifecycle = RunLifecycle::start(
            &ctx,
            self.store.as_ref(),
            input,
            &self.id,
            RunnableType::Pipeline,
            self.registry.clone(),
        )
        .await?;

        let result = self.run_inner(input, &ctx).await;
        lifecycle.finish(self.store.as_ref(), result).await
    }
}
