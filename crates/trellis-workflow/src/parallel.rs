// ParallelWorkflow - concurrent branch execution
//
// All branches execute concurrently; each branch's steps carry a
// branch_key ("branch_<node_id>") so parallel siblings are disambiguated
// in the session. Idempotency is per branch: cached branches are skipped
// on re-execution. The response is produced by the declared join strategy
// over branch outputs in declaration order.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_core::{
    AbortRegistry, AgentError, ExecutionContext, Result, RunLifecycle, RunMetrics, RunOutput,
    Runnable, RunnableType, SessionStore,
};

use crate::node::WorkflowNode;
use crate::resolver::ContextResolver;
use crate::state::WorkflowState;

/// How branch outputs combine into the workflow response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    /// Branch outputs joined with a blank line, in declaration order
    #[default]
    Concat,
    /// The first declared branch's output
    First,
    /// The last declared branch's output
    Last,
}

impl JoinStrategy {
    fn join(&self, outputs: &[String]) -> String {
        match self {
            JoinStrategy::Concat => outputs.join("\n\n"),
            JoinStrategy::First => outputs.first().cloned().unwrap_or_default(),
            JoinStrategy::Last => outputs.last().cloned().unwrap_or_default(),
        }
    }
}

pub struct ParallelWorkflow {
    id: String,
    branches: Vec<WorkflowNode>,
    join: JoinStrategy,
    store: Arc<dyn SessionStore>,
    registry: Option<AbortRegistry>,
}

impl ParallelWorkflow {
    pub fn new(
        id: impl Into<String>,
        branches: Vec<WorkflowNode>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            id: id.into(),
            branches,
            join: JoinStrategy::default(),
            store,
            registry: None,
        }
    }

    pub fn with_join(mut self, join: JoinStrategy) -> Self {
        self.join = join;
        self
    }

    pub fn with_abort_registry(mut self, registry: AbortRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    async fn run_inner(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        if self.branches.is_empty() {
            return Err(AgentError::config(format!(
                "parallel workflow {} has no branches",
                self.id
            )));
        }

        let mut state = WorkflowState::new(ctx.session_id, self.id.clone(), self.store.clone());
        state.load_from_history().await?;

        let mut resolver = ContextResolver::new(ctx.session_id, self.id.clone(), self.store.clone());
        resolver.set_input(input);

        ctx.abort.check()?;

        // Resolve inputs up front, then fan out only the uncached branches
        let mut pending = Vec::new();
        for branch in &self.branches {
            if state.has_output(&branch.id, None) {
                debug!(
                    workflow_id = %self.id,
                    node_id = %branch.id,
                    "parallel_branch_skipped"
                );
                continue;
            }

            let resolved_input = resolver
                .resolve_template(&branch.input_template, Some(&state))
                .await?;

            let child_ctx = ctx
                .child()
                .workflow_id(self.id.clone())
                .node_id(branch.id.clone())
                .branch_key(format!("branch_{}", branch.id))
                .build();

            pending.push((branch, resolved_input, child_ctx));
        }

        debug!(
            workflow_id = %self.id,
            total = self.branches.len(),
            executing = pending.len(),
            "parallel_fan_out"
        );

        let results = join_all(pending.iter().map(|(branch, resolved_input, child_ctx)| {
            branch.runnable.run(resolved_input, child_ctx)
        }))
        .await;

        let mut metrics = RunMetrics::default();
        for ((branch, _, _), result) in pending.iter().zip(results) {
            let output = result?;
            metrics.absorb(&output.metrics);
            state.set_output(&branch.id, output.response, None);
        }

        let outputs: Vec<String> = self
            .branches
            .iter()
            .map(|b| state.get_output(&b.id, None).unwrap_or_default().to_string())
            .collect();

        Ok(RunOutput {
            run_id: ctx.run_id,
            response: self.join.join(&outputs),
            metrics,
        })
    }
}

#[async_trait]
impl Runnable for ParallelWorkflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn runnable_type(&self) -> RunnableType {
        RunnableType::Parallel
    }

    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        let ctx = ctx.for_runnable(&self.id, RunnableType::Parallel);

        let lifecycle = RunLifecycle::start(
            &ctx,
            self.store.as_ref(),
            input,
            &self.id,
            RunnableType::Parallel,
            self.registry.clone(),
        )
        .await?;

        let result = self.run_inner(input, &ctx).await;
        lifecycle.finish(self.store.as_ref(), result).await
    }
}
