// Run lifecycle - status machine around one Runnable::run call
//
// Entry builds the RUNNING run, persists it, registers the abort signal and
// emits RUN_STARTED. Exit maps the body's result onto the terminal status:
// output → COMPLETED, cancellation → CANCELLED, error → FAILED. There is no
// async drop; callers finish the scope explicitly.

use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};

use crate::context::ExecutionContext;
use crate::control::AbortRegistry;
use crate::error::{AgentError, Result};
use crate::events::StepEvent;
use crate::run::{Run, RunOutput, RunStatus, RunnableType};
use crate::store::SessionStore;

pub struct RunLifecycle {
    ctx: ExecutionContext,
    run: Run,
    registry: Option<AbortRegistry>,
    started: Instant,
}

impl RunLifecycle {
    /// Open the scope: persist the RUNNING run and emit RUN_STARTED.
    ///
    /// When a registry is provided, the context's abort signal is registered
    /// under the run id until the scope finishes.
    pub async fn start(
        ctx: &ExecutionContext,
        store: &dyn SessionStore,
        input: &str,
        runnable_id: &str,
        runnable_type: RunnableType,
        registry: Option<AbortRegistry>,
    ) -> Result<Self> {
        let run = Run::started(
            ctx.run_id,
            ctx.session_id,
            runnable_id,
            runnable_type,
            input,
            ctx.parent_run_id,
        );

        store.save_run(&run).await?;

        if let Some(registry) = &registry {
            registry.register(ctx.run_id, ctx.abort.clone());
        }

        ctx.wire.emit(StepEvent::run_started(ctx, &run)).await;

        Ok(Self {
            ctx: ctx.clone(),
            run,
            registry,
            started: Instant::now(),
        })
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Close the scope, mapping the body's result onto the terminal status
    /// and passing the result through.
    pub async fn finish(
        mut self,
        store: &dyn SessionStore,
        result: Result<RunOutput>,
    ) -> Result<RunOutput> {
        self.run.metrics.end_time = Some(Utc::now());
        self.run.metrics.duration_ms = Some(self.started.elapsed().as_millis() as u64);

        if let Some(registry) = &self.registry {
            registry.unregister(self.ctx.run_id);
        }

        match result {
            Ok(output) => {
                self.run.status = RunStatus::Completed;
                self.run.response_content = Some(output.response.clone());
                self.run.metrics.absorb(&output.metrics);

                store.save_run(&self.run).await?;
                info!(
                    run_id = %self.run.id,
                    runnable_id = %self.run.runnable_id,
                    duration_ms = self.run.metrics.duration_ms,
                    "run_completed"
                );

                // Return the run-level metrics so parents aggregate totals
                // plus timing, not just the executor sums.
                let output = RunOutput {
                    run_id: output.run_id,
                    response: output.response,
                    metrics: self.run.metrics.clone(),
                };
                self.ctx
                    .wire
                    .emit(StepEvent::run_completed(&self.ctx, &output))
                    .await;
                Ok(output)
            }
            Err(err) if err.is_cancelled() => {
                self.run.status = RunStatus::Cancelled;
                self.run.error = Some(err.to_string());

                store.save_run(&self.run).await?;
                info!(run_id = %self.run.id, reason = %err, "run_cancelled");

                self.ctx
                    .wire
                    .emit(StepEvent::run_failed(&self.ctx, err.to_string()))
                    .await;
                Err(err)
            }
            Err(err) => {
                self.run.status = RunStatus::Failed;
                self.run.error = Some(err.to_string());

                store.save_run(&self.run).await?;
                error!(
                    run_id = %self.run.id,
                    runnable_id = %self.run.runnable_id,
                    error = %err,
                    "run_failed"
                );

                self.ctx
                    .wire
                    .emit(StepEvent::run_failed(&self.ctx, err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    /// Close a scope whose body produced neither output nor error.
    /// Recorded as a failure.
    pub async fn abandon(self, store: &dyn SessionStore) -> Result<RunOutput> {
        self.finish(
            store,
            Err(AgentError::Internal(anyhow::anyhow!(
                "run exited without output"
            ))),
        )
        .await
    }
}
