// Step executor - the LLM ↔ tool loop
//
// Runs inside one run. Each iteration mints an assistant step with a
// reserved sequence, drives a streaming LLM call (emitting deltas onto the
// wire as they arrive), persists the finalized step, and either terminates
// (no tool calls) or executes the batch and loops. Tool steps are recorded
// in tool_call order regardless of completion order. The executor persists
// steps itself; run state belongs to the lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::debug;

use crate::adapter::StepAdapter;
use crate::config::ExecutionConfig;
use crate::context::{ExecutionContext, StepFactory};
use crate::error::Result;
use crate::events::{StepDelta, StepEvent};
use crate::llm::{LlmDriver, LlmMessage, LlmUsage};
use crate::run::RunMetrics;
use crate::step::StepMetrics;
use crate::store::SessionStore;
use crate::tool_executor::ToolExecutor;
use crate::tool_types::{ToolCall, ToolCallFragment};

// ============================================================================
// ToolCallAccumulator
// ============================================================================

/// Accumulates streaming tool-call fragments.
///
/// Providers emit tool calls incrementally, keyed by index: `id` overwrites,
/// `name` and `arguments` concatenate. Finalization keeps only entries that
/// received an id.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of incoming fragments
    pub fn accumulate(&mut self, fragments: &[ToolCallFragment]) {
        for fragment in fragments {
            let acc = self.calls.entry(fragment.index).or_default();

            if let Some(id) = &fragment.id {
                acc.id = Some(id.clone());
            }
            if let Some(name) = &fragment.name {
                acc.name.push_str(name);
            }
            if let Some(arguments) = &fragment.arguments {
                acc.arguments.push_str(arguments);
            }
        }
    }

    /// Completed calls in index order
    pub fn finalize(&self) -> Vec<ToolCall> {
        self.calls
            .values()
            .filter_map(|acc| {
                acc.id.as_ref().map(|id| ToolCall {
                    id: id.clone(),
                    name: acc.name.clone(),
                    arguments: acc.arguments.clone(),
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

// ============================================================================
// StepExecutor
// ============================================================================

/// What the loop produced, for the lifecycle to fold into the run
#[derive(Debug, Default)]
pub struct ExecutorOutcome {
    /// Content of the last assistant step that produced any
    pub response: Option<String>,
    /// Token totals and tool call count summed across the run's steps
    pub metrics: RunMetrics,
    /// Number of loop iterations taken
    pub steps_taken: u32,
}

/// The LLM ↔ tool loop
pub struct StepExecutor {
    driver: Arc<dyn LlmDriver>,
    tool_executor: ToolExecutor,
    config: ExecutionConfig,
}

impl StepExecutor {
    pub fn new(
        driver: Arc<dyn LlmDriver>,
        tool_executor: ToolExecutor,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            driver,
            tool_executor,
            config,
        }
    }

    /// Drive the loop until the model stops requesting tools, max_steps is
    /// reached, the stream errors, or the abort signal trips.
    ///
    /// `pending_tool_calls` are executed before the first LLM call; this is
    /// the resume path for a run that crashed between persisting an
    /// assistant step and its tool responses.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        store: &dyn SessionStore,
        mut messages: Vec<LlmMessage>,
        pending_tool_calls: Vec<ToolCall>,
    ) -> Result<ExecutorOutcome> {
        let factory = StepFactory::new(ctx);
        let mut outcome = ExecutorOutcome::default();

        if !pending_tool_calls.is_empty() {
            debug!(
                session_id = %ctx.session_id,
                run_id = %ctx.run_id,
                tool_count = pending_tool_calls.len(),
                "executor_resuming_pending_tools"
            );
            self.run_tool_batch(ctx, store, &factory, &pending_tool_calls, &mut messages, &mut outcome)
                .await?;
        }

        let schemas = self.tool_executor.registry().schemas();
        let tools = if schemas.is_empty() {
            None
        } else {
            Some(schemas.as_slice())
        };

        while outcome.steps_taken < self.config.max_steps {
            ctx.abort.check()?;
            outcome.steps_taken += 1;

            let sequence = store.allocate_sequence(ctx.session_id).await?;
            let mut assistant = factory.assistant_step(sequence, None, None, None);

            debug!(
                session_id = %ctx.session_id,
                run_id = %ctx.run_id,
                step = outcome.steps_taken,
                sequence,
                "executor_step_started"
            );

            let step_start = Instant::now();
            let mut first_token: Option<Instant> = None;
            let mut content = String::new();
            let mut accumulator = ToolCallAccumulator::new();
            let mut usage: Option<LlmUsage> = None;

            let mut stream = self.driver.stream(messages.clone(), tools).await?;
            while let Some(chunk) = stream.next().await {
                ctx.abort.check()?;
                let chunk = chunk?;

                if first_token.is_none() && chunk.has_output() {
                    first_token = Some(Instant::now());
                }

                if let Some(delta) = chunk.content.filter(|c| !c.is_empty()) {
                    content.push_str(&delta);
                    ctx.wire
                        .emit(StepEvent::step_delta(
                            ctx,
                            assistant.id,
                            StepDelta::content(delta),
                        ))
                        .await;
                }

                if let Some(fragments) = chunk.tool_calls.filter(|f| !f.is_empty()) {
                    accumulator.accumulate(&fragments);
                    ctx.wire
                        .emit(StepEvent::step_delta(
                            ctx,
                            assistant.id,
                            StepDelta::tool_calls(fragments),
                        ))
                        .await;
                }

                if let Some(chunk_usage) = chunk.usage {
                    usage = Some(chunk_usage);
                }
            }

            let tool_calls = accumulator.finalize();

            assistant.content = (!content.is_empty()).then_some(content);
            assistant.tool_calls = (!tool_calls.is_empty()).then(|| tool_calls.clone());
            assistant.metrics = Some(self.assistant_metrics(step_start, first_token, usage.as_ref()));

            store.save_step(&assistant).await?;
            ctx.wire.emit(StepEvent::step_completed(ctx, &assistant)).await;

            messages.push(StepAdapter::to_llm_message(&assistant));

            if let Some(text) = &assistant.content {
                outcome.response = Some(text.clone());
            }
            if let Some(usage) = &usage {
                outcome.metrics.absorb(&RunMetrics {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    ..RunMetrics::default()
                });
            }

            if tool_calls.is_empty() {
                debug!(
                    session_id = %ctx.session_id,
                    run_id = %ctx.run_id,
                    total_steps = outcome.steps_taken,
                    "executor_completed"
                );
                return Ok(outcome);
            }

            self.run_tool_batch(ctx, store, &factory, &tool_calls, &mut messages, &mut outcome)
                .await?;
        }

        debug!(
            session_id = %ctx.session_id,
            run_id = %ctx.run_id,
            max_steps = self.config.max_steps,
            "executor_max_steps_reached"
        );
        Ok(outcome)
    }

    /// Execute a tool batch, then persist and emit one tool step per call in
    /// tool_call order
    async fn run_tool_batch(
        &self,
        ctx: &ExecutionContext,
        store: &dyn SessionStore,
        factory: &StepFactory<'_>,
        calls: &[ToolCall],
        messages: &mut Vec<LlmMessage>,
        outcome: &mut ExecutorOutcome,
    ) -> Result<()> {
        ctx.abort.check()?;

        debug!(
            session_id = %ctx.session_id,
            run_id = %ctx.run_id,
            tool_count = calls.len(),
            "executor_executing_tools"
        );

        let results = self.tool_executor.execute_batch(calls, ctx, &ctx.abort).await;
        outcome.metrics.tool_calls_count += results.len() as u64;

        for result in results {
            let sequence = store.allocate_sequence(ctx.session_id).await?;
            let step = factory.tool_step(
                sequence,
                result.tool_call_id.clone(),
                result.tool_name.clone(),
                result.content.clone(),
                Some(StepMetrics {
                    duration_ms: Some(result.duration_ms),
                    tool_exec_time_ms: Some(result.duration_ms),
                    ..StepMetrics::default()
                }),
            );

            store.save_step(&step).await?;
            ctx.wire.emit(StepEvent::step_completed(ctx, &step)).await;
            messages.push(StepAdapter::to_llm_message(&step));
        }

        Ok(())
    }

    fn assistant_metrics(
        &self,
        step_start: Instant,
        first_token: Option<Instant>,
        usage: Option<&LlmUsage>,
    ) -> StepMetrics {
        StepMetrics {
            duration_ms: Some(step_start.elapsed().as_millis() as u64),
            first_token_latency_ms: first_token
                .map(|t| t.duration_since(step_start).as_millis() as u64),
            input_tokens: usage.and_then(|u| u.prompt_tokens),
            output_tokens: usage.and_then(|u| u.completion_tokens),
            total_tokens: usage.and_then(|u| u.total_tokens),
            tool_exec_time_ms: None,
            model_name: Some(self.driver.model_name().to_string()),
            provider: Some(self.driver.provider().to_string()),
        }
    }
}
