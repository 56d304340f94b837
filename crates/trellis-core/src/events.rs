// Step events for streaming
//
// StepEvent is the currency of the Wire. Every event carries the run
// envelope (run_id, parent_run_id, depth, nested runnable) so that events
// from nested runs can flow through the root run's wire and still be
// attributed. For a given step_id: zero or more StepDelta events, then
// exactly one StepCompleted. Only StepCompleted implies durable intent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::run::{Run, RunMetrics, RunOutput};
use crate::step::Step;
use crate::tool_types::ToolCallFragment;

/// An incremental piece of a step under construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

impl StepDelta {
    pub fn content(chunk: impl Into<String>) -> Self {
        Self {
            content: Some(chunk.into()),
            tool_calls: None,
        }
    }

    pub fn tool_calls(fragments: Vec<ToolCallFragment>) -> Self {
        Self {
            content: None,
            tool_calls: Some(fragments),
        }
    }
}

/// Event payload kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEventPayload {
    RunStarted {
        run: Box<Run>,
    },
    RunCompleted {
        response: String,
        metrics: RunMetrics,
    },
    RunFailed {
        error: String,
    },
    StepDelta {
        step_id: Uuid,
        delta: StepDelta,
    },
    StepCompleted {
        step_id: Uuid,
        snapshot: Box<Step>,
    },
}

/// An event on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested_runnable_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: StepEventPayload,
}

impl StepEvent {
    fn envelope(ctx: &ExecutionContext, payload: StepEventPayload) -> Self {
        // Runs nested under a parent are attributed by runnable id
        let nested_runnable_id = if ctx.parent_run_id.is_some() {
            ctx.runnable_id.clone()
        } else {
            None
        };

        Self {
            run_id: ctx.run_id,
            parent_run_id: ctx.parent_run_id,
            depth: ctx.depth,
            nested_runnable_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a run started event
    pub fn run_started(ctx: &ExecutionContext, run: &Run) -> Self {
        Self::envelope(
            ctx,
            StepEventPayload::RunStarted {
                run: Box::new(run.clone()),
            },
        )
    }

    /// Create a run completed event
    pub fn run_completed(ctx: &ExecutionContext, output: &RunOutput) -> Self {
        Self::envelope(
            ctx,
            StepEventPayload::RunCompleted {
                response: output.response.clone(),
                metrics: output.metrics.clone(),
            },
        )
    }

    /// Create a run failed event
    pub fn run_failed(ctx: &ExecutionContext, error: impl Into<String>) -> Self {
        Self::envelope(
            ctx,
            StepEventPayload::RunFailed {
                error: error.into(),
            },
        )
    }

    /// Create a step delta event
    pub fn step_delta(ctx: &ExecutionContext, step_id: Uuid, delta: StepDelta) -> Self {
        Self::envelope(ctx, StepEventPayload::StepDelta { step_id, delta })
    }

    /// Create a step completed event carrying the full snapshot
    pub fn step_completed(ctx: &ExecutionContext, snapshot: &Step) -> Self {
        Self::envelope(
            ctx,
            StepEventPayload::StepCompleted {
                step_id: snapshot.id,
                snapshot: Box::new(snapshot.clone()),
            },
        )
    }

    /// Whether this is a lossy-droppable delta event
    pub fn is_delta(&self) -> bool {
        matches!(self.payload, StepEventPayload::StepDelta { .. })
    }

    /// The step this event concerns, if any
    pub fn step_id(&self) -> Option<Uuid> {
        match &self.payload {
            StepEventPayload::StepDelta { step_id, .. } => Some(*step_id),
            StepEventPayload::StepCompleted { step_id, .. } => Some(*step_id),
            _ => None,
        }
    }

    /// Short kind label, for logs
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            StepEventPayload::RunStarted { .. } => "run_started",
            StepEventPayload::RunCompleted { .. } => "run_completed",
            StepEventPayload::RunFailed { .. } => "run_failed",
            StepEventPayload::StepDelta { .. } => "step_delta",
            StepEventPayload::StepCompleted { .. } => "step_completed",
        }
    }
}
