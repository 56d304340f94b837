// Row models and conversions between the database shape and domain types

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use trellis_core::{
    Run, RunMetrics, RunStatus, RunnableType, Step, StepMetrics, ToolCall,
};

fn runnable_type_from(s: &str) -> RunnableType {
    match s {
        "pipeline" => RunnableType::Pipeline,
        "parallel" => RunnableType::Parallel,
        "loop" => RunnableType::Loop,
        _ => RunnableType::Agent,
    }
}

#[derive(Debug, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub runnable_id: String,
    pub runnable_type: String,
    pub input_query: Option<String>,
    pub response_content: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub parent_run_id: Option<Uuid>,
    pub metrics: Json<RunMetrics>,
    pub created_at: DateTime<Utc>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id,
            session_id: row.session_id,
            runnable_id: row.runnable_id,
            runnable_type: runnable_type_from(&row.runnable_type),
            input_query: row.input_query,
            response_content: row.response_content,
            status: RunStatus::from(row.status.as_str()),
            error: row.error,
            parent_run_id: row.parent_run_id,
            metrics: row.metrics.0,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct StepRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub run_id: Uuid,
    pub sequence: i64,
    pub role: String,
    pub content: Option<String>,
    pub tool_calls: Option<Json<Vec<ToolCall>>>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub workflow_id: Option<String>,
    pub node_id: Option<String>,
    pub parent_run_id: Option<Uuid>,
    pub branch_key: Option<String>,
    pub iteration: Option<i32>,
    pub runnable_id: Option<String>,
    pub runnable_type: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub depth: i32,
    pub metrics: Option<Json<StepMetrics>>,
    pub created_at: DateTime<Utc>,
}

impl From<StepRow> for Step {
    fn from(row: StepRow) -> Self {
        Step {
            id: row.id,
            session_id: row.session_id,
            run_id: row.run_id,
            sequence: row.sequence,
            role: row.role.as_str().into(),
            content: row.content,
            tool_calls: row.tool_calls.map(|j| j.0),
            tool_call_id: row.tool_call_id,
            name: row.name,
            workflow_id: row.workflow_id,
            node_id: row.node_id,
            parent_run_id: row.parent_run_id,
            branch_key: row.branch_key,
            iteration: row.iteration.map(|i| i.max(0) as u32),
            runnable_id: row.runnable_id,
            runnable_type: row.runnable_type.as_deref().map(runnable_type_from),
            trace_id: row.trace_id,
            span_id: row.span_id,
            parent_span_id: row.parent_span_id,
            depth: row.depth.max(0) as u32,
            metrics: row.metrics.map(|j| j.0),
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::MessageRole;

    #[test]
    fn test_run_row_round_trip() {
        let row = RunRow {
            id: Uuid::now_v7(),
            session_id: Uuid::now_v7(),
            runnable_id: "assistant".into(),
            runnable_type: "pipeline".into(),
            input_query: Some("hi".into()),
            response_content: None,
            status: "running".into(),
            error: None,
            parent_run_id: None,
            metrics: Json(RunMetrics {
                total_tokens: Some(10),
                ..RunMetrics::default()
            }),
            created_at: Utc::now(),
        };

        let run: Run = row.into();
        assert_eq!(run.runnable_type, RunnableType::Pipeline);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.metrics.total_tokens, Some(10));
    }

    #[test]
    fn test_step_row_round_trip() {
        let row = StepRow {
            id: Uuid::now_v7(),
            session_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            sequence: 3,
            role: "assistant".into(),
            content: None,
            tool_calls: Some(Json(vec![ToolCall::new("c1", "ls", "{}")])),
            tool_call_id: None,
            name: None,
            workflow_id: Some("wf".into()),
            node_id: Some("n1".into()),
            parent_run_id: None,
            branch_key: None,
            iteration: Some(2),
            runnable_id: Some("writer".into()),
            runnable_type: Some("agent".into()),
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            depth: 1,
            metrics: None,
            created_at: Utc::now(),
        };

        let step: Step = row.into();
        assert_eq!(step.role, MessageRole::Assistant);
        assert_eq!(step.sequence, 3);
        assert_eq!(step.tool_calls.unwrap()[0].id, "c1");
        assert_eq!(step.iteration, Some(2));
        assert_eq!(step.depth, 1);
        assert_eq!(step.runnable_type, Some(RunnableType::Agent));
    }
}
