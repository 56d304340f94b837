// Run domain types
//
// A Run represents one invocation of `Runnable::run` on a session. Runs are
// persisted for observability; the session's Steps remain the source of
// truth for conversation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of runnable that produced a run or step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnableType {
    Agent,
    Pipeline,
    Parallel,
    Loop,
}

impl std::fmt::Display for RunnableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnableType::Agent => write!(f, "agent"),
            RunnableType::Pipeline => write!(f, "pipeline"),
            RunnableType::Parallel => write!(f, "parallel"),
            RunnableType::Loop => write!(f, "loop"),
        }
    }
}

/// Run status machine: PENDING → RUNNING → (COMPLETED | FAILED | CANCELLED).
/// Terminal states are final. PAUSED is reachable only from RUNNING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl RunStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending" => RunStatus::Pending,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "paused" => RunStatus::Paused,
            _ => RunStatus::Running,
        }
    }
}

/// Aggregated metrics for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    pub tool_calls_count: u64,
}

impl RunMetrics {
    fn add_opt(lhs: Option<u64>, rhs: Option<u64>) -> Option<u64> {
        match (lhs, rhs) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        }
    }

    /// Fold another metrics record into this one (token totals + tool calls)
    pub fn absorb(&mut self, other: &RunMetrics) {
        self.input_tokens = Self::add_opt(self.input_tokens, other.input_tokens);
        self.output_tokens = Self::add_opt(self.output_tokens, other.output_tokens);
        self.total_tokens = Self::add_opt(self.total_tokens, other.total_tokens);
        self.tool_calls_count += other.tool_calls_count;
    }
}

/// One invocation of `Runnable::run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub session_id: Uuid,
    pub runnable_id: String,
    pub runnable_type: RunnableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_content: Option<String>,
    pub status: RunStatus,
    /// Failure capture when status is Failed or Cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
    pub metrics: RunMetrics,
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// Create a new run in the Running state
    pub fn started(
        id: Uuid,
        session_id: Uuid,
        runnable_id: impl Into<String>,
        runnable_type: RunnableType,
        input_query: impl Into<String>,
        parent_run_id: Option<Uuid>,
    ) -> Self {
        Self {
            id,
            session_id,
            runnable_id: runnable_id.into(),
            runnable_type,
            input_query: Some(input_query.into()),
            response_content: None,
            status: RunStatus::Running,
            error: None,
            parent_run_id,
            metrics: RunMetrics {
                start_time: Some(Utc::now()),
                ..RunMetrics::default()
            },
            created_at: Utc::now(),
        }
    }
}

/// The value returned by a successful `Runnable::run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub response: String,
    pub metrics: RunMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn test_metrics_absorb() {
        let mut total = RunMetrics::default();
        total.absorb(&RunMetrics {
            input_tokens: Some(10),
            output_tokens: Some(5),
            total_tokens: Some(15),
            tool_calls_count: 2,
            ..RunMetrics::default()
        });
        total.absorb(&RunMetrics {
            input_tokens: Some(1),
            tool_calls_count: 1,
            ..RunMetrics::default()
        });

        assert_eq!(total.input_tokens, Some(11));
        assert_eq!(total.output_tokens, Some(5));
        assert_eq!(total.total_tokens, Some(15));
        assert_eq!(total.tool_calls_count, 3);
    }

    #[test]
    fn test_metrics_absorb_keeps_none() {
        let mut total = RunMetrics::default();
        total.absorb(&RunMetrics::default());
        assert_eq!(total.total_tokens, None);
    }

    #[test]
    fn test_run_started() {
        let run = Run::started(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "assistant",
            RunnableType::Agent,
            "hello",
            None,
        );
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.metrics.start_time.is_some());
        assert_eq!(run.input_query.as_deref(), Some("hello"));
    }
}
