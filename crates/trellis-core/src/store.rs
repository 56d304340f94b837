// Session store contract
//
// Persistence is keyed primarily by session_id. Steps upsert by
// `(session_id, sequence)` so idempotent replay during resume never creates
// duplicates, and reads always return ascending sequence order.
// `allocate_sequence` is linearizable per session: concurrent callers get
// distinct, monotonically increasing values (gaps from uncommitted
// reservations are allowed and never reclaimed).

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::run::Run;
use crate::step::Step;

/// Default cap on steps returned by a query
pub const DEFAULT_STEP_LIMIT: usize = 1000;

/// Filters for step queries; all present filters are ANDed
#[derive(Debug, Clone)]
pub struct StepFilter {
    pub start_seq: Option<i64>,
    pub end_seq: Option<i64>,
    pub run_id: Option<Uuid>,
    pub workflow_id: Option<String>,
    pub node_id: Option<String>,
    pub branch_key: Option<String>,
    pub runnable_id: Option<String>,
    pub limit: usize,
}

impl Default for StepFilter {
    fn default() -> Self {
        Self {
            start_seq: None,
            end_seq: None,
            run_id: None,
            workflow_id: None,
            node_id: None,
            branch_key: None,
            runnable_id: None,
            limit: DEFAULT_STEP_LIMIT,
        }
    }
}

impl StepFilter {
    pub fn start_seq(mut self, seq: i64) -> Self {
        self.start_seq = Some(seq);
        self
    }

    pub fn end_seq(mut self, seq: i64) -> Self {
        self.end_seq = Some(seq);
        self
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn branch_key(mut self, branch_key: impl Into<String>) -> Self {
        self.branch_key = Some(branch_key.into());
        self
    }

    pub fn runnable_id(mut self, runnable_id: impl Into<String>) -> Self {
        self.runnable_id = Some(runnable_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a step passes every present filter (limit excluded)
    pub fn matches(&self, step: &Step) -> bool {
        if self.start_seq.is_some_and(|s| step.sequence < s) {
            return false;
        }
        if self.end_seq.is_some_and(|e| step.sequence > e) {
            return false;
        }
        if self.run_id.is_some_and(|r| step.run_id != r) {
            return false;
        }
        if self
            .workflow_id
            .as_deref()
            .is_some_and(|w| step.workflow_id.as_deref() != Some(w))
        {
            return false;
        }
        if self
            .node_id
            .as_deref()
            .is_some_and(|n| step.node_id.as_deref() != Some(n))
        {
            return false;
        }
        if self
            .branch_key
            .as_deref()
            .is_some_and(|b| step.branch_key.as_deref() != Some(b))
        {
            return false;
        }
        if self
            .runnable_id
            .as_deref()
            .is_some_and(|r| step.runnable_id.as_deref() != Some(r))
        {
            return false;
        }
        true
    }
}

/// Trait for session persistence backends
#[async_trait]
pub trait SessionStore: Send + Sync {
    // --- Run operations ---

    async fn save_run(&self, run: &Run) -> Result<()>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>>;

    async fn list_runs(
        &self,
        session_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>>;

    async fn delete_run(&self, run_id: Uuid) -> Result<()>;

    // --- Step operations ---

    /// Upsert by `(session_id, sequence)`: an existing step with the same
    /// key is replaced in place, never duplicated.
    async fn save_step(&self, step: &Step) -> Result<()>;

    /// Bulk save; per-step atomicity is sufficient
    async fn save_steps_batch(&self, steps: &[Step]) -> Result<()> {
        for step in steps {
            self.save_step(step).await?;
        }
        Ok(())
    }

    /// Matching steps sorted ascending by sequence
    async fn get_steps(&self, session_id: Uuid, filter: &StepFilter) -> Result<Vec<Step>>;

    /// The step with maximum sequence
    async fn get_last_step(&self, session_id: Uuid) -> Result<Option<Step>>;

    /// Total step count for a session
    async fn get_step_count(&self, session_id: Uuid) -> Result<usize>;

    /// Maximum sequence in the session, 0 when empty
    async fn get_max_sequence(&self, session_id: Uuid) -> Result<i64>;

    /// Atomically allocate the next sequence number for a session
    async fn allocate_sequence(&self, session_id: Uuid) -> Result<i64>;

    /// Delete all steps with `sequence >= start_seq`, returning the count
    async fn delete_steps(&self, session_id: Uuid, start_seq: i64) -> Result<u64>;

    // --- Default-method helpers ---

    /// Content of the most recent assistant step for a workflow node
    async fn get_last_assistant_content(
        &self,
        session_id: Uuid,
        node_id: &str,
        workflow_id: Option<&str>,
    ) -> Result<Option<String>> {
        let mut filter = StepFilter::default().node_id(node_id);
        if let Some(workflow_id) = workflow_id {
            filter = filter.workflow_id(workflow_id);
        }

        let steps = self.get_steps(session_id, &filter).await?;
        Ok(steps
            .iter()
            .rev()
            .find(|s| s.is_assistant() && s.content.is_some())
            .and_then(|s| s.content.clone()))
    }

    /// Find the tool step answering a given tool call (cross-agent reference)
    async fn get_step_by_tool_call_id(
        &self,
        session_id: Uuid,
        tool_call_id: &str,
    ) -> Result<Option<Step>> {
        let steps = self.get_steps(session_id, &StepFilter::default()).await?;
        Ok(steps
            .into_iter()
            .find(|s| s.tool_call_id.as_deref() == Some(tool_call_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::MessageRole;

    #[test]
    fn test_filter_matches_and_semantics() {
        let session_id = Uuid::now_v7();
        let run_id = Uuid::now_v7();
        let mut step = Step::new(session_id, run_id, 5, MessageRole::Assistant);
        step.workflow_id = Some("wf".into());
        step.node_id = Some("n1".into());

        assert!(StepFilter::default().matches(&step));
        assert!(StepFilter::default()
            .start_seq(5)
            .end_seq(5)
            .run_id(run_id)
            .workflow_id("wf")
            .node_id("n1")
            .matches(&step));

        assert!(!StepFilter::default().start_seq(6).matches(&step));
        assert!(!StepFilter::default().end_seq(4).matches(&step));
        assert!(!StepFilter::default().workflow_id("other").matches(&step));
        assert!(!StepFilter::default().branch_key("branch_b1").matches(&step));
    }
}
