// WorkflowState - in-memory cache of node outputs
//
// Scoped to one (workflow_id, session_id) pair; survives run_id changes so
// resumed and forked workflows skip nodes that already executed. The cache
// distinguishes "executed with empty output" (key present, empty string)
// from "not executed" (key absent) - idempotency depends on it.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{Result, SessionStore, StepFilter};
use uuid::Uuid;

// Covers any realistic workflow history in one load
const HISTORY_LIMIT: usize = 10_000;

pub struct WorkflowState {
    session_id: Uuid,
    workflow_id: String,
    store: Arc<dyn SessionStore>,
    outputs: HashMap<String, String>,
    loaded: bool,
}

impl WorkflowState {
    pub fn new(session_id: Uuid, workflow_id: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            session_id,
            workflow_id: workflow_id.into(),
            store,
            outputs: HashMap::new(),
            loaded: false,
        }
    }

    /// Bulk-load prior node outputs from the session history.
    ///
    /// Called once at the start of a (re)execution. Each node's key maps to
    /// the content of its last assistant step; loop iterations are keyed
    /// separately.
    pub async fn load_from_history(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        let steps = self
            .store
            .get_steps(
                self.session_id,
                &StepFilter::default()
                    .workflow_id(self.workflow_id.clone())
                    .limit(HISTORY_LIMIT),
            )
            .await?;

        for step in steps {
            if !step.is_assistant() {
                continue;
            }
            let Some(node_id) = &step.node_id else {
                continue;
            };
            // Empty content still marks the node as executed
            self.outputs.insert(
                Self::make_key(node_id, step.iteration),
                step.content.clone().unwrap_or_default(),
            );
        }

        self.loaded = true;
        Ok(())
    }

    fn make_key(node_id: &str, iteration: Option<u32>) -> String {
        match iteration {
            Some(i) => format!("{node_id}:iter_{i}"),
            None => node_id.to_string(),
        }
    }

    /// Cached output for a node, if it executed
    pub fn get_output(&self, node_id: &str, iteration: Option<u32>) -> Option<&str> {
        self.outputs
            .get(&Self::make_key(node_id, iteration))
            .map(String::as_str)
    }

    pub fn set_output(&mut self, node_id: &str, content: impl Into<String>, iteration: Option<u32>) {
        self.outputs
            .insert(Self::make_key(node_id, iteration), content.into());
    }

    /// Idempotency check: true iff the node executed, even when its output
    /// was empty
    pub fn has_output(&self, node_id: &str, iteration: Option<u32>) -> bool {
        self.outputs.contains_key(&Self::make_key(node_id, iteration))
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
        self.loaded = false;
    }
}

impl std::fmt::Debug for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowState")
            .field("workflow_id", &self.workflow_id)
            .field("nodes", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{InMemorySessionStore, MessageRole, Step};

    fn assistant_step(
        session_id: Uuid,
        sequence: i64,
        workflow_id: &str,
        node_id: &str,
        content: &str,
    ) -> Step {
        let mut step = Step::new(session_id, Uuid::now_v7(), sequence, MessageRole::Assistant);
        step.workflow_id = Some(workflow_id.to_string());
        step.node_id = Some(node_id.to_string());
        step.content = Some(content.to_string());
        step
    }

    #[tokio::test]
    async fn test_load_from_history_keeps_last_output() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = Uuid::now_v7();

        store
            .save_step(&assistant_step(session_id, 1, "wf", "n1", "old"))
            .await
            .unwrap();
        store
            .save_step(&assistant_step(session_id, 2, "wf", "n1", "new"))
            .await
            .unwrap();
        // Other workflow's steps stay invisible
        store
            .save_step(&assistant_step(session_id, 3, "other", "n1", "foreign"))
            .await
            .unwrap();

        let mut state = WorkflowState::new(session_id, "wf", store);
        state.load_from_history().await.unwrap();

        assert_eq!(state.get_output("n1", None), Some("new"));
        assert!(!state.has_output("n2", None));
    }

    #[tokio::test]
    async fn test_empty_output_still_counts_as_executed() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = Uuid::now_v7();

        store
            .save_step(&assistant_step(session_id, 1, "wf", "n1", ""))
            .await
            .unwrap();

        let mut state = WorkflowState::new(session_id, "wf", store);
        state.load_from_history().await.unwrap();

        assert!(state.has_output("n1", None));
        assert_eq!(state.get_output("n1", None), Some(""));
    }

    #[tokio::test]
    async fn test_iteration_keys_are_distinct() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut state = WorkflowState::new(Uuid::now_v7(), "wf", store);

        state.set_output("n1", "first", Some(0));
        state.set_output("n1", "second", Some(1));

        assert_eq!(state.get_output("n1", Some(0)), Some("first"));
        assert_eq!(state.get_output("n1", Some(1)), Some("second"));
        assert!(!state.has_output("n1", None));
        assert!(!state.has_output("n1", Some(2)));
    }

    #[tokio::test]
    async fn test_loaded_iteration_steps_key_by_iteration() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = Uuid::now_v7();

        let mut step = assistant_step(session_id, 1, "wf", "body", "iter-0 output");
        step.iteration = Some(0);
        store.save_step(&step).await.unwrap();

        let mut state = WorkflowState::new(session_id, "wf", store);
        state.load_from_history().await.unwrap();

        assert!(state.has_output("body", Some(0)));
        assert!(!state.has_output("body", None));
    }

    #[tokio::test]
    async fn test_clear_resets_cache_and_reload() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = Uuid::now_v7();
        store
            .save_step(&assistant_step(session_id, 1, "wf", "n1", "cached"))
            .await
            .unwrap();

        let mut state = WorkflowState::new(session_id, "wf", store);
        state.load_from_history().await.unwrap();
        assert!(state.has_output("n1", None));

        state.clear();
        assert!(!state.has_output("n1", None));

        state.load_from_history().await.unwrap();
        assert!(state.has_output("n1", None));
    }
}
