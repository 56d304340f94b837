// ContextResolver - template variable substitution for workflow inputs
//
// Supported references:
// - {input}              the original workflow-level input
// - {<node_id>.output}   last assistant content of that node in this
//                        workflow (state cache first, store fallback)
// - {loop.iteration}     current loop iteration
// - {loop.last.<node_id>} that node's output in the previous iteration
//
// Unknown references resolve to the empty string, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;
use trellis_core::{Result, SessionStore};
use uuid::Uuid;

use crate::state::WorkflowState;

const NODE_OUTPUT_SUFFIX: &str = ".output";
const LOOP_LAST_PREFIX: &str = "loop.last.";

pub struct ContextResolver {
    session_id: Uuid,
    workflow_id: String,
    store: Arc<dyn SessionStore>,
    input: Option<String>,
    loop_iteration: Option<u32>,
    loop_last: HashMap<String, String>,
    pattern: Regex,
}

impl ContextResolver {
    pub fn new(
        session_id: Uuid,
        workflow_id: impl Into<String>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            session_id,
            workflow_id: workflow_id.into(),
            store,
            input: None,
            loop_iteration: None,
            loop_last: HashMap::new(),
            // {var} placeholders; braces cannot nest
            pattern: Regex::new(r"\{([^{}]+)\}").expect("static pattern compiles"),
        }
    }

    /// Set the original workflow-level input, bound once at the top
    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = Some(input.into());
    }

    /// Bind the loop context for the current iteration
    pub fn set_loop_context(&mut self, iteration: u32, last_outputs: HashMap<String, String>) {
        self.loop_iteration = Some(iteration);
        self.loop_last = last_outputs;
    }

    /// Output for a node: workflow state cache first, then the store
    async fn node_output(&self, node_id: &str, state: Option<&WorkflowState>) -> Result<String> {
        if let Some(cached) = state.and_then(|s| s.get_output(node_id, None)) {
            return Ok(cached.to_string());
        }

        Ok(self
            .store
            .get_last_assistant_content(self.session_id, node_id, Some(&self.workflow_id))
            .await?
            .unwrap_or_default())
    }

    /// Substitute every `{var}` reference in the template
    pub async fn resolve_template(
        &self,
        template: &str,
        state: Option<&WorkflowState>,
    ) -> Result<String> {
        let mut resolved: HashMap<String, String> = HashMap::new();

        for captures in self.pattern.captures_iter(template) {
            let var = &captures[1];
            if resolved.contains_key(var) {
                continue;
            }

            let value = if var == "input" {
                self.input.clone().unwrap_or_default()
            } else if var == "loop.iteration" {
                self.loop_iteration
                    .map(|i| i.to_string())
                    .unwrap_or_default()
            } else if let Some(node_id) = var.strip_prefix(LOOP_LAST_PREFIX) {
                self.loop_last.get(node_id).cloned().unwrap_or_default()
            } else if let Some(node_id) = var.strip_suffix(NODE_OUTPUT_SUFFIX) {
                self.node_output(node_id, state).await?
            } else {
                debug!(variable = var, "unresolved_template_variable");
                String::new()
            };

            resolved.insert(var.to_string(), value);
        }

        let mut result = template.to_string();
        for (var, value) in &resolved {
            result = result.replace(&format!("{{{var}}}"), value);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{InMemorySessionStore, MessageRole, Step};

    fn resolver_with_store() -> (ContextResolver, Arc<InMemorySessionStore>, Uuid) {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = Uuid::now_v7();
        let resolver = ContextResolver::new(session_id, "wf", store.clone());
        (resolver, store, session_id)
    }

    #[tokio::test]
    async fn test_input_variable() {
        let (mut resolver, _store, _sid) = resolver_with_store();
        resolver.set_input("analyze this");

        let out = resolver
            .resolve_template("Task: {input}", None)
            .await
            .unwrap();
        assert_eq!(out, "Task: analyze this");
    }

    #[tokio::test]
    async fn test_node_output_from_state_cache() {
        let (resolver, store, session_id) = resolver_with_store();

        let mut state = WorkflowState::new(session_id, "wf", store);
        state.set_output("n1", "cached text", None);

        let out = resolver
            .resolve_template("Prior: {n1.output}", Some(&state))
            .await
            .unwrap();
        assert_eq!(out, "Prior: cached text");
    }

    #[tokio::test]
    async fn test_node_output_store_fallback() {
        let (resolver, store, session_id) = resolver_with_store();

        let mut step = Step::new(session_id, Uuid::now_v7(), 1, MessageRole::Assistant);
        step.workflow_id = Some("wf".into());
        step.node_id = Some("n1".into());
        step.content = Some("from store".into());
        store.save_step(&step).await.unwrap();

        let out = resolver
            .resolve_template("Prior: {n1.output}", None)
            .await
            .unwrap();
        assert_eq!(out, "Prior: from store");
    }

    #[tokio::test]
    async fn test_loop_variables() {
        let (mut resolver, _store, _sid) = resolver_with_store();
        resolver.set_loop_context(
            3,
            HashMap::from([("draft".to_string(), "v2 text".to_string())]),
        );

        let out = resolver
            .resolve_template("Round {loop.iteration}: improve {loop.last.draft}", None)
            .await
            .unwrap();
        assert_eq!(out, "Round 3: improve v2 text");
    }

    #[tokio::test]
    async fn test_unknown_variables_resolve_empty() {
        let (resolver, _store, _sid) = resolver_with_store();

        let out = resolver
            .resolve_template("a={missing} b={ghost.output} c={loop.last.none}", None)
            .await
            .unwrap();
        assert_eq!(out, "a= b= c=");
    }

    #[tokio::test]
    async fn test_repeated_variable_resolved_once() {
        let (mut resolver, _store, _sid) = resolver_with_store();
        resolver.set_input("x");

        let out = resolver
            .resolve_template("{input}{input}{input}", None)
            .await
            .unwrap();
        assert_eq!(out, "xxx");
    }
}
