// Workflow node definition

use std::sync::Arc;

use trellis_core::Runnable;

/// A node in a composite workflow: a child runnable plus the template its
/// input is resolved from.
#[derive(Clone)]
pub struct WorkflowNode {
    pub id: String,
    pub runnable: Arc<dyn Runnable>,
    pub input_template: String,
}

impl WorkflowNode {
    pub fn new(
        id: impl Into<String>,
        runnable: Arc<dyn Runnable>,
        input_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            runnable,
            input_template: input_template.into(),
        }
    }
}

impl std::fmt::Debug for WorkflowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowNode")
            .field("id", &self.id)
            .field("runnable_id", &self.runnable.id())
            .field("input_template", &self.input_template)
            .finish()
    }
}
