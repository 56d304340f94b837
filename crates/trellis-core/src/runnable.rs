// Runnable - the uniform execution contract
//
// Anything executable on a session: an Agent, or a composite workflow over
// other Runnables. One call to `run` produces exactly one RUN_STARTED and
// exactly one terminal RUN_COMPLETED/RUN_FAILED on the context's wire;
// intermediate STEP_* events are emitted as they occur.

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::run::{RunOutput, RunnableType};

#[async_trait]
pub trait Runnable: Send + Sync {
    /// Stable identifier, used for tool naming and cycle detection
    fn id(&self) -> &str;

    fn runnable_type(&self) -> RunnableType;

    /// Execute on the context's session, emitting events onto its wire
    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput>;
}
