// Agent - a Runnable driving one step-loop session
//
// An Agent owns a driver, a static tool registry and an optional system
// prompt. It is stateless across runs: every run rebuilds its messages from
// the session's persisted steps. `resume` continues a session whose last
// run crashed, executing any tool calls left unanswered before re-entering
// the LLM loop.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::adapter::StepAdapter;
use crate::config::ExecutionConfig;
use crate::context::{ExecutionContext, StepFactory};
use crate::control::AbortRegistry;
use crate::error::{AgentError, Result};
use crate::executor::StepExecutor;
use crate::lifecycle::RunLifecycle;
use crate::llm::{LlmDriver, LlmMessage};
use crate::run::{RunOutput, RunnableType};
use crate::runnable::Runnable;
use crate::step::Step;
use crate::store::{SessionStore, StepFilter};
use crate::tool_executor::ToolExecutor;
use crate::tool_types::ToolCall;
use crate::tools::{Tool, ToolRegistry};

pub struct Agent {
    id: String,
    driver: Arc<dyn LlmDriver>,
    tools: ToolRegistry,
    system_prompt: Option<String>,
    config: ExecutionConfig,
    store: Arc<dyn SessionStore>,
    registry: Option<AbortRegistry>,
}

impl Agent {
    pub fn builder(id: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(id)
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Continue a session whose previous run stopped mid-exchange.
    ///
    /// No user step is appended. If the last assistant step carries tool
    /// calls without persisted tool responses, those execute first; the LLM
    /// loop then proceeds as usual.
    pub async fn resume(&self, ctx: &ExecutionContext) -> Result<RunOutput> {
        let ctx = ctx.for_runnable(&self.id, RunnableType::Agent);

        let steps = self
            .store
            .get_steps(ctx.session_id, &StepFilter::default())
            .await?;
        let pending = pending_tool_calls(&steps);
        let input = steps
            .iter()
            .rev()
            .find(|s| s.is_user())
            .and_then(|s| s.content.clone())
            .unwrap_or_default();

        debug!(
            session_id = %ctx.session_id,
            run_id = %ctx.run_id,
            pending = pending.len(),
            "agent_resuming"
        );

        let lifecycle = RunLifecycle::start(
            &ctx,
            self.store.as_ref(),
            &input,
            &self.id,
            RunnableType::Agent,
            self.registry.clone(),
        )
        .await?;

        let result = self.drive(&ctx, self.messages_from(&steps), pending).await;
        lifecycle.finish(self.store.as_ref(), result).await
    }

    async fn drive(
        &self,
        ctx: &ExecutionContext,
        messages: Vec<LlmMessage>,
        pending: Vec<ToolCall>,
    ) -> Result<RunOutput> {
        let executor = StepExecutor::new(
            self.driver.clone(),
            ToolExecutor::new(self.tools.clone()),
            self.config.clone(),
        );

        let outcome = executor
            .execute(ctx, self.store.as_ref(), messages, pending)
            .await?;

        Ok(RunOutput {
            run_id: ctx.run_id,
            response: outcome.response.unwrap_or_default(),
            metrics: outcome.metrics,
        })
    }

    fn messages_from(&self, steps: &[Step]) -> Vec<LlmMessage> {
        let mut messages = Vec::with_capacity(steps.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(LlmMessage::system(prompt.clone()));
        }
        messages.extend(StepAdapter::steps_to_messages(steps));
        messages
    }
}

#[async_trait]
impl Runnable for Agent {
    fn id(&self) -> &str {
        &self.id
    }

    fn runnable_type(&self) -> RunnableType {
        RunnableType::Agent
    }

    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        let ctx = ctx.for_runnable(&self.id, RunnableType::Agent);

        let lifecycle = RunLifecycle::start(
            &ctx,
            self.store.as_ref(),
            input,
            &self.id,
            RunnableType::Agent,
            self.registry.clone(),
        )
        .await?;

        let result = self.run_inner(input, &ctx).await;
        lifecycle.finish(self.store.as_ref(), result).await
    }
}

impl Agent {
    async fn run_inner(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput> {
        let store = self.store.as_ref();

        let sequence = store.allocate_sequence(ctx.session_id).await?;
        let user_step = StepFactory::new(ctx).user_step(sequence, input);
        store.save_step(&user_step).await?;

        // History up to and including the user step just written
        let steps = store
            .get_steps(ctx.session_id, &StepFilter::default().end_seq(sequence))
            .await?;
        let messages = self.messages_from(&steps);

        self.drive(ctx, messages, Vec::new()).await
    }
}

/// Tool calls of the last assistant step that have no persisted tool
/// response. Non-empty exactly when a run crashed between the assistant
/// step and its tool steps.
pub fn pending_tool_calls(steps: &[Step]) -> Vec<ToolCall> {
    let Some(assistant) = steps.iter().rev().find(|s| s.is_assistant()) else {
        return Vec::new();
    };
    let Some(calls) = &assistant.tool_calls else {
        return Vec::new();
    };

    calls
        .iter()
        .filter(|call| {
            !steps
                .iter()
                .any(|s| s.is_tool() && s.tool_call_id.as_deref() == Some(call.id.as_str()))
        })
        .cloned()
        .collect()
}

// ============================================================================
// AgentBuilder
// ============================================================================

pub struct AgentBuilder {
    id: String,
    driver: Option<Arc<dyn LlmDriver>>,
    tools: ToolRegistry,
    system_prompt: Option<String>,
    config: ExecutionConfig,
    store: Option<Arc<dyn SessionStore>>,
    registry: Option<AbortRegistry>,
}

impl AgentBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: None,
            tools: ToolRegistry::new(),
            system_prompt: None,
            config: ExecutionConfig::default(),
            store: None,
            registry: None,
        }
    }

    pub fn driver(mut self, driver: Arc<dyn LlmDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register this agent's runs in a process-wide abort registry
    pub fn abort_registry(mut self, registry: AbortRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let driver = self
            .driver
            .ok_or_else(|| AgentError::config("agent requires an LLM driver"))?;
        let store = self
            .store
            .ok_or_else(|| AgentError::config("agent requires a session store"))?;

        Ok(Agent {
            id: self.id,
            driver,
            tools: self.tools,
            system_prompt: self.system_prompt,
            config: self.config,
            store,
            registry: self.registry,
        })
    }
}
