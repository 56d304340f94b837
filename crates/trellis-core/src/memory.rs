// In-memory implementations for examples and testing
//
// These keep all data in memory, making them the backing for standalone
// examples, unit tests, and quick prototyping. The session store honors the
// same contract as the durable backends: upsert by (session_id, sequence),
// ascending reads, linearizable per-session sequence allocation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::stream;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::llm::{LlmChunk, LlmDriver, LlmMessage, LlmStream, LlmUsage};
use crate::run::Run;
use crate::step::Step;
use crate::store::{SessionStore, StepFilter};
use crate::tool_types::{ToolCallFragment, ToolSchema};

// ============================================================================
// InMemorySessionStore
// ============================================================================

/// In-memory session store
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    runs: Arc<RwLock<HashMap<Uuid, Run>>>,
    steps: Arc<RwLock<HashMap<Uuid, Vec<Step>>>>,
    // Sequence counters are seeded lazily from the max persisted sequence
    counters: Arc<Mutex<HashMap<Uuid, i64>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all sessions and runs
    pub async fn clear(&self) {
        self.runs.write().await.clear();
        self.steps.write().await.clear();
        self.counters.lock().await.clear();
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_run(&self, run: &Run) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(
        &self,
        session_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| session_id.is_none_or(|sid| r.session_id == sid))
            .cloned()
            .collect();

        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        self.runs.write().await.remove(&run_id);
        Ok(())
    }

    async fn save_step(&self, step: &Step) -> Result<()> {
        let mut sessions = self.steps.write().await;
        let steps = sessions.entry(step.session_id).or_default();

        match steps.iter().position(|s| s.sequence == step.sequence) {
            // Upsert: same (session_id, sequence) replaces in place
            Some(idx) => steps[idx] = step.clone(),
            None => {
                steps.push(step.clone());
                steps.sort_by_key(|s| s.sequence);
            }
        }
        Ok(())
    }

    async fn get_steps(&self, session_id: Uuid, filter: &StepFilter) -> Result<Vec<Step>> {
        Ok(self
            .steps
            .read()
            .await
            .get(&session_id)
            .map(|steps| {
                steps
                    .iter()
                    .filter(|s| filter.matches(s))
                    .take(filter.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_last_step(&self, session_id: Uuid) -> Result<Option<Step>> {
        Ok(self
            .steps
            .read()
            .await
            .get(&session_id)
            .and_then(|steps| steps.last().cloned()))
    }

    async fn get_step_count(&self, session_id: Uuid) -> Result<usize> {
        Ok(self
            .steps
            .read()
            .await
            .get(&session_id)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn get_max_sequence(&self, session_id: Uuid) -> Result<i64> {
        Ok(self
            .steps
            .read()
            .await
            .get(&session_id)
            .and_then(|steps| steps.last().map(|s| s.sequence))
            .unwrap_or(0))
    }

    async fn allocate_sequence(&self, session_id: Uuid) -> Result<i64> {
        let mut counters = self.counters.lock().await;

        let counter = match counters.get(&session_id) {
            Some(current) => *current,
            None => self.get_max_sequence(session_id).await?,
        };

        let next = counter + 1;
        counters.insert(session_id, next);
        Ok(next)
    }

    async fn delete_steps(&self, session_id: Uuid, start_seq: i64) -> Result<u64> {
        // Counter lock before steps lock, matching allocate_sequence
        let mut counters = self.counters.lock().await;
        let mut sessions = self.steps.write().await;
        let Some(steps) = sessions.get_mut(&session_id) else {
            return Ok(0);
        };

        let before = steps.len();
        steps.retain(|s| s.sequence < start_seq);
        let deleted = (before - steps.len()) as u64;

        // Keep the counter from re-issuing sequences that are still present,
        // while allowing the truncated range to be reused by a retry.
        let max = steps.last().map(|s| s.sequence).unwrap_or(0);
        if let Some(counter) = counters.get_mut(&session_id) {
            *counter = (*counter).min(start_seq - 1).max(max);
        }

        Ok(deleted)
    }
}

// ============================================================================
// ScriptedLlmDriver - Replays configured streams
// ============================================================================

/// LLM driver that replays scripted chunk sequences, one per call.
///
/// Useful for deterministic loop tests, including fragment-split tool calls
/// that exercise the accumulator.
pub struct ScriptedLlmDriver {
    turns: StdMutex<VecDeque<Vec<LlmChunk>>>,
    calls: Arc<StdMutex<Vec<Vec<LlmMessage>>>>,
    model: String,
}

impl Default for ScriptedLlmDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlmDriver {
    pub fn new() -> Self {
        Self {
            turns: StdMutex::new(VecDeque::new()),
            calls: Arc::new(StdMutex::new(Vec::new())),
            model: "scripted-model".to_string(),
        }
    }

    /// Queue a raw chunk sequence for the next call
    pub fn push_turn(&self, chunks: Vec<LlmChunk>) {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(chunks);
    }

    /// Queue a plain text response followed by a usage chunk
    pub fn push_text(&self, text: impl Into<String>) {
        self.push_turn(vec![
            LlmChunk::content(text),
            LlmChunk::usage(LlmUsage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                total_tokens: Some(15),
            }),
        ]);
    }

    /// Queue a single tool call, split over fragments the way streaming
    /// providers deliver it
    pub fn push_tool_call(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) {
        let arguments = arguments.into();
        let (head, tail) = arguments.split_at(arguments.len() / 2);
        self.push_turn(vec![
            LlmChunk::tool_calls(vec![ToolCallFragment::opening(0, id, name)]),
            LlmChunk::tool_calls(vec![ToolCallFragment::arguments(0, head)]),
            LlmChunk::tool_calls(vec![ToolCallFragment::arguments(0, tail)]),
            LlmChunk::usage(LlmUsage {
                prompt_tokens: Some(20),
                completion_tokens: Some(8),
                total_tokens: Some(28),
            }),
        ]);
    }

    /// Message lists this driver was called with
    pub fn calls(&self) -> Vec<Vec<LlmMessage>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedLlmDriver {
    async fn stream(
        &self,
        messages: Vec<LlmMessage>,
        _tools: Option<&[ToolSchema]>,
    ) -> Result<LlmStream> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages);

        let chunks = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| vec![LlmChunk::content("(no scripted response)")]);

        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "scripted"
    }
}

/// LLM driver whose stream always fails; for failure-path tests
pub struct FailingLlmDriver;

#[async_trait]
impl LlmDriver for FailingLlmDriver {
    async fn stream(
        &self,
        _messages: Vec<LlmMessage>,
        _tools: Option<&[ToolSchema]>,
    ) -> Result<LlmStream> {
        Err(AgentError::llm("provider unavailable"))
    }

    fn model_name(&self) -> &str {
        "failing-model"
    }

    fn provider(&self) -> &str {
        "failing"
    }
}
