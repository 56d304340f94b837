// Control flow: cooperative cancellation, retry, fork
//
// AbortSignal is a latching flag shared by every task under one root run.
// Long-running operations poll it at suspension points; tools receive it and
// are expected to honor it. The registry maps live run ids to their signals
// so an external surface (pause/cancel endpoints) can reach in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::store::SessionStore;

/// Cooperative cancellation token. Cloning shares the underlying flag.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Default)]
struct AbortInner {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal. Latching: once aborted, always aborted.
    /// The first reason wins.
    pub fn abort(&self, reason: Option<&str>) {
        if self.inner.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reason) = reason {
            *self.inner.reason.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(reason.to_string());
        }
        info!(reason = reason.unwrap_or("unspecified"), "abort_signalled");
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Err(Cancelled) when tripped; the standard suspension-point poll
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(AgentError::cancelled(
                self.reason().unwrap_or_else(|| "execution aborted".to_string()),
            ))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Process-wide map of active runs to their abort signals.
///
/// Registered at run entry and unregistered at run exit by the lifecycle.
/// This is a documented side channel for external cancel surfaces, not part
/// of the Runnable contract.
#[derive(Clone, Default)]
pub struct AbortRegistry {
    signals: Arc<Mutex<HashMap<Uuid, AbortSignal>>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: Uuid, signal: AbortSignal) {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id, signal);
    }

    pub fn unregister(&self, run_id: Uuid) {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run_id);
    }

    pub fn get(&self, run_id: Uuid) -> Option<AbortSignal> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&run_id)
            .cloned()
    }

    /// Abort a run by id. Returns false when the run is not registered.
    pub fn abort(&self, run_id: Uuid, reason: Option<&str>) -> bool {
        match self.get(run_id) {
            Some(signal) => {
                signal.abort(reason);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Truncate a session so a run can be retried from `from_seq`.
///
/// Deletes all steps with `sequence >= from_seq`. The caller then starts a
/// fresh run (new run_id, same session_id) whose context is rebuilt from
/// the surviving steps.
pub async fn retry_from_sequence(
    store: &dyn SessionStore,
    session_id: Uuid,
    from_seq: i64,
) -> Result<u64> {
    let deleted = store.delete_steps(session_id, from_seq).await?;
    info!(
        session_id = %session_id,
        from_seq,
        deleted,
        "session_truncated_for_retry"
    );
    Ok(deleted)
}

/// Fork a session: copy steps with `sequence < fork_seq` into a fresh
/// session and return its id.
///
/// Step ids are regenerated; `(session_id, sequence)` is the identity that
/// fork semantics preserve.
pub async fn fork_session(
    store: &dyn SessionStore,
    source_session_id: Uuid,
    fork_seq: i64,
) -> Result<Uuid> {
    let new_session_id = Uuid::now_v7();

    let steps = store
        .get_steps(
            source_session_id,
            &crate::store::StepFilter::default().end_seq(fork_seq - 1),
        )
        .await?;

    let copies: Vec<_> = steps
        .into_iter()
        .map(|mut step| {
            step.id = Uuid::now_v7();
            step.session_id = new_session_id;
            step
        })
        .collect();

    store.save_steps_batch(&copies).await?;

    debug!(
        source = %source_session_id,
        fork = %new_session_id,
        copied = copies.len(),
        "session_forked"
    );
    Ok(new_session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_latches() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        assert!(signal.check().is_ok());

        signal.abort(Some("user requested"));
        assert!(signal.is_aborted());
        assert_eq!(signal.reason().as_deref(), Some("user requested"));

        // Latched: a second abort does not overwrite the reason
        signal.abort(Some("too late"));
        assert_eq!(signal.reason().as_deref(), Some("user requested"));

        let err = signal.check().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        signal.abort(None);
        assert!(clone.is_aborted());
    }

    #[test]
    fn test_registry_abort_by_run_id() {
        let registry = AbortRegistry::new();
        let run_id = Uuid::now_v7();
        let signal = AbortSignal::new();

        registry.register(run_id, signal.clone());
        assert!(registry.abort(run_id, Some("cancel endpoint")));
        assert!(signal.is_aborted());

        registry.unregister(run_id);
        assert!(!registry.abort(run_id, None));
        assert!(registry.is_empty());
    }
}
