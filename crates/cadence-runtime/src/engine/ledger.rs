//! Store-backed ledger for one turn.
//!
//! Every write of a turn goes through [`TurnLedger::append`], which keeps
//! the turn's view of the session tail and state in step with the store
//! and absorbs sequence conflicts by reloading and retrying.

use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::InvocationId;
use cadence_events::{
    AppendEvent, Event, EventPayload, Session, SessionKey, SessionStore, StateMap, StoreError,
    apply_patch,
};
use cadence_hooks::{HookRegistry, LifecycleEvent, LifecyclePoint};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Result, RuntimeError};
use crate::orchestrator::executor::{Commit, Ledger};

/// Ledger that persists through a [`SessionStore`].
pub(crate) struct TurnLedger {
    store: Arc<dyn SessionStore>,
    hooks: Arc<HookRegistry>,
    key: SessionKey,
    id: InvocationId,
    state: StateMap,
    next_sequence: u64,
    conflict_retries: u32,
    cancel: CancellationToken,
}

impl TurnLedger {
    pub fn new(
        store: Arc<dyn SessionStore>,
        hooks: Arc<HookRegistry>,
        session: &Session,
        id: InvocationId,
        conflict_retries: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            hooks,
            key: session.key.clone(),
            id,
            state: session.state.clone(),
            next_sequence: session.next_sequence(),
            conflict_retries,
            cancel,
        }
    }

    /// Append at the current tail, reloading and retrying on conflict.
    pub fn append(&mut self, append: AppendEvent) -> Result<Event> {
        let mut append = append.at(self.next_sequence);
        let mut attempt = 0;
        loop {
            match self.store.append_event(&self.key, append.clone()) {
                Ok(event) => {
                    apply_patch(&mut self.state, &event.state_delta);
                    self.next_sequence = event.sequence + 1;
                    return Ok(event);
                }
                Err(StoreError::Conflict { expected, actual }) if attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(
                        session = %self.key,
                        expected,
                        actual,
                        attempt,
                        "append conflict, reloading tail"
                    );
                    self.reload()?;
                    append = append.at(self.next_sequence);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn reload(&mut self) -> Result<()> {
        let session = self.store.get(&self.key)?;
        self.next_sequence = session.next_sequence();
        self.state = session.state;
        Ok(())
    }
}

#[async_trait]
impl Ledger for TurnLedger {
    fn session(&self) -> &SessionKey {
        &self.key
    }

    fn invocation_id(&self) -> &InvocationId {
        &self.id
    }

    fn state(&self) -> &StateMap {
        &self.state
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn checkpoint(&mut self, node: &str) -> Result<()> {
        if !self.cancel.is_cancelled() {
            let record = self.store.get_invocation(&self.id)?;
            if record.cancel_requested {
                self.cancel.cancel();
            }
        }
        if self.cancel.is_cancelled() {
            debug!(invocation = %self.id, node, "cancellation observed at step boundary");
            return Err(RuntimeError::Cancelled(self.id.to_string()));
        }
        Ok(())
    }

    async fn commit(&mut self, commit: Commit) -> Result<Event> {
        let Commit {
            node,
            actor,
            payload,
            delta,
        } = commit;
        let append = AppendEvent::new(self.next_sequence, actor, payload)
            .invocation(&self.id)
            .node(node.clone())
            .state_delta(delta);
        let event = self.append(append)?;

        let hook_event = match &event.payload {
            EventPayload::StepFailure { message } => Some(
                LifecycleEvent::new(LifecyclePoint::StepFailed, self.key.clone())
                    .detail(json!({ "message": message })),
            ),
            EventPayload::Output { .. }
            | EventPayload::ToolCall { .. }
            | EventPayload::ToolResult { .. } => Some(
                LifecycleEvent::new(LifecyclePoint::StepCompleted, self.key.clone()).detail(
                    json!({ "kind": event.payload.kind(), "sequence": event.sequence }),
                ),
            ),
            _ => None,
        };
        if let Some(hook_event) = hook_event {
            let _ = self
                .hooks
                .dispatch(&hook_event.invocation(&self.id).node(node))
                .await;
        }
        Ok(event)
    }
}
