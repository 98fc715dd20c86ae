//! The unit of work: [`Step`], its context, and its outcomes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use cadence_core::InvocationId;
use cadence_events::{Decision, SessionKey, StateMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Prefix of every confirmation decision key.
pub const CONFIRMATION_PREFIX: &str = "__confirmation:";

/// State key under which the decision for a suspended node is stored.
///
/// Node paths repeat on every turn of a composition, so the key is scoped
/// by invocation: a later turn never sees an earlier turn's decision.
pub fn confirmation_key(invocation: &InvocationId, node: &str) -> String {
    format!("{CONFIRMATION_PREFIX}{invocation}:{node}")
}

/// Decision keys written for `invocation`, found in `state`.
pub(crate) fn confirmation_keys(state: &StateMap, invocation: &InvocationId) -> Vec<String> {
    let prefix = format!("{CONFIRMATION_PREFIX}{invocation}:");
    state.keys().filter(|key| key.starts_with(&prefix)).cloned().collect()
}

/// Error raised by a step. Recorded as a `StepFailure` event.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    /// Human-readable failure.
    pub message: String,
}

impl StepError {
    /// Build from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// A step's committed result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutput {
    /// Output value, recorded in the log.
    pub output: Value,
    /// State patch committed atomically with the output.
    pub state_delta: StateMap,
}

impl StepOutput {
    /// Output with no state change.
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            output,
            state_delta: StateMap::new(),
        }
    }

    /// Add one key to the state patch.
    #[must_use]
    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.state_delta.insert(key.into(), value);
        self
    }
}

/// What a step asks the orchestrator to do next.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Commit this output and continue.
    Done(StepOutput),
    /// Suspend the turn until an external decision arrives. The step runs
    /// again on resume and can read the decision through
    /// [`StepContext::confirmation`].
    RequestConfirmation {
        /// Description for the approver.
        hint: String,
        /// Structured details of the pending action.
        payload: Value,
    },
}

impl StepOutcome {
    /// Shorthand for `Done(StepOutput::new(output))`.
    #[must_use]
    pub fn done(output: Value) -> Self {
        Self::Done(StepOutput::new(output))
    }

    /// Shorthand for a confirmation request.
    #[must_use]
    pub fn confirm(hint: impl Into<String>, payload: Value) -> Self {
        Self::RequestConfirmation {
            hint: hint.into(),
            payload,
        }
    }
}

/// Result of one parallel branch as seen by the combiner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchResult {
    /// The branch committed this output.
    Present {
        /// Branch output.
        value: Value,
    },
    /// The branch failed or timed out under a tolerant policy.
    Absent {
        /// Why it is missing.
        reason: String,
    },
}

impl BranchResult {
    /// The output, when present.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Present { value } => Some(value),
            Self::Absent { .. } => None,
        }
    }
}

/// Everything a step may read while running.
#[derive(Clone)]
pub struct StepContext {
    /// Owning session.
    pub session: SessionKey,
    /// Current turn.
    pub invocation_id: InvocationId,
    /// Node path of this step.
    pub node: String,
    /// Session state as committed before this step (the fan-out snapshot
    /// for parallel branches).
    pub state: StateMap,
    /// The turn's input payload.
    pub input: Value,
    /// Fan-in results for combiners, or the previous round's results for
    /// deciders. Empty otherwise.
    pub branches: BTreeMap<String, BranchResult>,
    /// Fires when the turn is cancelled.
    pub cancel: CancellationToken,
}

impl StepContext {
    /// The decision recorded for this node by a resume, if any.
    pub fn confirmation(&self) -> Option<Decision> {
        self.state
            .get(&confirmation_key(&self.invocation_id, &self.node))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// A state value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("session", &self.session)
            .field("invocation_id", &self.invocation_id)
            .field("node", &self.node)
            .field("branches", &self.branches.len())
            .finish_non_exhaustive()
    }
}

/// A runnable unit: an agent, a tool, or any deterministic function.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name, unique among siblings. Used in node paths and as the event
    /// actor.
    fn name(&self) -> &str;

    /// Run once. Called again after a resume when this step suspended.
    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError>;
}

type StepFn = dyn Fn(&StepContext) -> Result<StepOutcome, StepError> + Send + Sync;

/// A [`Step`] backed by a synchronous closure.
pub struct FnStep {
    name: String,
    f: Box<StepFn>,
}

impl FnStep {
    /// Wrap a closure.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<StepOutcome, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        (self.f)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(node: &str, state: StateMap) -> StepContext {
        StepContext {
            session: SessionKey::new("a", "u", "s"),
            invocation_id: InvocationId::new(),
            node: node.into(),
            state,
            input: Value::Null,
            branches: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn confirmation_is_read_from_invocation_scoped_key() {
        let current = ctx("order", StateMap::new());
        let mut state = StateMap::new();
        let _ = state.insert(
            confirmation_key(&current.invocation_id, "order"),
            serde_json::to_value(Decision::reject()).unwrap(),
        );
        let _ = state.insert(
            confirmation_key(&InvocationId::new(), "order"),
            serde_json::to_value(Decision::approve()).unwrap(),
        );

        let mut same = ctx("order", state.clone());
        same.invocation_id = current.invocation_id.clone();
        assert_eq!(same.confirmation(), Some(Decision::reject()));

        let mut elsewhere = ctx("other", state.clone());
        elsewhere.invocation_id = current.invocation_id.clone();
        assert_eq!(elsewhere.confirmation(), None);

        assert_eq!(ctx("order", state.clone()).confirmation(), None);
        assert_eq!(
            confirmation_keys(&state, &current.invocation_id),
            vec![confirmation_key(&current.invocation_id, "order")]
        );
    }

    #[test]
    fn output_builder_collects_state() {
        let out = StepOutput::new(json!("ok")).with_state("count", json!(2));
        assert_eq!(out.state_delta.get("count"), Some(&json!(2)));
    }

    #[test]
    fn branch_result_serializes_tagged() {
        let present = BranchResult::Present { value: json!(1) };
        assert_eq!(
            serde_json::to_value(&present).unwrap(),
            json!({"status": "present", "value": 1})
        );
        assert_eq!(present.value(), Some(&json!(1)));
        assert_eq!(BranchResult::Absent { reason: "timeout".into() }.value(), None);
    }

    #[tokio::test]
    async fn fn_step_runs_closure() {
        let step = FnStep::new("echo", |ctx| Ok(StepOutcome::done(ctx.input.clone())));
        let mut c = ctx("echo", StateMap::new());
        c.input = json!("hi");
        assert_eq!(step.run(&c).await.unwrap(), StepOutcome::done(json!("hi")));
        assert_eq!(step.name(), "echo");
    }
}
