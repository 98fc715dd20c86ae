//! Request and result types of the invocation engine.

use cadence_core::{ConfirmationToken, InvocationId, SessionId};
use cadence_events::{Decision, PendingConfirmation, SessionKey};
use serde::Serialize;
use serde_json::Value;

use crate::orchestrator::LoopReport;

/// Begin a new turn.
#[derive(Clone, Debug)]
pub struct StartTurn {
    /// Application scope.
    pub app: String,
    /// User scope.
    pub user: String,
    /// Existing session to continue; a new one is created when absent.
    pub session_id: Option<SessionId>,
    /// Turn input, recorded as the `Input` event.
    pub input: Value,
    /// Registered composition to run.
    pub composition: String,
}

impl StartTurn {
    /// A turn on a fresh session.
    #[must_use]
    pub fn new(
        app: impl Into<String>,
        user: impl Into<String>,
        composition: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            app: app.into(),
            user: user.into(),
            session_id: None,
            input,
            composition: composition.into(),
        }
    }

    /// Continue (or create) a specific session.
    #[must_use]
    pub fn in_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Continue a suspended turn with a decision.
#[derive(Clone, Debug)]
pub struct ResumeTurn {
    /// Session the invocation belongs to.
    pub session: SessionKey,
    /// The suspended invocation.
    pub invocation_id: InvocationId,
    /// Token returned by the suspension.
    pub token: ConfirmationToken,
    /// The caller's decision.
    pub decision: Decision,
}

impl ResumeTurn {
    /// Resume from a suspended turn's result.
    ///
    /// Returns `None` if the result did not suspend.
    pub fn from_result(result: &TurnResult, decision: Decision) -> Option<Self> {
        let TurnOutcome::AwaitingConfirmation(pending) = &result.outcome else {
            return None;
        };
        Some(Self {
            session: result.session.clone(),
            invocation_id: result.invocation_id.clone(),
            token: pending.token.clone(),
            decision,
        })
    }
}

/// What a start or resume produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The composition ran to the end.
    Completed {
        /// Output of the root node.
        output: Value,
        /// How each loop and dynamic node stopped.
        loops: Vec<LoopReport>,
    },
    /// A step is waiting for an external decision.
    AwaitingConfirmation(PendingConfirmation),
}

/// Result of [`start`](crate::InvocationEngine::start) and
/// [`resume`](crate::InvocationEngine::resume).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    /// Session the turn ran on.
    pub session: SessionKey,
    /// The turn.
    pub invocation_id: InvocationId,
    /// Completion or suspension.
    pub outcome: TurnOutcome,
}

impl TurnResult {
    /// The pending confirmation, when suspended.
    pub fn pending(&self) -> Option<&PendingConfirmation> {
        match &self.outcome {
            TurnOutcome::AwaitingConfirmation(pending) => Some(pending),
            TurnOutcome::Completed { .. } => None,
        }
    }

    /// The output, when completed.
    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            TurnOutcome::Completed { output, .. } => Some(output),
            TurnOutcome::AwaitingConfirmation(_) => None,
        }
    }
}
