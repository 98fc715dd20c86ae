//! Events: immutable, sequenced records in a session's log.

use std::fmt;

use cadence_core::InvocationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StateMap;
use super::session::SessionStatus;

/// A caller's answer to a confirmation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request was approved.
    pub approved: bool,
    /// Optional structured data accompanying the decision.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Decision {
    /// Approve with no payload.
    #[must_use]
    pub fn approve() -> Self {
        Self {
            approved: true,
            payload: Value::Null,
        }
    }

    /// Reject with no payload.
    #[must_use]
    pub fn reject() -> Self {
        Self {
            approved: false,
            payload: Value::Null,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// How a loop (or manager) node stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    /// The exit condition was met.
    Satisfied,
    /// The iteration cap was reached first. Not an error.
    Capped,
}

impl fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => f.write_str("satisfied"),
            Self::Capped => f.write_str("capped"),
        }
    }
}

/// Typed event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Caller-supplied turn input.
    Input {
        /// Raw input.
        content: Value,
    },
    /// A step's committed output.
    Output {
        /// Output value (may be null).
        content: Value,
    },
    /// A manager node choosing sub-steps.
    ToolCall {
        /// Name of the tool (sub-step or round marker).
        name: String,
        /// Call arguments.
        arguments: Value,
    },
    /// A sub-step invoked by a manager node.
    ToolResult {
        /// Name of the tool.
        name: String,
        /// Returned value.
        result: Value,
    },
    /// Compaction summary replacing an earlier range.
    Summary {
        /// First summarized sequence.
        start_sequence: u64,
        /// Last summarized sequence.
        end_sequence: u64,
        /// Condensed text.
        text: String,
    },
    /// A step asked for external approval; the turn is suspended.
    ConfirmationRequest {
        /// Human-readable description of what needs approval.
        hint: String,
        /// Structured details of the pending action.
        payload: Value,
    },
    /// The external decision that resumed a suspended turn.
    ConfirmationDecision {
        /// The decision.
        decision: Decision,
    },
    /// A step raised an error.
    StepFailure {
        /// Error message.
        message: String,
    },
    /// A loop or manager node finished.
    LoopFinished {
        /// Why it stopped.
        outcome: LoopOutcome,
        /// Completed iterations.
        iterations: u32,
    },
    /// Terminal event of a completed turn.
    Completion {
        /// Final output of the composition.
        output: Value,
    },
    /// Terminal event of a failed or cancelled turn.
    Failure {
        /// Failure reason.
        reason: String,
        /// Set when the turn was cancelled by the caller.
        #[serde(default)]
        cancelled: bool,
    },
    /// A pending confirmation timed out.
    Expired {
        /// The node that was waiting.
        node: String,
    },
}

impl EventPayload {
    /// Stable kind label used for storage and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Output { .. } => "output",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Summary { .. } => "summary",
            Self::ConfirmationRequest { .. } => "confirmation_request",
            Self::ConfirmationDecision { .. } => "confirmation_decision",
            Self::StepFailure { .. } => "step_failure",
            Self::LoopFinished { .. } => "loop_finished",
            Self::Completion { .. } => "completion",
            Self::Failure { .. } => "failure",
            Self::Expired { .. } => "expired",
        }
    }

    /// Whether this payload ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion { .. } | Self::Failure { .. })
    }

    /// Best-effort plain text of the payload, for summaries and fact
    /// extraction. Protocol events without content return `None`.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Input { content } | Self::Output { content } => value_text(content),
            Self::ToolResult { name, result } => {
                value_text(result).map(|text| format!("{name}: {text}"))
            }
            Self::Summary { text, .. } => Some(text.clone()),
            Self::ConfirmationRequest { hint, .. } => Some(hint.clone()),
            Self::Completion { output } => value_text(output),
            _ => None,
        }
    }
}

/// Extract readable text from a JSON value.
///
/// Strings are returned as-is, objects contribute their `text` field when
/// present, and other non-null values fall back to compact JSON.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => Some(value.to_string()),
        },
        other => Some(other.to_string()),
    }
}

/// One committed record in a session's log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Position in the log, starting at 1, gapless.
    pub sequence: u64,
    /// Producer: step name, tool name, `user`, or a runtime component.
    pub actor: String,
    /// Typed payload.
    pub payload: EventPayload,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Turn that wrote this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
    /// Orchestration node path this event commits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// State patch applied atomically with this event.
    #[serde(default, skip_serializing_if = "StateMap::is_empty")]
    pub state_delta: StateMap,
}

/// An event to append, with the sequence the caller expects it to get.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendEvent {
    /// Must equal the store's current tail + 1.
    pub expected_sequence: u64,
    /// Producer.
    pub actor: String,
    /// Payload.
    pub payload: EventPayload,
    /// Owning turn.
    pub invocation_id: Option<InvocationId>,
    /// Node path committed by this event.
    pub node: Option<String>,
    /// State patch applied in the same atomic unit.
    pub state_delta: StateMap,
    /// Session status change applied in the same atomic unit.
    pub status: Option<SessionStatus>,
}

impl AppendEvent {
    /// Start building an append.
    #[must_use]
    pub fn new(expected_sequence: u64, actor: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            expected_sequence,
            actor: actor.into(),
            payload,
            invocation_id: None,
            node: None,
            state_delta: StateMap::new(),
            status: None,
        }
    }

    /// Tag with the owning invocation.
    #[must_use]
    pub fn invocation(mut self, id: &InvocationId) -> Self {
        self.invocation_id = Some(id.clone());
        self
    }

    /// Tag with the committed node path.
    #[must_use]
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attach a state patch.
    #[must_use]
    pub fn state_delta(mut self, delta: StateMap) -> Self {
        self.state_delta = delta;
        self
    }

    /// Change the session status atomically with the append.
    #[must_use]
    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Re-target at a different sequence after reloading the tail.
    #[must_use]
    pub fn at(mut self, expected_sequence: u64) -> Self {
        self.expected_sequence = expected_sequence;
        self
    }

    /// Materialize the event this append will commit.
    pub fn into_event(self, timestamp: DateTime<Utc>) -> Event {
        Event {
            sequence: self.expected_sequence,
            actor: self.actor,
            payload: self.payload,
            timestamp,
            invocation_id: self.invocation_id,
            node: self.node,
            state_delta: self.state_delta,
        }
    }
}
