//! Lifecycle points and the event payload delivered to hooks.
//!
//! [`LifecycleEvent`] is the stable message schema. It carries a
//! `schema_version`; consumers ignore fields they do not know, and new
//! fields are only ever added.

use std::fmt;

use cadence_core::InvocationId;
use cadence_events::SessionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current [`LifecycleEvent`] schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Fixed set of points in a turn where hooks fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePoint {
    /// A new turn began.
    TurnStarted,
    /// A step committed its result.
    StepCompleted,
    /// A step failed.
    StepFailed,
    /// A step suspended the turn awaiting confirmation.
    ConfirmationRequested,
    /// A suspended turn was resumed with a decision.
    TurnResumed,
    /// A turn completed.
    TurnCompleted,
    /// A turn failed or was cancelled.
    TurnFailed,
    /// A pending confirmation timed out.
    InvocationExpired,
    /// A compaction pass summarized part of a session.
    SessionCompacted,
    /// Facts from a completed session were ingested into memory.
    MemoryIngested,
}

impl LifecyclePoint {
    /// All points, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::TurnStarted,
        Self::StepCompleted,
        Self::StepFailed,
        Self::ConfirmationRequested,
        Self::TurnResumed,
        Self::TurnCompleted,
        Self::TurnFailed,
        Self::InvocationExpired,
        Self::SessionCompacted,
        Self::MemoryIngested,
    ];

    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnStarted => "turn_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::ConfirmationRequested => "confirmation_requested",
            Self::TurnResumed => "turn_resumed",
            Self::TurnCompleted => "turn_completed",
            Self::TurnFailed => "turn_failed",
            Self::InvocationExpired => "invocation_expired",
            Self::SessionCompacted => "session_compacted",
            Self::MemoryIngested => "memory_ingested",
        }
    }
}

impl fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to hooks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// Schema version of this payload.
    pub schema_version: u32,
    /// Where in the lifecycle this fired.
    pub point: LifecyclePoint,
    /// Session the turn belongs to.
    pub session: SessionKey,
    /// Invocation, when the event belongs to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
    /// Node path, for step-level points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Point-specific details.
    #[serde(default)]
    pub detail: Value,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    /// New event stamped now with the current schema version.
    #[must_use]
    pub fn new(point: LifecyclePoint, session: SessionKey) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            point,
            session,
            invocation_id: None,
            node: None,
            detail: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attach the invocation id.
    #[must_use]
    pub fn invocation(mut self, id: &InvocationId) -> Self {
        self.invocation_id = Some(id.clone());
        self
    }

    /// Attach the node path.
    #[must_use]
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attach point-specific details.
    #[must_use]
    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}
