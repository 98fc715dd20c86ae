//! Invocation and compaction records.

use std::fmt;

use cadence_core::{ConfirmationToken, InvocationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::session::SessionKey;

/// Invocation lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Executing steps.
    Running,
    /// Suspended on a confirmation request.
    AwaitingConfirmation,
    /// Finished successfully.
    Completed,
    /// Failed or cancelled.
    Failed,
    /// Confirmation timed out.
    Expired,
}

impl InvocationStatus {
    /// Whether this invocation holds the session's single-writer slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::AwaitingConfirmation)
    }

    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Parse the storage form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "awaiting_confirmation" => Some(Self::AwaitingConfirmation),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one outstanding confirmation of a suspended invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConfirmation {
    /// Single-use credential the resume must present.
    pub token: ConfirmationToken,
    /// Node path of the suspended step.
    pub node: String,
    /// Description shown to the approver.
    pub hint: String,
    /// Structured details of the pending action.
    pub payload: Value,
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
    /// After this instant the invocation can only expire.
    pub expires_at: DateTime<Utc>,
}

/// Durable record of one turn; everything needed to resume it lives here
/// and in the session log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRecord {
    /// Invocation id.
    pub id: InvocationId,
    /// Owning session.
    pub session: SessionKey,
    /// Registered composition name.
    pub composition: String,
    /// Lifecycle status.
    pub status: InvocationStatus,
    /// Node path of the last commit or suspension.
    pub cursor: Option<String>,
    /// Outstanding confirmation, only while awaiting.
    pub pending: Option<PendingConfirmation>,
    /// Cooperative cancellation flag, visible across processes.
    pub cancel_requested: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl InvocationRecord {
    /// A fresh running invocation.
    #[must_use]
    pub fn start(session: SessionKey, composition: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: InvocationId::new(),
            session,
            composition: composition.into(),
            status: InvocationStatus::Running,
            cursor: None,
            pending: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy with a new status, stamped now.
    #[must_use]
    pub fn with_status(&self, status: InvocationStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Deadline of the pending confirmation, if any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.pending.as_ref().map(|p| p.expires_at)
    }
}

/// Metadata of one compaction pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionRecord {
    /// Compacted session.
    pub session: SessionKey,
    /// First summarized sequence.
    pub start_sequence: u64,
    /// Last summarized sequence (inclusive).
    pub end_sequence: u64,
    /// Sequence of the summary event.
    pub summary_sequence: u64,
    /// When the pass ran.
    pub created_at: DateTime<Utc>,
}

impl CompactionRecord {
    /// Whether a sequence falls inside the summarized range.
    pub fn covers(&self, sequence: u64) -> bool {
        (self.start_sequence..=self.end_sequence).contains(&sequence)
    }
}
