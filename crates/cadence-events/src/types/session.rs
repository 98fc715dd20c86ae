//! Session identity, status, and the loaded session aggregate.

use std::fmt;

use cadence_core::{InvocationId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Event;
use super::StateMap;

/// Composite key scoping a session to one application and one user.
///
/// Every store operation is addressed by the full key. Two keys that share
/// a session id but differ in app or user name different sessions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    /// Application scope.
    pub app: String,
    /// User identifier.
    pub user: String,
    /// Session identifier, unique within (app, user).
    pub session_id: SessionId,
}

impl SessionKey {
    /// Build a key from its three components.
    #[must_use]
    pub fn new(
        app: impl Into<String>,
        user: impl Into<String>,
        session_id: impl Into<SessionId>,
    ) -> Self {
        Self {
            app: app.into(),
            user: user.into(),
            session_id: session_id.into(),
        }
    }

    /// Build a key with a freshly generated session id.
    #[must_use]
    pub fn generate(app: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(app, user, SessionId::new())
    }

    /// Whether this key belongs to the given (app, user) scope.
    pub fn in_scope(&self, app: &str, user: &str) -> bool {
        self.app == app && self.user == user
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app, self.user, self.session_id)
    }
}

/// Coarse session lifecycle, maintained by the invocation engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Idle or executing a turn.
    #[default]
    Active,
    /// A turn is suspended awaiting confirmation.
    Paused,
    /// The last turn finished successfully.
    Completed,
    /// The last turn failed or was cancelled.
    Failed,
}

impl SessionStatus {
    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully loaded session: its event log and current state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Composite key.
    pub key: SessionKey,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Current state document (last write wins per key).
    pub state: StateMap,
    /// Append-only event log in sequence order.
    pub events: Vec<Event>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last append or state patch.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A brand-new empty session.
    #[must_use]
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            status: SessionStatus::Active,
            state: StateMap::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sequence of the newest event, or 0 for an empty log.
    pub fn last_sequence(&self) -> u64 {
        self.events.last().map_or(0, |e| e.sequence)
    }

    /// Sequence the next append must carry.
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence() + 1
    }

    /// Events written by one invocation, in order.
    pub fn events_for<'a>(
        &'a self,
        invocation_id: &'a InvocationId,
    ) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .filter(move |e| e.invocation_id.as_ref() == Some(invocation_id))
    }
}
