//! Session store data model.

pub mod event;
pub mod invocation;
pub mod session;

pub use event::{AppendEvent, Decision, Event, EventPayload, LoopOutcome, value_text};
pub use invocation::{CompactionRecord, InvocationRecord, InvocationStatus, PendingConfirmation};
pub use session::{Session, SessionKey, SessionStatus};

/// Session state document: string keys to arbitrary JSON.
pub type StateMap = serde_json::Map<String, serde_json::Value>;
