//! # cadence-events
//!
//! Session store for the Cadence runtime: per-session append-only event
//! logs, the mutable state document, invocation records, and compaction
//! metadata.
//!
//! ## Architecture
//!
//! - **[`SessionStore`]**: the storage contract. Two backends implement it:
//!   [`MemorySessionStore`] (process-local) and [`SqliteSessionStore`]
//!   (pooled `SQLite` with WAL, via [`sqlite`]).
//! - **Optimistic concurrency**: every append names the sequence it expects
//!   to occupy; anything other than tail + 1 is a [`StoreError::Conflict`].
//! - **Single writer**: at most one invocation per session is running or
//!   awaiting confirmation.
//! - **Isolation**: every operation is addressed by a full [`SessionKey`]
//!   of (app, user, session id).

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::{Result, StoreError};
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore, apply_patch, open_store};
pub use types::{
    AppendEvent, CompactionRecord, Decision, Event, EventPayload, InvocationRecord,
    InvocationStatus, LoopOutcome, PendingConfirmation, Session, SessionKey, SessionStatus,
    StateMap, value_text,
};
