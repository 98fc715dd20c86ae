//! The [`SessionStore`] contract and its backends.
//!
//! Both backends give the same guarantees:
//!
//! - every operation is addressed by the full [`SessionKey`]; a key with a
//!   different app or user is a different (usually nonexistent) session
//! - [`append_event`](SessionStore::append_event) is atomic and rejects any
//!   append whose expected sequence is not tail + 1, and applies the event's
//!   state delta and status change in the same unit
//! - at most one invocation per session is active, enforced at
//!   [`begin_invocation`](SessionStore::begin_invocation)
//! - compaction ranges never overlap and always precede their summary

mod memory;
mod sqlite;
#[cfg(test)]
pub(crate) mod tests_support;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use std::sync::Arc;

use cadence_core::InvocationId;
use cadence_settings::{StorageBackend, StorageSettings};
use chrono::{DateTime, Utc};

use crate::errors::{Result, StoreError};
use crate::sqlite::ConnectionConfig;
use crate::types::{
    AppendEvent, CompactionRecord, Event, InvocationRecord, InvocationStatus, Session, SessionKey,
    StateMap,
};

/// Durable, isolated storage for sessions, invocations, and compaction
/// records.
pub trait SessionStore: Send + Sync {
    /// Create an empty session. Fails with `AlreadyExists` if present.
    fn create(&self, key: &SessionKey) -> Result<Session>;

    /// Load a session with its full log. Fails with `SessionNotFound`.
    fn get(&self, key: &SessionKey) -> Result<Session>;

    /// Sessions belonging to one (app, user) scope, oldest first.
    fn list_sessions(&self, app: &str, user: &str) -> Result<Vec<SessionKey>>;

    /// Sequence of the newest event (0 when empty).
    fn last_sequence(&self, key: &SessionKey) -> Result<u64>;

    /// Events with sequence greater than `after`, in order.
    fn events_after(&self, key: &SessionKey, after: u64) -> Result<Vec<Event>>;

    /// Atomically append one event.
    fn append_event(&self, key: &SessionKey, append: AppendEvent) -> Result<Event>;

    /// Atomically merge a patch into the session state and return the result.
    fn update_state(&self, key: &SessionKey, patch: &StateMap) -> Result<StateMap>;

    /// Persist a new invocation. Fails with `SessionBusy` if another
    /// invocation on the same session is active.
    fn begin_invocation(&self, record: &InvocationRecord) -> Result<()>;

    /// Load an invocation record.
    fn get_invocation(&self, id: &InvocationId) -> Result<InvocationRecord>;

    /// Replace an invocation record if its stored status still equals
    /// `expected`. Fails with `StaleInvocation` otherwise.
    fn update_invocation(&self, record: &InvocationRecord, expected: InvocationStatus)
    -> Result<()>;

    /// The session's active invocation, if any.
    fn active_invocation(&self, key: &SessionKey) -> Result<Option<InvocationRecord>>;

    /// Invocations awaiting confirmation whose deadline is at or before `now`.
    fn expired_confirmations(&self, now: DateTime<Utc>) -> Result<Vec<InvocationRecord>>;

    /// Compaction records of a session, oldest first.
    fn compaction_records(&self, key: &SessionKey) -> Result<Vec<CompactionRecord>>;

    /// Atomically append a summary event and record the range
    /// `start..=end` it replaces.
    fn record_compaction(
        &self,
        key: &SessionKey,
        summary: AppendEvent,
        start: u64,
        end: u64,
    ) -> Result<CompactionRecord>;
}

/// Open the backend selected by settings.
pub fn open_store(settings: &StorageSettings) -> Result<Arc<dyn SessionStore>> {
    match settings.backend {
        StorageBackend::Memory => Ok(Arc::new(MemorySessionStore::new())),
        StorageBackend::Sqlite => {
            let config = ConnectionConfig {
                pool_size: settings.pool_size,
                busy_timeout_ms: settings.busy_timeout_ms,
                ..ConnectionConfig::default()
            };
            let store = SqliteSessionStore::open(&settings.path, &config, settings.retry.clone())?;
            Ok(Arc::new(store))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared contract checks
// ─────────────────────────────────────────────────────────────────────────────

/// Shallow-merge `patch` into `state`. A `null` value removes the key.
pub fn apply_patch(state: &mut StateMap, patch: &StateMap) {
    for (key, value) in patch {
        if value.is_null() {
            let _ = state.remove(key);
        } else {
            let _ = state.insert(key.clone(), value.clone());
        }
    }
}

/// Reject an append that does not land exactly on tail + 1.
pub(crate) fn check_sequence(expected: u64, last: u64) -> Result<()> {
    if expected == last + 1 {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            expected,
            actual: last + 1,
        })
    }
}

/// Validate a compaction range against existing records and the tail.
pub(crate) fn check_compaction_range(
    records: &[CompactionRecord],
    start: u64,
    end: u64,
    last: u64,
) -> Result<()> {
    if start == 0 || start > end {
        return Err(StoreError::InvalidOperation(format!(
            "empty compaction range {start}..={end}"
        )));
    }
    if end > last {
        return Err(StoreError::InvalidOperation(format!(
            "compaction range ends at {end} beyond tail {last}"
        )));
    }
    if let Some(prev) = records.iter().map(|r| r.end_sequence).max() {
        if start <= prev {
            return Err(StoreError::InvalidOperation(format!(
                "compaction range {start}..={end} overlaps previous range ending at {prev}"
            )));
        }
    }
    Ok(())
}

/// Invocation status check shared by both backends.
pub(crate) fn check_invocation_status(
    id: &InvocationId,
    stored: InvocationStatus,
    expected: InvocationStatus,
) -> Result<()> {
    if stored == expected {
        Ok(())
    } else {
        Err(StoreError::StaleInvocation(format!(
            "{id} is {stored}, expected {expected}"
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn record(start: u64, end: u64) -> CompactionRecord {
        CompactionRecord {
            session: SessionKey::new("a", "u", "s"),
            start_sequence: start,
            end_sequence: end,
            summary_sequence: end + 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn patch_merges_and_deletes() {
        let mut state = StateMap::new();
        let _ = state.insert("keep".into(), json!(1));
        let _ = state.insert("drop".into(), json!(2));
        let patch = json!({"drop": null, "new": "x", "keep": 5});
        apply_patch(&mut state, patch.as_object().unwrap());
        assert_eq!(Value::Object(state), json!({"keep": 5, "new": "x"}));
    }

    #[test]
    fn sequence_must_be_tail_plus_one() {
        assert!(check_sequence(4, 3).is_ok());
        assert_matches!(
            check_sequence(3, 3),
            Err(StoreError::Conflict { expected: 3, actual: 4 })
        );
        assert_matches!(check_sequence(6, 3), Err(StoreError::Conflict { .. }));
    }

    #[test]
    fn compaction_range_rules() {
        assert!(check_compaction_range(&[], 1, 5, 8).is_ok());
        assert!(check_compaction_range(&[record(1, 5)], 6, 9, 10).is_ok());
        assert_matches!(
            check_compaction_range(&[record(1, 5)], 5, 9, 10),
            Err(StoreError::InvalidOperation(_))
        );
        assert_matches!(
            check_compaction_range(&[], 4, 3, 10),
            Err(StoreError::InvalidOperation(_))
        );
        assert_matches!(
            check_compaction_range(&[], 1, 11, 10),
            Err(StoreError::InvalidOperation(_))
        );
    }

    #[test]
    fn open_store_memory_backend() {
        let store = open_store(&StorageSettings::default()).unwrap();
        let key = SessionKey::new("a", "u", "s");
        let _ = store.create(&key).unwrap();
        assert_eq!(store.last_sequence(&key).unwrap(), 0);
    }
}
