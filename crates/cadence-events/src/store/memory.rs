//! In-memory [`SessionStore`] backend.
//!
//! All tables live behind one `RwLock`, so every operation (including the
//! cross-table checks in `begin_invocation` and `record_compaction`) is
//! atomic. Data is lost when the process exits.

use std::collections::HashMap;

use cadence_core::InvocationId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::trace;

use super::{
    SessionStore, apply_patch, check_compaction_range, check_invocation_status, check_sequence,
};
use crate::errors::{Result, StoreError};
use crate::types::{
    AppendEvent, CompactionRecord, Event, EventPayload, InvocationRecord, InvocationStatus,
    Session, SessionKey, StateMap,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionKey, Session>,
    invocations: HashMap<InvocationId, InvocationRecord>,
    compactions: HashMap<SessionKey, Vec<CompactionRecord>>,
}

impl Tables {
    fn session(&self, key: &SessionKey) -> Result<&Session> {
        self.sessions
            .get(key)
            .ok_or_else(|| StoreError::SessionNotFound(key.to_string()))
    }

    fn session_mut(&mut self, key: &SessionKey) -> Result<&mut Session> {
        self.sessions
            .get_mut(key)
            .ok_or_else(|| StoreError::SessionNotFound(key.to_string()))
    }

    fn append(&mut self, key: &SessionKey, append: AppendEvent) -> Result<Event> {
        let session = self.session_mut(key)?;
        check_sequence(append.expected_sequence, session.last_sequence())?;

        let now = Utc::now();
        let status = append.status;
        let event = append.into_event(now);
        apply_patch(&mut session.state, &event.state_delta);
        if let Some(status) = status {
            session.status = status;
        }
        session.updated_at = now;
        session.events.push(event.clone());
        trace!(session = %key, sequence = event.sequence, kind = event.payload.kind(), "appended");
        Ok(event)
    }
}

/// Process-local session store for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    tables: RwLock<Tables>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemorySessionStore")
            .field("sessions", &tables.sessions.len())
            .field("invocations", &tables.invocations.len())
            .finish_non_exhaustive()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, key: &SessionKey) -> Result<Session> {
        let mut tables = self.tables.write();
        if tables.sessions.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let session = Session::new(key.clone());
        let _ = tables.sessions.insert(key.clone(), session.clone());
        Ok(session)
    }

    fn get(&self, key: &SessionKey) -> Result<Session> {
        self.tables.read().session(key).cloned()
    }

    fn list_sessions(&self, app: &str, user: &str) -> Result<Vec<SessionKey>> {
        let tables = self.tables.read();
        let mut sessions: Vec<&Session> = tables
            .sessions
            .values()
            .filter(|s| s.key.in_scope(app, user))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        Ok(sessions.into_iter().map(|s| s.key.clone()).collect())
    }

    fn last_sequence(&self, key: &SessionKey) -> Result<u64> {
        Ok(self.tables.read().session(key)?.last_sequence())
    }

    fn events_after(&self, key: &SessionKey, after: u64) -> Result<Vec<Event>> {
        let tables = self.tables.read();
        let session = tables.session(key)?;
        Ok(session
            .events
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect())
    }

    fn append_event(&self, key: &SessionKey, append: AppendEvent) -> Result<Event> {
        self.tables.write().append(key, append)
    }

    fn update_state(&self, key: &SessionKey, patch: &StateMap) -> Result<StateMap> {
        let mut tables = self.tables.write();
        let session = tables.session_mut(key)?;
        apply_patch(&mut session.state, patch);
        session.updated_at = Utc::now();
        Ok(session.state.clone())
    }

    fn begin_invocation(&self, record: &InvocationRecord) -> Result<()> {
        let mut tables = self.tables.write();
        let _ = tables.session(&record.session)?;
        if let Some(active) = tables
            .invocations
            .values()
            .find(|inv| inv.session == record.session && inv.status.is_active())
        {
            return Err(StoreError::SessionBusy(format!(
                "{} has active invocation {}",
                record.session, active.id
            )));
        }
        if tables.invocations.contains_key(&record.id) {
            return Err(StoreError::InvalidOperation(format!(
                "invocation {} already exists",
                record.id
            )));
        }
        let _ = tables.invocations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get_invocation(&self, id: &InvocationId) -> Result<InvocationRecord> {
        self.tables
            .read()
            .invocations
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::InvocationNotFound(id.to_string()))
    }

    fn update_invocation(
        &self,
        record: &InvocationRecord,
        expected: InvocationStatus,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let stored = tables
            .invocations
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::InvocationNotFound(record.id.to_string()))?;
        check_invocation_status(&record.id, stored.status, expected)?;
        *stored = record.clone();
        Ok(())
    }

    fn active_invocation(&self, key: &SessionKey) -> Result<Option<InvocationRecord>> {
        Ok(self
            .tables
            .read()
            .invocations
            .values()
            .find(|inv| &inv.session == key && inv.status.is_active())
            .cloned())
    }

    fn expired_confirmations(&self, now: DateTime<Utc>) -> Result<Vec<InvocationRecord>> {
        let tables = self.tables.read();
        let mut expired: Vec<InvocationRecord> = tables
            .invocations
            .values()
            .filter(|inv| {
                inv.status == InvocationStatus::AwaitingConfirmation
                    && inv.expires_at().is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        expired.sort_by_key(InvocationRecord::expires_at);
        Ok(expired)
    }

    fn compaction_records(&self, key: &SessionKey) -> Result<Vec<CompactionRecord>> {
        let tables = self.tables.read();
        let _ = tables.session(key)?;
        Ok(tables.compactions.get(key).cloned().unwrap_or_default())
    }

    fn record_compaction(
        &self,
        key: &SessionKey,
        summary: AppendEvent,
        start: u64,
        end: u64,
    ) -> Result<CompactionRecord> {
        if !matches!(summary.payload, EventPayload::Summary { .. }) {
            return Err(StoreError::InvalidOperation(
                "compaction must append a summary event".into(),
            ));
        }
        let mut tables = self.tables.write();
        let last = tables.session(key)?.last_sequence();
        let existing = tables.compactions.get(key).map_or(&[][..], Vec::as_slice);
        check_compaction_range(existing, start, end, last)?;

        let event = tables.append(key, summary)?;
        let record = CompactionRecord {
            session: key.clone(),
            start_sequence: start,
            end_sequence: end,
            summary_sequence: event.sequence,
            created_at: event.timestamp,
        };
        tables
            .compactions
            .entry(key.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    use crate::store::tests_support::contract_suite;
    use serde_json::json;

    #[test]
    fn memory_store_satisfies_contract() {
        contract_suite(&MemorySessionStore::new());
    }

    #[test]
    fn racing_appends_at_same_sequence_admit_exactly_one() {
        const WRITERS: usize = 16;
        let store = Arc::new(MemorySessionStore::new());
        let key = SessionKey::new("shop", "u1", "race");
        let _ = store.create(&key).unwrap();
        let barrier = Arc::new(Barrier::new(WRITERS));

        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let store = Arc::clone(&store);
                let key = key.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let _ = barrier.wait();
                    let mut delta = StateMap::new();
                    let _ = delta.insert("writer".into(), json!(i));
                    store.append_event(
                        &key,
                        AppendEvent::new(1, "agent", EventPayload::Output { content: json!(i) })
                            .state_delta(delta),
                    )
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(StoreError::Conflict { expected: 1, actual: 2 })))
                .count(),
            WRITERS - 1
        );

        let session = store.get(&key).unwrap();
        assert_eq!(session.events.len(), 1);
        assert_eq!(session.events[0].payload, winners[0].payload);
        assert_eq!(session.state["writer"], winners[0].state_delta["writer"]);
    }

    #[test]
    fn debug_reports_counts() {
        let store = MemorySessionStore::new();
        let _ = store.create(&SessionKey::new("a", "u", "s")).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("sessions: 1"));
    }
}
