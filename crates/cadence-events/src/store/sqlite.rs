//! `SQLite` [`SessionStore`] backend.
//!
//! Every write runs inside a `BEGIN IMMEDIATE` transaction, so the tail
//! check, the event insert, and the session row update are serialized per
//! database and either all land or none do. Transient failures (busy,
//! locked, pool exhaustion) are retried with the configured backoff and
//! surface as [`StoreError::Unavailable`] once retries run out.

use cadence_core::{InvocationId, RetryPolicy};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, instrument, warn};

use super::{
    SessionStore, apply_patch, check_compaction_range, check_invocation_status, check_sequence,
};
use crate::errors::{Result, StoreError};
use crate::sqlite::repositories::compaction::CompactionRepo;
use crate::sqlite::repositories::event::EventRepo;
use crate::sqlite::repositories::invocation::InvocationRepo;
use crate::sqlite::repositories::session::{SessionRepo, SessionRow};
use crate::sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};
use crate::types::{
    AppendEvent, CompactionRecord, Event, EventPayload, InvocationRecord, InvocationStatus,
    Session, SessionKey, StateMap,
};

/// Durable session store on a pooled `SQLite` database.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: ConnectionPool,
    retry: RetryPolicy,
}

impl SqliteSessionStore {
    /// Open (creating if needed) a database file and run migrations.
    pub fn open(path: &str, config: &ConnectionConfig, retry: RetryPolicy) -> Result<Self> {
        let pool = new_file(path, config)?;
        Self::from_pool(pool, retry)
    }

    /// Single-connection in-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        let pool = new_in_memory(&ConnectionConfig::default())?;
        Self::from_pool(pool, RetryPolicy::none())
    }

    /// Wrap an existing pool and bring its schema up to date.
    pub fn from_pool(pool: ConnectionPool, retry: RetryPolicy) -> Result<Self> {
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            debug!(applied, "session store schema ready");
        }
        Ok(Self { pool, retry })
    }

    /// The underlying pool; other tables in the same database (memory
    /// facts) share it.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `op` on a pooled connection, retrying transient failures.
    fn with_retry<T>(&self, op: impl Fn(&Connection) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let result = self
                .pool
                .get()
                .map_err(StoreError::from)
                .and_then(|conn| op(&conn));
            match result {
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry.max_retries {
                        return Err(StoreError::Unavailable(e.to_string()));
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(error = %e, attempt, ?delay, "transient store failure, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Run `op` inside an immediate (write-locking) transaction.
    fn write<T>(&self, op: impl Fn(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.with_retry(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let value = op(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

impl std::fmt::Debug for SqliteSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionStore")
            .field("pool_size", &self.pool.max_size())
            .field("max_retries", &self.retry.max_retries)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction bodies
// ─────────────────────────────────────────────────────────────────────────────

fn session_row(conn: &Connection, key: &SessionKey) -> Result<SessionRow> {
    SessionRepo::get(conn, key)?.ok_or_else(|| StoreError::SessionNotFound(key.to_string()))
}

fn append_in(conn: &Connection, key: &SessionKey, append: AppendEvent) -> Result<Event> {
    let mut row = session_row(conn, key)?;
    check_sequence(append.expected_sequence, row.last_sequence)?;

    let now = Utc::now();
    let status = append.status;
    let event = append.into_event(now);
    EventRepo::insert(conn, key, &event).map_err(|e| {
        if e.is_constraint_violation() {
            StoreError::Conflict {
                expected: event.sequence,
                actual: event.sequence + 1,
            }
        } else {
            e
        }
    })?;

    apply_patch(&mut row.state, &event.state_delta);
    if let Some(status) = status {
        row.status = status;
    }
    row.last_sequence = event.sequence;
    row.updated_at = now;
    SessionRepo::update(conn, key, &row)?;
    Ok(event)
}

impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self, key), fields(session = %key))]
    fn create(&self, key: &SessionKey) -> Result<Session> {
        self.write(|tx| {
            let session = Session::new(key.clone());
            SessionRepo::insert(tx, key, &session.created_at).map_err(|e| {
                if e.is_constraint_violation() {
                    StoreError::AlreadyExists(key.to_string())
                } else {
                    e
                }
            })?;
            Ok(session)
        })
    }

    fn get(&self, key: &SessionKey) -> Result<Session> {
        self.with_retry(|conn| {
            let row = session_row(conn, key)?;
            let events = EventRepo::list_after(conn, key, 0)?;
            Ok(Session {
                key: key.clone(),
                status: row.status,
                state: row.state,
                events,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
    }

    fn list_sessions(&self, app: &str, user: &str) -> Result<Vec<SessionKey>> {
        self.with_retry(|conn| SessionRepo::list(conn, app, user))
    }

    fn last_sequence(&self, key: &SessionKey) -> Result<u64> {
        self.with_retry(|conn| Ok(session_row(conn, key)?.last_sequence))
    }

    fn events_after(&self, key: &SessionKey, after: u64) -> Result<Vec<Event>> {
        self.with_retry(|conn| {
            let _ = session_row(conn, key)?;
            EventRepo::list_after(conn, key, after)
        })
    }

    #[instrument(skip(self, key, append), fields(session = %key, sequence = append.expected_sequence))]
    fn append_event(&self, key: &SessionKey, append: AppendEvent) -> Result<Event> {
        self.write(|tx| append_in(tx, key, append.clone()))
    }

    fn update_state(&self, key: &SessionKey, patch: &StateMap) -> Result<StateMap> {
        self.write(|tx| {
            let mut row = session_row(tx, key)?;
            apply_patch(&mut row.state, patch);
            row.updated_at = Utc::now();
            SessionRepo::update(tx, key, &row)?;
            Ok(row.state)
        })
    }

    #[instrument(skip(self, record), fields(session = %record.session, invocation = %record.id))]
    fn begin_invocation(&self, record: &InvocationRecord) -> Result<()> {
        self.write(|tx| {
            let _ = session_row(tx, &record.session)?;
            if let Some(active) = InvocationRepo::active_for(tx, &record.session)? {
                return Err(StoreError::SessionBusy(format!(
                    "{} has active invocation {}",
                    record.session, active.id
                )));
            }
            InvocationRepo::insert(tx, record).map_err(|e| {
                if e.is_constraint_violation() {
                    StoreError::InvalidOperation(format!("invocation {} already exists", record.id))
                } else {
                    e
                }
            })
        })
    }

    fn get_invocation(&self, id: &InvocationId) -> Result<InvocationRecord> {
        self.with_retry(|conn| {
            InvocationRepo::get(conn, id)?
                .ok_or_else(|| StoreError::InvocationNotFound(id.to_string()))
        })
    }

    fn update_invocation(
        &self,
        record: &InvocationRecord,
        expected: InvocationStatus,
    ) -> Result<()> {
        self.write(|tx| {
            let stored = InvocationRepo::status(tx, &record.id)?
                .ok_or_else(|| StoreError::InvocationNotFound(record.id.to_string()))?;
            check_invocation_status(&record.id, stored, expected)?;
            InvocationRepo::update(tx, record)
        })
    }

    fn active_invocation(&self, key: &SessionKey) -> Result<Option<InvocationRecord>> {
        self.with_retry(|conn| InvocationRepo::active_for(conn, key))
    }

    fn expired_confirmations(&self, now: DateTime<Utc>) -> Result<Vec<InvocationRecord>> {
        self.with_retry(|conn| InvocationRepo::expired(conn, &now))
    }

    fn compaction_records(&self, key: &SessionKey) -> Result<Vec<CompactionRecord>> {
        self.with_retry(|conn| {
            let _ = session_row(conn, key)?;
            CompactionRepo::list(conn, key)
        })
    }

    #[instrument(skip(self, key, summary), fields(session = %key))]
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
        self.write(|tx| {
            let last = session_row(tx, key)?.last_sequence;
            let existing = CompactionRepo::list(tx, key)?;
            check_compaction_range(&existing, start, end, last)?;

            let event = append_in(tx, key, summary.clone())?;
            let record = CompactionRecord {
                session: key.clone(),
                start_sequence: start,
                end_sequence: end,
                summary_sequence: event.sequence,
                created_at: event.timestamp,
            };
            CompactionRepo::insert(tx, &record)?;
            Ok(record)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
