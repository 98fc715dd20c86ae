//! Session repository: the `sessions` table.
//!
//! The row carries the state document and the tail sequence, so an append
//! can validate its expected sequence without scanning `events`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{enum_from_sql, json_from_sql, seq_from_sql, seq_to_sql, ts_from_sql, ts_to_sql};
use crate::errors::Result;
use crate::types::{SessionKey, SessionStatus, StateMap};

/// A session row without its events.
#[derive(Clone, Debug)]
pub struct SessionRow {
    /// Lifecycle status.
    pub status: SessionStatus,
    /// State document.
    pub state: StateMap,
    /// Sequence of the newest event.
    pub last_sequence: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Session repository: stateless, every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new empty session row. A duplicate key surfaces as a
    /// constraint violation.
    pub fn insert(conn: &Connection, key: &SessionKey, now: &DateTime<Utc>) -> Result<()> {
        let ts = ts_to_sql(now);
        let _ = conn.execute(
            "INSERT INTO sessions (app, user_id, session_id, status, state, last_sequence, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', '{}', 0, ?4, ?4)",
            params![key.app, key.user, key.session_id.as_str(), ts],
        )?;
        Ok(())
    }

    /// Fetch a session row.
    pub fn get(conn: &Connection, key: &SessionKey) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                "SELECT status, state, last_sequence, created_at, updated_at
                 FROM sessions WHERE app = ?1 AND user_id = ?2 AND session_id = ?3",
                params![key.app, key.user, key.session_id.as_str()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Session keys within one (app, user) scope, oldest first.
    pub fn list(conn: &Connection, app: &str, user: &str) -> Result<Vec<SessionKey>> {
        let mut stmt = conn.prepare(
            "SELECT session_id FROM sessions WHERE app = ?1 AND user_id = ?2
             ORDER BY created_at ASC, session_id ASC",
        )?;
        let keys = stmt
            .query_map(params![app, user], |row| {
                let session_id: String = row.get(0)?;
                Ok(SessionKey::new(app, user, session_id))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Write back the mutable columns after an append or state patch.
    pub fn update(
        conn: &Connection,
        key: &SessionKey,
        row: &SessionRow,
    ) -> Result<()> {
        let state = serde_json::to_string(&row.state)?;
        let _ = conn.execute(
            "UPDATE sessions SET status = ?4, state = ?5, last_sequence = ?6, updated_at = ?7
             WHERE app = ?1 AND user_id = ?2 AND session_id = ?3",
            params![
                key.app,
                key.user,
                key.session_id.as_str(),
                row.status.as_str(),
                state,
                seq_to_sql(row.last_sequence),
                ts_to_sql(&row.updated_at),
            ],
        )?;
        Ok(())
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
        let status: String = row.get(0)?;
        let state: String = row.get(1)?;
        let last_sequence: i64 = row.get(2)?;
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;
        Ok(SessionRow {
            status: enum_from_sql(0, &status, SessionStatus::parse)?,
            state: json_from_sql(1, &state)?,
            last_sequence: seq_from_sql(last_sequence),
            created_at: ts_from_sql(3, &created_at)?,
            updated_at: ts_from_sql(4, &updated_at)?,
        })
    }
}
