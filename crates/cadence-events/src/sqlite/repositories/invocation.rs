//! Invocation repository.
//!
//! `pending` is stored as a JSON document; its deadline is duplicated into
//! `expires_at` so the expiry sweep is an index range scan.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{enum_from_sql, json_from_sql, ts_from_sql, ts_to_sql};
use crate::errors::Result;
use crate::types::{InvocationRecord, InvocationStatus, PendingConfirmation, SessionKey};
use cadence_core::InvocationId;

const COLUMNS: &str = "id, app, user_id, session_id, composition, status, cursor, pending, \
                       cancel_requested, created_at, updated_at";

/// Invocation repository: stateless, every method takes `&Connection`.
pub struct InvocationRepo;

impl InvocationRepo {
    /// Insert a new record. The partial unique index rejects a second
    /// active invocation for the same session.
    pub fn insert(conn: &Connection, record: &InvocationRecord) -> Result<()> {
        let pending = Self::pending_json(record.pending.as_ref())?;
        let _ = conn.execute(
            "INSERT INTO invocations (id, app, user_id, session_id, composition, status, cursor,
                                      pending, expires_at, cancel_requested, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id.as_str(),
                record.session.app,
                record.session.user,
                record.session.session_id.as_str(),
                record.composition,
                record.status.as_str(),
                record.cursor,
                pending,
                record.expires_at().map(|ts| ts_to_sql(&ts)),
                record.cancel_requested,
                ts_to_sql(&record.created_at),
                ts_to_sql(&record.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch one record by id.
    pub fn get(conn: &Connection, id: &InvocationId) -> Result<Option<InvocationRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM invocations WHERE id = ?1"),
                params![id.as_str()],
                Self::map_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Stored status of one record, without decoding the rest.
    pub fn status(conn: &Connection, id: &InvocationId) -> Result<Option<InvocationStatus>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM invocations WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| enum_from_sql(0, &s, InvocationStatus::parse))
            .transpose()
            .map_err(Into::into)
    }

    /// Overwrite the mutable columns of a record.
    pub fn update(conn: &Connection, record: &InvocationRecord) -> Result<()> {
        let pending = Self::pending_json(record.pending.as_ref())?;
        let _ = conn.execute(
            "UPDATE invocations SET status = ?2, cursor = ?3, pending = ?4, expires_at = ?5,
                                    cancel_requested = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                record.id.as_str(),
                record.status.as_str(),
                record.cursor,
                pending,
                record.expires_at().map(|ts| ts_to_sql(&ts)),
                record.cancel_requested,
                ts_to_sql(&record.updated_at),
            ],
        )?;
        Ok(())
    }

    /// The running or suspended invocation of a session.
    pub fn active_for(conn: &Connection, key: &SessionKey) -> Result<Option<InvocationRecord>> {
        let record = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM invocations
                     WHERE app = ?1 AND user_id = ?2 AND session_id = ?3
                       AND status IN ('running', 'awaiting_confirmation')"
                ),
                params![key.app, key.user, key.session_id.as_str()],
                Self::map_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Suspended invocations whose deadline is at or before `now`,
    /// earliest deadline first.
    pub fn expired(conn: &Connection, now: &DateTime<Utc>) -> Result<Vec<InvocationRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM invocations
             WHERE status = 'awaiting_confirmation' AND expires_at <= ?1
             ORDER BY expires_at ASC"
        ))?;
        let records = stmt
            .query_map(params![ts_to_sql(now)], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn pending_json(pending: Option<&PendingConfirmation>) -> Result<Option<String>> {
        Ok(pending.map(serde_json::to_string).transpose()?)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InvocationRecord> {
        let id: String = row.get(0)?;
        let app: String = row.get(1)?;
        let user: String = row.get(2)?;
        let session_id: String = row.get(3)?;
        let status: String = row.get(5)?;
        let pending: Option<String> = row.get(7)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;
        Ok(InvocationRecord {
            id: InvocationId::from_string(id),
            session: SessionKey::new(app, user, session_id),
            composition: row.get(4)?,
            status: enum_from_sql(5, &status, InvocationStatus::parse)?,
            cursor: row.get(6)?,
            pending: pending.map(|raw| json_from_sql(7, &raw)).transpose()?,
            cancel_requested: row.get(8)?,
            created_at: ts_from_sql(9, &created_at)?,
            updated_at: ts_from_sql(10, &updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::session::SessionRepo;
    use crate::sqlite::run_migrations;
    use cadence_core::ConfirmationToken;
    use chrono::Duration;
    use serde_json::json;

    fn setup(key: &SessionKey) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        SessionRepo::insert(&conn, key, &Utc::now()).unwrap();
        conn
    }

    fn suspended(key: &SessionKey, expires_at: DateTime<Utc>) -> InvocationRecord {
        let mut record = InvocationRecord::start(key.clone(), "order")
            .with_status(InvocationStatus::AwaitingConfirmation);
        record.pending = Some(PendingConfirmation {
            token: ConfirmationToken::generate(),
            node: "order/1:place".into(),
            hint: "confirm 50 units".into(),
            payload: json!({"units": 50}),
            requested_at: Utc::now(),
            expires_at,
        });
        record
    }

    #[test]
    fn insert_get_round_trip() {
        let key = SessionKey::new("shop", "u1", "s1");
        let conn = setup(&key);
        let record = suspended(&key, Utc::now() + Duration::hours(1));
        InvocationRepo::insert(&conn, &record).unwrap();
        let back = InvocationRepo::get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(back.status, InvocationStatus::AwaitingConfirmation);
        assert_eq!(back.pending, record.pending);
        assert_eq!(back.session, key);
        assert_eq!(
            InvocationRepo::status(&conn, &record.id).unwrap(),
            Some(InvocationStatus::AwaitingConfirmation)
        );
    }

    #[test]
    fn second_active_invocation_violates_index() {
        let key = SessionKey::new("shop", "u1", "s1");
        let conn = setup(&key);
        InvocationRepo::insert(&conn, &InvocationRecord::start(key.clone(), "a")).unwrap();
        let err = InvocationRepo::insert(&conn, &InvocationRecord::start(key.clone(), "b"))
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn finished_invocation_frees_the_slot() {
        let key = SessionKey::new("shop", "u1", "s1");
        let conn = setup(&key);
        let first = InvocationRecord::start(key.clone(), "a");
        InvocationRepo::insert(&conn, &first).unwrap();
        InvocationRepo::update(&conn, &first.with_status(InvocationStatus::Completed)).unwrap();
        assert!(InvocationRepo::active_for(&conn, &key).unwrap().is_none());
        InvocationRepo::insert(&conn, &InvocationRecord::start(key.clone(), "b")).unwrap();
        assert!(InvocationRepo::active_for(&conn, &key).unwrap().is_some());
    }

    #[test]
    fn expired_filters_by_deadline() {
        let key_a = SessionKey::new("shop", "u1", "a");
        let key_b = SessionKey::new("shop", "u1", "b");
        let conn = setup(&key_a);
        SessionRepo::insert(&conn, &key_b, &Utc::now()).unwrap();
        let now = Utc::now();
        let past = suspended(&key_a, now - Duration::seconds(5));
        let future = suspended(&key_b, now + Duration::hours(1));
        InvocationRepo::insert(&conn, &past).unwrap();
        InvocationRepo::insert(&conn, &future).unwrap();

        let expired = InvocationRepo::expired(&conn, &now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, past.id);
    }
}
