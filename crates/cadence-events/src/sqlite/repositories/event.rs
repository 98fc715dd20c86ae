//! Event repository for the append-only `events` table.

use rusqlite::{Connection, params};

use super::{json_from_sql, seq_from_sql, seq_to_sql, ts_from_sql, ts_to_sql};
use crate::errors::Result;
use crate::types::{Event, SessionKey, StateMap};

const COLUMNS: &str = "sequence, actor, payload, timestamp, invocation_id, node, state_delta";

/// Event repository: stateless, every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert one event. The `(session, sequence)` primary key rejects a
    /// duplicate sequence even if the caller skipped the tail check.
    pub fn insert(conn: &Connection, key: &SessionKey, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        let state_delta = if event.state_delta.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&event.state_delta)?)
        };
        let _ = conn.execute(
            "INSERT INTO events (app, user_id, session_id, sequence, actor, kind, payload,
                                 invocation_id, node, state_delta, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                key.app,
                key.user,
                key.session_id.as_str(),
                seq_to_sql(event.sequence),
                event.actor,
                event.payload.kind(),
                payload,
                event.invocation_id.as_ref().map(|id| id.as_str()),
                event.node,
                state_delta,
                ts_to_sql(&event.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Events with sequence greater than `after`, ascending.
    pub fn list_after(conn: &Connection, key: &SessionKey, after: u64) -> Result<Vec<Event>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM events
             WHERE app = ?1 AND user_id = ?2 AND session_id = ?3 AND sequence > ?4
             ORDER BY sequence ASC"
        ))?;
        let events = stmt
            .query_map(
                params![key.app, key.user, key.session_id.as_str(), seq_to_sql(after)],
                Self::map_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
        let sequence: i64 = row.get(0)?;
        let payload: String = row.get(2)?;
        let timestamp: String = row.get(3)?;
        let invocation_id: Option<String> = row.get(4)?;
        let state_delta: Option<String> = row.get(6)?;
        Ok(Event {
            sequence: seq_from_sql(sequence),
            actor: row.get(1)?,
            payload: json_from_sql(2, &payload)?,
            timestamp: ts_from_sql(3, &timestamp)?,
            invocation_id: invocation_id.map(Into::into),
            node: row.get(5)?,
            state_delta: match state_delta {
                Some(raw) => json_from_sql(6, &raw)?,
                None => StateMap::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::session::SessionRepo;
    use crate::sqlite::run_migrations;
    use crate::types::{AppendEvent, EventPayload};
    use cadence_core::InvocationId;
    use chrono::Utc;
    use serde_json::json;

    fn setup(key: &SessionKey) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        SessionRepo::insert(&conn, key, &Utc::now()).unwrap();
        conn
    }

    #[test]
    fn insert_and_list_preserves_fields() {
        let key = SessionKey::new("shop", "u1", "s1");
        let conn = setup(&key);
        let mut delta = StateMap::new();
        let _ = delta.insert("units".into(), json!(50));
        let event = AppendEvent::new(1, "user", EventPayload::Input { content: json!("order 50 units") })
            .invocation(&InvocationId::from("inv-1"))
            .node("root")
            .state_delta(delta)
            .into_event(Utc::now());
        EventRepo::insert(&conn, &key, &event).unwrap();

        let events = EventRepo::list_after(&conn, &key, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, event.payload);
        assert_eq!(events[0].invocation_id, event.invocation_id);
        assert_eq!(events[0].state_delta["units"], 50);
    }

    #[test]
    fn duplicate_sequence_rejected() {
        let key = SessionKey::new("shop", "u1", "s1");
        let conn = setup(&key);
        let event = AppendEvent::new(1, "a", EventPayload::Output { content: json!(1) })
            .into_event(Utc::now());
        EventRepo::insert(&conn, &key, &event).unwrap();
        let err = EventRepo::insert(&conn, &key, &event).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn list_after_filters_and_orders() {
        let key = SessionKey::new("shop", "u1", "s1");
        let conn = setup(&key);
        for seq in 1..=4 {
            let event = AppendEvent::new(seq, "a", EventPayload::Output { content: json!(seq) })
                .into_event(Utc::now());
            EventRepo::insert(&conn, &key, &event).unwrap();
        }
        let tail: Vec<u64> = EventRepo::list_after(&conn, &key, 2)
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(tail, vec![3, 4]);
    }
}
