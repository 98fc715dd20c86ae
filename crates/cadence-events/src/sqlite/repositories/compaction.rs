//! Compaction record repository.

use rusqlite::{Connection, params};

use super::{seq_from_sql, seq_to_sql, ts_from_sql, ts_to_sql};
use crate::errors::Result;
use crate::types::{CompactionRecord, SessionKey};

/// Compaction repository: stateless, every method takes `&Connection`.
pub struct CompactionRepo;

impl CompactionRepo {
    /// Insert a record.
    pub fn insert(conn: &Connection, record: &CompactionRecord) -> Result<()> {
        let key = &record.session;
        let _ = conn.execute(
            "INSERT INTO compaction_records (app, user_id, session_id, start_sequence,
                                             end_sequence, summary_sequence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.app,
                key.user,
                key.session_id.as_str(),
                seq_to_sql(record.start_sequence),
                seq_to_sql(record.end_sequence),
                seq_to_sql(record.summary_sequence),
                ts_to_sql(&record.created_at),
            ],
        )?;
        Ok(())
    }

    /// Records of one session, ordered by range start.
    pub fn list(conn: &Connection, key: &SessionKey) -> Result<Vec<CompactionRecord>> {
        let mut stmt = conn.prepare(
            "SELECT start_sequence, end_sequence, summary_sequence, created_at
             FROM compaction_records
             WHERE app = ?1 AND user_id = ?2 AND session_id = ?3
             ORDER BY start_sequence ASC",
        )?;
        let records = stmt
            .query_map(params![key.app, key.user, key.session_id.as_str()], |row| {
                let start: i64 = row.get(0)?;
                let end: i64 = row.get(1)?;
                let summary: i64 = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok(CompactionRecord {
                    session: key.clone(),
                    start_sequence: seq_from_sql(start),
                    end_sequence: seq_from_sql(end),
                    summary_sequence: seq_from_sql(summary),
                    created_at: ts_from_sql(3, &created_at)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::session::SessionRepo;
    use crate::sqlite::run_migrations;
    use chrono::Utc;

    #[test]
    fn insert_and_list_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        let key = SessionKey::new("shop", "u1", "s1");
        SessionRepo::insert(&conn, &key, &Utc::now()).unwrap();

        for (start, end) in [(6, 9), (1, 5)] {
            CompactionRepo::insert(
                &conn,
                &CompactionRecord {
                    session: key.clone(),
                    start_sequence: start,
                    end_sequence: end,
                    summary_sequence: end + 10,
                    created_at: Utc::now(),
                },
            )
            .unwrap();
        }

        let records = CompactionRepo::list(&conn, &key).unwrap();
        let starts: Vec<u64> = records.iter().map(|r| r.start_sequence).collect();
        assert_eq!(starts, vec![1, 6]);
        assert!(CompactionRepo::list(&conn, &SessionKey::new("shop", "u2", "s1"))
            .unwrap()
            .is_empty());
    }
}
