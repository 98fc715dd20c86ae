//! `SQLite` [`FactStore`] on the session store's connection pool.
//!
//! The `facts` table ships with the `cadence-events` migrations, so a fact
//! store opened on the same pool as a
//! [`SqliteSessionStore`](cadence_events::SqliteSessionStore) shares its
//! database file and schema version.

use cadence_core::{FactId, SessionId};
use cadence_events::sqlite::repositories::{json_from_sql, ts_from_sql, ts_to_sql};
use cadence_events::sqlite::{ConnectionConfig, ConnectionPool, new_in_memory, run_migrations};
use rusqlite::{Row, params};
use tracing::trace;

use super::FactStore;
use crate::errors::Result;
use crate::types::MemoryFact;

/// Fact store backed by the `facts` table.
#[derive(Clone)]
pub struct SqliteFactStore {
    pool: ConnectionPool,
}

impl SqliteFactStore {
    /// Wrap a pool, applying pending migrations.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        {
            let conn = pool.get()?;
            let _ = run_migrations(&conn)?;
        }
        Ok(Self { pool })
    }

    /// Single-connection in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::new(new_in_memory(&ConnectionConfig::default())?)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<MemoryFact> {
        let embedding: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        Ok(MemoryFact {
            id: FactId::from_string(row.get(0)?),
            app: row.get(1)?,
            user: row.get(2)?,
            source_session: SessionId::from_string(row.get(3)?),
            text: row.get(4)?,
            normalized: row.get(5)?,
            embedding: embedding.map(|raw| json_from_sql(6, &raw)).transpose()?,
            created_at: ts_from_sql(7, &created_at)?,
        })
    }
}

impl std::fmt::Debug for SqliteFactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteFactStore")
            .field("connections", &self.pool.state().connections)
            .finish_non_exhaustive()
    }
}

impl FactStore for SqliteFactStore {
    fn insert(&self, fact: &MemoryFact) -> Result<()> {
        let conn = self.pool.get()?;
        let embedding = fact
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let _ = conn.execute(
            "INSERT INTO facts (id, app, user_id, source_session_id, text, normalized,
                                embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                fact.id.as_str(),
                fact.app,
                fact.user,
                fact.source_session.as_str(),
                fact.text,
                fact.normalized,
                embedding,
                ts_to_sql(&fact.created_at),
            ],
        )?;
        trace!(fact = %fact.id, app = %fact.app, user = %fact.user, "fact inserted");
        Ok(())
    }

    fn list(&self, app: &str, user: &str) -> Result<Vec<MemoryFact>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, app, user_id, source_session_id, text, normalized, embedding, created_at
             FROM facts
             WHERE app = ?1 AND user_id = ?2
             ORDER BY created_at ASC, id ASC",
        )?;
        let facts = stmt
            .query_map(params![app, user], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_events::SqliteSessionStore;
    use chrono::Utc;

    fn fact(user: &str, text: &str, embedding: Option<Vec<f32>>) -> MemoryFact {
        MemoryFact {
            id: FactId::new(),
            app: "shop".into(),
            user: user.into(),
            source_session: SessionId::from_string("sess_src".into()),
            text: text.into(),
            normalized: text.to_lowercase(),
            embedding,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_list_preserves_fields() {
        let store = SqliteFactStore::in_memory().unwrap();
        let original = fact("u1", "Prefers blue", Some(vec![0.5, -1.0, 2.0]));
        store.insert(&original).unwrap();
        store.insert(&fact("u1", "No embedding", None)).unwrap();

        let listed = store.list("shop", "u1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, original.id);
        assert_eq!(listed[0].embedding, original.embedding);
        assert_eq!(listed[0].source_session.as_str(), "sess_src");
        assert_eq!(listed[1].embedding, None);
    }

    #[test]
    fn list_is_scoped() {
        let store = SqliteFactStore::in_memory().unwrap();
        store.insert(&fact("u1", "a", None)).unwrap();
        assert!(store.list("shop", "u2").unwrap().is_empty());
        assert!(store.list("other", "u1").unwrap().is_empty());
    }

    #[test]
    fn shares_session_store_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.db");
        let path = path.to_str().unwrap();
        let sessions =
            SqliteSessionStore::open(path, &ConnectionConfig::default(), Default::default())
                .unwrap();
        let facts = SqliteFactStore::new(sessions.pool().clone()).unwrap();
        facts.insert(&fact("u1", "shared", None)).unwrap();

        let reopened = SqliteFactStore::new(
            cadence_events::sqlite::new_file(path, &ConnectionConfig::default()).unwrap(),
        )
        .unwrap();
        assert_eq!(reopened.list("shop", "u1").unwrap()[0].text, "shared");
    }
}
