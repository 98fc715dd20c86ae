//! Fact persistence.
//!
//! A [`FactStore`] only stores and lists; deduplication and scoring live in
//! [`MemoryService`](crate::MemoryService) so both backends behave the same.

mod memory;
mod sqlite;

pub use memory::MemoryFactStore;
pub use sqlite::SqliteFactStore;

use std::sync::Arc;

use cadence_events::sqlite::{ConnectionConfig, new_file};
use cadence_settings::{StorageBackend, StorageSettings};

use crate::errors::Result;
use crate::types::MemoryFact;

/// Durable storage for memory facts, scoped by (app, user).
pub trait FactStore: Send + Sync {
    /// Persist a new fact.
    fn insert(&self, fact: &MemoryFact) -> Result<()>;

    /// All facts of one scope, oldest first (ties broken by id).
    fn list(&self, app: &str, user: &str) -> Result<Vec<MemoryFact>>;
}

/// Open the fact store matching the session store backend in `settings`.
///
/// For `SQLite` this opens a second pool on the same database file; callers
/// that already hold a [`SqliteSessionStore`](cadence_events::SqliteSessionStore)
/// can share its pool through [`SqliteFactStore::new`] instead.
pub fn open_fact_store(settings: &StorageSettings) -> Result<Arc<dyn FactStore>> {
    match settings.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryFactStore::new())),
        StorageBackend::Sqlite => {
            let config = ConnectionConfig {
                pool_size: settings.pool_size,
                busy_timeout_ms: settings.busy_timeout_ms,
                ..ConnectionConfig::default()
            };
            let pool = new_file(&settings.path, &config)?;
            Ok(Arc::new(SqliteFactStore::new(pool)?))
        }
    }
}
