//! Session store settings.

use cadence_core::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Which backend holds sessions, invocations, and facts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps; lost on restart.
    #[default]
    Memory,
    /// `SQLite` database file in WAL mode.
    Sqlite,
}

/// Session store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Backend selection.
    pub backend: StorageBackend,
    /// Database file path for the `SQLite` backend.
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Backoff for transient storage failures.
    pub retry: RetryPolicy,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "cadence.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}
