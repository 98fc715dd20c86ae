//! Memory error types.
//!
//! Ingestion after a completed turn is non-fatal: the engine logs these
//! and the turn result is unaffected.

use cadence_events::StoreError;
use thiserror::Error;

/// Errors from memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Only completed sessions can be ingested.
    #[error("session not completed: {0}")]
    SessionNotCompleted(String),

    /// Reading the source session failed.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// `SQLite` error (preserves source chain).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Stored embedding could not be (de)serialized.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The embedder failed.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            MemoryError::SessionNotCompleted("a/u/s".into()).to_string(),
            "session not completed: a/u/s"
        );
        let from_store: MemoryError = StoreError::SessionNotFound("x".into()).into();
        assert!(from_store.to_string().contains("session not found"));
    }
}
