//! Error types for the session store.
//!
//! [`StoreError`] is returned by every [`SessionStore`](crate::SessionStore)
//! operation, whichever backend is behind it. Callers branch on the
//! semantic variants (`SessionNotFound`, `Conflict`, `SessionBusy`, ...)
//! and treat anything [`is_transient`](StoreError::is_transient) as
//! retryable infrastructure noise.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested session was not found under the given key.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with this key already exists.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// Requested invocation was not found.
    #[error("invocation not found: {0}")]
    InvocationNotFound(String),

    /// Optimistic-concurrency violation on append.
    #[error("sequence conflict: expected next sequence {expected}, store is at {actual}")]
    Conflict {
        /// Sequence the caller tried to append at.
        expected: u64,
        /// Next sequence the store would accept.
        actual: u64,
    },

    /// Another invocation is already running or awaiting confirmation on
    /// this session.
    #[error("session busy: {0}")]
    SessionBusy(String),

    /// The invocation record changed since the caller read it.
    #[error("stale invocation record: {0}")]
    StaleInvocation(String),

    /// Invalid operation (e.g. overlapping compaction range).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Backend temporarily unavailable and retries were exhausted.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },
}

impl StoreError {
    /// Whether retrying the same operation may succeed without any change
    /// by the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Pool(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }

    /// Whether this is a unique/primary-key constraint violation.
    pub(crate) fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
        )
    }
}

/// Convenience type alias for session store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::ffi::c_int) -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn conflict_display() {
        let err = StoreError::Conflict {
            expected: 4,
            actual: 6,
        };
        assert_eq!(
            err.to_string(),
            "sequence conflict: expected next sequence 4, store is at 6"
        );
    }

    #[test]
    fn busy_sqlite_is_transient() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_transient());
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).is_transient());
        assert!(StoreError::Unavailable("disk".into()).is_transient());
    }

    #[test]
    fn semantic_errors_are_not_transient() {
        assert!(!StoreError::SessionNotFound("k".into()).is_transient());
        assert!(!StoreError::Conflict { expected: 1, actual: 2 }.is_transient());
        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT).is_transient());
    }

    #[test]
    fn constraint_violation_detected() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT).is_constraint_violation());
        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_constraint_violation());
    }

    #[test]
    fn serde_error_display() {
        let serde_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err = StoreError::Serde(serde_err);
        assert!(err.to_string().contains("serde error"));
    }
}
