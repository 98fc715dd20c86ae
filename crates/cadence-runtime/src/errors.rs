//! Runtime error types.

use cadence_events::{InvocationStatus, StoreError};
use cadence_memory::MemoryError;
use cadence_settings::SettingsError;

/// Errors surfaced by the invocation engine.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Unknown session key.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Unknown invocation, or one owned by a different session.
    #[error("Invocation not found: {0}")]
    InvocationNotFound(String),

    /// Session create collided with an existing key.
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    /// Another invocation is running or suspended on the session.
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Appends kept conflicting after the configured retries.
    #[error("Session log contended: {0}")]
    Busy(String),

    /// The confirmation token is wrong, already used, or the invocation is
    /// not awaiting confirmation.
    #[error("Invalid or already used confirmation token")]
    InvalidToken,

    /// The confirmation deadline passed.
    #[error("Invocation expired: {0}")]
    InvocationExpired(String),

    /// A step raised an error; the turn is failed.
    #[error("Step failed at {node}: {message}")]
    StepFailure {
        /// Failed invocation.
        invocation_id: String,
        /// Node path of the failing step.
        node: String,
        /// Error message.
        message: String,
    },

    /// The turn was cancelled at a step boundary.
    #[error("Invocation cancelled: {0}")]
    Cancelled(String),

    /// No composition is registered under this name.
    #[error("Unknown composition: {0}")]
    UnknownComposition(String),

    /// A composition failed validation at registration.
    #[error("Invalid composition: {0}")]
    InvalidComposition(String),

    /// `recover` was called on an invocation that is not running.
    #[error("Invocation {invocation_id} is {status}, not running")]
    NotRecoverable {
        /// The invocation.
        invocation_id: String,
        /// Its current status.
        status: InvocationStatus,
    },

    /// Memory search was requested but no memory service is configured.
    #[error("Memory service not configured")]
    MemoryDisabled,

    /// Transient storage failure after store-level retries. A running
    /// invocation stays `Running` and can be recovered.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Other store failure.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Memory failure on an explicit memory call.
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Settings rejected when the engine was built.
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            return Self::StorageUnavailable(err.to_string());
        }
        match err {
            StoreError::SessionNotFound(key) => Self::SessionNotFound(key),
            StoreError::InvocationNotFound(id) => Self::InvocationNotFound(id),
            StoreError::AlreadyExists(key) => Self::AlreadyExists(key),
            StoreError::SessionBusy(key) => Self::SessionBusy(key),
            StoreError::Conflict { expected, actual } => {
                Self::Busy(format!("expected sequence {expected}, store at {actual}"))
            }
            other => Self::Store(other),
        }
    }
}

impl RuntimeError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionBusy(_) | Self::Busy(_) | Self::StorageUnavailable(_)
        )
    }

    /// Stable snake_case category for callers and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvocationNotFound(_) => "invocation_not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::SessionBusy(_) => "session_busy",
            Self::Busy(_) => "busy",
            Self::InvalidToken => "invalid_token",
            Self::InvocationExpired(_) => "invocation_expired",
            Self::StepFailure { .. } => "step_failure",
            Self::Cancelled(_) => "cancelled",
            Self::UnknownComposition(_) => "unknown_composition",
            Self::InvalidComposition(_) => "invalid_composition",
            Self::NotRecoverable { .. } => "not_recoverable",
            Self::MemoryDisabled => "memory_disabled",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Store(_) => "store",
            Self::Memory(_) => "memory",
            Self::Settings(_) => "settings",
        }
    }

    /// Whether the failure came from the storage layer rather than from the
    /// turn itself. Such failures leave the invocation for `recover`.
    pub(crate) fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::Busy(_) | Self::Store(_)
        )
    }
}

/// Convenience type alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn store_errors_map_to_runtime_taxonomy() {
        assert_matches!(
            RuntimeError::from(StoreError::SessionNotFound("k".into())),
            RuntimeError::SessionNotFound(k) if k == "k"
        );
        assert_matches!(
            RuntimeError::from(StoreError::SessionBusy("k".into())),
            RuntimeError::SessionBusy(_)
        );
        assert_matches!(
            RuntimeError::from(StoreError::Conflict { expected: 3, actual: 5 }),
            RuntimeError::Busy(_)
        );
        assert_matches!(
            RuntimeError::from(StoreError::Unavailable("disk".into())),
            RuntimeError::StorageUnavailable(_)
        );
        assert_matches!(
            RuntimeError::from(StoreError::InvalidOperation("x".into())),
            RuntimeError::Store(_)
        );
    }

    #[test]
    fn step_failure_display() {
        let err = RuntimeError::StepFailure {
            invocation_id: "inv_1".into(),
            node: "checkout/0:validate".into(),
            message: "bad sku".into(),
        };
        assert_eq!(err.to_string(), "Step failed at checkout/0:validate: bad sku");
    }

    #[test]
    fn categories_and_retryability() {
        assert_eq!(RuntimeError::InvalidToken.category(), "invalid_token");
        assert_eq!(
            RuntimeError::InvocationExpired("i".into()).category(),
            "invocation_expired"
        );
        assert_eq!(RuntimeError::Cancelled("i".into()).category(), "cancelled");
        assert!(RuntimeError::SessionBusy("s".into()).is_retryable());
        assert!(RuntimeError::Busy("s".into()).is_retryable());
        assert!(RuntimeError::StorageUnavailable("s".into()).is_retryable());
        assert!(!RuntimeError::InvalidToken.is_retryable());
        assert!(!RuntimeError::SessionNotFound("s".into()).is_retryable());
    }

    #[test]
    fn not_recoverable_display() {
        let err = RuntimeError::NotRecoverable {
            invocation_id: "inv_1".into(),
            status: InvocationStatus::Completed,
        };
        assert_eq!(err.to_string(), "Invocation inv_1 is completed, not running");
    }
}
