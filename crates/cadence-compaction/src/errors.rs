//! Compaction errors.
//!
//! None of these fail a turn: the engine logs them and the next eligible
//! turn tries again.

use cadence_events::StoreError;
use thiserror::Error;

/// Errors from a compaction pass.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// The session store rejected a read or the summary write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The summarizer could not produce a summary.
    #[error("summarizer failed: {0}")]
    Summarizer(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CompactionError>;
