//! Hook error types.

use thiserror::Error;

/// Errors a lifecycle hook can report. The registry logs them and moves on.
#[derive(Debug, Error)]
pub enum HookError {
    /// Hook did not finish within its timeout.
    #[error("hook timed out after {timeout_ms}ms: {name}")]
    Timeout {
        /// Hook name.
        name: String,
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Hook handler returned an error.
    #[error("hook handler error in '{name}': {message}")]
    Handler {
        /// Hook name.
        name: String,
        /// Error message from the handler.
        message: String,
    },
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, HookError>;
