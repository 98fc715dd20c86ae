//! # cadence-core
//!
//! Shared vocabulary for the Cadence agent runtime.
//!
//! - **Branded IDs**: `SessionId`, `InvocationId`, `FactId` as newtypes, plus
//!   the single-use [`ids::ConfirmationToken`]
//! - **Retry**: [`retry::RetryPolicy`] and exponential backoff with jitter
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod retry;

pub use ids::{ConfirmationToken, FactId, InvocationId, SessionId};
pub use retry::RetryPolicy;
