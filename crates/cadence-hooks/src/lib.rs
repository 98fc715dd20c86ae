//! # cadence-hooks
//!
//! Lifecycle hooks for the Cadence runtime.
//!
//! The engine emits a [`LifecycleEvent`] at fixed [`LifecyclePoint`]s
//! (turn started, step committed, confirmation requested, ...). Hooks
//! implementing [`LifecycleHook`] subscribe to the points they care about
//! and are dispatched in priority order by [`HookRegistry`].
//!
//! ## Fail-Open
//!
//! Hooks observe but cannot steer. An error or timeout is logged and the
//! turn continues.

#![deny(unsafe_code)]

pub mod errors;
pub mod handler;
pub mod registry;
pub mod telemetry;
pub mod types;

pub use errors::{HookError, Result};
pub use handler::LifecycleHook;
pub use registry::HookRegistry;
pub use telemetry::{TelemetryHook, TelemetrySummary};
pub use types::{LifecycleEvent, LifecyclePoint, SCHEMA_VERSION};
