//! Lifecycle hook trait.

use async_trait::async_trait;

use crate::errors::HookError;
use crate::types::{LifecycleEvent, LifecyclePoint};

/// Default per-hook timeout.
pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 5_000;

/// A subscriber to runtime lifecycle events.
///
/// Hooks observe; they cannot alter the turn. Errors and timeouts are
/// logged by the registry and never fail the turn that triggered them.
///
/// # Priority
///
/// Higher priority hooks run first. Default priority is 0.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Unique name. Registering a second hook with the same name replaces
    /// the first.
    fn name(&self) -> &str;

    /// Points this hook wants to receive. Default: all of them.
    fn points(&self) -> &[LifecyclePoint] {
        &LifecyclePoint::ALL
    }

    /// Execution priority. Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Timeout in milliseconds for one `on_event` call.
    fn timeout_ms(&self) -> u64 {
        DEFAULT_HOOK_TIMEOUT_MS
    }

    /// Handle one event.
    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), HookError>;

    /// Whether this hook wants `point`.
    fn wants(&self, point: LifecyclePoint) -> bool {
        self.points().contains(&point)
    }
}
