//! Built-in telemetry hook.
//!
//! Counts lifecycle activity with relaxed atomics. Step commits whose
//! detail carries `"kind": "tool_call"` (dynamic orchestration rounds)
//! are counted as tool calls instead of steps.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::HookError;
use crate::handler::LifecycleHook;
use crate::types::{LifecycleEvent, LifecyclePoint};

/// Point-in-time copy of the telemetry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySummary {
    /// Turns started.
    pub turns: u64,
    /// Steps committed.
    pub steps: u64,
    /// Dynamic-orchestration tool calls.
    pub tool_calls: u64,
    /// Confirmation requests.
    pub confirmations: u64,
    /// Step or turn failures.
    pub errors: u64,
}

/// Counts turns, steps, tool calls, confirmations, and errors.
#[derive(Debug, Default)]
pub struct TelemetryHook {
    turns: AtomicU64,
    steps: AtomicU64,
    tool_calls: AtomicU64,
    confirmations: AtomicU64,
    errors: AtomicU64,
}

impl TelemetryHook {
    /// Hook name.
    pub const NAME: &'static str = "telemetry";

    /// Create a hook with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the counters.
    pub fn summary(&self) -> TelemetrySummary {
        TelemetrySummary {
            turns: self.turns.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl LifecycleHook for TelemetryHook {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn points(&self) -> &[LifecyclePoint] {
        &[
            LifecyclePoint::TurnStarted,
            LifecyclePoint::StepCompleted,
            LifecyclePoint::StepFailed,
            LifecyclePoint::ConfirmationRequested,
            LifecyclePoint::TurnFailed,
        ]
    }

    fn priority(&self) -> i32 {
        -100
    }

    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), HookError> {
        match event.point {
            LifecyclePoint::TurnStarted => Self::bump(&self.turns),
            LifecyclePoint::StepCompleted => {
                if event.detail.get("kind").and_then(|k| k.as_str()) == Some("tool_call") {
                    Self::bump(&self.tool_calls);
                } else {
                    Self::bump(&self.steps);
                }
            }
            LifecyclePoint::ConfirmationRequested => Self::bump(&self.confirmations),
            LifecyclePoint::StepFailed | LifecyclePoint::TurnFailed => Self::bump(&self.errors),
            _ => {}
        }
        Ok(())
    }
}
