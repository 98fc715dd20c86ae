//! Hook registry and dispatch.
//!
//! Hooks are kept in one list sorted by priority (descending). Dispatch
//! awaits each interested hook in that order, bounded by the hook's own
//! timeout. Errors and timeouts are logged and swallowed (fail-open).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::HookError;
use crate::handler::LifecycleHook;
use crate::types::LifecycleEvent;

/// Registry of lifecycle hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook, replacing any hook with the same name.
    pub fn register(&mut self, hook: Arc<dyn LifecycleHook>) {
        let name = hook.name().to_string();
        self.hooks.retain(|h| h.name() != name);
        debug!(name = %name, priority = hook.priority(), "registering hook");
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    /// Remove a hook by name. Returns whether one was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|h| h.name() != name);
        self.hooks.len() < before
    }

    /// Names in dispatch order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.hooks.iter().map(|h| h.name().to_string()).collect()
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn count(&self) -> usize {
        self.hooks.len()
    }

    /// Deliver `event` to every hook subscribed to its point. Returns the
    /// number of hooks that handled it successfully.
    pub async fn dispatch(&self, event: &LifecycleEvent) -> usize {
        let start = Instant::now();
        let mut delivered = 0;
        for hook in self.hooks.iter().filter(|h| h.wants(event.point)) {
            match Self::run_one(hook.as_ref(), event).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    hook = %hook.name(),
                    point = %event.point,
                    error = %e,
                    "hook failed (fail-open)"
                ),
            }
        }
        debug!(point = %event.point, delivered, elapsed = ?start.elapsed(), "hooks dispatched");
        delivered
    }

    async fn run_one(hook: &dyn LifecycleHook, event: &LifecycleEvent) -> Result<(), HookError> {
        let timeout_ms = hook.timeout_ms();
        match tokio::time::timeout(Duration::from_millis(timeout_ms), hook.on_event(event)).await {
            Ok(result) => result,
            Err(_) => Err(HookError::Timeout {
                name: hook.name().to_string(),
                timeout_ms,
            }),
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LifecyclePoint;
    use async_trait::async_trait;
    use cadence_events::SessionKey;
    use std::sync::Mutex;

    /// Collects hook names in call order.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn push(&self, name: &str) {
            self.0.lock().unwrap().push(name.to_string());
        }
        fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    enum Behavior {
        Ok,
        Fail,
        Hang,
    }

    struct TestHook {
        name: &'static str,
        priority: i32,
        behavior: Behavior,
        points: Vec<LifecyclePoint>,
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl LifecycleHook for TestHook {
        fn name(&self) -> &str {
            self.name
        }
        fn points(&self) -> &[LifecyclePoint] {
            &self.points
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn timeout_ms(&self) -> u64 {
            50
        }
        async fn on_event(&self, _event: &LifecycleEvent) -> Result<(), HookError> {
            self.recorder.push(self.name);
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err(HookError::Handler {
                    name: self.name.into(),
                    message: "boom".into(),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        }
    }

    fn hook(
        name: &'static str,
        priority: i32,
        behavior: Behavior,
        recorder: &Arc<Recorder>,
    ) -> Arc<dyn LifecycleHook> {
        Arc::new(TestHook {
            name,
            priority,
            behavior,
            points: LifecyclePoint::ALL.to_vec(),
            recorder: Arc::clone(recorder),
        })
    }

    fn event(point: LifecyclePoint) -> LifecycleEvent {
        LifecycleEvent::new(point, SessionKey::new("a", "u", "s"))
    }

    #[tokio::test]
    async fn dispatch_runs_in_priority_order() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = HookRegistry::new();
        registry.register(hook("low", 1, Behavior::Ok, &recorder));
        registry.register(hook("high", 10, Behavior::Ok, &recorder));
        registry.register(hook("mid", 5, Behavior::Ok, &recorder));

        let delivered = registry.dispatch(&event(LifecyclePoint::TurnStarted)).await;
        assert_eq!(delivered, 3);
        assert_eq!(recorder.calls(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn same_name_replaces() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = HookRegistry::new();
        registry.register(hook("telemetry", 1, Behavior::Ok, &recorder));
        registry.register(hook("telemetry", 7, Behavior::Ok, &recorder));
        assert_eq!(registry.count(), 1);
        assert!(registry.unregister("telemetry"));
        assert!(!registry.unregister("telemetry"));
    }

    #[tokio::test]
    async fn failures_and_timeouts_are_fail_open() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = HookRegistry::new();
        registry.register(hook("broken", 3, Behavior::Fail, &recorder));
        registry.register(hook("stuck", 2, Behavior::Hang, &recorder));
        registry.register(hook("fine", 1, Behavior::Ok, &recorder));

        let delivered = registry.dispatch(&event(LifecyclePoint::TurnFailed)).await;
        assert_eq!(delivered, 1);
        assert_eq!(recorder.calls(), vec!["broken", "stuck", "fine"]);
    }

    #[tokio::test]
    async fn only_subscribed_points_are_delivered() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(TestHook {
            name: "completions",
            priority: 0,
            behavior: Behavior::Ok,
            points: vec![LifecyclePoint::TurnCompleted],
            recorder: Arc::clone(&recorder),
        }));
        assert_eq!(registry.dispatch(&event(LifecyclePoint::TurnStarted)).await, 0);
        assert_eq!(registry.dispatch(&event(LifecyclePoint::TurnCompleted)).await, 1);
        assert_eq!(recorder.calls(), vec!["completions"]);
    }
}
