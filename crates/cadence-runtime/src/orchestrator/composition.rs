//! Declarative composition trees.
//!
//! A [`Composition`] is built once, validated at registration, and shared
//! read-only by every turn that runs it. Node paths are derived from the
//! tree shape:
//!
//! | Node | Child path |
//! |---|---|
//! | Sequential `p` | `p/{index}:{child}` |
//! | Parallel `p` | `p/{branch}`, combiner at `p/{combiner}` |
//! | Loop `p` | `p/{body}@{iteration}` (1-based) |
//! | Dynamic `p` | round marker `p/r{round}`, sub-steps `p/r{round}/{index}:{name}` |

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_events::{Event, StateMap};

use super::step::{Step, StepContext, StepError};
use crate::errors::{Result, RuntimeError};

/// Loop termination predicate, evaluated after every iteration against the
/// latest state and the last committed event.
pub trait ExitCondition: Send + Sync {
    /// Whether the loop should stop.
    fn satisfied(&self, state: &StateMap, last: Option<&Event>) -> bool;
}

impl<F> ExitCondition for F
where
    F: Fn(&StateMap, Option<&Event>) -> bool + Send + Sync,
{
    fn satisfied(&self, state: &StateMap, last: Option<&Event>) -> bool {
        self(state, last)
    }
}

/// A manager's choice for the next round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Run these named sub-compositions, in order.
    Run(Vec<String>),
    /// Stop; the manager is finished.
    Done,
}

/// Chooses sub-steps for a dynamic node. Queried once per round with the
/// previous round's results in [`StepContext::branches`].
#[async_trait]
pub trait Decider: Send + Sync {
    /// Pick the next round.
    async fn decide(&self, ctx: &StepContext) -> std::result::Result<Directive, StepError>;
}

/// Per-node overrides for parallel fan-out. Unset fields fall back to the
/// orchestration settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParallelPolicy {
    /// Let failed or timed-out branches reach the combiner as absent.
    pub tolerate_partial_failure: Option<bool>,
    /// Per-branch deadline.
    pub branch_timeout: Option<Duration>,
}

/// A node of a composition tree.
#[derive(Clone)]
pub enum Composition {
    /// A single step.
    Step(Arc<dyn Step>),
    /// Children in strict order.
    Sequential {
        /// Node name.
        name: String,
        /// Children.
        children: Vec<Composition>,
    },
    /// Concurrent branches merged by a combiner.
    Parallel {
        /// Node name; also the namespace of the branch state slots.
        name: String,
        /// Branch steps.
        branches: Vec<Arc<dyn Step>>,
        /// Fan-in step.
        combiner: Arc<dyn Step>,
        /// Failure and timeout policy.
        policy: ParallelPolicy,
    },
    /// A body repeated until an exit condition or a cap.
    Loop {
        /// Node name.
        name: String,
        /// Repeated body.
        body: Box<Composition>,
        /// Termination predicate.
        exit: Arc<dyn ExitCondition>,
        /// Iteration cap; the orchestration default when unset.
        max_iterations: Option<u32>,
    },
    /// A decider choosing sub-compositions round by round.
    Dynamic {
        /// Node name.
        name: String,
        /// The manager.
        decider: Arc<dyn Decider>,
        /// Sub-compositions, addressed by name.
        steps: Vec<Composition>,
    },
}

impl Composition {
    /// A single step node.
    pub fn step(step: impl Step + 'static) -> Self {
        Self::Step(Arc::new(step))
    }

    /// A sequential node.
    pub fn sequential(name: impl Into<String>, children: Vec<Composition>) -> Self {
        Self::Sequential {
            name: name.into(),
            children,
        }
    }

    /// A parallel node with the default policy.
    pub fn parallel(
        name: impl Into<String>,
        branches: Vec<Arc<dyn Step>>,
        combiner: Arc<dyn Step>,
    ) -> Self {
        Self::Parallel {
            name: name.into(),
            branches,
            combiner,
            policy: ParallelPolicy::default(),
        }
    }

    /// A loop node capped by the orchestration default.
    pub fn looped(
        name: impl Into<String>,
        body: Composition,
        exit: impl ExitCondition + 'static,
    ) -> Self {
        Self::Loop {
            name: name.into(),
            body: Box::new(body),
            exit: Arc::new(exit),
            max_iterations: None,
        }
    }

    /// A dynamic node. Sub-compositions are addressed by their names.
    pub fn dynamic(
        name: impl Into<String>,
        decider: impl Decider + 'static,
        steps: Vec<Composition>,
    ) -> Self {
        Self::Dynamic {
            name: name.into(),
            decider: Arc::new(decider),
            steps,
        }
    }

    /// Override the parallel policy. No effect on other node kinds.
    #[must_use]
    pub fn with_policy(mut self, new_policy: ParallelPolicy) -> Self {
        if let Self::Parallel { policy, .. } = &mut self {
            *policy = new_policy;
        }
        self
    }

    /// Override the loop cap. No effect on other node kinds.
    #[must_use]
    pub fn with_max_iterations(mut self, cap: u32) -> Self {
        if let Self::Loop { max_iterations, .. } = &mut self {
            *max_iterations = Some(cap);
        }
        self
    }

    /// Node name.
    pub fn name(&self) -> &str {
        match self {
            Self::Step(step) => step.name(),
            Self::Sequential { name, .. }
            | Self::Parallel { name, .. }
            | Self::Loop { name, .. }
            | Self::Dynamic { name, .. } => name,
        }
    }

    /// Check the tree can be addressed unambiguously.
    pub fn validate(&self) -> Result<()> {
        check_name(self.name())?;
        match self {
            Self::Step(_) => Ok(()),
            Self::Sequential { children, .. } => children.iter().try_for_each(Self::validate),
            Self::Parallel {
                name,
                branches,
                combiner,
                ..
            } => {
                if branches.is_empty() {
                    return invalid(format!("parallel '{name}' has no branches"));
                }
                let mut seen = BTreeSet::new();
                for branch in branches {
                    check_name(branch.name())?;
                    if !seen.insert(branch.name()) {
                        return invalid(format!(
                            "parallel '{name}' has duplicate branch '{}'",
                            branch.name()
                        ));
                    }
                }
                check_name(combiner.name())?;
                if seen.contains(combiner.name()) {
                    return invalid(format!(
                        "parallel '{name}' combiner '{}' collides with a branch",
                        combiner.name()
                    ));
                }
                Ok(())
            }
            Self::Loop {
                name,
                body,
                max_iterations,
                ..
            } => {
                if *max_iterations == Some(0) {
                    return invalid(format!("loop '{name}' has a zero iteration cap"));
                }
                body.validate()
            }
            Self::Dynamic { name, steps, .. } => {
                let mut seen = BTreeSet::new();
                for step in steps {
                    if !seen.insert(step.name()) {
                        return invalid(format!(
                            "dynamic '{name}' has duplicate step '{}'",
                            step.name()
                        ));
                    }
                    step.validate()?;
                }
                Ok(())
            }
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '@', ':']) {
        return invalid(format!("invalid node name {name:?}"));
    }
    Ok(())
}

fn invalid(message: String) -> Result<()> {
    Err(RuntimeError::InvalidComposition(message))
}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(step) => f.debug_tuple("Step").field(&step.name()).finish(),
            Self::Sequential { name, children } => f
                .debug_struct("Sequential")
                .field("name", name)
                .field("children", children)
                .finish(),
            Self::Parallel {
                name,
                branches,
                combiner,
                policy,
            } => f
                .debug_struct("Parallel")
                .field("name", name)
                .field(
                    "branches",
                    &branches.iter().map(|b| b.name()).collect::<Vec<_>>(),
                )
                .field("combiner", &combiner.name())
                .field("policy", policy)
                .finish(),
            Self::Loop {
                name,
                body,
                max_iterations,
                ..
            } => f
                .debug_struct("Loop")
                .field("name", name)
                .field("body", body)
                .field("max_iterations", max_iterations)
                .finish_non_exhaustive(),
            Self::Dynamic { name, steps, .. } => f
                .debug_struct("Dynamic")
                .field("name", name)
                .field("steps", &steps.iter().map(Self::name).collect::<Vec<_>>())
                .finish_non_exhaustive(),
        }
    }
}
