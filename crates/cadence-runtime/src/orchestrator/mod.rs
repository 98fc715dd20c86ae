//! Orchestrator modules: composition trees, steps, and the walker that
//! runs them against a ledger.

pub mod composition;
pub(crate) mod executor;
pub(crate) mod journal;
pub mod step;

pub use composition::{Composition, Decider, Directive, ExitCondition, ParallelPolicy};
pub use executor::LoopReport;
pub use step::{
    BranchResult, FnStep, Step, StepContext, StepError, StepOutcome, StepOutput, confirmation_key,
};
