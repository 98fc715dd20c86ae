//! # cadence-runtime
//!
//! Composition orchestrator and resumable invocation engine.
//!
//! - **Orchestrator**: declarative [`Composition`] trees of [`Step`]s
//!   (sequential, parallel with fan-in, bounded loops, and decider-driven
//!   dynamic rounds). Every step result is committed to the session log
//!   before the next step is requested.
//! - **Engine**: [`InvocationEngine`] runs turns, suspends them on
//!   confirmation requests behind single-use tokens, resumes them (possibly
//!   in another process), expires stale confirmations, and cancels
//!   cooperatively at step boundaries.
//! - **Replay**: a re-entered turn walks the tree from the root and reuses
//!   committed results by node path, so no committed step runs twice.

#![deny(unsafe_code)]

pub mod engine;
pub mod errors;
pub mod orchestrator;
pub mod types;

pub use engine::{ENGINE_ACTOR, EngineBuilder, InvocationEngine, MEMORY_STATE_KEY, USER_ACTOR};
pub use errors::{Result, RuntimeError};
pub use orchestrator::{
    BranchResult, Composition, Decider, Directive, ExitCondition, FnStep, LoopReport,
    ParallelPolicy, Step, StepContext, StepError, StepOutcome, StepOutput, confirmation_key,
};
pub use types::{ResumeTurn, StartTurn, TurnOutcome, TurnResult};
