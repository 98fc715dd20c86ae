//! # cadence-compaction
//!
//! Condenses old session history into summary events so readers can work
//! from a bounded view of long sessions. Summarized events stay in the log;
//! a [`CompactionRecord`](cadence_events::CompactionRecord) marks the range
//! each summary replaces.

#![deny(unsafe_code)]

pub mod errors;
pub mod service;
pub mod summarizer;

pub use errors::{CompactionError, Result};
pub use service::{
    COMPACTOR_ACTOR, CompactionOutcome, CompactionPlan, CompactionService, SkipReason,
    context_view, live_count, plan,
};
pub use summarizer::{ExtractiveSummarizer, Summarizer};
