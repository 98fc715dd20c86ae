//! Compaction service.
//!
//! ## Algorithm
//!
//! 1. Live events are those after the last compaction record's end,
//!    excluding summary events.
//! 2. When the live count reaches `interval`, the range
//!    `last_end + 1 ..= tail - preserve_recent` is summarized.
//! 3. The summary event and its record are written in one atomic store
//!    call, so a crash never leaves one without the other.
//!
//! Summarized events are never deleted. [`context_view`] gives the
//! condensed reading of a session: each compacted range is replaced by its
//! summary, positioned where the range began.

use std::sync::Arc;

use cadence_core::InvocationId;
use cadence_events::{
    AppendEvent, CompactionRecord, Event, EventPayload, Session, SessionKey, SessionStore,
};
use cadence_settings::CompactionSettings;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::errors::Result;
use crate::summarizer::{ExtractiveSummarizer, Summarizer};

/// Actor recorded on summary events.
pub const COMPACTOR_ACTOR: &str = "compactor";

/// A range selected for summarization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionPlan {
    /// First sequence to summarize.
    pub start: u64,
    /// Last sequence to summarize (inclusive).
    pub end: u64,
}

/// Why a pass did nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Compaction is turned off.
    Disabled,
    /// Another invocation is running or suspended on the session.
    SessionActive,
    /// Fewer live events than the interval.
    BelowThreshold,
}

/// Result of [`CompactionService::maybe_compact`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// A summary was written.
    Compacted(CompactionRecord),
    /// Nothing was written.
    Skipped(SkipReason),
}

/// Decides when to compact a session and writes the summary.
pub struct CompactionService {
    store: Arc<dyn SessionStore>,
    summarizer: Arc<dyn Summarizer>,
    settings: CompactionSettings,
}

impl CompactionService {
    /// Service using the [`ExtractiveSummarizer`].
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, settings: CompactionSettings) -> Self {
        Self::with_summarizer(store, Arc::new(ExtractiveSummarizer::new()), settings)
    }

    /// Service with a custom summarizer.
    #[must_use]
    pub fn with_summarizer(
        store: Arc<dyn SessionStore>,
        summarizer: Arc<dyn Summarizer>,
        settings: CompactionSettings,
    ) -> Self {
        Self {
            store,
            summarizer,
            settings,
        }
    }

    /// Active settings.
    pub fn settings(&self) -> &CompactionSettings {
        &self.settings
    }

    /// Compact `key` if it has enough live events.
    ///
    /// `owner` is the invocation calling on its own session (the engine
    /// after a completion); any other active invocation makes this a skip.
    #[instrument(skip(self, key, owner), fields(session = %key))]
    pub async fn maybe_compact(
        &self,
        key: &SessionKey,
        owner: Option<&InvocationId>,
    ) -> Result<CompactionOutcome> {
        if !self.settings.enabled {
            return Ok(CompactionOutcome::Skipped(SkipReason::Disabled));
        }
        if let Some(active) = self.store.active_invocation(key)? {
            if owner != Some(&active.id) {
                debug!(active = %active.id, "session busy, compaction deferred");
                return Ok(CompactionOutcome::Skipped(SkipReason::SessionActive));
            }
        }

        let session = self.store.get(key)?;
        let records = self.store.compaction_records(key)?;
        let Some(plan) = plan(&session, &records, &self.settings) else {
            return Ok(CompactionOutcome::Skipped(SkipReason::BelowThreshold));
        };

        let range: Vec<Event> = session
            .events
            .iter()
            .filter(|e| (plan.start..=plan.end).contains(&e.sequence))
            .cloned()
            .collect();
        let text = self.summarizer.summarize(&range).await?;

        let summary = AppendEvent::new(
            session.next_sequence(),
            COMPACTOR_ACTOR,
            EventPayload::Summary {
                start_sequence: plan.start,
                end_sequence: plan.end,
                text,
            },
        );
        let record = self
            .store
            .record_compaction(key, summary, plan.start, plan.end)?;
        info!(
            start = record.start_sequence,
            end = record.end_sequence,
            summary = record.summary_sequence,
            "session compacted"
        );
        Ok(CompactionOutcome::Compacted(record))
    }
}

impl std::fmt::Debug for CompactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure helpers
// ─────────────────────────────────────────────────────────────────────────────

/// End of the newest compacted range, or 0.
fn last_end(records: &[CompactionRecord]) -> u64 {
    records.iter().map(|r| r.end_sequence).max().unwrap_or(0)
}

/// Number of live, non-summary events.
pub fn live_count(session: &Session, records: &[CompactionRecord]) -> usize {
    let after = last_end(records);
    session
        .events
        .iter()
        .filter(|e| e.sequence > after && !matches!(e.payload, EventPayload::Summary { .. }))
        .count()
}

/// Select the range to summarize, or `None` when no pass is due.
pub fn plan(
    session: &Session,
    records: &[CompactionRecord],
    settings: &CompactionSettings,
) -> Option<CompactionPlan> {
    if live_count(session, records) < settings.interval {
        return None;
    }
    let start = last_end(records) + 1;
    let end = session
        .last_sequence()
        .checked_sub(settings.preserve_recent as u64)?;
    (end >= start).then_some(CompactionPlan { start, end })
}

/// The session as a reader should see it: compacted ranges replaced by
/// their summary event, everything else in sequence order.
pub fn context_view(session: &Session, records: &[CompactionRecord]) -> Vec<Event> {
    let summary_at = |sequence: u64| session.events.iter().find(|e| e.sequence == sequence);
    let mut view = Vec::with_capacity(session.events.len());
    for event in &session.events {
        if let Some(record) = records.iter().find(|r| r.covers(event.sequence)) {
            if record.start_sequence == event.sequence {
                // A summary that a later range folded in is shown by that range.
                if let Some(summary) = summary_at(record.summary_sequence)
                    .filter(|s| !records.iter().any(|r| r.covers(s.sequence)))
                {
                    view.push(summary.clone());
                }
            }
            continue;
        }
        if records.iter().any(|r| r.summary_sequence == event.sequence) {
            continue;
        }
        view.push(event.clone());
    }
    view
}
