//! Summarizers turn a range of events into one condensed text.

use async_trait::async_trait;
use cadence_events::Event;

use crate::errors::Result;

/// Default per-line character budget of [`ExtractiveSummarizer`].
pub const DEFAULT_LINE_CHARS: usize = 160;

/// Default total character budget of [`ExtractiveSummarizer`].
pub const DEFAULT_MAX_CHARS: usize = 4_000;

/// Produces the text of a summary event.
///
/// Implementations may call out to a model; the runtime only requires the
/// result to be a string.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `events`, which are contiguous and in sequence order.
    async fn summarize(&self, events: &[Event]) -> Result<String>;
}

/// Deterministic summarizer that extracts the text of each event.
///
/// Each event with readable content contributes one `kind: text` line,
/// truncated to `line_chars`. Protocol-only events (decisions, loop
/// markers) are counted but not quoted. The output for a given input is
/// always the same.
#[derive(Clone, Debug)]
pub struct ExtractiveSummarizer {
    line_chars: usize,
    max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            line_chars: DEFAULT_LINE_CHARS,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl ExtractiveSummarizer {
    /// Create a summarizer with the default budgets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the character budgets.
    #[must_use]
    pub fn with_limits(line_chars: usize, max_chars: usize) -> Self {
        Self {
            line_chars: line_chars.max(1),
            max_chars: max_chars.max(1),
        }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, events: &[Event]) -> Result<String> {
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(String::new());
        };

        let mut out = format!(
            "Summary of events {}-{} ({} events).",
            first.sequence,
            last.sequence,
            events.len()
        );
        for event in events {
            let Some(text) = event.payload.text() else {
                continue;
            };
            let line = format!("\n{}: {}", event.payload.kind(), truncate(&text, self.line_chars));
            if out.len() + line.len() > self.max_chars {
                out.push_str("\n...");
                break;
            }
            out.push_str(&line);
        }
        Ok(out)
    }
}

/// Truncate on a char boundary, appending an ellipsis when shortened.
fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
