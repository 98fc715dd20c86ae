//! Replay journal: what an invocation has already committed, by node path.
//!
//! Re-entering an invocation (after a resume, or `recover` after a crash)
//! walks the composition from the root again. Nodes found here are not
//! re-executed; their recorded results are reused. A committed `Completion`
//! is terminal: nothing is walked again, only post-completion work runs.

use std::collections::HashMap;

use cadence_events::{Event, EventPayload, LoopOutcome};
use serde_json::Value;

use super::executor::LoopReport;

/// A committed node result.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Entry {
    /// A step output (or a dynamic sub-step's tool result).
    Output {
        /// The recorded value.
        value: Value,
        /// The committing event.
        event: Box<Event>,
    },
    /// A step failure.
    Failed(String),
    /// A dynamic round's choice.
    Round(Vec<String>),
    /// A loop or dynamic node finished.
    Finished {
        outcome: LoopOutcome,
        iterations: u32,
    },
}

/// Committed results of one invocation.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    input: Value,
    entries: HashMap<String, Entry>,
    loops: Vec<LoopReport>,
    completion: Option<Value>,
}

impl Journal {
    /// Build from the invocation's events, in log order.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut journal = Self::default();
        for event in events {
            if let EventPayload::Input { content } = &event.payload {
                journal.input = content.clone();
                continue;
            }
            if let EventPayload::Completion { output } = &event.payload {
                journal.completion = Some(output.clone());
                continue;
            }
            let Some(node) = &event.node else { continue };
            let entry = match &event.payload {
                EventPayload::Output { content } => Entry::Output {
                    value: content.clone(),
                    event: Box::new(event.clone()),
                },
                EventPayload::ToolResult { result, .. } => Entry::Output {
                    value: result.clone(),
                    event: Box::new(event.clone()),
                },
                EventPayload::StepFailure { message } => Entry::Failed(message.clone()),
                EventPayload::ToolCall { arguments, .. } => Entry::Round(round_steps(arguments)),
                EventPayload::LoopFinished {
                    outcome,
                    iterations,
                } => {
                    journal.loops.push(LoopReport {
                        node: node.clone(),
                        outcome: *outcome,
                        iterations: *iterations,
                    });
                    Entry::Finished {
                        outcome: *outcome,
                        iterations: *iterations,
                    }
                }
                _ => continue,
            };
            let _ = journal.entries.insert(node.clone(), entry);
        }
        journal
    }

    /// The turn input.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Result committed at exactly this path.
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Whether anything was committed at or below `path`.
    pub fn has_prefix(&self, path: &str) -> bool {
        self.entries.keys().any(|k| {
            k.strip_prefix(path)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Output of a committed `Completion`, if the turn got that far.
    pub fn completion(&self) -> Option<&Value> {
        self.completion.as_ref()
    }

    /// Loop reports in commit order.
    pub fn loops(&self) -> Vec<LoopReport> {
        self.loops.clone()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Step names recorded in a dynamic round's `ToolCall` arguments.
pub(crate) fn round_steps(arguments: &Value) -> Vec<String> {
    arguments
        .get("steps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(sequence: u64, node: Option<&str>, payload: EventPayload) -> Event {
        Event {
            sequence,
            actor: "t".into(),
            payload,
            timestamp: Utc::now(),
            invocation_id: None,
            node: node.map(str::to_string),
            state_delta: serde_json::Map::new(),
        }
    }

    #[test]
    fn builds_entries_by_node() {
        let events = vec![
            event(1, None, EventPayload::Input { content: json!("order 50 units") }),
            event(2, Some("flow/0:a"), EventPayload::Output { content: json!(1) }),
            event(
                3,
                Some("flow/1:order"),
                EventPayload::ConfirmationRequest { hint: "ok?".into(), payload: json!({}) },
            ),
            event(4, Some("mgr/r1"), EventPayload::ToolCall {
                name: "mgr".into(),
                arguments: json!({"round": 1, "steps": ["lookup", "price"]}),
            }),
            event(5, Some("mgr/r1/0:lookup"), EventPayload::ToolResult {
                name: "lookup".into(),
                result: json!("found"),
            }),
            event(6, Some("mgr/r1/1:price"), EventPayload::StepFailure { message: "boom".into() }),
            event(7, Some("loop"), EventPayload::LoopFinished {
                outcome: LoopOutcome::Capped,
                iterations: 3,
            }),
        ];
        let journal = Journal::from_events(&events);

        assert_eq!(journal.input(), &json!("order 50 units"));
        assert_eq!(journal.len(), 5);
        assert!(matches!(journal.get("flow/0:a"), Some(Entry::Output { value, .. }) if *value == json!(1)));
        assert!(journal.get("flow/1:order").is_none());
        assert_eq!(
            journal.get("mgr/r1"),
            Some(&Entry::Round(vec!["lookup".into(), "price".into()]))
        );
        assert!(matches!(journal.get("mgr/r1/0:lookup"), Some(Entry::Output { value, .. }) if *value == json!("found")));
        assert_eq!(journal.get("mgr/r1/1:price"), Some(&Entry::Failed("boom".into())));
        assert_eq!(
            journal.get("loop"),
            Some(&Entry::Finished { outcome: LoopOutcome::Capped, iterations: 3 })
        );
        assert!(journal.completion().is_none());
    }

    #[test]
    fn completion_is_terminal() {
        let events = vec![
            event(1, None, EventPayload::Input { content: json!("hi") }),
            event(2, Some("loop"), EventPayload::LoopFinished {
                outcome: LoopOutcome::Satisfied,
                iterations: 2,
            }),
            event(3, None, EventPayload::Completion { output: json!({"done": true}) }),
        ];
        let journal = Journal::from_events(&events);

        assert_eq!(journal.completion(), Some(&json!({"done": true})));
        assert_eq!(
            journal.loops(),
            vec![LoopReport { node: "loop".into(), outcome: LoopOutcome::Satisfied, iterations: 2 }]
        );
    }

    #[test]
    fn prefix_matches_whole_segments_only() {
        let events = vec![event(1, Some("l/body@10/0:x"), EventPayload::Output { content: json!(1) })];
        let journal = Journal::from_events(&events);
        assert!(journal.has_prefix("l/body@10"));
        assert!(!journal.has_prefix("l/body@1"));
        assert!(journal.has_prefix("l"));
    }
}
