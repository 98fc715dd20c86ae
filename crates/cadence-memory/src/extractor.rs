//! Candidate fact extraction from a completed session.

use cadence_events::{EventPayload, Session, value_text};
use serde_json::Value;

/// State key under which steps may record explicit facts.
pub const FACTS_STATE_KEY: &str = "facts";

/// Produces candidate fact texts from a session, in a deterministic order.
pub trait FactExtractor: Send + Sync {
    /// Extract candidates. Order is significant: earlier candidates win
    /// deduplication against later ones.
    fn extract(&self, session: &Session) -> Vec<String>;
}

/// Extracts user inputs and step outputs in log order, then string values
/// stored under the `facts` state key.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExtractor;

impl FactExtractor for DefaultExtractor {
    fn extract(&self, session: &Session) -> Vec<String> {
        let mut out: Vec<String> = session
            .events
            .iter()
            .filter_map(|event| match &event.payload {
                EventPayload::Input { content } | EventPayload::Output { content } => {
                    value_text(content)
                }
                _ => None,
            })
            .collect();

        match session.state.get(FACTS_STATE_KEY) {
            Some(Value::Array(items)) => out.extend(items.iter().filter_map(value_text)),
            Some(other) => out.extend(value_text(other)),
            None => {}
        }

        out.into_iter()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_events::{Event, SessionKey};
    use chrono::Utc;
    use serde_json::json;

    fn event(sequence: u64, payload: EventPayload) -> Event {
        Event {
            sequence,
            actor: "test".into(),
            payload,
            timestamp: Utc::now(),
            invocation_id: None,
            node: None,
            state_delta: serde_json::Map::new(),
        }
    }

    #[test]
    fn extracts_inputs_outputs_and_state_facts_in_order() {
        let mut session = Session::new(SessionKey::new("a", "u", "s"));
        session.events = vec![
            event(1, EventPayload::Input { content: json!("My favorite color is Blue-Green") }),
            event(
                2,
                EventPayload::ToolCall { name: "lookup".into(), arguments: json!({}) },
            ),
            event(3, EventPayload::Output { content: json!({"text": "Noted."}) }),
            event(4, EventPayload::Output { content: Value::Null }),
            event(5, EventPayload::Completion { output: json!("done") }),
        ];
        let _ = session
            .state
            .insert(FACTS_STATE_KEY.into(), json!(["lives in Lisbon", "  ", 42]));

        let facts = DefaultExtractor.extract(&session);
        assert_eq!(
            facts,
            vec!["My favorite color is Blue-Green", "Noted.", "lives in Lisbon", "42"]
        );
    }

    #[test]
    fn single_string_fact_in_state() {
        let mut session = Session::new(SessionKey::new("a", "u", "s"));
        let _ = session.state.insert(FACTS_STATE_KEY.into(), json!("allergic to nuts"));
        assert_eq!(DefaultExtractor.extract(&session), vec!["allergic to nuts"]);
    }
}
