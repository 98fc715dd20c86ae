//! In-memory [`FactStore`].

use std::collections::HashMap;

use parking_lot::RwLock;

use super::FactStore;
use crate::errors::Result;
use crate::types::MemoryFact;

type Scope = (String, String);

/// Process-local fact store.
#[derive(Debug, Default)]
pub struct MemoryFactStore {
    facts: RwLock<HashMap<Scope, Vec<MemoryFact>>>,
}

impl MemoryFactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FactStore for MemoryFactStore {
    fn insert(&self, fact: &MemoryFact) -> Result<()> {
        self.facts
            .write()
            .entry((fact.app.clone(), fact.user.clone()))
            .or_default()
            .push(fact.clone());
        Ok(())
    }

    fn list(&self, app: &str, user: &str) -> Result<Vec<MemoryFact>> {
        let mut facts = self
            .facts
            .read()
            .get(&(app.to_string(), user.to_string()))
            .cloned()
            .unwrap_or_default();
        facts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{FactId, SessionId};
    use chrono::Utc;

    fn fact(app: &str, user: &str, text: &str) -> MemoryFact {
        MemoryFact {
            id: FactId::new(),
            app: app.into(),
            user: user.into(),
            source_session: SessionId::new(),
            text: text.into(),
            normalized: text.to_lowercase(),
            embedding: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn list_is_scoped() {
        let store = MemoryFactStore::new();
        store.insert(&fact("shop", "u1", "a")).unwrap();
        store.insert(&fact("shop", "u2", "b")).unwrap();
        store.insert(&fact("bank", "u1", "c")).unwrap();

        let u1 = store.list("shop", "u1").unwrap();
        assert_eq!(u1.len(), 1);
        assert_eq!(u1[0].text, "a");
        assert!(store.list("shop", "u3").unwrap().is_empty());
    }
}
