//! Memory data model.

use cadence_core::{FactId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable piece of knowledge extracted from a completed session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFact {
    /// Fact id.
    pub id: FactId,
    /// Application scope.
    pub app: String,
    /// Owning user.
    pub user: String,
    /// Session the fact was extracted from.
    pub source_session: SessionId,
    /// Fact text as extracted.
    pub text: String,
    /// Normalized text used for exact-duplicate detection.
    pub normalized: String,
    /// Embedding, when an embedder was configured at ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
}

/// A search hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredFact {
    /// Fact id.
    pub id: FactId,
    /// Fact text.
    pub text: String,
    /// Relevance in `0.0..=1.0`.
    pub score: f32,
    /// Session the fact came from.
    pub source_session: SessionId,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
}

impl ScoredFact {
    /// Pair a fact with its score.
    pub fn new(fact: &MemoryFact, score: f32) -> Self {
        Self {
            id: fact.id.clone(),
            text: fact.text.clone(),
            score,
            source_session: fact.source_session.clone(),
            created_at: fact.created_at,
        }
    }
}

/// Outcome of one ingestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// New facts written.
    pub stored: usize,
    /// Candidates dropped as duplicates.
    pub duplicates: usize,
}
