//! Memory service: ingestion with consolidation, and scoped retrieval.

use std::collections::BTreeSet;
use std::sync::Arc;

use cadence_core::FactId;
use cadence_events::{Session, SessionStatus};
use cadence_settings::MemorySettings;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::concepts::expand;
use crate::embedder::Embedder;
use crate::errors::{MemoryError, Result};
use crate::extractor::{DefaultExtractor, FactExtractor};
use crate::normalize::{cosine_similarity, keyword_overlap, keywords, normalize_text};
use crate::store::FactStore;
use crate::types::{IngestReport, MemoryFact, ScoredFact};

/// Extracts facts from completed sessions and answers scoped queries.
pub struct MemoryService {
    store: Arc<dyn FactStore>,
    embedder: Option<Arc<dyn Embedder>>,
    extractor: Arc<dyn FactExtractor>,
    settings: MemorySettings,
}

impl std::fmt::Debug for MemoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryService")
            .field("embedder", &self.embedder.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MemoryService {
    /// Service with the default extractor and no embedder.
    #[must_use]
    pub fn new(store: Arc<dyn FactStore>, settings: MemorySettings) -> Self {
        Self {
            store,
            embedder: None,
            extractor: Arc::new(DefaultExtractor),
            settings,
        }
    }

    /// Enable vector similarity for dedup and retrieval.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replace the fact extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn FactExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Active settings.
    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    /// Extract, consolidate, and store facts from a completed session.
    #[instrument(skip_all, fields(session = %session.key))]
    pub async fn ingest(&self, session: &Session) -> Result<IngestReport> {
        if session.status != SessionStatus::Completed {
            return Err(MemoryError::SessionNotCompleted(session.key.to_string()));
        }
        let key = &session.key;
        let candidates = self.extractor.extract(session);

        // Embed everything up front so an embedder failure writes nothing.
        let mut embedded = Vec::with_capacity(candidates.len());
        for text in candidates {
            let embedding = match &self.embedder {
                Some(embedder) => Some(embedder.embed(&text).await?),
                None => None,
            };
            embedded.push((text, embedding));
        }

        let mut known = self.store.list(&key.app, &key.user)?;
        let mut report = IngestReport::default();
        for (text, embedding) in embedded {
            let normalized = normalize_text(&text);
            if self.is_duplicate(&known, &normalized, embedding.as_deref()) {
                report.duplicates += 1;
                continue;
            }
            let fact = MemoryFact {
                id: FactId::new(),
                app: key.app.clone(),
                user: key.user.clone(),
                source_session: key.session_id.clone(),
                text,
                normalized,
                embedding,
                created_at: Utc::now(),
            };
            self.store.insert(&fact)?;
            known.push(fact);
            report.stored += 1;
        }

        info!(stored = report.stored, duplicates = report.duplicates, "memory ingested");
        Ok(report)
    }

    fn is_duplicate(
        &self,
        known: &[MemoryFact],
        normalized: &str,
        embedding: Option<&[f32]>,
    ) -> bool {
        known.iter().any(|fact| {
            if fact.normalized == normalized {
                return true;
            }
            match (embedding, fact.embedding.as_deref()) {
                (Some(a), Some(b)) => {
                    f64::from(cosine_similarity(a, b)) >= self.settings.dedup_threshold
                }
                _ => false,
            }
        })
    }

    /// Keywords of `text`, concept-expanded when enabled.
    fn terms(&self, text: &str) -> BTreeSet<String> {
        let terms = keywords(text);
        if self.settings.concept_expansion {
            expand(&terms)
        } else {
            terms
        }
    }

    /// Facts of one (app, user) scope relevant to `query`, best first.
    #[instrument(skip(self, query))]
    pub async fn search(
        &self,
        app: &str,
        user: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredFact>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let facts = self.store.list(app, user)?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }

        let query_terms = self.terms(query);
        let query_embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(query).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "query embedding failed, scoring by keywords only");
                    None
                }
            },
            None => None,
        };

        let mut hits: Vec<ScoredFact> = facts
            .iter()
            .filter_map(|fact| {
                let overlap = keyword_overlap(&query_terms, &self.terms(&fact.text));
                let cosine = match (query_embedding.as_deref(), fact.embedding.as_deref()) {
                    (Some(q), Some(f)) => cosine_similarity(q, f),
                    _ => 0.0,
                };
                let score = overlap.max(cosine);
                (f64::from(score) >= self.settings.min_relevance)
                    .then(|| ScoredFact::new(fact, score))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        hits.truncate(top_k);
        debug!(candidates = facts.len(), returned = hits.len(), "memory searched");
        Ok(hits)
    }
}
