//! # cadence-memory
//!
//! Long-term memory shared across the sessions of one (app, user) scope.
//!
//! A completed session is run through a [`FactExtractor`]; each candidate is
//! normalized, optionally embedded, and dropped when it duplicates a known
//! fact (same normalized text, or cosine similarity at or above the dedup
//! threshold). [`MemoryService::search`] scores facts by the better of
//! keyword overlap and cosine similarity and never crosses scopes. Keywords
//! are expanded through a small concept lexicon by default, so related
//! wording still matches when no embedder is configured.
//!
//! Facts live in a [`FactStore`]: in memory, or in the `facts` table of the
//! session database.

#![deny(unsafe_code)]

pub mod concepts;
pub mod embedder;
pub mod errors;
pub mod extractor;
pub mod normalize;
pub mod service;
pub mod store;
pub mod types;

pub use embedder::Embedder;
pub use errors::{MemoryError, Result};
pub use extractor::{DefaultExtractor, FACTS_STATE_KEY, FactExtractor};
pub use service::MemoryService;
pub use store::{FactStore, MemoryFactStore, SqliteFactStore, open_fact_store};
pub use types::{IngestReport, MemoryFact, ScoredFact};
