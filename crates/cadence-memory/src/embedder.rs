//! Embedding capability.
//!
//! The runtime ships no model. Deployments plug in an [`Embedder`] backed
//! by whatever service they use; without one, retrieval falls back to
//! keyword overlap alone.

use async_trait::async_trait;

use crate::errors::Result;

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
