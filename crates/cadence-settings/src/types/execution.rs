//! Invocation, orchestration, compaction, and memory settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Invocation lifecycle settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvocationSettings {
    /// How long a pending confirmation stays resumable.
    pub confirmation_timeout_ms: u64,
    /// Append attempts after an optimistic-concurrency conflict before
    /// the turn surfaces `Busy`.
    pub conflict_retries: u32,
    /// Period of the background expiry sweep.
    pub expiry_sweep_interval_ms: u64,
}

impl Default for InvocationSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: 24 * 60 * 60 * 1000,
            conflict_retries: 3,
            expiry_sweep_interval_ms: 60_000,
        }
    }
}

impl InvocationSettings {
    /// Confirmation timeout as a [`Duration`].
    #[must_use]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Expiry sweep period as a [`Duration`].
    #[must_use]
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }
}

/// Composition limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestrationSettings {
    /// Per-branch deadline for parallel fan-out.
    pub branch_timeout_ms: u64,
    /// Default for parallel nodes that do not set their own policy: when
    /// true, failed branches reach the combiner as absent instead of
    /// failing the node.
    pub tolerate_partial_failure: bool,
    /// Default iteration cap for loops that do not declare one.
    pub loop_iteration_cap: u32,
    /// Cap on decision rounds for dynamic (manager) nodes.
    pub max_manager_rounds: u32,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            branch_timeout_ms: 30_000,
            tolerate_partial_failure: false,
            loop_iteration_cap: 10,
            max_manager_rounds: 16,
        }
    }
}

impl OrchestrationSettings {
    /// Branch timeout as a [`Duration`].
    #[must_use]
    pub fn branch_timeout(&self) -> Duration {
        Duration::from_millis(self.branch_timeout_ms)
    }
}

/// History compaction trigger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    /// Whether turns trigger compaction at all.
    pub enabled: bool,
    /// Live (non-summarized) event count that triggers a pass.
    pub interval: usize,
    /// Most recent live events kept out of the summarized range.
    pub preserve_recent: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 20,
            preserve_recent: 2,
        }
    }
}

/// When the runtime consults memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// Callers (typically a step acting as a tool) search explicitly.
    #[default]
    Reactive,
    /// The engine searches with the turn input before every turn.
    Proactive,
}

/// Cross-session memory settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    /// Retrieval scheduling.
    pub mode: MemoryMode,
    /// Maximum facts returned per query.
    pub top_k: usize,
    /// Minimum relevance score for a fact to be returned.
    pub min_relevance: f64,
    /// Cosine similarity at or above which two facts are duplicates.
    pub dedup_threshold: f64,
    /// Ingest each session into memory once its turn completes.
    pub ingest_on_completion: bool,
    /// Expand query and fact terms with the built-in concept lexicon, so
    /// related wording matches without an embedder.
    pub concept_expansion: bool,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            mode: MemoryMode::Reactive,
            top_k: 5,
            min_relevance: 0.3,
            dedup_threshold: 0.92,
            ingest_on_completion: false,
            concept_expansion: true,
        }
    }
}
