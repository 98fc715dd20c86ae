//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so that a
//! partial settings file deserializes cleanly over the compiled defaults.

mod execution;
mod storage;

pub use execution::{
    CompactionSettings, InvocationSettings, MemoryMode, MemorySettings, OrchestrationSettings,
};
pub use storage::{StorageBackend, StorageSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root configuration, built once at process start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Session store backend and connection target.
    pub storage: StorageSettings,
    /// Invocation lifecycle: confirmation timeout, conflict retries, sweeps.
    pub invocation: InvocationSettings,
    /// Composition limits: branch timeout, loop caps.
    pub orchestration: OrchestrationSettings,
    /// History compaction trigger.
    pub compaction: CompactionSettings,
    /// Cross-session memory retrieval and ingestion.
    pub memory: MemorySettings,
    /// Tracing subscriber configuration.
    pub logging: LoggingSettings,
}

/// Tracing subscriber configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit one JSON object per line instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeSettings {
    /// Check cross-field and range constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;
        if storage.pool_size == 0 {
            return Err(invalid("storage.poolSize must be at least 1"));
        }
        if !(0.0..=1.0).contains(&storage.retry.jitter_factor) {
            return Err(invalid("storage.retry.jitterFactor must be within 0.0..=1.0"));
        }
        if storage.retry.base_delay_ms > storage.retry.max_delay_ms {
            return Err(invalid("storage.retry.baseDelayMs exceeds maxDelayMs"));
        }
        if self.invocation.confirmation_timeout_ms == 0 {
            return Err(invalid("invocation.confirmationTimeoutMs must be positive"));
        }
        if self.invocation.expiry_sweep_interval_ms == 0 {
            return Err(invalid("invocation.expirySweepIntervalMs must be positive"));
        }
        if self.orchestration.branch_timeout_ms == 0 {
            return Err(invalid("orchestration.branchTimeoutMs must be positive"));
        }
        if self.orchestration.loop_iteration_cap == 0 {
            return Err(invalid("orchestration.loopIterationCap must be at least 1"));
        }
        if self.orchestration.max_manager_rounds == 0 {
            return Err(invalid("orchestration.maxManagerRounds must be at least 1"));
        }
        if self.compaction.interval == 0 {
            return Err(invalid("compaction.interval must be at least 1"));
        }
        if self.compaction.preserve_recent >= self.compaction.interval {
            return Err(invalid("compaction.preserveRecent must be below compaction.interval"));
        }
        if self.memory.top_k == 0 {
            return Err(invalid("memory.topK must be at least 1"));
        }
        for (name, value) in [
            ("memory.minRelevance", self.memory.min_relevance),
            ("memory.dedupThreshold", self.memory.dedup_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(&format!("{name} must be within 0.0..=1.0")));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> SettingsError {
    SettingsError::InvalidValue(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RuntimeSettings::default()).unwrap();
        assert!(json["invocation"]["confirmationTimeoutMs"].is_u64());
        assert!(json["orchestration"]["loopIterationCap"].is_u64());
        assert_eq!(json["memory"]["mode"], "reactive");
        assert_eq!(json["memory"]["conceptExpansion"], true);
        assert_eq!(json["storage"]["backend"], "memory");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: RuntimeSettings =
            serde_json::from_str(r#"{"memory": {"topK": 3}}"#).unwrap();
        assert_eq!(settings.memory.top_k, 3);
        assert_eq!(settings.memory.mode, MemoryMode::Reactive);
        assert_eq!(settings.compaction, CompactionSettings::default());
    }

    #[test]
    fn rejects_zero_interval() {
        let mut settings = RuntimeSettings::default();
        settings.compaction.interval = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("interval"));
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut settings = RuntimeSettings::default();
        settings.memory.dedup_threshold = 1.5;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("dedupThreshold"));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let mut settings = RuntimeSettings::default();
        settings.storage.retry.base_delay_ms = 10_000;
        settings.storage.retry.max_delay_ms = 10;
        assert!(settings.validate().is_err());
    }
}
