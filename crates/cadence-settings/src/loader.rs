//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RuntimeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `CADENCE_*` environment variable overrides (highest priority)
//! 4. Validate ranges
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{MemoryMode, RuntimeSettings, StorageBackend};

/// Resolve the path to the settings file.
///
/// `CADENCE_SETTINGS` wins; otherwise `~/.cadence/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("CADENCE_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cadence").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RuntimeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values
/// are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RuntimeSettings> {
    let defaults = serde_json::to_value(RuntimeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RuntimeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut RuntimeSettings) {
    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("CADENCE_STORAGE_BACKEND") {
        match parse_backend(&v) {
            Some(backend) => settings.storage.backend = backend,
            None => tracing::warn!(key = "CADENCE_STORAGE_BACKEND", value = %v, "unknown storage backend, ignoring"),
        }
    }
    if let Some(v) = read_env_string("CADENCE_STORAGE_PATH") {
        settings.storage.path = v;
    }
    if let Some(v) = read_env_u64("CADENCE_STORAGE_POOL_SIZE", 1, 256) {
        #[allow(clippy::cast_possible_truncation)]
        let size = v as u32;
        settings.storage.pool_size = size;
    }

    // ── Invocation ──────────────────────────────────────────────────
    if let Some(v) = read_env_u64("CADENCE_CONFIRMATION_TIMEOUT_MS", 1, 30 * 24 * 3_600_000) {
        settings.invocation.confirmation_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("CADENCE_CONFLICT_RETRIES", 0, 100) {
        #[allow(clippy::cast_possible_truncation)]
        let retries = v as u32;
        settings.invocation.conflict_retries = retries;
    }

    // ── Orchestration ───────────────────────────────────────────────
    if let Some(v) = read_env_u64("CADENCE_BRANCH_TIMEOUT_MS", 1, 3_600_000) {
        settings.orchestration.branch_timeout_ms = v;
    }
    if let Some(v) = read_env_bool("CADENCE_TOLERATE_PARTIAL_FAILURE") {
        settings.orchestration.tolerate_partial_failure = v;
    }
    if let Some(v) = read_env_u64("CADENCE_LOOP_ITERATION_CAP", 1, 10_000) {
        #[allow(clippy::cast_possible_truncation)]
        let cap = v as u32;
        settings.orchestration.loop_iteration_cap = cap;
    }

    // ── Compaction ──────────────────────────────────────────────────
    if let Some(v) = read_env_bool("CADENCE_COMPACTION_ENABLED") {
        settings.compaction.enabled = v;
    }
    if let Some(v) = read_env_usize("CADENCE_COMPACTION_INTERVAL", 1, 100_000) {
        settings.compaction.interval = v;
    }

    // ── Memory ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("CADENCE_MEMORY_MODE") {
        match parse_memory_mode(&v) {
            Some(mode) => settings.memory.mode = mode,
            None => tracing::warn!(key = "CADENCE_MEMORY_MODE", value = %v, "unknown memory mode, ignoring"),
        }
    }
    if let Some(v) = read_env_bool("CADENCE_MEMORY_CONCEPT_EXPANSION") {
        settings.memory.concept_expansion = v;
    }
    if let Some(v) = read_env_usize("CADENCE_MEMORY_TOP_K", 1, 1_000) {
        settings.memory.top_k = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("CADENCE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("CADENCE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a storage backend name.
pub fn parse_backend(val: &str) -> Option<StorageBackend> {
    match val.to_lowercase().as_str() {
        "memory" | "in-memory" => Some(StorageBackend::Memory),
        "sqlite" => Some(StorageBackend::Sqlite),
        _ => None,
    }
}

/// Parse a memory mode name.
pub fn parse_memory_mode(val: &str) -> Option<MemoryMode> {
    match val.to_lowercase().as_str() {
        "reactive" => Some(MemoryMode::Reactive),
        "proactive" => Some(MemoryMode::Proactive),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
