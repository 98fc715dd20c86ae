//! # cadence-settings
//!
//! Runtime configuration for Cadence, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RuntimeSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `CADENCE_*` overrides (highest priority)
//!
//! There is no process-wide singleton. The embedding process builds one
//! [`RuntimeSettings`] at startup and hands it (by reference or `Arc`) to
//! the store, engine, compaction, and memory services.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
