//! Retry policy and backoff calculation.
//!
//! The math here is sync and portable. Stores that talk to a backend call
//! [`RetryPolicy::delay_for`] between attempts on transient failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum retries.
pub const DEFAULT_MAX_RETRIES: u32 = 4;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 50;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 2_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff parameters for transient failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based), with random jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let random: f64 = rand::random();
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate backoff delay with explicit randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`.
/// `random` should be a value in `[0.0, 1.0)`; it maps onto `[-jitter, +jitter]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_with_random_zero() {
        // random = 0.0 → jitter = 1 - 0.2 = 0.8
        let delay = calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 0.0);
        assert_eq!(delay, 800);
    }

    #[test]
    fn backoff_with_random_half() {
        let delay = calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 0.5);
        assert_eq!(delay, 1000);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(calculate_backoff_delay_with_random(1, 50, 2_000, 0.0, 0.3), 100);
        assert_eq!(calculate_backoff_delay_with_random(3, 50, 2_000, 0.0, 0.3), 400);
    }

    #[test]
    fn backoff_capped() {
        let delay = calculate_backoff_delay_with_random(20, 1000, 60_000, 0.2, 0.5);
        assert_eq!(delay, 60_000);
    }

    #[test]
    fn none_policy_has_no_retries() {
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[test]
    fn policy_deserializes_partial_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"maxRetries": 9}"#).unwrap();
        assert_eq!(policy.max_retries, 9);
        assert_eq!(policy.base_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    proptest! {
        #[test]
        fn delay_stays_within_jitter_bounds(
            attempt in 0u32..64,
            base in 1u64..10_000,
            random in 0.0f64..1.0,
        ) {
            let max = 60_000;
            let delay = calculate_backoff_delay_with_random(attempt, base, max, 0.2, random);
            prop_assert!(delay <= 72_000);
            let floor = base.min(max) * 8 / 10;
            prop_assert!(delay + 1 >= floor);
        }
    }
}
