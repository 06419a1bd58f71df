//! Retry configuration and backoff calculation.
//!
//! One policy serves every retry site in the engine: session restoration,
//! pending-signup lookup, and subscription confirmation polling. This
//! module holds the portable, sync-only building blocks; the async
//! execution loop lives in `contrail-engine`, which has access to tokio.

use serde::{Deserialize, Serialize};

/// Default maximum attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay between attempts in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry logic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms (default: 10000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Calculate exponential backoff delay without randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt)`, then widened by the
/// full jitter range. `attempt` is the zero-based index of the attempt
/// that just failed.
#[must_use]
pub fn backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter_range = (capped as f64) * jitter_factor;
    ((capped as f64) + jitter_range).round() as u64
}

/// Calculate backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; it maps to a
/// symmetric ±jitter around the capped exponential value.
#[must_use]
pub fn backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

impl RetryConfig {
    /// Delay to sleep after the zero-based `attempt` failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, random: f64) -> u64 {
        backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 10_000);
        assert!((config.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn config_serde_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 4000,
            jitter_factor: 0.1,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_attempts, 5);
        assert_eq!(back.base_delay_ms, 250);
    }

    #[test]
    fn backoff_exponential_growth() {
        assert_eq!(backoff_delay(0, 1000, 10_000, 0.0), 1000);
        assert_eq!(backoff_delay(1, 1000, 10_000, 0.0), 2000);
        assert_eq!(backoff_delay(2, 1000, 10_000, 0.0), 4000);
        assert_eq!(backoff_delay(3, 1000, 10_000, 0.0), 8000);
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(backoff_delay(8, 1000, 10_000, 0.0), 10_000);
    }

    #[test]
    fn backoff_high_attempt_no_overflow() {
        let delay = backoff_delay(200, 1000, 10_000, 0.2);
        assert!(delay > 0);
        assert!(delay <= 12_000);
    }

    #[test]
    fn backoff_random_bounds() {
        // random = 0.0 -> -20%, 0.5 -> exact, 1.0 -> +20%
        assert_eq!(backoff_delay_with_random(0, 1000, 10_000, 0.2, 0.0), 800);
        assert_eq!(backoff_delay_with_random(0, 1000, 10_000, 0.2, 0.5), 1000);
        assert_eq!(backoff_delay_with_random(0, 1000, 10_000, 0.2, 1.0), 1200);
    }

    #[test]
    fn delay_for_uses_config() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.delay_for(0, 0.5), 100);
        assert_eq!(config.delay_for(1, 0.5), 200);
        assert_eq!(config.delay_for(5, 0.5), 1000);
    }
}
