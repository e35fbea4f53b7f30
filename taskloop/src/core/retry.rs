//! Exponential backoff arithmetic for retried model calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per model profile, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_factor.max(1.0).powi(exponent);
        let capped = if base.is_finite() {
            (base as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }

    /// Delay for an error message, honoring a `Retry-After: N` hint when present.
    pub fn delay_for(&self, attempt: u32, error_message: &str) -> Duration {
        match parse_retry_after(error_message) {
            Some(hint) => hint.min(Duration::from_millis(self.max_delay_ms)),
            None => self.delay_after(attempt),
        }
    }
}

/// Parse a `retry-after: N` seconds hint out of a provider error message.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let pos = lower.find("retry-after")?;
    lower[pos..].split_whitespace().skip(1).find_map(|word| {
        word.trim_end_matches(|ch: char| !ch.is_ascii_digit())
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    })
}
