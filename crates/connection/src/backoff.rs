//! Delay schedule for the initial attempt sequence.

use std::time::Duration;

use crate::types::RetryConfig;

/// Delay to wait after the failed attempt with the given zero-based index.
///
/// `min(initial_delay * multiplier^index, max_delay)`. Deterministic: no
/// jitter is applied to the owned sequence.
pub fn next_delay(attempt_index: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
    let initial_ms = config.initial_delay.as_millis() as f64;
    let max_ms = config.max_delay.as_millis() as f64;

    let scaled = initial_ms * config.backoff_multiplier.powi(exponent);
    // Overflow to infinity lands here too.
    if !(scaled < max_ms) {
        return config.max_delay;
    }
    Duration::from_millis(scaled.round() as u64)
}

/// Every delay a full sequence would sleep: one between each pair of
/// attempts, none after the last.
pub fn schedule(config: &RetryConfig) -> impl Iterator<Item = Duration> + '_ {
    (0..config.max_initial_attempts.saturating_sub(1)).map(move |i| next_delay(i, config))
}
