//! Reconnection backoff schedule.

use std::time::Duration;

/// Upper bound for any single reconnection delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);

/// Delay before reconnection attempt `attempt` (1-based):
/// `min(base * 2^(attempt - 1), 30s)`. Attempt 0 is treated as the first.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor)
        .unwrap_or(MAX_RECONNECT_DELAY)
        .min(MAX_RECONNECT_DELAY)
}
