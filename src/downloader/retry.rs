use std::time::Duration;

/// Delay before the next attempt: `base * 2^retry_count`, capped at `max`.
///
/// `retry_count` is 0-based (0 = delay before the second attempt). The
/// multiplication saturates instead of overflowing.
pub fn retry_delay(retry_count: u32, base: Duration, max: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(retry_count);
    base.saturating_mul(multiplier).min(max)
}
